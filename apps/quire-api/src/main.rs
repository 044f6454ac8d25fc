use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = quire_api::Args::parse();

	quire_api::run(args).await
}
