use clap::Parser;

use quire_eval::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	quire_eval::run(args).await
}
