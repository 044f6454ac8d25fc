pub mod gate;

use std::{fs, path::PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre;
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;

use quire_service::{
	CaptureRequest, Collaborators, QuireService, ReplayRequest, freeze::ReplayMode,
};

#[derive(Debug, Parser)]
#[command(
	version = quire_cli::VERSION,
	rename_all = "kebab",
	styles = quire_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE", global = true, default_value = "quire.toml")]
	pub config: PathBuf,
	/// Writes the JSON report here instead of stdout.
	#[arg(long, value_name = "FILE", global = true)]
	pub out: Option<PathBuf>,
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Retrieves live candidates, runs the pipeline, and freezes the run.
	Freeze {
		#[arg(long, short = 'q')]
		query: String,
		#[arg(long)]
		role: Option<String>,
		#[arg(long, value_name = "N")]
		top_k: Option<u32>,
		#[arg(long)]
		notes: Option<String>,
		/// Pins the recency reference time (RFC 3339).
		#[arg(long, value_name = "TIMESTAMP")]
		as_of: Option<String>,
	},
	/// Replays one frozen trace and reports hash and candidate agreement.
	Replay {
		#[arg(long, value_name = "ID")]
		trace_id: String,
		#[arg(long, default_value = "offline")]
		mode: ReplayMode,
		#[arg(long)]
		seed: Option<u64>,
	},
	/// Replays every trace listed in a gate file and fails on any breach.
	Gate {
		#[arg(long, short = 'g', value_name = "FILE")]
		gate: PathBuf,
	},
	/// Lists frozen trace ids.
	List,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let cfg = quire_config::load(&args.config)?;
	let filter = EnvFilter::new(cfg.service.log_level.clone());

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

	let service = QuireService::new(cfg.clone(), Collaborators::from_config(&cfg));

	match &args.command {
		Command::Freeze { query, role, top_k, notes, as_of } => {
			let as_of = as_of
				.as_deref()
				.map(|raw| OffsetDateTime::parse(raw, &Rfc3339))
				.transpose()
				.map_err(|err| eyre::eyre!("--as-of must be an RFC 3339 timestamp: {err}."))?;
			let frozen = service
				.capture(CaptureRequest {
					query: query.clone(),
					role: role.clone(),
					top_k: *top_k,
					notes: notes.clone(),
					as_of,
				})
				.await?;

			tracing::info!(trace_id = %frozen.trace_id, "Trace frozen.");

			emit(&args, &frozen)
		},
		Command::Replay { trace_id, mode, seed } => {
			let report = service
				.replay(ReplayRequest { trace_id: trace_id.clone(), mode: *mode, seed: *seed })
				.await?;

			emit(&args, &report)
		},
		Command::Gate { gate } => {
			let gate_file = gate::load_gate_file(gate)?;
			let report = gate::run_gate(&service, &gate_file).await?;
			let report = gate::GateReport {
				config_path: args.config.display().to_string(),
				gate_path: gate.display().to_string(),
				..report
			};

			emit(&args, &report)?;

			if !report.summary.ok {
				return Err(eyre::eyre!(
					"Replay regression gate breached: {}/{} traces failed.",
					report.summary.breached_count,
					report.summary.trace_count
				));
			}

			Ok(())
		},
		Command::List => {
			let ids = service.freeze.list().await?;

			emit(&args, &serde_json::json!({ "trace_ids": ids }))
		},
	}
}

fn emit<T>(args: &Args, value: &T) -> color_eyre::Result<()>
where
	T: Serialize,
{
	let json = serde_json::to_string_pretty(value)?;

	if let Some(out_path) = &args.out {
		fs::write(out_path, &json)?;
	} else {
		println!("{json}");
	}

	Ok(())
}
