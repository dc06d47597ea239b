use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use skill_eval_core::expr::{evaluate_request, AssertionRequest};
use skill_eval_core::{calibrate, EvalConfig, EvalSummary};
use tokio::io::AsyncReadExt;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "skill-eval", about = "Grade and aggregate agent skill evaluations")]
struct Cli {
	/// Emit newline-delimited JSON logs on stderr
	#[arg(long, global = true, action = ArgAction::SetTrue)]
	log_json: bool,

	/// Default log level when RUST_LOG is not set
	#[arg(long, global = true, default_value = "info")]
	log_level: Level,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run an eval.yaml and print the summary table
	Run(RunArgs),
	/// Load and validate an eval.yaml without running it
	Check(CheckArgs),
	/// Evaluate assertions from a JSON request on stdin
	Assert,
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// Path to eval.yaml
	#[arg(long, default_value = "eval.yaml")]
	config: PathBuf,

	/// Override the number of trials per task
	#[arg(long)]
	trials: Option<usize>,

	/// Override the number of trials in flight per task
	#[arg(long)]
	concurrency: Option<usize>,

	/// Pass the suite when at least this fraction of tasks passed
	#[arg(long)]
	partial_pass_threshold: Option<f64>,

	/// Output JSON summary to a file
	#[arg(long)]
	json_out: Option<PathBuf>,

	/// Compare a human grader with an automated one, as HUMAN:AUTOMATED
	#[arg(long, value_parser = parse_grader_pair)]
	calibrate: Vec<(String, String)>,
}

fn parse_grader_pair(s: &str) -> Result<(String, String), String> {
	match s.split_once(':') {
		Some((human, automated)) if !human.is_empty() && !automated.is_empty() => {
			Ok((human.to_string(), automated.to_string()))
		}
		_ => Err(format!("expected HUMAN:AUTOMATED grader names, got '{s}'")),
	}
}

#[derive(Debug, Clone, Parser)]
struct CheckArgs {
	/// Path to eval.yaml
	#[arg(long, default_value = "eval.yaml")]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.log_json, cli.log_level);
	let passed = match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::Check(args) => check(args).await?,
		Commands::Assert => assert().await?,
	};
	if !passed {
		std::process::exit(1);
	}
	Ok(())
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing(json: bool, level: Level) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

	if json {
		tracing_subscriber::registry()
			.with(env_filter)
			.with(fmt::layer().with_target(false).with_writer(std::io::stderr).json())
			.try_init()
			.ok();
	} else {
		tracing_subscriber::registry()
			.with(env_filter)
			.with(fmt::layer().with_target(false).with_writer(std::io::stderr))
			.try_init()
			.ok();
	}
}

async fn run(args: RunArgs) -> Result<bool> {
	let mut config = EvalConfig::load(&args.config).await?;
	if let Some(trials) = args.trials {
		config.trials = trials;
	}
	if let Some(concurrency) = args.concurrency {
		config.concurrency = concurrency;
	}
	if let Some(threshold) = args.partial_pass_threshold {
		config.aggregation.partial_pass_threshold = Some(threshold);
	}

	let eval = config.into_builder().await?.build()?;
	let summary = eval.run().await?;
	println!("{}", summary.summary_table());
	for (human, automated) in &args.calibrate {
		print_calibration(&summary, human, automated);
	}

	if let Some(path) = args.json_out {
		let json = serde_json::to_string_pretty(&summary)?;
		tokio::fs::write(&path, json)
			.await
			.with_context(|| format!("Failed to write {:?}", path))?;
	}

	Ok(summary.passed)
}

fn print_calibration(summary: &EvalSummary, human: &str, automated: &str) {
	match calibrate(summary.tasks.iter().flat_map(|t| &t.trials), human, automated) {
		Some(report) => println!(
			"Calibration {} vs {}: {} sample(s), mean absolute error {:.3}, agreement {:.0}%",
			report.human,
			report.automated,
			report.samples,
			report.mean_absolute_error,
			report.agreement_rate * 100.0
		),
		None => tracing::warn!(human, automated, "no trial graded by both; skipping calibration"),
	}
}

async fn check(args: CheckArgs) -> Result<bool> {
	let config = EvalConfig::load(&args.config).await?;
	let metrics = config.metrics.len();
	let eval = config.into_builder().await?.build()?;
	println!(
		"{}: {} task(s), {} grader(s), {} eval-wide metric(s), {} trial(s) per task",
		eval.name(),
		eval.task_ids().len(),
		eval.grader_count(),
		metrics,
		eval.trials()
	);
	Ok(true)
}

async fn assert() -> Result<bool> {
	let mut input = String::new();
	tokio::io::stdin()
		.read_to_string(&mut input)
		.await
		.context("Failed to read assertion request from stdin")?;
	let request: AssertionRequest = serde_json::from_str(&input).context("Invalid assertion request")?;
	let response = evaluate_request(&request);
	println!("{}", serde_json::to_string(&response)?);
	Ok(true)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_calibrate_flag_parses_pairs() {
		let cli = Cli::try_parse_from(["skill-eval", "run", "--calibrate", "human:judge", "--calibrate", "h2:regex"]).unwrap();
		let Commands::Run(args) = cli.command else {
			panic!("expected run");
		};
		assert_eq!(
			args.calibrate,
			vec![("human".to_string(), "judge".to_string()), ("h2".to_string(), "regex".to_string())]
		);
		assert!(Cli::try_parse_from(["skill-eval", "run", "--calibrate", "human"]).is_err());
		assert!(Cli::try_parse_from(["skill-eval", "run", "--calibrate", ":judge"]).is_err());
	}
}
