use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "lab")]
#[command(about = "Interaction Lab - attribute page telemetry to user interactions")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::default())]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Replay a recorded trace through the engine and print the result
	#[command(alias = "r")]
	Replay {
		/// Trace file (JSON)
		trace: PathBuf,
		/// Engine config file; overrides the trace's own config block
		#[arg(short, long, value_name = "FILE")]
		config: Option<PathBuf>,
	},

	/// Print the effective engine configuration
	Config {
		/// Partial config file merged over the defaults
		#[arg(short, long, value_name = "FILE")]
		config: Option<PathBuf>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn replay_takes_trace_and_config() {
		let cli = Cli::try_parse_from(["lab", "replay", "trace.json", "--config", "lab.json"]).unwrap();
		match cli.command {
			Commands::Replay { trace, config } => {
				assert_eq!(trace, PathBuf::from("trace.json"));
				assert_eq!(config, Some(PathBuf::from("lab.json")));
			}
			other => panic!("unexpected command: {other:?}"),
		}
		assert_eq!(cli.format, OutputFormat::Text);
	}

	#[test]
	fn format_and_verbosity_are_global() {
		let cli = Cli::try_parse_from(["lab", "config", "-f", "json", "-vv"]).unwrap();
		assert_eq!(cli.format, OutputFormat::Json);
		assert_eq!(cli.verbose, 2);
		assert!(matches!(cli.command, Commands::Config { config: None }));
	}

	#[test]
	fn replay_requires_a_trace() {
		assert!(Cli::try_parse_from(["lab", "replay"]).is_err());
	}

	#[test]
	fn unknown_format_is_rejected() {
		assert!(Cli::try_parse_from(["lab", "config", "-f", "yaml"]).is_err());
	}
}
