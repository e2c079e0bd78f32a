mod config;
pub mod replay;

use anyhow::Result;

use crate::cli::Commands;
use crate::output::OutputFormat;

pub async fn dispatch(command: Commands, format: OutputFormat) -> Result<()> {
	match command {
		Commands::Replay { trace, config } => replay::execute(&trace, config.as_deref(), format).await,
		Commands::Config { config } => config::execute(config.as_deref(), format),
	}
}
