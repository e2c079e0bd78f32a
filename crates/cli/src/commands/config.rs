use std::path::Path;

use anyhow::{Context, Result};
use lab::LabConfig;
use tracing::info;

use crate::output::{OutputFormat, render_value};

pub fn execute(path: Option<&Path>, format: OutputFormat) -> Result<()> {
	let config = match path {
		Some(path) => {
			info!(target = "lab", path = %path.display(), "loading config");
			LabConfig::load(path).with_context(|| format!("loading config {}", path.display()))?
		}
		None => LabConfig::default(),
	};
	println!("{}", render_value(format, &config)?.trim_end());
	Ok(())
}
