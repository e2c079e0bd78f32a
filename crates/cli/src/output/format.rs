use clap::ValueEnum;

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text (default)
	#[default]
	Text,
	/// Pretty-printed JSON document
	Json,
	/// Newline-delimited JSON, one record per line
	Ndjson,
}

impl std::str::FromStr for OutputFormat {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_lowercase().as_str() {
			"text" => Ok(OutputFormat::Text),
			"json" => Ok(OutputFormat::Json),
			"ndjson" => Ok(OutputFormat::Ndjson),
			_ => Err(format!("unknown format: {s}")),
		}
	}
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Ndjson => write!(f, "ndjson"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_case_insensitively() {
		assert_eq!("NDJSON".parse::<OutputFormat>(), Ok(OutputFormat::Ndjson));
		assert_eq!("Json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
		assert!("toon".parse::<OutputFormat>().is_err());
	}

	#[test]
	fn display_matches_parse() {
		for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::Ndjson] {
			assert_eq!(format.to_string().parse::<OutputFormat>(), Ok(format));
		}
	}
}
