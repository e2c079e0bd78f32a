//! Rendering of replay results.

mod format;

pub use format::OutputFormat;

use anyhow::Result;
use colored::Colorize;
use lab::StateSnapshot;
use lab::protocol::{Level, LogRecord};
use lab::session::Session;
use serde::Serialize;

/// Everything a replay produced: the final engine state plus every record the
/// engine handed to its log sink, in emission order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
	pub state: StateSnapshot,
	pub logs: Vec<LogRecord>,
}

pub fn render_report(format: OutputFormat, report: &ReplayReport) -> Result<String> {
	match format {
		OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
		OutputFormat::Ndjson => {
			let mut out = String::new();
			for record in &report.logs {
				out.push_str(&serde_json::to_string(record)?);
				out.push('\n');
			}
			Ok(out)
		}
		OutputFormat::Text => Ok(render_text(report)),
	}
}

/// Single JSON value in any format; text falls back to pretty JSON.
pub fn render_value<T: Serialize>(format: OutputFormat, value: &T) -> Result<String> {
	match format {
		OutputFormat::Ndjson => Ok(format!("{}\n", serde_json::to_string(value)?)),
		OutputFormat::Json | OutputFormat::Text => Ok(serde_json::to_string_pretty(value)?),
	}
}

fn render_text(report: &ReplayReport) -> String {
	let mut out = String::new();
	for session in &report.state.interactions {
		render_session(&mut out, session);
	}
	out.push_str(&format!(
		"{} interaction(s), {} record(s), {} cached resource(s)\n",
		report.state.interactions.len(),
		report.logs.len(),
		report.state.recent_resources_count
	));
	out
}

fn render_session(out: &mut String, session: &Session) {
	let closed = match session.end_time {
		Some(end) => format!("{:.0}-{:.0}ms", session.start_time, end),
		None => format!("{:.0}ms, open", session.start_time),
	};
	out.push_str(&format!("{} {} {}\n", "●".green(), session.summary().bold(), format!("[{closed}]").dimmed()));

	for evt in session.network.iter() {
		let status = if evt.blocked {
			format!("blocked: {}", evt.reason.as_deref().unwrap_or("policy")).yellow()
		} else if evt.ok {
			evt.status.to_string().green()
		} else {
			evt.status.to_string().red()
		};
		let took = evt.duration.map(|d| format!(" {d:.0}ms")).unwrap_or_default();
		out.push_str(&format!("    net  {} {} {} {}{}\n", evt.kind.as_str(), evt.method, evt.url, status, took));
	}
	for err in session.errors.iter() {
		out.push_str(&format!("    {}  {}\n", "err".red(), err.message()));
	}
	for nav in session.nav.iter() {
		out.push_str(&format!("    nav  {} {}\n", nav.kind.as_str(), nav.href));
	}
	for line in session.console.iter() {
		let text = line.args.iter().map(|arg| arg.describe()).collect::<Vec<_>>().join(" ");
		let level = match line.level {
			Level::Error => line.level.as_str().red(),
			Level::Warn => line.level.as_str().yellow(),
			_ => line.level.as_str().normal(),
		};
		out.push_str(&format!("    con  {level} {text}\n"));
	}
	for report in session.reports.iter() {
		out.push_str(&format!("    rpt  {} {}\n", report.report_type, report.url));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn report() -> ReplayReport {
		let lab = lab::InteractionLab::inject(lab::SimulatedPage::builder().build().host());
		ReplayReport {
			state: lab.state(),
			logs: vec![LogRecord {
				tag: "Init".into(),
				level: Level::Info,
				message: "Initialized".into(),
				timestamp: "2025-01-01T00:00:00Z".into(),
				interaction_id: None,
				details: None,
			}],
		}
	}

	#[test]
	fn ndjson_emits_one_record_per_line() {
		let out = render_report(OutputFormat::Ndjson, &report()).unwrap();
		let lines: Vec<_> = out.lines().collect();
		assert_eq!(lines.len(), 1);
		let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
		assert_eq!(value["type"], "Init");
	}

	#[test]
	fn json_wraps_state_and_logs() {
		let out = render_report(OutputFormat::Json, &report()).unwrap();
		let value: serde_json::Value = serde_json::from_str(&out).unwrap();
		assert_eq!(value["state"]["initialized"], false);
		assert_eq!(value["logs"].as_array().unwrap().len(), 1);
	}

	#[test]
	fn text_ends_with_totals() {
		colored::control::set_override(false);
		let out = render_report(OutputFormat::Text, &report()).unwrap();
		assert_eq!(out, "0 interaction(s), 1 record(s), 0 cached resource(s)\n");
	}
}
