use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Level;

/// Record handed to an external log sink's `addLog`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
	/// Source tag, e.g. `Network` or `InteractionSummary`.
	#[serde(rename = "type")]
	pub tag: String,
	pub level: Level,
	pub message: String,
	/// Wall-clock time in RFC 3339.
	pub timestamp: String,
	pub interaction_id: Option<String>,
	pub details: Option<Value>,
}
