use serde::{Deserialize, Serialize};

/// Severity attached to emitted records and console calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
	Debug,
	#[default]
	Log,
	Info,
	Warn,
	Error,
}

impl Level {
	pub fn as_str(&self) -> &'static str {
		match self {
			Level::Debug => "debug",
			Level::Log => "log",
			Level::Info => "info",
			Level::Warn => "warn",
			Level::Error => "error",
		}
	}

	/// Console levels wrapped by the console bridge, in wrap order.
	pub const CONSOLE: [Level; 5] = [Level::Log, Level::Info, Level::Warn, Level::Error, Level::Debug];
}

impl std::fmt::Display for Level {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Opaque identity of a host node.
///
/// Only ever used as a relation key for observer attach/detach. The node's
/// lifetime belongs to the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "node#{}", self.0)
	}
}

/// Viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
	pub width: f64,
	pub height: f64,
}

/// Viewport plus vertical scroll offset captured when a session opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportSnapshot {
	pub viewport: Viewport,
	pub scroll_y: f64,
}

/// Modifier keys held during an interaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
	pub alt: bool,
	pub ctrl: bool,
	pub meta: bool,
	pub shift: bool,
}

/// Name and message of a thrown error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

impl ErrorInfo {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: Some(name.into()),
			message: message.into(),
			stack: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn level_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&Level::Warn).unwrap(), "\"warn\"");
		let level: Level = serde_json::from_str("\"debug\"").unwrap();
		assert_eq!(level, Level::Debug);
	}

	#[test]
	fn node_id_is_transparent() {
		assert_eq!(serde_json::to_string(&NodeId(7)).unwrap(), "7");
	}
}
