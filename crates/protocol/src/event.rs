//! Host-side input shapes: what a page hands to the engine's listeners and
//! observers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ErrorInfo, Modifiers, NodeId};

/// One element on the path from an interaction target up to the document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementInfo {
	/// Tag name as reported by the host (usually upper case).
	pub tag: String,
	pub id: String,
	pub classes: Vec<String>,
}

impl ElementInfo {
	pub fn new(tag: impl Into<String>) -> Self {
		Self {
			tag: tag.into(),
			..Default::default()
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = id.into();
		self
	}

	pub fn with_classes<I, S>(mut self, classes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.classes = classes.into_iter().map(Into::into).collect();
		self
	}
}

/// An interaction target: node identity plus its ancestor chain.
///
/// `path[0]` is the target itself, followed by its ancestors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNode {
	pub node: NodeId,
	#[serde(default)]
	pub path: Vec<ElementInfo>,
}

impl TargetNode {
	pub fn element(&self) -> Option<&ElementInfo> {
		self.path.first()
	}
}

/// A DOM interaction as delivered to a capturing listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionEvent {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target: Option<TargetNode>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub button: Option<i16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pointer_type: Option<String>,
	#[serde(default)]
	pub modifiers: Modifiers,
}

impl InteractionEvent {
	pub fn new(kind: impl Into<String>) -> Self {
		Self {
			kind: kind.into(),
			target: None,
			key: None,
			button: None,
			pointer_type: None,
			modifiers: Modifiers::default(),
		}
	}

	pub fn on(mut self, target: TargetNode) -> Self {
		self.target = Some(target);
		self
	}

	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}
}

/// Arguments of a global script error event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptError {
	pub message: String,
	pub filename: Option<String>,
	pub lineno: Option<u32>,
	pub colno: Option<u32>,
	pub error: Option<ErrorInfo>,
}

/// A host value as seen by console calls and rejection handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "camelCase")]
pub enum HostValue {
	Null,
	Undefined,
	String(String),
	Number(f64),
	Bool(bool),
	BigInt(String),
	Function(String),
	Error(ErrorInfo),
	Object { constructor: String, repr: String },
}

impl HostValue {
	/// Human readable form used for rejection reasons.
	pub fn describe(&self) -> String {
		match self {
			HostValue::Null => "null".to_string(),
			HostValue::Undefined => "undefined".to_string(),
			HostValue::String(s) => s.clone(),
			HostValue::Number(n) => n.to_string(),
			HostValue::Bool(b) => b.to_string(),
			HostValue::BigInt(s) => s.clone(),
			HostValue::Function(name) => format!("function {name}"),
			HostValue::Error(err) => err.message.clone(),
			HostValue::Object { repr, .. } => repr.clone(),
		}
	}
}

impl From<&str> for HostValue {
	fn from(value: &str) -> Self {
		HostValue::String(value.to_string())
	}
}

impl From<f64> for HostValue {
	fn from(value: f64) -> Self {
		HostValue::Number(value)
	}
}

/// Events delivered to listeners on the document or window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
	Interaction(InteractionEvent),
	Error(ScriptError),
	UnhandledRejection {
		#[serde(default)]
		reason: Option<HostValue>,
	},
	PopState,
	HashChange {
		#[serde(rename = "oldURL")]
		old_url: String,
		#[serde(rename = "newURL")]
		new_url: String,
	},
	PageShow {
		#[serde(default)]
		persisted: bool,
	},
	PageHide {
		#[serde(default)]
		persisted: bool,
	},
}

impl HostEvent {
	/// DOM event type name used to route the event to listeners.
	pub fn event_type(&self) -> &str {
		match self {
			HostEvent::Interaction(ev) => &ev.kind,
			HostEvent::Error(_) => "error",
			HostEvent::UnhandledRejection { .. } => "unhandledrejection",
			HostEvent::PopState => "popstate",
			HostEvent::HashChange { .. } => "hashchange",
			HostEvent::PageShow { .. } => "pageshow",
			HostEvent::PageHide { .. } => "pagehide",
		}
	}
}

/// Intersection observer entry for an observed node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionEntry {
	pub node: NodeId,
	pub is_intersecting: bool,
	pub ratio: f64,
}

/// Resize observer entry for an observed node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResizeEntry {
	pub node: NodeId,
	pub width: f64,
	pub height: f64,
}

/// A deprecation or intervention report from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReport {
	#[serde(rename = "type")]
	pub report_type: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub body: Value,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn host_event_type_routes_interactions_by_kind() {
		let ev = HostEvent::Interaction(InteractionEvent::new("keydown").with_key("Enter"));
		assert_eq!(ev.event_type(), "keydown");
		assert_eq!(HostEvent::PopState.event_type(), "popstate");
	}

	#[test]
	fn interaction_event_parses_minimal_json() {
		let ev: InteractionEvent = serde_json::from_str(r#"{"type":"click","target":{"node":3,"path":[{"tag":"BUTTON","id":"go"}]}}"#).unwrap();
		assert_eq!(ev.kind, "click");
		assert_eq!(ev.target.as_ref().unwrap().element().unwrap().id, "go");
		assert!(!ev.modifiers.shift);
	}

	#[test]
	fn host_value_describe_prefers_error_message() {
		let v = HostValue::Error(ErrorInfo::new("TypeError", "boom"));
		assert_eq!(v.describe(), "boom");
		assert_eq!(HostValue::from("plain").describe(), "plain");
	}
}
