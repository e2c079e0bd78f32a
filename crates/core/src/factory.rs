//! Session creation from a qualifying interaction.

use lab_protocol::{DomEventInfo, ElementInfo, InteractionEvent, TargetNode, TargetSummary, ViewportSnapshot};
use uuid::Uuid;

use crate::config::LabConfig;
use crate::session::Session;

/// CSS-like path from the target upwards, at most `max_depth` elements.
///
/// Stops at the first element carrying an id and keeps at most two classes
/// per element: `div.card.wide > button#go` style.
pub fn build_selector(path: &[ElementInfo], max_depth: usize) -> String {
	let mut parts = Vec::new();
	for element in path.iter().take(max_depth) {
		let mut part = element.tag.to_lowercase();
		if !element.id.is_empty() {
			part.push('#');
			part.push_str(&element.id);
			parts.push(part);
			break;
		}
		let classes: Vec<&str> = element.classes.iter().map(String::as_str).filter(|c| !c.is_empty()).take(2).collect();
		if !classes.is_empty() {
			part.push('.');
			part.push_str(&classes.join("."));
		}
		parts.push(part);
	}
	parts.reverse();
	parts.join(" > ")
}

pub fn summarize_target(target: Option<&TargetNode>, max_depth: usize) -> TargetSummary {
	let Some(element) = target.and_then(TargetNode::element) else {
		return TargetSummary::unknown();
	};
	TargetSummary {
		tag: element.tag.clone(),
		id: element.id.clone(),
		class_name: element.classes.join(" "),
		selector: target.map(|t| build_selector(&t.path, max_depth)).unwrap_or_default(),
	}
}

/// Builds the session record for `event` observed at `now`.
pub fn open_session(event: &InteractionEvent, now: f64, snapshot: ViewportSnapshot, config: &LabConfig) -> Session {
	let dom_event = DomEventInfo {
		kind: event.kind.clone(),
		key: if event.kind.starts_with("key") { event.key.clone() } else { None },
		button: event.button,
		pointer_type: event.pointer_type.clone(),
		target: summarize_target(event.target.as_ref(), config.selector_depth),
		modifiers: event.modifiers,
	};
	let target = event.target.as_ref().filter(|t| t.element().is_some()).map(|t| t.node);
	Session::new(Uuid::new_v4().to_string(), now, dom_event, snapshot, target, &config.bucket_caps)
}

#[cfg(test)]
mod tests {
	use lab_protocol::NodeId;

	use super::*;

	fn path() -> Vec<ElementInfo> {
		vec![
			ElementInfo::new("SPAN").with_classes(["icon", "small", "extra"]),
			ElementInfo::new("BUTTON"),
			ElementInfo::new("DIV").with_id("toolbar"),
			ElementInfo::new("BODY"),
		]
	}

	#[test]
	fn selector_stops_at_first_id() {
		assert_eq!(build_selector(&path(), 4), "div#toolbar > button > span.icon.small");
	}

	#[test]
	fn selector_respects_depth() {
		let deep = vec![
			ElementInfo::new("A"),
			ElementInfo::new("LI"),
			ElementInfo::new("UL"),
			ElementInfo::new("NAV"),
			ElementInfo::new("HEADER"),
		];
		assert_eq!(build_selector(&deep, 4), "nav > ul > li > a");
		assert_eq!(build_selector(&deep, 1), "a");
	}

	#[test]
	fn missing_target_is_unknown() {
		let summary = summarize_target(None, 4);
		assert_eq!(summary.tag, "UNKNOWN");
		assert!(summary.selector.is_empty());
	}

	#[test]
	fn key_only_kept_for_keyboard_events() {
		let config = LabConfig::default();
		let click = InteractionEvent::new("click").with_key("Enter");
		let session = open_session(&click, 5.0, ViewportSnapshot::default(), &config);
		assert_eq!(session.dom_event.key, None);

		let key = InteractionEvent::new("keydown").with_key("Enter");
		let session = open_session(&key, 5.0, ViewportSnapshot::default(), &config);
		assert_eq!(session.dom_event.key.as_deref(), Some("Enter"));
		assert_eq!(session.start_time, 5.0);
		assert!(session.end_time.is_none());
	}

	#[test]
	fn session_remembers_target_node() {
		let event = InteractionEvent::new("click").on(TargetNode { node: NodeId(9), path: path() });
		let session = open_session(&event, 0.0, ViewportSnapshot::default(), &LabConfig::default());
		assert_eq!(session.target(), Some(NodeId(9)));
		assert_eq!(session.dom_event.target.tag, "SPAN");
		assert_eq!(session.dom_event.target.class_name, "icon small extra");
	}

	#[test]
	fn ids_are_unique() {
		let config = LabConfig::default();
		let a = open_session(&InteractionEvent::new("click"), 0.0, ViewportSnapshot::default(), &config);
		let b = open_session(&InteractionEvent::new("click"), 0.0, ViewportSnapshot::default(), &config);
		assert_ne!(a.id, b.id);
	}
}
