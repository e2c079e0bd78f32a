//! Timestamp to session attribution.

use crate::registry::SessionRegistry;
use crate::session::SessionId;

/// Finds the session whose window contains a timestamp.
///
/// The last matched session is tried first; most telemetry arrives while the
/// newest interaction is still in its window. On a miss every session is
/// scanned and the one that started closest to the timestamp wins, ties going
/// to the older session.
#[derive(Debug, Clone)]
pub struct TimeWindowMatcher {
	window_ms: f64,
	last: Option<SessionId>,
}

impl TimeWindowMatcher {
	pub fn new(window_ms: f64) -> Self {
		Self { window_ms, last: None }
	}

	pub fn window_ms(&self) -> f64 {
		self.window_ms
	}

	/// Makes `id` the sticky candidate, e.g. right after it was created.
	pub fn note(&mut self, id: SessionId) {
		self.last = Some(id);
	}

	pub fn reset(&mut self, window_ms: f64) {
		self.window_ms = window_ms;
		self.last = None;
	}

	pub fn find(&mut self, registry: &SessionRegistry, ts: f64) -> Option<SessionId> {
		if registry.is_empty() {
			return None;
		}

		if let Some(last) = self.last.as_deref() {
			if let Some(session) = registry.get(last) {
				if session.window_contains(ts, self.window_ms) {
					return Some(session.id.clone());
				}
			}
		}

		let mut best: Option<(&SessionId, f64)> = None;
		for session in registry.all() {
			if !session.window_contains(ts, self.window_ms) {
				continue;
			}
			let delta = (ts - session.start_time).abs();
			if best.is_none_or(|(_, best_delta)| delta < best_delta) {
				best = Some((&session.id, delta));
			}
		}

		let (id, _) = best?;
		self.last = Some(id.clone());
		Some(id.clone())
	}
}

#[cfg(test)]
mod tests {
	use lab_protocol::{DomEventInfo, Modifiers, TargetSummary, ViewportSnapshot};

	use super::*;
	use crate::config::BucketCaps;
	use crate::session::Session;

	fn registry(starts: &[(&str, f64)]) -> SessionRegistry {
		let mut registry = SessionRegistry::new(10);
		for (id, start) in starts {
			let dom_event = DomEventInfo {
				kind: "click".into(),
				key: None,
				button: None,
				pointer_type: None,
				target: TargetSummary::unknown(),
				modifiers: Modifiers::default(),
			};
			registry.create(Session::new(id.to_string(), *start, dom_event, ViewportSnapshot::default(), None, &BucketCaps::default()));
		}
		registry
	}

	#[test]
	fn empty_registry_matches_nothing() {
		let mut matcher = TimeWindowMatcher::new(4000.0);
		assert_eq!(matcher.find(&SessionRegistry::new(4), 10.0), None);
	}

	#[test]
	fn picks_closest_start_among_overlapping_windows() {
		let registry = registry(&[("a", 0.0), ("b", 1000.0)]);
		let mut matcher = TimeWindowMatcher::new(4000.0);
		assert_eq!(matcher.find(&registry, 1200.0).as_deref(), Some("b"));
		assert_eq!(matcher.find(&registry, 400.0).as_deref(), Some("a"));
	}

	#[test]
	fn sticky_session_wins_while_in_window() {
		let registry = registry(&[("a", 0.0), ("b", 1000.0)]);
		let mut matcher = TimeWindowMatcher::new(4000.0);
		matcher.note("a".into());
		assert_eq!(matcher.find(&registry, 1200.0).as_deref(), Some("a"));
	}

	#[test]
	fn nothing_outside_every_window() {
		let registry = registry(&[("a", 0.0)]);
		let mut matcher = TimeWindowMatcher::new(4000.0);
		assert_eq!(matcher.find(&registry, 4000.0).as_deref(), Some("a"));
		assert_eq!(matcher.find(&registry, 4000.1), None);
		assert_eq!(matcher.find(&registry, -1.0), None);
	}

	#[test]
	fn ties_go_to_older_session() {
		let registry = registry(&[("a", 100.0), ("b", 100.0)]);
		let mut matcher = TimeWindowMatcher::new(4000.0);
		assert_eq!(matcher.find(&registry, 150.0).as_deref(), Some("a"));
	}

	#[test]
	fn scan_hit_updates_sticky_id() {
		let registry = registry(&[("a", 0.0), ("b", 5000.0)]);
		let mut matcher = TimeWindowMatcher::new(4000.0);
		matcher.note("a".into());
		assert_eq!(matcher.find(&registry, 5100.0).as_deref(), Some("b"));
		// b is sticky now.
		assert_eq!(matcher.find(&registry, 5200.0).as_deref(), Some("b"));
	}
}
