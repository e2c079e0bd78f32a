//! Per-interaction diagnostic records.

use lab_protocol::{
	ConsoleRecord, DomEventInfo, ErrorRecord, LayoutShiftEntry, LcpEntry, Metrics, NavRecord, NetworkEvent, NodeId, PerformanceEntry,
	ReportRecord, ResourceTiming, Telemetry, TimingEntry, Viewport, ViewportSnapshot, Visibility,
};
use serde::Serialize;

use crate::buffer::BoundedBuffer;
use crate::config::BucketCaps;
use crate::host::TimerId;

pub type SessionId = String;

/// Performance sub-buckets, each capped at `BucketCaps::perf`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfBuckets {
	pub event_timings: BoundedBuffer<TimingEntry>,
	pub long_animation_frames: BoundedBuffer<TimingEntry>,
	pub long_tasks: BoundedBuffer<TimingEntry>,
	pub layout_shifts: BoundedBuffer<LayoutShiftEntry>,
	pub lcp_entries: BoundedBuffer<LcpEntry>,
	pub resources: BoundedBuffer<ResourceTiming>,
	pub navigation: BoundedBuffer<TimingEntry>,
	pub paints: BoundedBuffer<TimingEntry>,
}

impl PerfBuckets {
	fn new(cap: usize) -> Self {
		Self {
			event_timings: BoundedBuffer::new(cap),
			long_animation_frames: BoundedBuffer::new(cap),
			long_tasks: BoundedBuffer::new(cap),
			layout_shifts: BoundedBuffer::new(cap),
			lcp_entries: BoundedBuffer::new(cap),
			resources: BoundedBuffer::new(cap),
			navigation: BoundedBuffer::new(cap),
			paints: BoundedBuffer::new(cap),
		}
	}
}

/// One interaction and everything attributed to it.
///
/// `end_time` stays `None` until [`Session::close`]; attribution is decided by
/// the time window, so a closed session whose window is still open keeps
/// accepting telemetry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	pub id: SessionId,
	pub start_time: f64,
	pub end_time: Option<f64>,
	pub dom_event: DomEventInfo,
	pub viewport: Viewport,
	pub scroll_y: f64,
	pub visibility: Option<Visibility>,
	pub perf: PerfBuckets,
	pub network: BoundedBuffer<NetworkEvent>,
	pub console: BoundedBuffer<ConsoleRecord>,
	pub errors: BoundedBuffer<ErrorRecord>,
	pub reports: BoundedBuffer<ReportRecord>,
	pub nav: BoundedBuffer<NavRecord>,
	pub metrics: Metrics,
	#[serde(skip)]
	pub(crate) target: Option<NodeId>,
	#[serde(skip)]
	pub(crate) close_timer: Option<TimerId>,
}

impl Session {
	pub fn new(id: SessionId, start_time: f64, dom_event: DomEventInfo, snapshot: ViewportSnapshot, target: Option<NodeId>, caps: &BucketCaps) -> Self {
		Self {
			id,
			start_time,
			end_time: None,
			dom_event,
			viewport: snapshot.viewport,
			scroll_y: snapshot.scroll_y,
			visibility: None,
			perf: PerfBuckets::new(caps.perf),
			network: BoundedBuffer::new(caps.network),
			console: BoundedBuffer::new(caps.console),
			errors: BoundedBuffer::new(caps.errors),
			reports: BoundedBuffer::new(caps.reports),
			nav: BoundedBuffer::new(caps.nav),
			metrics: Metrics::default(),
			target,
			close_timer: None,
		}
	}

	pub fn is_closed(&self) -> bool {
		self.end_time.is_some()
	}

	/// Node the interaction started on, used for observer attach/detach.
	pub fn target(&self) -> Option<NodeId> {
		self.target
	}

	/// True when `ts` falls inside `[start_time, start_time + window_ms]`.
	pub fn window_contains(&self, ts: f64, window_ms: f64) -> bool {
		ts >= self.start_time && ts <= self.start_time + window_ms
	}

	/// Sets `end_time` once. Returns false if the session was already closed.
	pub fn close(&mut self, now: f64) -> bool {
		if self.end_time.is_some() {
			return false;
		}
		self.end_time = Some(now);
		true
	}

	/// Routes `telemetry` to its bucket and updates the running metrics.
	///
	/// Layout shifts caused by recent input are expected to be filtered out by
	/// the caller; the ones that arrive here all count toward CLS.
	pub fn attach(&mut self, telemetry: Telemetry) {
		match telemetry {
			Telemetry::Performance(entry) => self.attach_performance(entry),
			Telemetry::Network(evt) => {
				self.metrics.net_count += 1;
				if let Some(duration) = evt.duration {
					self.metrics.net_max_ms = self.metrics.net_max_ms.max(duration);
				}
				self.network.push(evt);
			}
			Telemetry::Console(rec) => {
				self.console.push(rec);
			}
			Telemetry::Error(rec) => {
				self.errors.push(rec);
			}
			Telemetry::Navigation(rec) => {
				self.nav.push(rec);
			}
			Telemetry::Report(rec) => {
				self.reports.push(rec);
			}
		}
	}

	fn attach_performance(&mut self, entry: PerformanceEntry) {
		match entry {
			PerformanceEntry::Event(e) => {
				self.metrics.inp_like = self.metrics.inp_like.max(e.duration);
				self.perf.event_timings.push(e);
			}
			PerformanceEntry::LongAnimationFrame(e) => {
				self.metrics.max_loaf_ms = self.metrics.max_loaf_ms.max(e.duration);
				self.perf.long_animation_frames.push(e);
			}
			PerformanceEntry::LongTask(e) => {
				self.perf.long_tasks.push(e);
			}
			PerformanceEntry::LayoutShift(e) => {
				self.metrics.total_cls += e.value;
				self.perf.layout_shifts.push(e);
			}
			PerformanceEntry::LargestContentfulPaint(e) => {
				self.perf.lcp_entries.push(e);
			}
			PerformanceEntry::Paint(e) => {
				self.perf.paints.push(e);
			}
			PerformanceEntry::Navigation(e) => {
				self.perf.navigation.push(e);
			}
			PerformanceEntry::Resource(r) => {
				self.perf.resources.push(r);
			}
		}
	}

	/// One-line summary emitted when the session closes.
	pub fn summary(&self) -> String {
		let m = &self.metrics;
		format!(
			"{} on {}  → INP≈{}ms, LoAF max {}ms, CLS {:.3}, net {}, LCPs {}",
			self.dom_event.kind,
			self.dom_event.target.selector,
			m.inp_like.round(),
			m.max_loaf_ms.round(),
			m.total_cls,
			m.net_count,
			self.perf.lcp_entries.len()
		)
	}
}

#[cfg(test)]
mod tests {
	use lab_protocol::{Level, Modifiers, NetworkEventKind, NetworkKind, TargetSummary};

	use super::*;

	fn session(start: f64) -> Session {
		let dom_event = DomEventInfo {
			kind: "click".into(),
			key: None,
			button: Some(0),
			pointer_type: None,
			target: TargetSummary {
				selector: "button#go".into(),
				..TargetSummary::unknown()
			},
			modifiers: Modifiers::default(),
		};
		Session::new("s1".into(), start, dom_event, ViewportSnapshot::default(), None, &BucketCaps::default())
	}

	#[test]
	fn close_is_idempotent() {
		let mut s = session(10.0);
		assert!(s.close(20.0));
		assert!(!s.close(30.0));
		assert_eq!(s.end_time, Some(20.0));
	}

	#[test]
	fn window_bounds_are_inclusive() {
		let s = session(100.0);
		assert!(s.window_contains(100.0, 4000.0));
		assert!(s.window_contains(4100.0, 4000.0));
		assert!(!s.window_contains(4100.5, 4000.0));
		assert!(!s.window_contains(99.9, 4000.0));
	}

	#[test]
	fn attach_updates_metrics() {
		let mut s = session(0.0);
		s.attach(Telemetry::Performance(PerformanceEntry::Event(TimingEntry {
			name: "click".into(),
			start_time: 1.0,
			duration: 48.0,
		})));
		s.attach(Telemetry::Performance(PerformanceEntry::Event(TimingEntry {
			name: "click".into(),
			start_time: 2.0,
			duration: 16.0,
		})));
		s.attach(Telemetry::Performance(PerformanceEntry::LayoutShift(LayoutShiftEntry {
			start_time: 3.0,
			value: 0.05,
			had_recent_input: false,
		})));
		s.attach(Telemetry::Performance(PerformanceEntry::LayoutShift(LayoutShiftEntry {
			start_time: 4.0,
			value: 0.02,
			had_recent_input: false,
		})));

		let mut evt = NetworkEvent::pending(NetworkKind::Fetch, NetworkEventKind::Fetch, "https://a.test/", "GET", 5.0).finish(125.0);
		evt.level = Level::Info;
		s.attach(Telemetry::Network(evt));

		assert_eq!(s.metrics.inp_like, 48.0);
		assert!((s.metrics.total_cls - 0.07).abs() < 1e-9);
		assert_eq!(s.metrics.net_count, 1);
		assert_eq!(s.metrics.net_max_ms, 120.0);
		assert_eq!(s.perf.event_timings.len(), 2);
		assert_eq!(s.summary(), "click on button#go  → INP≈48ms, LoAF max 0ms, CLS 0.070, net 1, LCPs 0");
	}

	#[test]
	fn buckets_respect_caps() {
		let caps = BucketCaps {
			perf: 2,
			..BucketCaps::default()
		};
		let mut s = Session::new("s".into(), 0.0, session(0.0).dom_event, ViewportSnapshot::default(), None, &caps);
		for i in 0..5 {
			s.attach(Telemetry::Performance(PerformanceEntry::LongTask(TimingEntry {
				name: "self".into(),
				start_time: i as f64,
				duration: 60.0,
			})));
		}
		assert_eq!(s.perf.long_tasks.len(), 2);
		assert_eq!(s.perf.long_tasks.first().unwrap().start_time, 3.0);
	}

	#[test]
	fn serializes_without_host_handles() {
		let s = session(0.0);
		let value = serde_json::to_value(&s).unwrap();
		assert!(value.get("target").is_none());
		assert!(value.get("closeTimer").is_none());
		assert_eq!(value["domEvent"]["type"], "click");
		assert!(value["endTime"].is_null());
	}
}
