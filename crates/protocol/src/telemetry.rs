//! Normalized telemetry records.
//!
//! Every signal the engine correlates is one variant of [`Telemetry`]. The
//! matcher only needs [`Telemetry::timestamp`]; sessions route each variant to
//! its own bucket.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::HostValue;
use crate::types::{ErrorInfo, Level, Modifiers};

/// Performance entry kinds the performance bridge knows how to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
	#[serde(rename = "event")]
	Event,
	#[serde(rename = "long-animation-frame")]
	LongAnimationFrame,
	#[serde(rename = "longtask")]
	LongTask,
	#[serde(rename = "layout-shift")]
	LayoutShift,
	#[serde(rename = "largest-contentful-paint")]
	LargestContentfulPaint,
	#[serde(rename = "paint")]
	Paint,
	#[serde(rename = "navigation")]
	Navigation,
	#[serde(rename = "resource")]
	Resource,
}

impl EntryType {
	pub const ALL: [EntryType; 8] = [
		EntryType::Event,
		EntryType::LongAnimationFrame,
		EntryType::LongTask,
		EntryType::LayoutShift,
		EntryType::LargestContentfulPaint,
		EntryType::Paint,
		EntryType::Navigation,
		EntryType::Resource,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			EntryType::Event => "event",
			EntryType::LongAnimationFrame => "long-animation-frame",
			EntryType::LongTask => "longtask",
			EntryType::LayoutShift => "layout-shift",
			EntryType::LargestContentfulPaint => "largest-contentful-paint",
			EntryType::Paint => "paint",
			EntryType::Navigation => "navigation",
			EntryType::Resource => "resource",
		}
	}
}

impl std::fmt::Display for EntryType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Name, start and duration; the common shape of most entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingEntry {
	#[serde(default)]
	pub name: String,
	pub start_time: f64,
	#[serde(default)]
	pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutShiftEntry {
	pub start_time: f64,
	#[serde(default)]
	pub value: f64,
	#[serde(default)]
	pub had_recent_input: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LcpEntry {
	pub start_time: f64,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub render_time: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

/// Simplified resource-timing record, also the resource cache entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
	/// Absolute URL of the loaded resource.
	pub name: String,
	#[serde(default)]
	pub initiator_type: String,
	pub start_time: f64,
	#[serde(default)]
	pub duration: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transfer_size: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub encoded_body_size: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub decoded_body_size: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub next_hop_protocol: Option<String>,
}

/// A performance entry, tagged by `entryType` like the browser reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryType")]
pub enum PerformanceEntry {
	#[serde(rename = "event")]
	Event(TimingEntry),
	#[serde(rename = "long-animation-frame")]
	LongAnimationFrame(TimingEntry),
	#[serde(rename = "longtask")]
	LongTask(TimingEntry),
	#[serde(rename = "layout-shift")]
	LayoutShift(LayoutShiftEntry),
	#[serde(rename = "largest-contentful-paint")]
	LargestContentfulPaint(LcpEntry),
	#[serde(rename = "paint")]
	Paint(TimingEntry),
	#[serde(rename = "navigation")]
	Navigation(TimingEntry),
	#[serde(rename = "resource")]
	Resource(ResourceTiming),
}

impl PerformanceEntry {
	pub fn entry_type(&self) -> EntryType {
		match self {
			PerformanceEntry::Event(_) => EntryType::Event,
			PerformanceEntry::LongAnimationFrame(_) => EntryType::LongAnimationFrame,
			PerformanceEntry::LongTask(_) => EntryType::LongTask,
			PerformanceEntry::LayoutShift(_) => EntryType::LayoutShift,
			PerformanceEntry::LargestContentfulPaint(_) => EntryType::LargestContentfulPaint,
			PerformanceEntry::Paint(_) => EntryType::Paint,
			PerformanceEntry::Navigation(_) => EntryType::Navigation,
			PerformanceEntry::Resource(_) => EntryType::Resource,
		}
	}

	pub fn start_time(&self) -> f64 {
		match self {
			PerformanceEntry::Event(e)
			| PerformanceEntry::LongAnimationFrame(e)
			| PerformanceEntry::LongTask(e)
			| PerformanceEntry::Paint(e)
			| PerformanceEntry::Navigation(e) => e.start_time,
			PerformanceEntry::LayoutShift(e) => e.start_time,
			PerformanceEntry::LargestContentfulPaint(e) => e.start_time,
			PerformanceEntry::Resource(e) => e.start_time,
		}
	}

	pub fn duration(&self) -> f64 {
		match self {
			PerformanceEntry::Event(e)
			| PerformanceEntry::LongAnimationFrame(e)
			| PerformanceEntry::LongTask(e)
			| PerformanceEntry::Paint(e)
			| PerformanceEntry::Navigation(e) => e.duration,
			PerformanceEntry::Resource(e) => e.duration,
			PerformanceEntry::LayoutShift(_) | PerformanceEntry::LargestContentfulPaint(_) => 0.0,
		}
	}

	/// Short label used in emitted log messages.
	pub fn label(&self) -> &str {
		match self {
			PerformanceEntry::Event(e) | PerformanceEntry::Paint(e) if !e.name.is_empty() => &e.name,
			PerformanceEntry::Resource(r) if !r.initiator_type.is_empty() => &r.initiator_type,
			other => other.entry_type().as_str(),
		}
	}
}

/// Which outbound primitive produced a network event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
	Fetch,
	Xhr,
	Beacon,
	#[serde(rename = "ws")]
	WebSocket,
}

impl NetworkKind {
	/// Kind of the pending event handed to the policy decision point.
	pub fn start_kind(&self) -> NetworkEventKind {
		match self {
			NetworkKind::Fetch => NetworkEventKind::FetchStart,
			NetworkKind::Xhr => NetworkEventKind::XhrStart,
			NetworkKind::Beacon => NetworkEventKind::BeaconStart,
			NetworkKind::WebSocket => NetworkEventKind::WsStart,
		}
	}

	/// Kind recorded when the policy denies the call.
	pub fn blocked_kind(&self) -> NetworkEventKind {
		match self {
			NetworkKind::Fetch => NetworkEventKind::FetchBlocked,
			NetworkKind::Xhr => NetworkEventKind::XhrBlocked,
			NetworkKind::Beacon => NetworkEventKind::BeaconBlocked,
			NetworkKind::WebSocket => NetworkEventKind::WsBlocked,
		}
	}
}

/// Outcome classification of a network event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkEventKind {
	FetchStart,
	Fetch,
	FetchError,
	FetchBlocked,
	XhrStart,
	Xhr,
	XhrError,
	XhrAbort,
	XhrTimeout,
	XhrBlocked,
	BeaconStart,
	Beacon,
	BeaconBlocked,
	WsStart,
	WsOpen,
	WsMessage,
	WsSend,
	WsError,
	WsClose,
	WsBlocked,
	/// Injected by an external collaborator with a kind this crate does not know.
	#[serde(other)]
	Other,
}

impl NetworkEventKind {
	pub fn is_blocked(&self) -> bool {
		matches!(
			self,
			NetworkEventKind::FetchBlocked | NetworkEventKind::XhrBlocked | NetworkEventKind::BeaconBlocked | NetworkEventKind::WsBlocked
		)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			NetworkEventKind::FetchStart => "fetch-start",
			NetworkEventKind::Fetch => "fetch",
			NetworkEventKind::FetchError => "fetch-error",
			NetworkEventKind::FetchBlocked => "fetch-blocked",
			NetworkEventKind::XhrStart => "xhr-start",
			NetworkEventKind::Xhr => "xhr",
			NetworkEventKind::XhrError => "xhr-error",
			NetworkEventKind::XhrAbort => "xhr-abort",
			NetworkEventKind::XhrTimeout => "xhr-timeout",
			NetworkEventKind::XhrBlocked => "xhr-blocked",
			NetworkEventKind::BeaconStart => "beacon-start",
			NetworkEventKind::Beacon => "beacon",
			NetworkEventKind::BeaconBlocked => "beacon-blocked",
			NetworkEventKind::WsStart => "ws-start",
			NetworkEventKind::WsOpen => "ws-open",
			NetworkEventKind::WsMessage => "ws-message",
			NetworkEventKind::WsSend => "ws-send",
			NetworkEventKind::WsError => "ws-error",
			NetworkEventKind::WsClose => "ws-close",
			NetworkEventKind::WsBlocked => "ws-blocked",
			NetworkEventKind::Other => "network",
		}
	}
}

/// One observed (or blocked) outbound network call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
	#[serde(rename = "type")]
	pub transport: NetworkKind,
	pub kind: NetworkEventKind,
	pub url: String,
	pub method: String,
	#[serde(default = "unknown_status")]
	pub status: i32,
	#[serde(default)]
	pub ok: bool,
	pub start_time: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub end_time: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub duration: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redirected: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub response_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data_size: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub response_url: Option<String>,
	/// Headers set on a legacy request before it was sent.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub request_headers: BTreeMap<String, String>,
	/// Socket close code.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<u16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorInfo>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub blocked: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_timing: Option<ResourceTiming>,
	#[serde(default)]
	pub level: Level,
}

fn unknown_status() -> i32 {
	-1
}

impl NetworkEvent {
	/// Starts a pending event; completion fields are filled by [`NetworkEvent::finish`].
	pub fn pending(transport: NetworkKind, kind: NetworkEventKind, url: impl Into<String>, method: impl Into<String>, start_time: f64) -> Self {
		Self {
			transport,
			kind,
			url: url.into(),
			method: method.into(),
			status: -1,
			ok: false,
			start_time,
			end_time: None,
			duration: None,
			redirected: None,
			response_type: None,
			data_size: None,
			response_url: None,
			request_headers: BTreeMap::new(),
			code: None,
			error: None,
			blocked: false,
			reason: None,
			resource_timing: None,
			level: Level::Debug,
		}
	}

	/// Records completion time and the derived duration.
	pub fn finish(mut self, end_time: f64) -> Self {
		self.end_time = Some(end_time);
		self.duration = Some(end_time - self.start_time);
		self
	}

	/// Pending event in the transport's `*-start` kind.
	pub fn start(transport: NetworkKind, url: impl Into<String>, method: impl Into<String>, start_time: f64) -> Self {
		Self::pending(transport, transport.start_kind(), url, method, start_time)
	}

	/// Marks the event as vetoed by the policy decision point.
	pub fn block(mut self, reason: impl Into<String>, end_time: f64) -> Self {
		self.kind = self.transport.blocked_kind();
		self.status = 0;
		self.ok = false;
		self.blocked = true;
		self.reason = Some(reason.into());
		self.level = Level::Warn;
		self.finish(end_time)
	}
}

/// A captured console call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleRecord {
	pub level: Level,
	pub time: f64,
	pub wall_time: String,
	pub args: Vec<HostValue>,
}

/// A global error or unhandled rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ErrorRecord {
	#[serde(rename = "error-event", rename_all = "camelCase")]
	ErrorEvent {
		message: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		filename: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		lineno: Option<u32>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		colno: Option<u32>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<ErrorInfo>,
		time: f64,
	},
	/// Reported through the property-style `onerror` handler.
	#[serde(rename = "onerror", rename_all = "camelCase")]
	OnError {
		message: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		source: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		line: Option<u32>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		col: Option<u32>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<ErrorInfo>,
		time: f64,
	},
	#[serde(rename = "unhandledrejection", rename_all = "camelCase")]
	UnhandledRejection {
		reason: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		raw_reason: Option<HostValue>,
		time: f64,
	},
}

impl ErrorRecord {
	pub fn time(&self) -> f64 {
		match self {
			ErrorRecord::ErrorEvent { time, .. } | ErrorRecord::OnError { time, .. } | ErrorRecord::UnhandledRejection { time, .. } => *time,
		}
	}

	pub fn message(&self) -> &str {
		match self {
			ErrorRecord::ErrorEvent { message, .. } | ErrorRecord::OnError { message, .. } => message,
			ErrorRecord::UnhandledRejection { reason, .. } => reason,
		}
	}
}

/// Navigation signal kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NavKind {
	#[serde(rename = "pushState")]
	PushState,
	#[serde(rename = "replaceState")]
	ReplaceState,
	#[serde(rename = "popstate")]
	PopState,
	#[serde(rename = "hashchange")]
	HashChange,
	#[serde(rename = "pageshow")]
	PageShow,
	#[serde(rename = "pagehide")]
	PageHide,
}

impl NavKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			NavKind::PushState => "pushState",
			NavKind::ReplaceState => "replaceState",
			NavKind::PopState => "popstate",
			NavKind::HashChange => "hashchange",
			NavKind::PageShow => "pageshow",
			NavKind::PageHide => "pagehide",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavRecord {
	pub kind: NavKind,
	pub href: String,
	pub referrer: String,
	pub time: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub before: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub after: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
	#[serde(default, rename = "oldURL", skip_serializing_if = "Option::is_none")]
	pub old_url: Option<String>,
	#[serde(default, rename = "newURL", skip_serializing_if = "Option::is_none")]
	pub new_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub persisted: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
	#[serde(rename = "type")]
	pub report_type: String,
	pub url: String,
	pub body: Value,
	pub time: f64,
}

/// Latest intersection state of a session's target node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
	pub is_intersecting: bool,
	pub ratio: f64,
	pub time: f64,
}

/// Human-oriented description of an interaction target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
	pub tag: String,
	pub id: String,
	pub class_name: String,
	pub selector: String,
}

impl TargetSummary {
	pub fn unknown() -> Self {
		Self {
			tag: "UNKNOWN".to_string(),
			id: String::new(),
			class_name: String::new(),
			selector: String::new(),
		}
	}
}

/// Snapshot of the DOM event that opened a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomEventInfo {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub button: Option<i16>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pointer_type: Option<String>,
	pub target: TargetSummary,
	pub modifiers: Modifiers,
}

/// Running aggregates over a session's attached telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
	pub inp_like: f64,
	pub max_loaf_ms: f64,
	pub total_cls: f64,
	pub net_count: usize,
	pub net_max_ms: f64,
}

/// The closed set of event shapes the matcher and session buckets accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Telemetry {
	Performance(PerformanceEntry),
	Network(NetworkEvent),
	Console(ConsoleRecord),
	Error(ErrorRecord),
	Navigation(NavRecord),
	Report(ReportRecord),
}

impl Telemetry {
	/// Timestamp used for window matching.
	pub fn timestamp(&self) -> f64 {
		match self {
			Telemetry::Performance(entry) => entry.start_time(),
			Telemetry::Network(evt) => evt.start_time,
			Telemetry::Console(rec) => rec.time,
			Telemetry::Error(rec) => rec.time(),
			Telemetry::Navigation(rec) => rec.time,
			Telemetry::Report(rec) => rec.time,
		}
	}
}
