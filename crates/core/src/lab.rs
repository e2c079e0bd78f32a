//! The interaction lab engine.
//!
//! [`InteractionLab`] is a cheap handle over one [`LabInner`] per host. All
//! mutable engine state sits behind a single mutex that is never held while
//! host code, the network policy, the log sink or a console binding runs:
//! handlers collect what they want to emit under the lock and emit after
//! releasing it.

use std::sync::{Arc, Weak};

use lab_protocol::{
	ConsoleRecord, ErrorRecord, HostReport, HostValue, IntersectionEntry, InteractionEvent, Level, LogRecord, NavKind, NavRecord, NetworkEvent,
	PerformanceEntry, ReportRecord, ResizeEntry, ResourceTiming, ScriptError, Telemetry, Visibility,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};
use url::Url;

use crate::bridges::{self, shield};
use crate::config::{LabConfig, LabOptions};
use crate::emit::{Emission, Emitter};
use crate::error::Result;
use crate::factory;
use crate::host::{Host, NodeObserver, TimerId};
use crate::lifecycle::{Instrumentation, TeardownReport};
use crate::matcher::TimeWindowMatcher;
use crate::policy::{self, NetworkPolicy, PolicyDecision};
use crate::registry::SessionRegistry;
use crate::resource::ResourceTimingCache;
use crate::session::{Session, SessionId};

/// Listener, observer and patch counts currently installed on the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstalledCounts {
	pub listeners: usize,
	pub observers: usize,
	pub patches: usize,
}

/// Point-in-time copy of the engine state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
	pub initialized: bool,
	pub config: LabConfig,
	/// Sessions in creation order.
	pub interactions: Vec<Session>,
	/// Bridges with live registrations.
	pub observers: Vec<String>,
	pub recent_resources_count: usize,
	#[serde(skip)]
	pub installed: InstalledCounts,
}

#[derive(Debug, Default)]
struct MutationBatch {
	pending: usize,
	armed: bool,
	timer: Option<TimerId>,
}

struct LabState {
	running: bool,
	config: LabConfig,
	registry: SessionRegistry,
	matcher: TimeWindowMatcher,
	resources: ResourceTimingCache,
	instrumentation: Option<Instrumentation>,
	mutations: MutationBatch,
}

impl LabState {
	fn new(config: LabConfig) -> Self {
		Self {
			running: false,
			registry: SessionRegistry::new(config.max_stored_interactions),
			matcher: TimeWindowMatcher::new(config.interaction_window_ms),
			resources: ResourceTimingCache::new(config.max_recent_resources),
			instrumentation: None,
			mutations: MutationBatch::default(),
			config,
		}
	}

	/// Starts over with `config`; sessions and cached resources from an earlier
	/// run are dropped.
	fn reset(&mut self, config: LabConfig) {
		self.registry = SessionRegistry::new(config.max_stored_interactions);
		self.matcher.reset(config.interaction_window_ms);
		self.resources.reset(config.max_recent_resources);
		self.mutations = MutationBatch::default();
		self.config = config;
	}

	fn attach(&mut self, telemetry: Telemetry) -> Option<SessionId> {
		let id = self.matcher.find(&self.registry, telemetry.timestamp())?;
		self.registry.get_mut(&id)?.attach(telemetry);
		Some(id)
	}

	fn node_observers(&self) -> Vec<Arc<dyn NodeObserver>> {
		self.instrumentation.as_ref().map(Instrumentation::node_observers).unwrap_or_default()
	}
}

/// Resolves `raw` against `base`, leaving it untouched when either fails to
/// parse.
pub(crate) fn absolutize(base: &str, raw: &str) -> String {
	let resolved = match Url::parse(base) {
		Ok(base) => base.join(raw),
		Err(_) => Url::parse(raw),
	};
	resolved.map(String::from).unwrap_or_else(|_| raw.to_string())
}

pub(crate) struct LabInner {
	pub(crate) host: Arc<Host>,
	pub(crate) emitter: Emitter,
	state: Mutex<LabState>,
	policy: RwLock<Option<Arc<dyn NetworkPolicy>>>,
	this: Weak<LabInner>,
}

impl LabInner {
	fn new(host: Arc<Host>, this: Weak<LabInner>) -> Self {
		Self {
			host,
			emitter: Emitter::new(),
			state: Mutex::new(LabState::new(LabConfig::default())),
			policy: RwLock::new(None),
			this,
		}
	}

	pub(crate) fn weak(&self) -> Weak<LabInner> {
		self.this.clone()
	}

	pub(crate) fn now(&self) -> f64 {
		self.host.clock.now()
	}

	pub(crate) fn absolute_url(&self, raw: &str) -> String {
		absolutize(&self.host.href(), raw)
	}

	pub(crate) fn emit(&self, emission: Emission) {
		self.emitter.emit(&self.host, emission);
	}

	fn emit_all(&self, emissions: Vec<Emission>) {
		for emission in emissions {
			self.emit(emission);
		}
	}

	pub(crate) fn decide(&self, request: &NetworkEvent) -> PolicyDecision {
		let policy = self.policy.read().clone();
		policy::evaluate(policy.as_ref(), request)
	}

	pub(crate) fn attach(&self, telemetry: Telemetry) -> Option<SessionId> {
		self.state.lock().attach(telemetry)
	}

	pub(crate) fn match_resource_timing(&self, url: &str, start: f64) -> Option<ResourceTiming> {
		let state = self.state.lock();
		state.resources.find(url, start, state.config.resource_match_window_ms).cloned()
	}

	pub(crate) fn tag_network_event(&self, evt: NetworkEvent) -> Option<SessionId> {
		let id = self.attach(Telemetry::Network(evt.clone()));
		self.emit(Emission::new(evt.level, "Network", evt.kind.as_str()).details(&evt).interaction(id.clone()));
		id
	}

	/// Correlates a completed call with its resource entry, then tags it.
	pub(crate) fn finish_network(&self, mut evt: NetworkEvent) -> Option<SessionId> {
		if evt.resource_timing.is_none() {
			evt.resource_timing = self.match_resource_timing(&evt.url, evt.start_time);
		}
		self.tag_network_event(evt)
	}

	pub(crate) fn start_interaction(&self, event: &InteractionEvent) {
		let now = self.now();
		let snapshot = self.host.viewport.as_ref().map(|v| v.snapshot()).unwrap_or_default();

		let (id, evicted, window_ms, target, observers, selector) = {
			let mut state = self.state.lock();
			if !state.running {
				return;
			}
			let session = factory::open_session(event, now, snapshot, &state.config);
			let id = session.id.clone();
			let target = session.target();
			let selector = session.dom_event.target.selector.clone();
			let evicted = state.registry.create(session);
			state.matcher.note(id.clone());
			(id, evicted, state.config.interaction_window_ms, target, state.node_observers(), selector)
		};

		if let Some(old) = evicted {
			debug!(target = "lab.session", id = %old.id, "evicted oldest interaction");
			self.release(&old, &observers);
		}

		let weak = self.weak();
		let timer_id = id.clone();
		let scheduled = self.host.timers.set_timeout(
			window_ms,
			Box::new(move || {
				if let Some(lab) = weak.upgrade() {
					shield("timer", || lab.close_interaction(&timer_id));
				}
			}),
		);
		match scheduled {
			Ok(timer) => {
				let stale = {
					let mut state = self.state.lock();
					match state.registry.get_mut(&id) {
						Some(session) if !session.is_closed() => {
							session.close_timer = Some(timer);
							false
						}
						_ => true,
					}
				};
				if stale {
					self.host.timers.clear_timeout(timer);
				}
			}
			Err(err) => debug!(target = "lab.session", error = %err, "auto-close unavailable"),
		}

		if let Some(node) = target {
			for observer in &observers {
				if let Some(Err(err)) = shield("observers", || observer.observe(node)) {
					debug!(target = "lab.observers", node = %node, error = %err, "failed to observe target");
				}
			}
		}

		self.emit(
			Emission::new(Level::Info, "InteractionStart", format!("{} on {}", event.kind, selector))
				.details(json!({ "id": id, "type": event.kind }))
				.interaction(Some(id)),
		);
	}

	/// Cancels the timer and detaches observers of a session leaving the registry.
	fn release(&self, session: &Session, observers: &[Arc<dyn NodeObserver>]) {
		if let Some(timer) = session.close_timer {
			self.host.timers.clear_timeout(timer);
		}
		if let Some(node) = session.target() {
			for observer in observers {
				shield("observers", || observer.unobserve(node));
			}
		}
	}

	pub(crate) fn close_interaction(&self, id: &str) -> bool {
		let now = self.now();
		let (timer, target, observers, summary, details) = {
			let mut state = self.state.lock();
			let observers = state.node_observers();
			let Some(session) = state.registry.get_mut(id) else {
				return false;
			};
			if !session.close(now) {
				return false;
			}
			let details = json!({
				"id": session.id,
				"durationMs": now - session.start_time,
				"metrics": session.metrics,
			});
			(session.close_timer.take(), session.target(), observers, session.summary(), details)
		};

		if let Some(timer) = timer {
			self.host.timers.clear_timeout(timer);
		}
		if let Some(node) = target {
			for observer in &observers {
				shield("observers", || observer.unobserve(node));
			}
		}

		self.emit(Emission::new(Level::Info, "InteractionSummary", summary).details(details).interaction(Some(id.to_string())));
		true
	}

	pub(crate) fn handle_performance(&self, entries: Vec<PerformanceEntry>) {
		let base = self.host.href();
		let mut emissions = Vec::new();
		{
			let mut state = self.state.lock();
			for entry in entries {
				match entry {
					PerformanceEntry::LayoutShift(ref shift) if shift.had_recent_input => {}
					PerformanceEntry::Resource(mut timing) => {
						if timing.duration < state.config.min_resource_duration_ms {
							continue;
						}
						timing.name = absolutize(&base, &timing.name);
						state.resources.insert(timing.clone());
						let id = state.attach(Telemetry::Performance(PerformanceEntry::Resource(timing.clone())));
						if state.config.log_resource_entries {
							let label = if timing.initiator_type.is_empty() { "resource".to_string() } else { timing.initiator_type.clone() };
							emissions.push(Emission::new(Level::Debug, "Resource", label).details(&timing).interaction(id));
						}
					}
					other => {
						let (level, tag) = perf_tag(&other);
						let emission = Emission::new(level, tag, other.label()).details(&other);
						let id = state.attach(Telemetry::Performance(other));
						emissions.push(emission.interaction(id));
					}
				}
			}
		}
		self.emit_all(emissions);
	}

	pub(crate) fn handle_intersections(&self, entries: Vec<IntersectionEntry>) {
		let now = self.now();
		let mut emissions = Vec::new();
		{
			let mut state = self.state.lock();
			for entry in entries {
				let latest = state
					.registry
					.all()
					.rev()
					.find(|session| session.target() == Some(entry.node))
					.map(|session| session.id.clone());
				if let Some(session) = latest.as_deref().and_then(|id| state.registry.get_mut(id)) {
					session.visibility = Some(Visibility {
						is_intersecting: entry.is_intersecting,
						ratio: entry.ratio,
						time: now,
					});
				}
				emissions.push(Emission::new(Level::Debug, "Intersection", "entry").details(entry).interaction(latest));
			}
		}
		self.emit_all(emissions);
	}

	pub(crate) fn handle_resizes(&self, entries: Vec<ResizeEntry>) {
		for entry in entries {
			self.emit(Emission::new(Level::Debug, "Resize", "entry").details(entry));
		}
	}

	/// Counts mutation records and arms one batch timer per throttle window.
	pub(crate) fn handle_mutations(&self, count: usize) {
		let delay = {
			let mut state = self.state.lock();
			if !state.running {
				return;
			}
			state.mutations.pending += count;
			if state.mutations.armed {
				return;
			}
			state.mutations.armed = true;
			state.config.mutation_batch_ms
		};

		let weak = self.weak();
		let scheduled = self.host.timers.set_timeout(
			delay,
			Box::new(move || {
				if let Some(lab) = weak.upgrade() {
					shield("mutation", || lab.flush_mutations());
				}
			}),
		);
		match scheduled {
			Ok(timer) => {
				let mut state = self.state.lock();
				if state.mutations.armed {
					state.mutations.timer = Some(timer);
				}
			}
			Err(err) => {
				debug!(target = "lab.observers", error = %err, "mutation throttle unavailable; flushing now");
				self.flush_mutations();
			}
		}
	}

	fn flush_mutations(&self) {
		let count = {
			let mut state = self.state.lock();
			let batch = std::mem::take(&mut state.mutations);
			batch.pending
		};
		if count > 0 {
			self.emit(Emission::new(Level::Debug, "Mutation", "batch").details(json!({ "count": count })));
		}
	}

	pub(crate) fn handle_reports(&self, reports: Vec<HostReport>) {
		let mut emissions = Vec::new();
		for report in reports {
			let record = ReportRecord {
				report_type: report.report_type,
				url: report.url,
				body: report.body,
				time: self.now(),
			};
			let emission = Emission::new(Level::Warn, "ReportingObserver", record.report_type.clone()).details(&record);
			let id = self.attach(Telemetry::Report(record));
			emissions.push(emission.interaction(id));
		}
		self.emit_all(emissions);
	}

	pub(crate) fn record_error(&self, error: &ScriptError) {
		let record = ErrorRecord::ErrorEvent {
			message: error.message.clone(),
			filename: error.filename.clone(),
			lineno: error.lineno,
			colno: error.colno,
			error: error.error.clone(),
			time: self.now(),
		};
		let emission = Emission::new(Level::Error, "Error", "window error event").details(&record);
		let id = self.attach(Telemetry::Error(record));
		self.emit(emission.interaction(id));
	}

	pub(crate) fn record_onerror(&self, error: &ScriptError) {
		let message = if error.message.is_empty() { "Error".to_string() } else { error.message.clone() };
		let record = ErrorRecord::OnError {
			message: message.clone(),
			source: error.filename.clone(),
			line: error.lineno,
			col: error.colno,
			error: error.error.clone(),
			time: self.now(),
		};
		let emission = Emission::new(Level::Error, "Error", message).details(&record);
		let id = self.attach(Telemetry::Error(record));
		self.emit(emission.interaction(id));
	}

	pub(crate) fn record_rejection(&self, reason: Option<&HostValue>) {
		let text = match reason {
			None | Some(HostValue::Null) | Some(HostValue::Undefined) => "unknown".to_string(),
			Some(value) => value.describe(),
		};
		let record = ErrorRecord::UnhandledRejection {
			reason: text.clone(),
			raw_reason: reason.cloned(),
			time: self.now(),
		};
		let emission = Emission::new(Level::Error, "Promise", text).details(&record);
		let id = self.attach(Telemetry::Error(record));
		self.emit(emission.interaction(id));
	}

	/// Fresh navigation record for `kind` with location fields filled in.
	pub(crate) fn nav_record(&self, kind: NavKind) -> NavRecord {
		NavRecord {
			kind,
			href: self.host.href(),
			referrer: self.host.referrer(),
			time: self.now(),
			before: None,
			after: None,
			url: None,
			old_url: None,
			new_url: None,
			persisted: None,
		}
	}

	pub(crate) fn record_nav(&self, record: NavRecord) {
		let emission = Emission::new(Level::Info, "Nav", record.kind.as_str()).details(&record);
		let id = self.attach(Telemetry::Navigation(record));
		self.emit(emission.interaction(id));
	}

	/// Stores a page console call and forwards it to the sink directly.
	pub(crate) fn capture_console(&self, level: Level, args: Vec<HostValue>) {
		let record = ConsoleRecord {
			level,
			time: self.now(),
			wall_time: self.host.clock.wall_time(),
			args,
		};
		let id = self.attach(Telemetry::Console(record.clone()));
		if let Some(sink) = self.emitter.sink() {
			let log = LogRecord {
				tag: "Console".to_string(),
				level,
				message: level.as_str().to_string(),
				timestamp: record.wall_time.clone(),
				interaction_id: id,
				details: serde_json::to_value(&record).ok(),
			};
			shield("console", || sink.add_log(log));
		}
	}

	fn snapshot(&self) -> StateSnapshot {
		let state = self.state.lock();
		let installed = state
			.instrumentation
			.as_ref()
			.map(|inst| InstalledCounts {
				listeners: inst.listener_count(),
				observers: inst.observer_count(),
				patches: inst.patch_count(),
			})
			.unwrap_or_default();
		StateSnapshot {
			initialized: state.running,
			config: state.config.clone(),
			interactions: state.registry.all().cloned().collect(),
			observers: state.instrumentation.as_ref().map(Instrumentation::active_bridges).unwrap_or_default(),
			recent_resources_count: state.resources.len(),
			installed,
		}
	}
}

fn perf_tag(entry: &PerformanceEntry) -> (Level, &'static str) {
	match entry {
		PerformanceEntry::Event(_) => (Level::Debug, "EventTiming"),
		PerformanceEntry::LongAnimationFrame(_) => (Level::Debug, "LoAF"),
		PerformanceEntry::LongTask(_) => (Level::Debug, "LongTask"),
		PerformanceEntry::LayoutShift(_) => (Level::Debug, "CLS"),
		PerformanceEntry::LargestContentfulPaint(_) => (Level::Debug, "LCP"),
		PerformanceEntry::Paint(_) => (Level::Debug, "Paint"),
		PerformanceEntry::Navigation(_) => (Level::Info, "NavigationTiming"),
		PerformanceEntry::Resource(_) => (Level::Debug, "Resource"),
	}
}

/// Handle to the engine injected into a host.
///
/// Clones share one engine. A started engine stays bound to its host after
/// every handle is dropped, so a later [`InteractionLab::inject`] gets it back
/// and [`InteractionLab::stop`] can still restore the host.
#[derive(Clone)]
pub struct InteractionLab {
	inner: Arc<LabInner>,
}

impl InteractionLab {
	/// Binds an engine to `host`, or returns the one already bound to it.
	pub fn inject(host: Arc<Host>) -> Self {
		let mut injected = host.injected.lock();
		if let Some(inner) = injected.upgrade() {
			debug!(target = "lab", "already injected; reusing instance");
			return Self { inner };
		}
		let inner = Arc::new_cyclic(|this| LabInner::new(Arc::clone(&host), this.clone()));
		*injected = Arc::downgrade(&inner);
		Self { inner }
	}

	pub fn host(&self) -> &Arc<Host> {
		&self.inner.host
	}

	/// True when both handles drive the same engine.
	pub fn same_instance(&self, other: &InteractionLab) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	pub fn is_running(&self) -> bool {
		self.inner.state.lock().running
	}

	/// Validates the config and applies every enabled bridge.
	///
	/// Returns `Ok(false)` without touching the host when already running.
	pub fn start(&self, options: LabOptions) -> Result<bool> {
		let LabOptions { config, policy, sink } = options;
		config.validate()?;
		{
			let mut state = self.inner.state.lock();
			if state.running {
				debug!(target = "lab", "already running; start ignored");
				return Ok(false);
			}
			state.running = true;
			state.reset(config.clone());
		}
		*self.inner.policy.write() = policy;
		self.inner.emitter.set_sink(sink);

		let instrumentation = bridges::install(&self.inner, &config);
		let active = instrumentation.active_bridges();
		self.inner.state.lock().instrumentation = Some(instrumentation);
		*self.inner.host.running.lock() = Some(Arc::clone(&self.inner));

		info!(target = "lab", bridges = ?active, "instrumentation applied");
		self.inner
			.emit(Emission::new(Level::Info, "Init", "Initialized").details(json!({ "config": config, "observers": active })));
		Ok(true)
	}

	/// Closes open sessions and reverses all instrumentation.
	///
	/// Every step is attempted even if earlier ones fail; failures are in the
	/// returned report. Stopping a stopped engine returns an empty report.
	pub fn stop(&self) -> TeardownReport {
		let open: Vec<SessionId> = {
			let state = self.inner.state.lock();
			if !state.running {
				debug!(target = "lab", "not running; stop ignored");
				return TeardownReport::default();
			}
			state.registry.all().filter(|s| !s.is_closed()).map(|s| s.id.clone()).collect()
		};
		for id in open {
			self.inner.close_interaction(&id);
		}

		let (instrumentation, mutation_timer) = {
			let mut state = self.inner.state.lock();
			state.running = false;
			let batch = std::mem::take(&mut state.mutations);
			(state.instrumentation.take(), batch.timer)
		};
		if let Some(timer) = mutation_timer {
			self.inner.host.timers.clear_timeout(timer);
		}
		self.inner.host.running.lock().take();

		let report = instrumentation.map(Instrumentation::teardown).unwrap_or_default();
		info!(
			target = "lab",
			listeners = report.listeners_removed,
			observers = report.observers_disconnected,
			patches = report.patches_restored,
			failures = report.failures.len(),
			"instrumentation removed"
		);
		self.inner.emit(Emission::new(Level::Info, "Stop", "Stopped").details(&report));
		report
	}

	pub fn state(&self) -> StateSnapshot {
		self.inner.snapshot()
	}

	pub fn session(&self, id: &str) -> Option<Session> {
		self.inner.state.lock().registry.get(id).cloned()
	}

	/// Attributes an externally produced network event by its start time.
	pub fn tag_network_event(&self, evt: NetworkEvent) -> Option<SessionId> {
		self.inner.tag_network_event(evt)
	}

	/// Closes a session early. Returns false for unknown or closed sessions.
	pub fn close_interaction(&self, id: &str) -> bool {
		self.inner.close_interaction(id)
	}

	/// Best cached resource entry for a call to `url` started at `start`.
	pub fn match_resource_timing(&self, url: &str, start: f64) -> Option<ResourceTiming> {
		let url = self.inner.absolute_url(url);
		self.inner.match_resource_timing(&url, start)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn absolutize_resolves_relative_paths() {
		assert_eq!(absolutize("https://app.test/shop/cart", "/api/items"), "https://app.test/api/items");
		assert_eq!(absolutize("https://app.test/shop/cart", "items?x=1"), "https://app.test/shop/items?x=1");
		assert_eq!(absolutize("https://app.test/", "https://cdn.test/a.js"), "https://cdn.test/a.js");
	}

	#[test]
	fn absolutize_without_base_keeps_input() {
		assert_eq!(absolutize("", "/api"), "/api");
		assert_eq!(absolutize("", "https://a.test/x"), "https://a.test/x");
	}
}
