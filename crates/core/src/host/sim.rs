//! In-memory host page for tests and trace replay.
//!
//! [`SimulatedPage`] owns a manual clock and timer queue plus scripted
//! versions of every capability. Page-side calls (`fetch`, `push_state`,
//! `console`, ...) always go through the host's current bindings, so they
//! hit whatever the engine installed.
//!
//! ```ignore
//! let page = SimulatedPage::builder().href("https://app.test/").build();
//! let lab = InteractionLab::inject(page.host());
//! lab.start(LabOptions::default())?;
//!
//! page.interact(InteractionEvent::new("click").on(button));
//! page.advance(4_000.0);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use lab_protocol::{
	EntryType, HostEvent, HostReport, HostValue, IntersectionEntry, InteractionEvent, Level, NetworkKind, NodeId, PerformanceEntry, ResizeEntry,
	ResourceTiming, ScriptError, Viewport, ViewportSnapshot,
};
use parking_lot::Mutex;

use super::{
	BeaconPrimitive, Binding, Bindings, Clock, ConsoleBindings, ConsoleMethod, EntryCallback, ErrorHandler, EventTarget, FetchPrimitive,
	FetchRequest, FetchResponse, HistoryEntry, Host, HostError, IntersectionCallback, Listener, ListenerId, Location, MutationCallback,
	NetworkError, NodeObserver, ObserverFactory, ObserverHandle, PerformanceSource, ReportCallback, ReportingSource, ResizeCallback, Socket,
	SocketListener, SocketPrimitive, TimerDriver, TimerId, TimerTask, ViewportSource, XhrCallback, XhrOutcome, XhrPrimitive, XhrRequest,
};
use crate::lab::absolutize;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
	now: Mutex<f64>,
}

impl ManualClock {
	pub fn new(start: f64) -> Self {
		Self { now: Mutex::new(start) }
	}

	pub fn set(&self, now: f64) {
		*self.now.lock() = now;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> f64 {
		*self.now.lock()
	}
}

struct PendingTimer {
	id: TimerId,
	due: f64,
	task: TimerTask,
}

/// Timer queue driven by [`ManualTimers::advance_to`].
pub struct ManualTimers {
	clock: Arc<ManualClock>,
	next_id: AtomicU64,
	pending: Mutex<Vec<PendingTimer>>,
}

impl ManualTimers {
	pub fn new(clock: Arc<ManualClock>) -> Self {
		Self {
			clock,
			next_id: AtomicU64::new(0),
			pending: Mutex::new(Vec::new()),
		}
	}

	pub fn pending_count(&self) -> usize {
		self.pending.lock().len()
	}

	/// Moves the clock to `target`, firing due timers in deadline order.
	///
	/// Each task runs with the clock set to its deadline and without the
	/// queue lock held, so tasks may schedule or clear timers.
	pub fn advance_to(&self, target: f64) {
		loop {
			let next = {
				let mut pending = self.pending.lock();
				let due = pending
					.iter()
					.enumerate()
					.filter(|(_, timer)| timer.due <= target)
					.min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
					.map(|(idx, _)| idx);
				due.map(|idx| pending.remove(idx))
			};
			let Some(timer) = next else { break };
			if timer.due > self.clock.now() {
				self.clock.set(timer.due);
			}
			(timer.task)();
		}
		if target > self.clock.now() {
			self.clock.set(target);
		}
	}

	pub fn advance(&self, ms: f64) {
		self.advance_to(self.clock.now() + ms);
	}
}

impl TimerDriver for ManualTimers {
	fn set_timeout(&self, delay_ms: f64, task: TimerTask) -> Result<TimerId, HostError> {
		let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		let due = self.clock.now() + delay_ms.max(0.0);
		self.pending.lock().push(PendingTimer { id, due, task });
		Ok(id)
	}

	fn clear_timeout(&self, id: TimerId) {
		self.pending.lock().retain(|timer| timer.id != id);
	}
}

type Subscribers<C> = Arc<Mutex<Vec<(u64, C)>>>;

/// Disconnect handle that drops one subscriber from a list.
struct Detach(Box<dyn Fn() + Send + Sync>);

impl ObserverHandle for Detach {
	fn disconnect(&self) -> Result<(), HostError> {
		(self.0)();
		Ok(())
	}
}

fn subscribe<C: Send + 'static>(list: &Subscribers<C>, next: &AtomicU64, callback: C) -> Box<dyn ObserverHandle> {
	let id = next.fetch_add(1, Ordering::Relaxed);
	list.lock().push((id, callback));
	let list = Arc::clone(list);
	Box::new(Detach(Box::new(move || list.lock().retain(|(other, _)| *other != id))))
}

/// Document or window.
#[derive(Default)]
pub struct SimEventTarget {
	next_id: AtomicU64,
	listeners: Mutex<Vec<(ListenerId, String, Listener)>>,
}

impl SimEventTarget {
	/// Delivers `event` to every listener registered for its type.
	pub fn dispatch(&self, event: &HostEvent) {
		let matching: Vec<Listener> = self
			.listeners
			.lock()
			.iter()
			.filter(|(_, event_type, _)| event_type == event.event_type())
			.map(|(_, _, listener)| Arc::clone(listener))
			.collect();
		for listener in matching {
			listener(event);
		}
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.lock().len()
	}
}

impl EventTarget for SimEventTarget {
	fn add_listener(&self, event_type: &str, _capture: bool, listener: Listener) -> Result<ListenerId, HostError> {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.listeners.lock().push((id, event_type.to_string(), listener));
		Ok(id)
	}

	fn remove_listener(&self, id: ListenerId) -> Result<(), HostError> {
		let mut listeners = self.listeners.lock();
		let before = listeners.len();
		listeners.retain(|(other, _, _)| *other != id);
		if listeners.len() == before {
			return Err(HostError::Rejected(format!("unknown listener {}", id.0)));
		}
		Ok(())
	}
}

/// Performance timeline with a replayable entry buffer.
pub struct SimPerformance {
	supported: Vec<EntryType>,
	recorded: Mutex<Vec<PerformanceEntry>>,
	next_id: AtomicU64,
	observers: Subscribers<(EntryType, EntryCallback)>,
}

impl SimPerformance {
	pub fn new(supported: Vec<EntryType>) -> Self {
		Self {
			supported,
			recorded: Mutex::new(Vec::new()),
			next_id: AtomicU64::new(0),
			observers: Arc::default(),
		}
	}

	/// Buffers `entries` and delivers them to observers of their type.
	pub fn record(&self, entries: Vec<PerformanceEntry>) {
		self.recorded.lock().extend(entries.iter().cloned());
		let observers: Vec<(EntryType, EntryCallback)> = self.observers.lock().iter().map(|(_, sub)| sub.clone()).collect();
		for (kind, callback) in observers {
			let batch: Vec<PerformanceEntry> = entries.iter().filter(|e| e.entry_type() == kind).cloned().collect();
			if !batch.is_empty() {
				callback(batch);
			}
		}
	}

	pub fn observer_count(&self) -> usize {
		self.observers.lock().len()
	}
}

impl PerformanceSource for SimPerformance {
	fn supported_entry_types(&self) -> Vec<EntryType> {
		self.supported.clone()
	}

	fn observe(&self, kind: EntryType, buffered: bool, callback: EntryCallback) -> Result<Box<dyn ObserverHandle>, HostError> {
		if !self.supported.contains(&kind) {
			return Err(HostError::Unsupported("performance entry type"));
		}
		let handle = subscribe(&self.observers, &self.next_id, (kind, Arc::clone(&callback)));
		if buffered {
			let earlier = self.entries_by_type(kind);
			if !earlier.is_empty() {
				callback(earlier);
			}
		}
		Ok(handle)
	}

	fn entries_by_type(&self, kind: EntryType) -> Vec<PerformanceEntry> {
		self.recorded.lock().iter().filter(|e| e.entry_type() == kind).cloned().collect()
	}
}

/// A node observer that tracks which nodes it watches.
#[derive(Default)]
pub struct SimNodeObserver {
	observed: Mutex<BTreeSet<NodeId>>,
	connected: AtomicBool,
}

impl SimNodeObserver {
	fn new() -> Self {
		Self {
			observed: Mutex::default(),
			connected: AtomicBool::new(true),
		}
	}

	pub fn watches(&self, node: NodeId) -> bool {
		self.connected.load(Ordering::SeqCst) && self.observed.lock().contains(&node)
	}

	pub fn observed(&self) -> Vec<NodeId> {
		self.observed.lock().iter().copied().collect()
	}
}

impl NodeObserver for SimNodeObserver {
	fn observe(&self, node: NodeId) -> Result<(), HostError> {
		self.observed.lock().insert(node);
		Ok(())
	}

	fn unobserve(&self, node: NodeId) {
		self.observed.lock().remove(&node);
	}

	fn disconnect(&self) -> Result<(), HostError> {
		self.connected.store(false, Ordering::SeqCst);
		self.observed.lock().clear();
		Ok(())
	}
}

/// Which observer kinds the simulated page supports.
#[derive(Debug, Clone, Copy)]
pub struct ObserverSupport {
	pub intersection: bool,
	pub resize: bool,
	pub mutation: bool,
}

impl Default for ObserverSupport {
	fn default() -> Self {
		Self {
			intersection: true,
			resize: true,
			mutation: true,
		}
	}
}

pub struct SimObservers {
	support: ObserverSupport,
	intersections: Mutex<Vec<(Arc<SimNodeObserver>, IntersectionCallback)>>,
	resizes: Mutex<Vec<(Arc<SimNodeObserver>, ResizeCallback)>>,
	next_id: AtomicU64,
	mutations: Subscribers<MutationCallback>,
}

impl SimObservers {
	pub fn new(support: ObserverSupport) -> Self {
		Self {
			support,
			intersections: Mutex::default(),
			resizes: Mutex::default(),
			next_id: AtomicU64::new(0),
			mutations: Arc::default(),
		}
	}

	pub fn intersect(&self, entry: IntersectionEntry) {
		let callbacks: Vec<IntersectionCallback> = self
			.intersections
			.lock()
			.iter()
			.filter(|(observer, _)| observer.watches(entry.node))
			.map(|(_, cb)| Arc::clone(cb))
			.collect();
		for callback in callbacks {
			callback(vec![entry]);
		}
	}

	pub fn resize(&self, entry: ResizeEntry) {
		let callbacks: Vec<ResizeCallback> = self
			.resizes
			.lock()
			.iter()
			.filter(|(observer, _)| observer.watches(entry.node))
			.map(|(_, cb)| Arc::clone(cb))
			.collect();
		for callback in callbacks {
			callback(vec![entry]);
		}
	}

	/// Delivers one batch of `count` mutation records.
	pub fn mutate(&self, count: usize) {
		let callbacks: Vec<MutationCallback> = self.mutations.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
		for callback in callbacks {
			callback(count);
		}
	}

	/// Nodes currently watched by any intersection observer.
	pub fn observed_nodes(&self) -> Vec<NodeId> {
		let nodes: BTreeSet<NodeId> = self.intersections.lock().iter().flat_map(|(observer, _)| observer.observed()).collect();
		nodes.into_iter().collect()
	}

	pub fn mutation_observer_count(&self) -> usize {
		self.mutations.lock().len()
	}
}

impl ObserverFactory for SimObservers {
	fn intersection(&self, callback: IntersectionCallback) -> Result<Arc<dyn NodeObserver>, HostError> {
		if !self.support.intersection {
			return Err(HostError::Unsupported("IntersectionObserver"));
		}
		let observer = Arc::new(SimNodeObserver::new());
		self.intersections.lock().push((Arc::clone(&observer), callback));
		Ok(observer)
	}

	fn resize(&self, callback: ResizeCallback) -> Result<Arc<dyn NodeObserver>, HostError> {
		if !self.support.resize {
			return Err(HostError::Unsupported("ResizeObserver"));
		}
		let observer = Arc::new(SimNodeObserver::new());
		self.resizes.lock().push((Arc::clone(&observer), callback));
		Ok(observer)
	}

	fn mutation(&self, callback: MutationCallback) -> Result<Box<dyn ObserverHandle>, HostError> {
		if !self.support.mutation {
			return Err(HostError::Unsupported("MutationObserver"));
		}
		Ok(subscribe(&self.mutations, &self.next_id, callback))
	}
}

#[derive(Default)]
pub struct SimReporting {
	next_id: AtomicU64,
	observers: Subscribers<(Vec<String>, ReportCallback)>,
}

impl SimReporting {
	pub fn report(&self, report: HostReport) {
		let callbacks: Vec<ReportCallback> = self
			.observers
			.lock()
			.iter()
			.filter(|(_, (types, _))| types.contains(&report.report_type))
			.map(|(_, (_, cb))| Arc::clone(cb))
			.collect();
		for callback in callbacks {
			callback(vec![report.clone()]);
		}
	}
}

impl ReportingSource for SimReporting {
	fn observe(&self, types: &[&str], callback: ReportCallback) -> Result<Box<dyn ObserverHandle>, HostError> {
		let types = types.iter().map(|t| t.to_string()).collect();
		Ok(subscribe(&self.observers, &self.next_id, (types, callback)))
	}
}

pub struct SimLocation {
	href: Mutex<String>,
	referrer: String,
}

impl SimLocation {
	pub fn new(href: impl Into<String>, referrer: impl Into<String>) -> Self {
		Self {
			href: Mutex::new(href.into()),
			referrer: referrer.into(),
		}
	}

	pub fn set_href(&self, href: impl Into<String>) {
		*self.href.lock() = href.into();
	}
}

impl Location for SimLocation {
	fn href(&self) -> String {
		self.href.lock().clone()
	}

	fn referrer(&self) -> String {
		self.referrer.clone()
	}
}

#[derive(Default)]
pub struct SimViewport {
	snapshot: Mutex<ViewportSnapshot>,
}

impl SimViewport {
	pub fn set(&self, width: f64, height: f64, scroll_y: f64) {
		*self.snapshot.lock() = ViewportSnapshot {
			viewport: Viewport { width, height },
			scroll_y,
		};
	}
}

impl ViewportSource for SimViewport {
	fn snapshot(&self) -> ViewportSnapshot {
		*self.snapshot.lock()
	}
}

/// How a scripted request ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
	Status(u16),
	Fail(NetworkError),
	Timeout,
	Abort,
}

/// Scripted response for one URL.
#[derive(Debug, Clone)]
pub struct Route {
	pub outcome: RouteOutcome,
	pub latency_ms: f64,
	pub redirected: bool,
	/// Record a resource-timing entry when the request completes.
	pub resource_timing: bool,
}

impl Route {
	pub fn status(status: u16) -> Self {
		Self {
			outcome: RouteOutcome::Status(status),
			latency_ms: 0.0,
			redirected: false,
			resource_timing: true,
		}
	}

	pub fn fail(name: &str, message: &str) -> Self {
		Self {
			outcome: RouteOutcome::Fail(NetworkError::new(name, message)),
			resource_timing: false,
			..Self::status(0)
		}
	}

	pub fn timeout() -> Self {
		Self {
			outcome: RouteOutcome::Timeout,
			resource_timing: false,
			..Self::status(0)
		}
	}

	pub fn latency(mut self, ms: f64) -> Self {
		self.latency_ms = ms;
		self
	}

	pub fn redirected(mut self) -> Self {
		self.redirected = true;
		self
	}

	pub fn without_resource_timing(mut self) -> Self {
		self.resource_timing = false;
		self
	}
}

impl Default for Route {
	fn default() -> Self {
		Self::status(200)
	}
}

/// A request that reached the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformedRequest {
	pub transport: NetworkKind,
	pub method: String,
	pub url: String,
}

struct SimNetwork {
	clock: Arc<ManualClock>,
	timers: Arc<ManualTimers>,
	location: Arc<SimLocation>,
	performance: Option<Arc<SimPerformance>>,
	routes: Mutex<HashMap<String, Route>>,
	performed: Mutex<Vec<PerformedRequest>>,
	sockets: Mutex<Vec<Arc<SimSocket>>>,
}

impl SimNetwork {
	fn absolute(&self, raw: &str) -> String {
		absolutize(&self.location.href(), raw)
	}

	/// Logs the request and returns its absolute URL and scripted route.
	fn resolve(&self, transport: NetworkKind, method: &str, raw: &str) -> (String, Route) {
		let url = self.absolute(raw);
		self.performed.lock().push(PerformedRequest {
			transport,
			method: method.to_string(),
			url: url.clone(),
		});
		let route = self.routes.lock().get(&url).cloned().unwrap_or_default();
		(url, route)
	}

	/// Lets the route's latency pass and records its resource entry.
	fn complete(&self, route: &Route, url: &str, start: f64, initiator: &str) {
		self.timers.advance(route.latency_ms);
		if !route.resource_timing {
			return;
		}
		if let Some(performance) = &self.performance {
			performance.record(vec![PerformanceEntry::Resource(ResourceTiming {
				name: url.to_string(),
				initiator_type: initiator.to_string(),
				start_time: start,
				duration: self.clock.now() - start,
				..Default::default()
			})]);
		}
	}
}

struct SimFetch(Arc<SimNetwork>);

impl FetchPrimitive for SimFetch {
	fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, NetworkError>> {
		let net = Arc::clone(&self.0);
		let (url, route) = net.resolve(NetworkKind::Fetch, request.method(), &request.url);
		let start = net.clock.now();
		async move {
			net.complete(&route, &url, start, "fetch");
			match route.outcome {
				RouteOutcome::Status(status) => {
					let mut response = FetchResponse::new(status);
					response.redirected = route.redirected;
					Ok(response)
				}
				RouteOutcome::Fail(err) => Err(err),
				RouteOutcome::Timeout | RouteOutcome::Abort => Err(NetworkError::new("AbortError", "The operation was aborted.")),
			}
		}
		.boxed()
	}
}

struct SimXhr(Arc<SimNetwork>);

impl XhrPrimitive for SimXhr {
	fn send(&self, request: XhrRequest, on_done: XhrCallback) {
		let (url, route) = self.0.resolve(NetworkKind::Xhr, &request.method, &request.url);
		let start = self.0.clock.now();
		self.0.complete(&route, &url, start, "xmlhttprequest");
		let outcome = match route.outcome {
			RouteOutcome::Status(status) => XhrOutcome::Load { status },
			RouteOutcome::Fail(err) => XhrOutcome::Error(err),
			RouteOutcome::Timeout => XhrOutcome::Timeout,
			RouteOutcome::Abort => XhrOutcome::Abort,
		};
		on_done(outcome);
	}
}

struct SimBeacon(Arc<SimNetwork>);

impl BeaconPrimitive for SimBeacon {
	fn send_beacon(&self, url: &str, _data: &[u8]) -> bool {
		let (_, route) = self.0.resolve(NetworkKind::Beacon, "POST", url);
		matches!(route.outcome, RouteOutcome::Status(_))
	}
}

/// Server side of a simulated socket connection.
pub struct SimSocket {
	pub url: String,
	listener: Arc<dyn SocketListener>,
	sent: Mutex<Vec<usize>>,
	closed: AtomicBool,
}

impl SimSocket {
	/// Sizes of the frames the page sent.
	pub fn sent(&self) -> Vec<usize> {
		self.sent.lock().clone()
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	pub fn open(&self) {
		self.listener.on_open();
	}

	pub fn deliver(&self, size: usize) {
		self.listener.on_message(size);
	}

	pub fn fail(&self) {
		self.listener.on_error();
	}

	/// Closes from the server side.
	pub fn hang_up(&self, code: u16, reason: &str) {
		if !self.closed.swap(true, Ordering::SeqCst) {
			self.listener.on_close(code, reason, code == 1000);
		}
	}
}

impl Socket for SimSocket {
	fn send(&self, data: &[u8]) -> Result<(), NetworkError> {
		if self.is_closed() {
			return Err(NetworkError::new("InvalidStateError", "socket is closed"));
		}
		self.sent.lock().push(data.len());
		Ok(())
	}

	fn close(&self, code: u16, reason: &str) {
		self.hang_up(code, reason);
	}
}

struct SimSocketPrimitive(Arc<SimNetwork>);

impl SocketPrimitive for SimSocketPrimitive {
	fn connect(&self, url: &str, _protocols: &[String], listener: Arc<dyn SocketListener>) -> Result<Arc<dyn Socket>, NetworkError> {
		let (url, route) = self.0.resolve(NetworkKind::WebSocket, "GET", url);
		if let RouteOutcome::Fail(err) = route.outcome {
			return Err(err);
		}
		let socket = Arc::new(SimSocket {
			url,
			listener,
			sent: Mutex::default(),
			closed: AtomicBool::new(false),
		});
		self.0.sockets.lock().push(Arc::clone(&socket));
		Ok(socket)
	}
}

struct SimHistory(Arc<SimLocation>);

impl HistoryEntry for SimHistory {
	fn call(&self, url: Option<&str>) {
		if let Some(url) = url {
			let next = absolutize(&self.0.href(), url);
			self.0.set_href(next);
		}
	}
}

/// The page's own `onerror` handler; remembers what reached it.
struct SimErrorHandler(Arc<Mutex<Vec<ScriptError>>>);

impl ErrorHandler for SimErrorHandler {
	fn call(&self, error: &ScriptError) -> bool {
		self.0.lock().push(error.clone());
		false
	}
}

/// A line the page's console printed.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleLine {
	pub level: Level,
	pub args: Vec<HostValue>,
}

impl ConsoleLine {
	pub fn text(&self) -> String {
		self.args.iter().map(HostValue::describe).collect::<Vec<_>>().join(" ")
	}
}

struct SimConsole {
	level: Level,
	lines: Arc<Mutex<Vec<ConsoleLine>>>,
}

impl ConsoleMethod for SimConsole {
	fn call(&self, args: &[HostValue]) {
		self.lines.lock().push(ConsoleLine {
			level: self.level,
			args: args.to_vec(),
		});
	}
}

type PristineCheck = Box<dyn Fn() -> bool + Send + Sync>;

fn binding<T: ?Sized + Send + Sync + 'static>(name: &'static str, value: Arc<T>, checks: &mut Vec<PristineCheck>) -> Arc<Binding<T>> {
	let slot = Arc::new(Binding::new(name, Arc::clone(&value)));
	let watched = Arc::clone(&slot);
	checks.push(Box::new(move || watched.holds(&value)));
	slot
}

/// Builder for [`SimulatedPage`]; every capability is present by default.
pub struct SimulatedPageBuilder {
	start: f64,
	href: String,
	referrer: String,
	viewport: (f64, f64),
	entry_types: Vec<EntryType>,
	observers: Option<ObserverSupport>,
	document: bool,
	window: bool,
	performance: bool,
	reporting: bool,
	network: bool,
	history: bool,
	console: bool,
	console_debug: bool,
}

impl SimulatedPageBuilder {
	pub fn start_time(mut self, start: f64) -> Self {
		self.start = start;
		self
	}

	pub fn href(mut self, href: impl Into<String>) -> Self {
		self.href = href.into();
		self
	}

	pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
		self.referrer = referrer.into();
		self
	}

	pub fn viewport(mut self, width: f64, height: f64) -> Self {
		self.viewport = (width, height);
		self
	}

	pub fn entry_types(mut self, types: &[EntryType]) -> Self {
		self.entry_types = types.to_vec();
		self
	}

	pub fn observer_support(mut self, support: ObserverSupport) -> Self {
		self.observers = Some(support);
		self
	}

	pub fn without_observers(mut self) -> Self {
		self.observers = None;
		self
	}

	pub fn without_document(mut self) -> Self {
		self.document = false;
		self
	}

	pub fn without_window(mut self) -> Self {
		self.window = false;
		self
	}

	pub fn without_performance(mut self) -> Self {
		self.performance = false;
		self
	}

	pub fn without_reporting(mut self) -> Self {
		self.reporting = false;
		self
	}

	pub fn without_network(mut self) -> Self {
		self.network = false;
		self
	}

	pub fn without_history(mut self) -> Self {
		self.history = false;
		self
	}

	pub fn without_console(mut self) -> Self {
		self.console = false;
		self
	}

	pub fn without_console_debug(mut self) -> Self {
		self.console_debug = false;
		self
	}

	pub fn build(self) -> SimulatedPage {
		let clock = Arc::new(ManualClock::new(self.start));
		let timers = Arc::new(ManualTimers::new(Arc::clone(&clock)));
		let location = Arc::new(SimLocation::new(self.href, self.referrer));
		let viewport = Arc::new(SimViewport::default());
		viewport.set(self.viewport.0, self.viewport.1, 0.0);
		let document = Arc::new(SimEventTarget::default());
		let window = Arc::new(SimEventTarget::default());
		let performance = Arc::new(SimPerformance::new(self.entry_types));
		let observers = Arc::new(SimObservers::new(self.observers.unwrap_or_default()));
		let reporting = Arc::new(SimReporting::default());
		let console_lines = Arc::new(Mutex::new(Vec::new()));
		let page_errors = Arc::new(Mutex::new(Vec::new()));
		let net = Arc::new(SimNetwork {
			clock: Arc::clone(&clock),
			timers: Arc::clone(&timers),
			location: Arc::clone(&location),
			performance: self.performance.then(|| Arc::clone(&performance)),
			routes: Mutex::default(),
			performed: Mutex::default(),
			sockets: Mutex::default(),
		});

		let mut checks = Vec::new();
		let mut bindings = Bindings::default();
		if self.network {
			bindings.fetch = Some(binding("fetch", Arc::new(SimFetch(Arc::clone(&net))) as Arc<dyn FetchPrimitive>, &mut checks));
			bindings.xhr = Some(binding("XMLHttpRequest", Arc::new(SimXhr(Arc::clone(&net))) as Arc<dyn XhrPrimitive>, &mut checks));
			bindings.beacon = Some(binding("sendBeacon", Arc::new(SimBeacon(Arc::clone(&net))) as Arc<dyn BeaconPrimitive>, &mut checks));
			bindings.socket = Some(binding(
				"WebSocket",
				Arc::new(SimSocketPrimitive(Arc::clone(&net))) as Arc<dyn SocketPrimitive>,
				&mut checks,
			));
		}
		if self.history {
			bindings.push_state = Some(binding("pushState", Arc::new(SimHistory(Arc::clone(&location))) as Arc<dyn HistoryEntry>, &mut checks));
			bindings.replace_state = Some(binding(
				"replaceState",
				Arc::new(SimHistory(Arc::clone(&location))) as Arc<dyn HistoryEntry>,
				&mut checks,
			));
		}
		if self.console {
			let mut method = |name: &'static str, level: Level| {
				let console = Arc::new(SimConsole {
					level,
					lines: Arc::clone(&console_lines),
				}) as Arc<dyn ConsoleMethod>;
				binding(name, console, &mut checks)
			};
			bindings.console = Some(ConsoleBindings {
				log: method("console.log", Level::Log),
				info: method("console.info", Level::Info),
				warn: method("console.warn", Level::Warn),
				error: method("console.error", Level::Error),
				debug: self.console_debug.then(|| method("console.debug", Level::Debug)),
			});
		}

		if self.window {
			bindings.on_error = Some(binding(
				"onerror",
				Arc::new(SimErrorHandler(Arc::clone(&page_errors))) as Arc<dyn ErrorHandler>,
				&mut checks,
			));
		}

		let mut host = Host::new(Arc::clone(&clock) as Arc<dyn Clock>, Arc::clone(&timers) as Arc<dyn TimerDriver>)
			.with_location(Arc::clone(&location) as Arc<dyn Location>)
			.with_viewport(Arc::clone(&viewport) as Arc<dyn ViewportSource>)
			.with_bindings(bindings);
		if self.document {
			host = host.with_document(Arc::clone(&document) as Arc<dyn EventTarget>);
		}
		if self.window {
			host = host.with_window(Arc::clone(&window) as Arc<dyn EventTarget>);
		}
		if self.performance {
			host = host.with_performance(Arc::clone(&performance) as Arc<dyn PerformanceSource>);
		}
		if self.observers.is_some() {
			host = host.with_observers(Arc::clone(&observers) as Arc<dyn ObserverFactory>);
		}
		if self.reporting {
			host = host.with_reporting(Arc::clone(&reporting) as Arc<dyn ReportingSource>);
		}

		SimulatedPage {
			host: Arc::new(host),
			clock,
			timers,
			location,
			viewport,
			document,
			window,
			performance,
			observers,
			reporting,
			net,
			console_lines,
			page_errors,
			checks,
		}
	}
}

/// A scripted page plus the driver methods that play the page's part.
pub struct SimulatedPage {
	host: Arc<Host>,
	clock: Arc<ManualClock>,
	timers: Arc<ManualTimers>,
	location: Arc<SimLocation>,
	viewport: Arc<SimViewport>,
	document: Arc<SimEventTarget>,
	window: Arc<SimEventTarget>,
	performance: Arc<SimPerformance>,
	observers: Arc<SimObservers>,
	reporting: Arc<SimReporting>,
	net: Arc<SimNetwork>,
	console_lines: Arc<Mutex<Vec<ConsoleLine>>>,
	page_errors: Arc<Mutex<Vec<ScriptError>>>,
	checks: Vec<PristineCheck>,
}

impl SimulatedPage {
	pub fn builder() -> SimulatedPageBuilder {
		SimulatedPageBuilder {
			start: 0.0,
			href: "https://app.test/".to_string(),
			referrer: String::new(),
			viewport: (1280.0, 720.0),
			entry_types: EntryType::ALL.to_vec(),
			observers: Some(ObserverSupport::default()),
			document: true,
			window: true,
			performance: true,
			reporting: true,
			network: true,
			history: true,
			console: true,
			console_debug: true,
		}
	}

	pub fn host(&self) -> Arc<Host> {
		Arc::clone(&self.host)
	}

	pub fn now(&self) -> f64 {
		self.clock.now()
	}

	pub fn advance(&self, ms: f64) {
		self.timers.advance(ms);
	}

	pub fn advance_to(&self, t: f64) {
		self.timers.advance_to(t);
	}

	pub fn pending_timers(&self) -> usize {
		self.timers.pending_count()
	}

	pub fn href(&self) -> String {
		self.location.href()
	}

	pub fn scroll_to(&self, scroll_y: f64) {
		let current = self.viewport.snapshot();
		self.viewport.set(current.viewport.width, current.viewport.height, scroll_y);
	}

	pub fn interact(&self, event: InteractionEvent) {
		self.document.dispatch(&HostEvent::Interaction(event));
	}

	pub fn dispatch_window(&self, event: HostEvent) {
		self.window.dispatch(&event);
	}

	/// Raises an uncaught script error: the current `onerror` handler runs
	/// first, then the window `error` event. Returns the handler's verdict.
	pub fn throw(&self, error: ScriptError) -> bool {
		let handled = self.host.bindings.on_error.as_ref().is_some_and(|handler| handler.get().call(&error));
		self.window.dispatch(&HostEvent::Error(error));
		handled
	}

	pub fn record_entries(&self, entries: Vec<PerformanceEntry>) {
		self.performance.record(entries);
	}

	pub fn intersect(&self, entry: IntersectionEntry) {
		self.observers.intersect(entry);
	}

	pub fn resize(&self, entry: ResizeEntry) {
		self.observers.resize(entry);
	}

	pub fn mutate(&self, count: usize) {
		self.observers.mutate(count);
	}

	pub fn report(&self, report: HostReport) {
		self.reporting.report(report);
	}

	/// Scripts the response for `url`, resolved against the current location.
	pub fn route(&self, url: &str, route: Route) {
		let url = self.net.absolute(url);
		self.net.routes.lock().insert(url, route);
	}

	/// Calls the page's current `fetch`.
	pub fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, NetworkError>> {
		match &self.host.bindings.fetch {
			Some(fetch) => fetch.get().fetch(request),
			None => futures_util::future::ready(Err(NetworkError::new("ReferenceError", "fetch is not defined"))).boxed(),
		}
	}

	/// Sends through the page's current request object; `None` if it never
	/// completed.
	pub fn xhr(&self, request: XhrRequest) -> Option<XhrOutcome> {
		let xhr = self.host.bindings.xhr.as_ref()?.get();
		let result = Arc::new(Mutex::new(None));
		let slot = Arc::clone(&result);
		xhr.send(request, Box::new(move |outcome: XhrOutcome| *slot.lock() = Some(outcome)));
		result.lock().take()
	}

	pub fn send_beacon(&self, url: &str, data: &[u8]) -> bool {
		self.host.bindings.beacon.as_ref().is_some_and(|beacon| beacon.get().send_beacon(url, data))
	}

	pub fn connect_socket(&self, url: &str, listener: Arc<dyn SocketListener>) -> Result<Arc<dyn Socket>, NetworkError> {
		match &self.host.bindings.socket {
			Some(socket) => socket.get().connect(url, &[], listener),
			None => Err(NetworkError::new("ReferenceError", "WebSocket is not defined")),
		}
	}

	/// Server side of the `index`-th accepted connection.
	pub fn socket(&self, index: usize) -> Option<Arc<SimSocket>> {
		self.net.sockets.lock().get(index).cloned()
	}

	pub fn socket_count(&self) -> usize {
		self.net.sockets.lock().len()
	}

	pub fn push_state(&self, url: Option<&str>) {
		if let Some(entry) = &self.host.bindings.push_state {
			entry.get().call(url);
		}
	}

	pub fn replace_state(&self, url: Option<&str>) {
		if let Some(entry) = &self.host.bindings.replace_state {
			entry.get().call(url);
		}
	}

	/// Calls the page's current console method for `level`.
	pub fn console(&self, level: Level, args: &[HostValue]) {
		if let Some(method) = self.host.bindings.console.as_ref().and_then(|c| c.get(level)) {
			method.get().call(args);
		}
	}

	pub fn performed_requests(&self) -> Vec<PerformedRequest> {
		self.net.performed.lock().clone()
	}

	pub fn console_lines(&self) -> Vec<ConsoleLine> {
		self.console_lines.lock().clone()
	}

	/// Errors that reached the page's own `onerror` handler.
	pub fn page_errors(&self) -> Vec<ScriptError> {
		self.page_errors.lock().clone()
	}

	pub fn document_listeners(&self) -> usize {
		self.document.listener_count()
	}

	pub fn window_listeners(&self) -> usize {
		self.window.listener_count()
	}

	pub fn performance_observers(&self) -> usize {
		self.performance.observer_count()
	}

	pub fn mutation_observers(&self) -> usize {
		self.observers.mutation_observer_count()
	}

	pub fn observed_nodes(&self) -> Vec<NodeId> {
		self.observers.observed_nodes()
	}

	/// Number of bindings not holding the page's own implementation.
	pub fn patched_bindings(&self) -> usize {
		self.checks.iter().filter(|holds_original| !holds_original()).count()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[test]
	fn timers_fire_in_deadline_order_at_their_deadline() {
		let clock = Arc::new(ManualClock::new(0.0));
		let timers = ManualTimers::new(Arc::clone(&clock));
		let fired = Arc::new(Mutex::new(Vec::new()));
		for delay in [30.0, 10.0, 20.0] {
			let fired = Arc::clone(&fired);
			let clock = Arc::clone(&clock);
			timers.set_timeout(delay, Box::new(move || fired.lock().push(clock.now()))).unwrap();
		}
		timers.advance_to(25.0);
		assert_eq!(*fired.lock(), vec![10.0, 20.0]);
		assert_eq!(clock.now(), 25.0);
		assert_eq!(timers.pending_count(), 1);
	}

	#[test]
	fn cleared_timer_is_dropped() {
		let clock = Arc::new(ManualClock::new(0.0));
		let timers = ManualTimers::new(Arc::clone(&clock));
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);
		let id = timers
			.set_timeout(
				5.0,
				Box::new(move || {
					counter.fetch_add(1, Ordering::SeqCst);
				}),
			)
			.unwrap();
		timers.clear_timeout(id);
		timers.advance(10.0);
		assert_eq!(hits.load(Ordering::SeqCst), 0);
	}

	#[test]
	fn removing_unknown_listener_is_rejected() {
		let target = SimEventTarget::default();
		let id = target.add_listener("click", true, Arc::new(|_: &HostEvent| {})).unwrap();
		assert!(target.remove_listener(id).is_ok());
		assert!(target.remove_listener(id).is_err());
	}

	#[test]
	fn history_resolves_relative_urls() {
		let page = SimulatedPage::builder().href("https://app.test/shop/").build();
		page.push_state(Some("cart?step=2"));
		assert_eq!(page.href(), "https://app.test/shop/cart?step=2");
		page.replace_state(None);
		assert_eq!(page.href(), "https://app.test/shop/cart?step=2");
	}

	#[test]
	fn xhr_latency_advances_clock_and_records_resource() {
		let page = SimulatedPage::builder().build();
		page.route("/api", Route::status(201).latency(40.0));
		let outcome = page.xhr(XhrRequest::new("POST", "/api"));
		assert_eq!(outcome, Some(XhrOutcome::Load { status: 201 }));
		assert_eq!(page.now(), 40.0);
		let resources = page.performance.entries_by_type(EntryType::Resource);
		assert_eq!(resources.len(), 1);
		assert_eq!(resources[0].duration(), 40.0);
		assert_eq!(page.performed_requests()[0].url, "https://app.test/api");
		assert_eq!(page.patched_bindings(), 0);
	}
}
