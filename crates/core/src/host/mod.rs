//! Host page capabilities.
//!
//! A page is modelled as a bundle of optional capability objects. The engine
//! detects what is present at start and skips bridges whose capability is
//! missing. Global entry points that page code calls through (fetch, the
//! legacy request object, beacons, sockets, history, console) are
//! [`Binding`]s: replaceable slots that the lifecycle manager patches and
//! restores.

pub mod clock;
pub mod sim;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use lab_protocol::{
	EntryType, ErrorInfo, HostEvent, HostReport, HostValue, IntersectionEntry, Level, NodeId, PerformanceEntry, ResizeEntry, ScriptError,
	ViewportSnapshot,
};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

pub use clock::{Clock, MonotonicClock, TimerDriver, TimerId, TimerTask, TokioTimers};

use crate::lab::LabInner;

/// Failures reported by host capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
	#[error("binding `{0}` is read-only")]
	ReadOnly(&'static str),

	#[error("{0} is not supported by this host")]
	Unsupported(&'static str),

	#[error("host rejected the operation: {0}")]
	Rejected(String),

	#[error("no timer runtime available")]
	TimerUnavailable,
}

/// A failure raised by a host network primitive.
///
/// Wrappers record it and hand the same value back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{name}: {message}")]
pub struct NetworkError {
	pub name: String,
	pub message: String,
}

impl NetworkError {
	pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			message: message.into(),
		}
	}

	pub fn info(&self) -> ErrorInfo {
		ErrorInfo::new(self.name.clone(), self.message.clone())
	}
}

/// A replaceable global slot.
///
/// `get` returns whatever is installed right now, so page code calling
/// through a binding sees patches immediately. A frozen binding rejects
/// replacement, like a non-writable property.
pub struct Binding<T: ?Sized> {
	name: &'static str,
	current: RwLock<Arc<T>>,
	frozen: AtomicBool,
}

impl<T: ?Sized> Binding<T> {
	pub fn new(name: &'static str, value: Arc<T>) -> Self {
		Self {
			name,
			current: RwLock::new(value),
			frozen: AtomicBool::new(false),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn get(&self) -> Arc<T> {
		Arc::clone(&self.current.read())
	}

	/// Installs `value`, returning the previous occupant.
	pub fn replace(&self, value: Arc<T>) -> Result<Arc<T>, HostError> {
		if self.frozen.load(Ordering::SeqCst) {
			return Err(HostError::ReadOnly(self.name));
		}
		Ok(std::mem::replace(&mut *self.current.write(), value))
	}

	pub fn freeze(&self) {
		self.frozen.store(true, Ordering::SeqCst);
	}

	pub fn thaw(&self) {
		self.frozen.store(false, Ordering::SeqCst);
	}

	/// True when `value` is the installed occupant.
	pub fn holds(&self, value: &Arc<T>) -> bool {
		Arc::ptr_eq(&self.current.read(), value)
	}
}

impl<T: ?Sized> fmt::Debug for Binding<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Binding")
			.field("name", &self.name)
			.field("frozen", &self.frozen.load(Ordering::SeqCst))
			.finish()
	}
}

/// Listener callback registered on an [`EventTarget`].
pub type Listener = Arc<dyn Fn(&HostEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Document or window: something listeners attach to.
pub trait EventTarget: Send + Sync {
	fn add_listener(&self, event_type: &str, capture: bool, listener: Listener) -> Result<ListenerId, HostError>;
	fn remove_listener(&self, id: ListenerId) -> Result<(), HostError>;
}

/// Anything that can be disconnected.
pub trait ObserverHandle: Send + Sync {
	fn disconnect(&self) -> Result<(), HostError>;
}

pub type EntryCallback = Arc<dyn Fn(Vec<PerformanceEntry>) + Send + Sync>;

/// The host's performance timeline.
pub trait PerformanceSource: Send + Sync {
	fn supported_entry_types(&self) -> Vec<EntryType>;

	/// Observes `kind`; with `buffered`, entries recorded before the call are
	/// delivered too.
	fn observe(&self, kind: EntryType, buffered: bool, callback: EntryCallback) -> Result<Box<dyn ObserverHandle>, HostError>;

	fn entries_by_type(&self, kind: EntryType) -> Vec<PerformanceEntry>;
}

/// An observer that watches individual nodes.
pub trait NodeObserver: Send + Sync {
	fn observe(&self, node: NodeId) -> Result<(), HostError>;
	fn unobserve(&self, node: NodeId);
	fn disconnect(&self) -> Result<(), HostError>;
}

pub type IntersectionCallback = Arc<dyn Fn(Vec<IntersectionEntry>) + Send + Sync>;
pub type ResizeCallback = Arc<dyn Fn(Vec<ResizeEntry>) + Send + Sync>;
/// Receives the number of mutation records in a delivery.
pub type MutationCallback = Arc<dyn Fn(usize) + Send + Sync>;
pub type ReportCallback = Arc<dyn Fn(Vec<HostReport>) + Send + Sync>;

/// Node and subtree observers. `Err(HostError::Unsupported)` means the host
/// has no such observer.
pub trait ObserverFactory: Send + Sync {
	fn intersection(&self, callback: IntersectionCallback) -> Result<Arc<dyn NodeObserver>, HostError>;
	fn resize(&self, callback: ResizeCallback) -> Result<Arc<dyn NodeObserver>, HostError>;
	/// Observes the whole document subtree.
	fn mutation(&self, callback: MutationCallback) -> Result<Box<dyn ObserverHandle>, HostError>;
}

pub trait ReportingSource: Send + Sync {
	fn observe(&self, types: &[&str], callback: ReportCallback) -> Result<Box<dyn ObserverHandle>, HostError>;
}

pub trait ViewportSource: Send + Sync {
	fn snapshot(&self) -> ViewportSnapshot;
}

pub trait Location: Send + Sync {
	fn href(&self) -> String;
	fn referrer(&self) -> String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
	pub url: String,
	/// `None` means GET.
	pub method: Option<String>,
	pub headers: Vec<(String, String)>,
	pub body: Option<Vec<u8>>,
}

impl FetchRequest {
	pub fn get(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			..Default::default()
		}
	}

	pub fn method(&self) -> &str {
		self.method.as_deref().unwrap_or("GET")
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
	pub status: u16,
	pub status_text: String,
	pub redirected: bool,
	pub response_type: String,
	pub body: Vec<u8>,
}

impl FetchResponse {
	pub fn new(status: u16) -> Self {
		Self {
			status,
			status_text: String::new(),
			redirected: false,
			response_type: "basic".to_string(),
			body: Vec::new(),
		}
	}

	/// The synthetic response returned for a denied fetch.
	pub fn blocked() -> Self {
		Self {
			status: 403,
			status_text: "Blocked by policy".to_string(),
			redirected: false,
			response_type: "default".to_string(),
			body: b"Blocked by policy".to_vec(),
		}
	}

	pub fn ok(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

pub trait FetchPrimitive: Send + Sync {
	fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, NetworkError>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XhrRequest {
	pub method: String,
	pub url: String,
	pub headers: Vec<(String, String)>,
	pub body: Option<Vec<u8>>,
}

impl XhrRequest {
	pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
		Self {
			method: method.into(),
			url: url.into(),
			..Default::default()
		}
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));
		self
	}
}

/// How a legacy request finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrOutcome {
	Load { status: u16 },
	Error(NetworkError),
	Abort,
	Timeout,
}

pub type XhrCallback = Box<dyn FnOnce(XhrOutcome) + Send>;

/// Legacy request object: `send` completes through `on_done`, exactly once.
pub trait XhrPrimitive: Send + Sync {
	fn send(&self, request: XhrRequest, on_done: XhrCallback);
}

pub trait BeaconPrimitive: Send + Sync {
	fn send_beacon(&self, url: &str, data: &[u8]) -> bool;
}

/// Socket lifecycle callbacks supplied by page code.
pub trait SocketListener: Send + Sync {
	fn on_open(&self) {}
	fn on_message(&self, _size: usize) {}
	fn on_error(&self) {}
	fn on_close(&self, _code: u16, _reason: &str, _was_clean: bool) {}
}

pub trait Socket: Send + Sync {
	fn send(&self, data: &[u8]) -> Result<(), NetworkError>;
	fn close(&self, code: u16, reason: &str);
}

pub trait SocketPrimitive: Send + Sync {
	fn connect(&self, url: &str, protocols: &[String], listener: Arc<dyn SocketListener>) -> Result<Arc<dyn Socket>, NetworkError>;
}

/// `history.pushState` / `history.replaceState`.
pub trait HistoryEntry: Send + Sync {
	fn call(&self, url: Option<&str>);
}

pub trait ConsoleMethod: Send + Sync {
	fn call(&self, args: &[HostValue]);
}

/// The property-style `window.onerror` handler. Returns true when the error
/// was handled.
pub trait ErrorHandler: Send + Sync {
	fn call(&self, error: &ScriptError) -> bool;
}

/// Per-level console bindings. `debug` is optional like on older hosts.
pub struct ConsoleBindings {
	pub log: Arc<Binding<dyn ConsoleMethod>>,
	pub info: Arc<Binding<dyn ConsoleMethod>>,
	pub warn: Arc<Binding<dyn ConsoleMethod>>,
	pub error: Arc<Binding<dyn ConsoleMethod>>,
	pub debug: Option<Arc<Binding<dyn ConsoleMethod>>>,
}

impl ConsoleBindings {
	pub fn get(&self, level: Level) -> Option<&Arc<Binding<dyn ConsoleMethod>>> {
		match level {
			Level::Log => Some(&self.log),
			Level::Info => Some(&self.info),
			Level::Warn => Some(&self.warn),
			Level::Error => Some(&self.error),
			Level::Debug => self.debug.as_ref(),
		}
	}
}

/// Patchable global entry points.
#[derive(Default)]
pub struct Bindings {
	pub fetch: Option<Arc<Binding<dyn FetchPrimitive>>>,
	pub xhr: Option<Arc<Binding<dyn XhrPrimitive>>>,
	pub beacon: Option<Arc<Binding<dyn BeaconPrimitive>>>,
	pub socket: Option<Arc<Binding<dyn SocketPrimitive>>>,
	pub push_state: Option<Arc<Binding<dyn HistoryEntry>>>,
	pub replace_state: Option<Arc<Binding<dyn HistoryEntry>>>,
	pub console: Option<ConsoleBindings>,
	pub on_error: Option<Arc<Binding<dyn ErrorHandler>>>,
}

/// The page an engine instruments.
pub struct Host {
	pub clock: Arc<dyn Clock>,
	pub timers: Arc<dyn TimerDriver>,
	pub document: Option<Arc<dyn EventTarget>>,
	pub window: Option<Arc<dyn EventTarget>>,
	pub viewport: Option<Arc<dyn ViewportSource>>,
	pub location: Option<Arc<dyn Location>>,
	pub performance: Option<Arc<dyn PerformanceSource>>,
	pub observers: Option<Arc<dyn ObserverFactory>>,
	pub reporting: Option<Arc<dyn ReportingSource>>,
	pub bindings: Bindings,
	/// Engine already injected into this host, if any.
	pub(crate) injected: Mutex<Weak<LabInner>>,
	/// Keeps a started engine alive until it is stopped.
	pub(crate) running: Mutex<Option<Arc<LabInner>>>,
}

impl Host {
	/// A host with only a clock and timers; every other capability is absent.
	pub fn new(clock: Arc<dyn Clock>, timers: Arc<dyn TimerDriver>) -> Self {
		Self {
			clock,
			timers,
			document: None,
			window: None,
			viewport: None,
			location: None,
			performance: None,
			observers: None,
			reporting: None,
			bindings: Bindings::default(),
			injected: Mutex::new(Weak::new()),
			running: Mutex::new(None),
		}
	}

	/// Tokio-backed clock and timers.
	pub fn tokio() -> Self {
		Self::new(Arc::new(MonotonicClock::new()), Arc::new(TokioTimers::new()))
	}

	pub fn with_document(mut self, target: Arc<dyn EventTarget>) -> Self {
		self.document = Some(target);
		self
	}

	pub fn with_window(mut self, target: Arc<dyn EventTarget>) -> Self {
		self.window = Some(target);
		self
	}

	pub fn with_viewport(mut self, viewport: Arc<dyn ViewportSource>) -> Self {
		self.viewport = Some(viewport);
		self
	}

	pub fn with_location(mut self, location: Arc<dyn Location>) -> Self {
		self.location = Some(location);
		self
	}

	pub fn with_performance(mut self, performance: Arc<dyn PerformanceSource>) -> Self {
		self.performance = Some(performance);
		self
	}

	pub fn with_observers(mut self, observers: Arc<dyn ObserverFactory>) -> Self {
		self.observers = Some(observers);
		self
	}

	pub fn with_reporting(mut self, reporting: Arc<dyn ReportingSource>) -> Self {
		self.reporting = Some(reporting);
		self
	}

	pub fn with_bindings(mut self, bindings: Bindings) -> Self {
		self.bindings = bindings;
		self
	}

	/// Console method for `level`, falling back to `log`.
	pub(crate) fn console_method(&self, level: Level) -> Option<Arc<dyn ConsoleMethod>> {
		let console = self.bindings.console.as_ref()?;
		console.get(level).or(Some(&console.log)).map(|binding| binding.get())
	}

	pub(crate) fn href(&self) -> String {
		self.location.as_ref().map(|loc| loc.href()).unwrap_or_default()
	}

	pub(crate) fn referrer(&self) -> String {
		self.location.as_ref().map(|loc| loc.referrer()).unwrap_or_default()
	}
}
