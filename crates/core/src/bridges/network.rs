//! Wrapped network primitives.
//!
//! Every wrapper builds the pending event, asks the policy, and either
//! short-circuits with a blocked event or calls the original and records the
//! outcome. Host failures are recorded and then handed back unchanged.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use lab_protocol::{Level, NetworkEvent, NetworkEventKind, NetworkKind};
use serde_json::json;
use tracing::debug;

use super::shield;
use crate::emit::Emission;
use crate::host::{
	BeaconPrimitive, FetchPrimitive, FetchRequest, FetchResponse, NetworkError, Socket, SocketListener, SocketPrimitive, XhrCallback, XhrOutcome,
	XhrPrimitive, XhrRequest,
};
use crate::lab::LabInner;
use crate::lifecycle::{BindingPatch, Instrumentation};
use crate::policy::PolicyDecision;

/// Asks the policy about `pre`; on deny records the blocked event and returns
/// true.
fn blocked_by_policy(lab: &LabInner, pre: &NetworkEvent) -> bool {
	match lab.decide(pre) {
		PolicyDecision::Allow => false,
		PolicyDecision::Deny { reason } => {
			let blocked = pre.clone().block(reason, lab.now());
			lab.tag_network_event(blocked);
			true
		}
	}
}

struct TracedFetch {
	original: Arc<dyn FetchPrimitive>,
	lab: Weak<LabInner>,
}

impl FetchPrimitive for TracedFetch {
	fn fetch(&self, request: FetchRequest) -> BoxFuture<'static, Result<FetchResponse, NetworkError>> {
		let Some(lab) = self.lab.upgrade() else {
			return self.original.fetch(request);
		};

		let start = lab.now();
		let pre = NetworkEvent::start(NetworkKind::Fetch, lab.absolute_url(&request.url), request.method(), start);
		if shield("fetch", || blocked_by_policy(&lab, &pre)).unwrap_or(false) {
			return future::ready(Ok(FetchResponse::blocked())).boxed();
		}

		let pending = self.original.fetch(request);
		let weak = self.lab.clone();
		drop(lab);
		async move {
			let result = pending.await;
			if let Some(lab) = weak.upgrade() {
				shield("fetch", || {
					let mut evt = pre.finish(lab.now());
					match &result {
						Ok(response) => {
							evt.kind = NetworkEventKind::Fetch;
							evt.status = i32::from(response.status);
							evt.ok = response.ok();
							evt.redirected = Some(response.redirected);
							evt.response_type = Some(response.response_type.clone());
							evt.level = if response.ok() { Level::Info } else { Level::Warn };
						}
						Err(err) => {
							evt.kind = NetworkEventKind::FetchError;
							evt.status = -1;
							evt.ok = false;
							evt.error = Some(err.info());
							evt.level = Level::Error;
						}
					}
					lab.finish_network(evt);
				});
			}
			result
		}
		.boxed()
	}
}

struct TracedXhr {
	original: Arc<dyn XhrPrimitive>,
	lab: Weak<LabInner>,
}

impl XhrPrimitive for TracedXhr {
	fn send(&self, request: XhrRequest, on_done: XhrCallback) {
		let Some(lab) = self.lab.upgrade() else {
			self.original.send(request, on_done);
			return;
		};

		let start = lab.now();
		let mut pre = NetworkEvent::start(NetworkKind::Xhr, lab.absolute_url(&request.url), request.method.clone(), start);
		pre.request_headers = request.headers.iter().cloned().collect();
		if shield("xhr", || blocked_by_policy(&lab, &pre)).unwrap_or(false) {
			on_done(XhrOutcome::Abort);
			return;
		}

		let weak = self.lab.clone();
		drop(lab);
		self.original.send(
			request,
			Box::new(move |outcome: XhrOutcome| {
				if let Some(lab) = weak.upgrade() {
					shield("xhr", || lab.finish_network(xhr_event(pre, &outcome, lab.now())));
				}
				on_done(outcome);
			}),
		);
	}
}

fn xhr_event(pre: NetworkEvent, outcome: &XhrOutcome, end: f64) -> NetworkEvent {
	let mut evt = pre.finish(end);
	match outcome {
		XhrOutcome::Load { status } => {
			evt.kind = NetworkEventKind::Xhr;
			evt.status = i32::from(*status);
			evt.ok = (200..400).contains(status);
			evt.level = if evt.ok { Level::Info } else { Level::Warn };
		}
		XhrOutcome::Error(err) => {
			evt.kind = NetworkEventKind::XhrError;
			evt.status = 0;
			evt.error = Some(err.info());
			evt.level = Level::Error;
		}
		XhrOutcome::Abort => {
			evt.kind = NetworkEventKind::XhrAbort;
			evt.status = 0;
			evt.error = Some(NetworkError::new("XHR", "XHR abort").info());
			evt.level = Level::Error;
		}
		XhrOutcome::Timeout => {
			evt.kind = NetworkEventKind::XhrTimeout;
			evt.status = 0;
			evt.error = Some(NetworkError::new("XHR", "XHR timeout").info());
			evt.level = Level::Error;
		}
	}
	evt
}

struct TracedBeacon {
	original: Arc<dyn BeaconPrimitive>,
	lab: Weak<LabInner>,
}

impl BeaconPrimitive for TracedBeacon {
	fn send_beacon(&self, url: &str, data: &[u8]) -> bool {
		let Some(lab) = self.lab.upgrade() else {
			return self.original.send_beacon(url, data);
		};

		let start = lab.now();
		let pre = NetworkEvent::start(NetworkKind::Beacon, lab.absolute_url(url), "POST", start);
		if shield("beacon", || blocked_by_policy(&lab, &pre)).unwrap_or(false) {
			return false;
		}

		let queued = self.original.send_beacon(url, data);
		shield("beacon", || {
			let mut evt = pre.finish(lab.now());
			evt.kind = NetworkEventKind::Beacon;
			evt.status = if queued { 204 } else { -1 };
			evt.ok = queued;
			evt.data_size = Some(data.len() as u64);
			evt.level = if queued { Level::Info } else { Level::Warn };
			lab.tag_network_event(evt);
		});
		queued
	}
}

/// Per-socket message counters.
#[derive(Default)]
struct SocketStats {
	sent: AtomicU64,
	received: AtomicU64,
}

/// Records a socket lifecycle event at the current time.
fn socket_event(lab: &LabInner, url: &str, kind: NetworkEventKind, ok: bool, level: Level) -> NetworkEvent {
	let now = lab.now();
	let mut evt = NetworkEvent::pending(NetworkKind::WebSocket, kind, url, "GET", now).finish(now);
	evt.ok = ok;
	evt.level = level;
	evt
}

/// Records a socket call the host rejected.
fn record_socket_failure(lab: &Weak<LabInner>, url: &str, err: &NetworkError) {
	let Some(lab) = lab.upgrade() else {
		return;
	};
	shield("websocket", || {
		let mut evt = socket_event(&lab, url, NetworkEventKind::WsError, false, Level::Warn);
		evt.error = Some(err.info());
		lab.tag_network_event(evt);
	});
}

struct TracedSocketListener {
	inner: Arc<dyn SocketListener>,
	url: String,
	stats: Arc<SocketStats>,
	lab: Weak<LabInner>,
}

impl TracedSocketListener {
	fn record(&self, f: impl FnOnce(&LabInner)) {
		if let Some(lab) = self.lab.upgrade() {
			shield("websocket", || f(&lab));
		}
	}
}

impl SocketListener for TracedSocketListener {
	fn on_open(&self) {
		self.record(|lab| {
			lab.emit(Emission::new(Level::Info, "WebSocket", "open").details(json!({ "url": self.url })));
			lab.tag_network_event(socket_event(lab, &self.url, NetworkEventKind::WsOpen, true, Level::Info));
		});
		self.inner.on_open();
	}

	fn on_message(&self, size: usize) {
		self.stats.received.fetch_add(1, Ordering::Relaxed);
		self.record(|lab| {
			lab.emit(Emission::new(Level::Debug, "WebSocket", "message").details(json!({ "url": self.url, "size": size })));
			let mut evt = socket_event(lab, &self.url, NetworkEventKind::WsMessage, true, Level::Debug);
			evt.data_size = Some(size as u64);
			lab.tag_network_event(evt);
		});
		self.inner.on_message(size);
	}

	fn on_error(&self) {
		self.record(|lab| {
			lab.emit(Emission::new(Level::Warn, "WebSocket", "error").details(json!({ "url": self.url })));
			lab.tag_network_event(socket_event(lab, &self.url, NetworkEventKind::WsError, false, Level::Warn));
		});
		self.inner.on_error();
	}

	fn on_close(&self, code: u16, reason: &str, was_clean: bool) {
		self.record(|lab| {
			lab.emit(Emission::new(Level::Info, "WebSocket", "close").details(json!({
				"url": self.url,
				"code": code,
				"reason": reason,
				"wasClean": was_clean,
				"sent": self.stats.sent.load(Ordering::Relaxed),
				"received": self.stats.received.load(Ordering::Relaxed),
			})));
			let mut evt = socket_event(lab, &self.url, NetworkEventKind::WsClose, true, Level::Info);
			evt.code = Some(code);
			lab.tag_network_event(evt);
		});
		self.inner.on_close(code, reason, was_clean);
	}
}

struct TracedSocket {
	inner: Arc<dyn Socket>,
	url: String,
	stats: Arc<SocketStats>,
	lab: Weak<LabInner>,
}

impl Socket for TracedSocket {
	fn send(&self, data: &[u8]) -> Result<(), NetworkError> {
		self.stats.sent.fetch_add(1, Ordering::Relaxed);
		if let Some(lab) = self.lab.upgrade() {
			shield("websocket", || {
				lab.emit(Emission::new(Level::Debug, "WebSocket", "send").details(json!({ "url": self.url, "size": data.len() })));
				let mut evt = socket_event(&lab, &self.url, NetworkEventKind::WsSend, true, Level::Debug);
				evt.data_size = Some(data.len() as u64);
				lab.tag_network_event(evt);
			});
		}
		self.inner.send(data).inspect_err(|err| record_socket_failure(&self.lab, &self.url, err))
	}

	fn close(&self, code: u16, reason: &str) {
		self.inner.close(code, reason);
	}
}

/// Handle returned for a denied connection; every operation is a no-op.
struct BlockedSocket;

impl Socket for BlockedSocket {
	fn send(&self, _data: &[u8]) -> Result<(), NetworkError> {
		Ok(())
	}

	fn close(&self, _code: u16, _reason: &str) {}
}

struct TracedSocketPrimitive {
	original: Arc<dyn SocketPrimitive>,
	lab: Weak<LabInner>,
}

impl SocketPrimitive for TracedSocketPrimitive {
	fn connect(&self, url: &str, protocols: &[String], listener: Arc<dyn SocketListener>) -> Result<Arc<dyn Socket>, NetworkError> {
		let Some(lab) = self.lab.upgrade() else {
			return self.original.connect(url, protocols, listener);
		};

		let absolute = lab.absolute_url(url);
		let pre = NetworkEvent::start(NetworkKind::WebSocket, absolute.clone(), "GET", lab.now());
		if shield("websocket", || blocked_by_policy(&lab, &pre)).unwrap_or(false) {
			return Ok(Arc::new(BlockedSocket));
		}

		let stats = Arc::new(SocketStats::default());
		let traced_listener = Arc::new(TracedSocketListener {
			inner: listener,
			url: absolute.clone(),
			stats: Arc::clone(&stats),
			lab: self.lab.clone(),
		});
		drop(lab);
		let socket = self
			.original
			.connect(url, protocols, traced_listener)
			.inspect_err(|err| record_socket_failure(&self.lab, &absolute, err))?;
		Ok(Arc::new(TracedSocket {
			inner: socket,
			url: absolute,
			stats,
			lab: self.lab.clone(),
		}))
	}
}

pub(super) fn install(lab: &Arc<LabInner>, inst: &mut Instrumentation) {
	let bindings = &lab.host.bindings;

	match bindings.fetch.clone() {
		Some(binding) => {
			let weak = lab.weak();
			inst.patch(
				"fetch",
				Box::new(BindingPatch::new("fetch", binding, move |original| {
					Arc::new(TracedFetch {
						original,
						lab: weak.clone(),
					}) as Arc<dyn FetchPrimitive>
				})),
			);
		}
		None => debug!(target = "lab.network", primitive = "fetch", "primitive absent"),
	}

	match bindings.xhr.clone() {
		Some(binding) => {
			let weak = lab.weak();
			inst.patch(
				"xhr",
				Box::new(BindingPatch::new("xhr", binding, move |original| {
					Arc::new(TracedXhr {
						original,
						lab: weak.clone(),
					}) as Arc<dyn XhrPrimitive>
				})),
			);
		}
		None => debug!(target = "lab.network", primitive = "xhr", "primitive absent"),
	}

	match bindings.beacon.clone() {
		Some(binding) => {
			let weak = lab.weak();
			inst.patch(
				"beacon",
				Box::new(BindingPatch::new("sendBeacon", binding, move |original| {
					Arc::new(TracedBeacon {
						original,
						lab: weak.clone(),
					}) as Arc<dyn BeaconPrimitive>
				})),
			);
		}
		None => debug!(target = "lab.network", primitive = "sendBeacon", "primitive absent"),
	}

	match bindings.socket.clone() {
		Some(binding) => {
			let weak = lab.weak();
			inst.patch(
				"websocket",
				Box::new(BindingPatch::new("WebSocket", binding, move |original| {
					Arc::new(TracedSocketPrimitive {
						original,
						lab: weak.clone(),
					}) as Arc<dyn SocketPrimitive>
				})),
			);
		}
		None => debug!(target = "lab.network", primitive = "WebSocket", "primitive absent"),
	}
}
