mod common;

use std::sync::Arc;

use common::{RecordingSink, click, started};
use lab::host::{FetchRequest, NetworkError, SocketListener, XhrOutcome, XhrRequest};
use lab::protocol::{
	ErrorRecord, HostEvent, HostReport, HostValue, IntersectionEntry, LayoutShiftEntry, NavKind, NetworkEvent, NetworkEventKind, NodeId,
	PerformanceEntry, ScriptError, TimingEntry,
};
use lab::{InteractionLab, LabConfig, LabOptions, PolicyDecision, PolicyError, Route, SimulatedPage, from_fn};
use serde_json::json;

fn deny_all(page: &SimulatedPage) -> (InteractionLab, Arc<RecordingSink>) {
	let lab = InteractionLab::inject(page.host());
	let sink = Arc::new(RecordingSink::default());
	let policy = from_fn(|_: &NetworkEvent| Ok(PolicyDecision::deny("offline mode")));
	lab.start(LabOptions::default().with_policy(policy).with_sink(sink.clone())).unwrap();
	(lab, sink)
}

fn network_kinds(lab: &InteractionLab) -> Vec<NetworkEventKind> {
	lab.state().interactions[0].network.iter().map(|evt| evt.kind).collect()
}

#[tokio::test]
async fn fetch_failure_is_recorded_and_returned_unchanged() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	page.route("/api/save", Route::fail("TypeError", "Failed to fetch").latency(15.0));

	let err = page.fetch(FetchRequest::get("/api/save")).await.unwrap_err();
	assert_eq!(err, NetworkError::new("TypeError", "Failed to fetch"));

	let state = lab.state();
	let evt = state.interactions[0].network.last().unwrap();
	assert_eq!(evt.kind, NetworkEventKind::FetchError);
	assert_eq!(evt.status, -1);
	assert!(!evt.ok);
	assert_eq!(evt.error.as_ref().unwrap().message, "Failed to fetch");
	assert_eq!(evt.duration, Some(15.0));
}

#[tokio::test]
async fn failing_policy_allows_the_call() {
	let page = SimulatedPage::builder().build();
	let lab = InteractionLab::inject(page.host());
	let policy = from_fn(|_: &NetworkEvent| Err(PolicyError("rules not loaded".into())));
	lab.start(LabOptions::default().with_policy(policy)).unwrap();

	let response = page.fetch(FetchRequest::get("/health")).await.unwrap();
	assert_eq!(response.status, 200);
	assert_eq!(page.performed_requests().len(), 1);
}

#[tokio::test]
async fn panicking_policy_allows_the_call() {
	let page = SimulatedPage::builder().build();
	let lab = InteractionLab::inject(page.host());
	let policy = from_fn(|_: &NetworkEvent| -> Result<PolicyDecision, PolicyError> { panic!("policy bug") });
	lab.start(LabOptions::default().with_policy(policy)).unwrap();

	let response = page.fetch(FetchRequest::get("/health")).await.unwrap();
	assert!(response.ok());
	assert_eq!(page.performed_requests().len(), 1);
}

#[test]
fn xhr_outcomes_and_headers_are_recorded() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	page.route("/api/slow", Route::timeout().latency(100.0));
	page.route("/api/moved", Route::status(302));

	let request = XhrRequest::new("POST", "/api/slow").header("x-request-id", "abc");
	assert_eq!(page.xhr(request), Some(XhrOutcome::Timeout));
	assert_eq!(page.xhr(XhrRequest::new("GET", "/api/moved")), Some(XhrOutcome::Load { status: 302 }));

	let state = lab.state();
	let network: Vec<_> = state.interactions[0].network.iter().collect();
	assert_eq!(network[0].kind, NetworkEventKind::XhrTimeout);
	assert_eq!(network[0].request_headers.get("x-request-id").map(String::as_str), Some("abc"));
	assert_eq!(network[0].duration, Some(100.0));
	assert_eq!(network[1].kind, NetworkEventKind::Xhr);
	assert!(network[1].ok);
}

#[test]
fn denied_xhr_aborts_without_sending() {
	let page = SimulatedPage::builder().build();
	let (lab, _sink) = deny_all(&page);
	page.interact(click(1));

	assert_eq!(page.xhr(XhrRequest::new("GET", "/api/items")), Some(XhrOutcome::Abort));
	assert!(page.performed_requests().is_empty());
	assert_eq!(network_kinds(&lab), vec![NetworkEventKind::XhrBlocked]);
}

#[test]
fn beacon_records_size_and_policy() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	assert!(page.send_beacon("/collect", b"payload"));

	let state = lab.state();
	let evt = state.interactions[0].network.last().unwrap();
	assert_eq!(evt.kind, NetworkEventKind::Beacon);
	assert_eq!(evt.status, 204);
	assert_eq!(evt.data_size, Some(7));
	assert_eq!(evt.method, "POST");

	let page = SimulatedPage::builder().build();
	let (lab, _sink) = deny_all(&page);
	page.interact(click(1));
	assert!(!page.send_beacon("/collect", b"payload"));
	assert!(page.performed_requests().is_empty());
	assert_eq!(network_kinds(&lab), vec![NetworkEventKind::BeaconBlocked]);
}

struct Quiet;

impl SocketListener for Quiet {}

#[test]
fn socket_lifecycle_is_tagged() {
	let (page, lab, sink) = started(LabConfig::default());
	page.interact(click(1));

	let client = page.connect_socket("wss://app.test/live", Arc::new(Quiet)).unwrap();
	let server = page.socket(0).unwrap();
	server.open();
	server.deliver(12);
	client.send(b"hi").unwrap();
	server.hang_up(1000, "done");

	assert_eq!(
		network_kinds(&lab),
		vec![NetworkEventKind::WsOpen, NetworkEventKind::WsMessage, NetworkEventKind::WsSend, NetworkEventKind::WsClose]
	);
	assert_eq!(server.sent(), vec![2]);

	let close = sink.records().into_iter().find(|r| r.tag == "WebSocket" && r.message == "close").unwrap();
	let details = close.details.unwrap();
	assert_eq!(details["code"], 1000);
	assert_eq!(details["sent"], 1);
	assert_eq!(details["received"], 1);
	assert_eq!(details["wasClean"], true);
}

#[test]
fn denied_socket_returns_inert_handle() {
	let page = SimulatedPage::builder().build();
	let (lab, _sink) = deny_all(&page);
	page.interact(click(1));

	let client = page.connect_socket("wss://app.test/live", Arc::new(Quiet)).unwrap();
	assert!(client.send(b"ignored").is_ok());
	client.close(1000, "bye");
	assert_eq!(page.socket_count(), 0);
	assert_eq!(network_kinds(&lab), vec![NetworkEventKind::WsBlocked]);
}

#[test]
fn socket_connect_failure_passes_through() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	page.route("wss://app.test/live", Route::fail("SyntaxError", "bad url"));
	let err = page.connect_socket("wss://app.test/live", Arc::new(Quiet)).err().unwrap();
	assert_eq!(err.name, "SyntaxError");

	assert_eq!(network_kinds(&lab), vec![NetworkEventKind::WsError]);
	let state = lab.state();
	let evt = state.interactions[0].network.last().unwrap();
	assert!(!evt.ok);
	assert_eq!(evt.url, "wss://app.test/live");
	assert_eq!(evt.error.as_ref().map(|e| e.message.as_str()), Some("bad url"));
}

#[test]
fn send_on_closed_socket_is_recorded_and_returned() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));

	let client = page.connect_socket("wss://app.test/live", Arc::new(Quiet)).unwrap();
	let server = page.socket(0).unwrap();
	server.open();
	server.hang_up(1000, "done");
	let err = client.send(b"late").err().unwrap();
	assert_eq!(err.name, "InvalidStateError");

	assert_eq!(
		network_kinds(&lab),
		vec![NetworkEventKind::WsOpen, NetworkEventKind::WsClose, NetworkEventKind::WsSend, NetworkEventKind::WsError]
	);
	let state = lab.state();
	let failure = state.interactions[0].network.last().unwrap();
	assert_eq!(failure.error.as_ref().and_then(|e| e.name.as_deref()), Some("InvalidStateError"));
}

#[test]
fn errors_and_rejections_attach_by_current_time() {
	let (page, lab, sink) = started(LabConfig::default());
	page.interact(click(1));
	page.advance(30.0);
	page.dispatch_window(HostEvent::Error(ScriptError {
		message: "x is undefined".into(),
		filename: Some("https://app.test/app.js".into()),
		lineno: Some(12),
		..Default::default()
	}));
	page.dispatch_window(HostEvent::UnhandledRejection { reason: None });
	page.dispatch_window(HostEvent::UnhandledRejection {
		reason: Some(HostValue::from("quota exceeded")),
	});

	let state = lab.state();
	let errors: Vec<&ErrorRecord> = state.interactions[0].errors.iter().collect();
	assert_eq!(errors.len(), 3);
	assert_eq!(errors[0].message(), "x is undefined");
	assert_eq!(errors[0].time(), 30.0);
	assert_eq!(errors[1].message(), "unknown");
	assert_eq!(errors[2].message(), "quota exceeded");
	assert_eq!(sink.with_tag("Promise").len(), 2);
}

#[test]
fn onerror_handler_records_then_chains_until_stopped() {
	let (page, lab, sink) = started(LabConfig::default());
	page.interact(click(1));
	page.advance(20.0);
	let handled = page.throw(ScriptError {
		message: "render failed".into(),
		filename: Some("https://app.test/app.js".into()),
		lineno: Some(40),
		colno: Some(7),
		..Default::default()
	});
	assert!(!handled);
	assert_eq!(page.page_errors().len(), 1);
	assert_eq!(page.page_errors()[0].message, "render failed");

	let state = lab.state();
	let errors: Vec<&ErrorRecord> = state.interactions[0].errors.iter().collect();
	assert_eq!(errors.len(), 2);
	assert!(matches!(
		errors[0],
		ErrorRecord::OnError {
			line: Some(40),
			col: Some(7),
			..
		}
	));
	assert!(matches!(errors[1], ErrorRecord::ErrorEvent { .. }));
	assert_eq!(errors[0].time(), 20.0);
	assert_eq!(sink.with_tag("Error").iter().filter(|r| r.message == "render failed").count(), 1);

	lab.stop();
	assert_eq!(page.patched_bindings(), 0);
	page.throw(ScriptError {
		message: "after stop".into(),
		..Default::default()
	});
	assert_eq!(page.page_errors().len(), 2);
	assert_eq!(lab.state().interactions[0].errors.len(), 2);
}

#[test]
fn onerror_without_message_defaults_to_error() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	page.throw(ScriptError::default());

	let state = lab.state();
	let first = state.interactions[0].errors.first().unwrap();
	assert_eq!(first.message(), "Error");
	assert_eq!(serde_json::to_value(first).unwrap()["type"], "onerror");
}

#[test]
fn history_and_page_events_are_recorded() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	page.push_state(Some("/checkout"));
	page.dispatch_window(HostEvent::HashChange {
		old_url: "https://app.test/checkout".into(),
		new_url: "https://app.test/checkout#pay".into(),
	});
	page.dispatch_window(HostEvent::PageHide { persisted: true });

	let state = lab.state();
	let nav: Vec<_> = state.interactions[0].nav.iter().collect();
	assert_eq!(nav.len(), 3);
	assert_eq!(nav[0].kind, NavKind::PushState);
	assert_eq!(nav[0].before.as_deref(), Some("https://app.test/"));
	assert_eq!(nav[0].after.as_deref(), Some("https://app.test/checkout"));
	assert_eq!(nav[0].url.as_deref(), Some("/checkout"));
	assert_eq!(nav[1].new_url.as_deref(), Some("https://app.test/checkout#pay"));
	assert_eq!(nav[2].persisted, Some(true));
}

#[test]
fn performance_entries_update_metrics() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(1));
	page.record_entries(vec![
		PerformanceEntry::Event(TimingEntry {
			name: "click".into(),
			start_time: 1.0,
			duration: 88.0,
		}),
		PerformanceEntry::LongAnimationFrame(TimingEntry {
			name: String::new(),
			start_time: 5.0,
			duration: 120.0,
		}),
		PerformanceEntry::LayoutShift(LayoutShiftEntry {
			start_time: 20.0,
			value: 0.05,
			had_recent_input: false,
		}),
		PerformanceEntry::LayoutShift(LayoutShiftEntry {
			start_time: 25.0,
			value: 0.5,
			had_recent_input: true,
		}),
	]);

	let session = lab.state().interactions.remove(0);
	assert_eq!(session.metrics.inp_like, 88.0);
	assert_eq!(session.metrics.max_loaf_ms, 120.0);
	assert!((session.metrics.total_cls - 0.05).abs() < 1e-9);
	assert_eq!(session.perf.layout_shifts.len(), 1);
	assert!(session.summary().contains("INP≈88ms"));
	assert!(session.summary().contains("CLS 0.050"));
}

#[test]
fn buffered_navigation_entry_is_emitted_at_start() {
	let page = SimulatedPage::builder().build();
	page.record_entries(vec![PerformanceEntry::Navigation(TimingEntry {
		name: "https://app.test/".into(),
		start_time: 0.0,
		duration: 640.0,
	})]);
	let lab = InteractionLab::inject(page.host());
	let sink = Arc::new(RecordingSink::default());
	lab.start(LabOptions::default().with_sink(sink.clone())).unwrap();

	let snapshot = sink.records().into_iter().find(|r| r.tag == "NavigationTiming" && r.message == "snapshot");
	assert!(snapshot.is_some());
}

#[test]
fn target_visibility_follows_latest_session() {
	let (page, lab, _sink) = started(LabConfig::default());
	page.interact(click(7));
	page.advance(5.0);
	page.interact(click(7));
	page.intersect(IntersectionEntry {
		node: NodeId(7),
		is_intersecting: false,
		ratio: 0.0,
	});

	let state = lab.state();
	assert!(state.interactions[0].visibility.is_none());
	let visibility = state.interactions[1].visibility.unwrap();
	assert!(!visibility.is_intersecting);
	assert_eq!(visibility.time, 5.0);
}

#[test]
fn visibility_skips_newer_sessions_on_other_targets() {
	let (page, lab, sink) = started(LabConfig::default());
	page.interact(click(7));
	page.advance(5.0);
	page.interact(click(8));
	page.intersect(IntersectionEntry {
		node: NodeId(7),
		is_intersecting: true,
		ratio: 0.5,
	});

	let state = lab.state();
	let visibility = state.interactions[0].visibility.unwrap();
	assert_eq!(visibility.ratio, 0.5);
	assert!(state.interactions[1].visibility.is_none());

	let entries = sink.with_tag("Intersection");
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].interaction_id.as_deref(), Some(state.interactions[0].id.as_str()));
}

#[test]
fn mutations_are_batched_per_window() {
	let (page, _lab, sink) = started(LabConfig::default());
	page.mutate(3);
	page.mutate(2);
	assert!(sink.with_tag("Mutation").is_empty());

	page.advance(250.0);
	page.mutate(1);
	page.advance(250.0);

	let batches = sink.with_tag("Mutation");
	assert_eq!(batches.len(), 2);
	assert_eq!(batches[0].details, Some(json!({ "count": 5 })));
	assert_eq!(batches[1].details, Some(json!({ "count": 1 })));
}

#[test]
fn reports_land_in_the_reports_bucket() {
	let (page, lab, sink) = started(LabConfig::default());
	page.interact(click(1));
	page.report(HostReport {
		report_type: "deprecation".into(),
		url: "https://app.test/".into(),
		body: json!({ "id": "UnloadHandler" }),
	});
	page.report(HostReport {
		report_type: "csp-violation".into(),
		url: "https://app.test/".into(),
		body: json!({}),
	});

	assert_eq!(lab.state().interactions[0].reports.len(), 1);
	assert_eq!(sink.with_tag("ReportingObserver").len(), 1);
}
