use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use lab::host::{FetchRequest, Socket, SocketListener, XhrRequest};
use lab::protocol::{HostEvent, LogRecord, NetworkEvent};
use lab::{InteractionLab, LabConfig, LabOptions, LogSink, NetworkPolicy, PolicyDecision, SimulatedPage};
use tracing::{debug, info};

use crate::output::{OutputFormat, ReplayReport, render_report};
use crate::trace::{Action, Call, SocketScript, Trace, host_value};

/// Keeps every record the engine emits.
#[derive(Default)]
struct CollectingSink {
	records: Mutex<Vec<LogRecord>>,
}

impl CollectingSink {
	fn take(&self) -> Vec<LogRecord> {
		std::mem::take(&mut *self.records.lock().unwrap_or_else(|e| e.into_inner()))
	}
}

impl LogSink for CollectingSink {
	fn add_log(&self, record: LogRecord) {
		self.records.lock().unwrap_or_else(|e| e.into_inner()).push(record);
	}
}

/// Page-side socket handlers; the engine's wrapper does the observing.
struct IgnoreSocket;

impl SocketListener for IgnoreSocket {}

fn block_policy(patterns: Vec<String>) -> impl NetworkPolicy + 'static {
	lab::from_fn(move |request: &NetworkEvent| {
		Ok(match patterns.iter().find(|p| request.url.contains(p.as_str())) {
			Some(pattern) => PolicyDecision::deny(format!("blocked by trace rule `{pattern}`")),
			None => PolicyDecision::allow(),
		})
	})
}

pub async fn execute(trace_path: &Path, config_path: Option<&Path>, format: OutputFormat) -> Result<()> {
	let trace = Trace::load(trace_path)?;
	let config = match config_path {
		Some(path) => LabConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
		None => trace.config.clone().unwrap_or_default(),
	};
	info!(target = "lab", trace = %trace_path.display(), steps = trace.steps.len(), "replaying");

	let report = replay(&trace, config).await?;
	println!("{}", render_report(format, &report)?.trim_end());
	Ok(())
}

/// Runs `trace` against a fresh simulated page with an engine started on
/// `config`, then stops the engine.
pub async fn replay(trace: &Trace, config: LabConfig) -> Result<ReplayReport> {
	let mut builder = SimulatedPage::builder().href(trace.href.clone());
	if let Some(viewport) = trace.viewport {
		builder = builder.viewport(viewport.width, viewport.height);
	}
	let page = builder.build();

	let window = config.interaction_window_ms;
	let lab = InteractionLab::inject(page.host());
	let sink = Arc::new(CollectingSink::default());
	let mut options = LabOptions::new(config).with_sink(sink.clone());
	if !trace.block.is_empty() {
		options = options.with_policy(block_policy(trace.block.clone()));
	}
	lab.start(options).context("starting engine")?;

	let mut sockets = Vec::new();
	for (index, step) in trace.ordered_steps().into_iter().enumerate() {
		page.advance_to(step.at);
		debug!(target = "lab.replay", index, at = step.at, "step");
		apply(&page, &step.action, &mut sockets).await;
	}

	let until = trace.until.unwrap_or_else(|| page.now() + window);
	page.advance_to(until);

	let state = lab.state();
	let teardown = lab.stop();
	if !teardown.failures.is_empty() {
		debug!(target = "lab.replay", failures = teardown.failures.len(), "teardown reported failures");
	}
	Ok(ReplayReport { state, logs: sink.take() })
}

async fn apply(page: &SimulatedPage, action: &Action, sockets: &mut Vec<Arc<dyn Socket>>) {
	match action {
		Action::Interact(event) => page.interact(event.clone()),
		Action::Performance(entries) => page.record_entries(entries.clone()),
		Action::Fetch(call) => {
			page.route(&call.url, call.route());
			let request = FetchRequest {
				url: call.url.clone(),
				method: call.method.clone(),
				headers: call.headers(),
				body: call.body(),
			};
			if let Err(err) = page.fetch(request).await {
				debug!(target = "lab.replay", url = %call.url, error = %err, "fetch rejected");
			}
		}
		Action::Xhr(call) => xhr(page, call),
		Action::Beacon(call) => {
			page.route(&call.url, call.route());
			let queued = page.send_beacon(&call.url, &call.body().unwrap_or_default());
			debug!(target = "lab.replay", url = %call.url, queued, "beacon");
		}
		Action::Socket(script) => {
			if let Some(socket) = socket(page, script) {
				sockets.push(socket);
			}
		}
		Action::Error(error) => {
			let handled = page.throw(error.clone());
			debug!(target = "lab.replay", message = %error.message, handled, "script error");
		}
		Action::Rejection { reason } => page.dispatch_window(HostEvent::UnhandledRejection {
			reason: reason.as_ref().map(host_value),
		}),
		Action::Console { level, args } => {
			let args: Vec<_> = args.iter().map(host_value).collect();
			page.console(*level, &args);
		}
		Action::PushState(url) => page.push_state(url.as_deref()),
		Action::ReplaceState(url) => page.replace_state(url.as_deref()),
		Action::Window(event) => page.dispatch_window(event.clone()),
		Action::Intersect(entry) => page.intersect(*entry),
		Action::Resize(entry) => page.resize(*entry),
		Action::Mutate(count) => page.mutate(*count),
		Action::Report(report) => page.report(report.clone()),
		Action::Scroll(y) => page.scroll_to(*y),
	}
}

fn xhr(page: &SimulatedPage, call: &Call) {
	page.route(&call.url, call.route());
	let mut request = XhrRequest::new(call.method.as_deref().unwrap_or("GET"), call.url.clone());
	request.headers = call.headers();
	request.body = call.body();
	if page.xhr(request).is_none() {
		debug!(target = "lab.replay", url = %call.url, "request never completed");
	}
}

/// Connects, plays the server side and the client sends, and returns the
/// client socket so it outlives the step.
fn socket(page: &SimulatedPage, script: &SocketScript) -> Option<Arc<dyn Socket>> {
	let accepted = page.socket_count();
	let client = match page.connect_socket(&script.url, Arc::new(IgnoreSocket)) {
		Ok(client) => client,
		Err(err) => {
			debug!(target = "lab.replay", url = %script.url, error = %err, "connect failed");
			return None;
		}
	};
	// A denied connection never reaches the simulated server.
	let server = (page.socket_count() > accepted).then(|| page.socket(accepted)).flatten();

	if let Some(server) = &server {
		server.open();
		for size in &script.receive {
			server.deliver(*size);
		}
	}
	for size in &script.send {
		if let Err(err) = client.send(&vec![0; *size]) {
			debug!(target = "lab.replay", url = %script.url, error = %err, "send failed");
		}
	}
	if let (Some(server), Some(code)) = (&server, script.close) {
		server.hang_up(code, &script.reason);
	}
	Some(client)
}
