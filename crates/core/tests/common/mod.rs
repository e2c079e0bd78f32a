#![allow(dead_code)]

use std::sync::Arc;

use lab::host::Host;
use lab::protocol::{ElementInfo, HostValue, InteractionEvent, LogRecord, NodeId, TargetNode};
use lab::{InteractionLab, LabConfig, LabOptions, LogSink, SimulatedPage};
use parking_lot::Mutex;

/// Sink that keeps every record it receives.
#[derive(Default)]
pub struct RecordingSink {
	records: Mutex<Vec<LogRecord>>,
}

impl RecordingSink {
	pub fn records(&self) -> Vec<LogRecord> {
		self.records.lock().clone()
	}

	pub fn with_tag(&self, tag: &str) -> Vec<LogRecord> {
		self.records.lock().iter().filter(|r| r.tag == tag).cloned().collect()
	}
}

impl LogSink for RecordingSink {
	fn add_log(&self, record: LogRecord) {
		self.records.lock().push(record);
	}
}

/// Sink that writes every record to the host console before keeping it.
pub struct EchoSink {
	pub host: Arc<Host>,
	pub inner: RecordingSink,
}

impl LogSink for EchoSink {
	fn add_log(&self, record: LogRecord) {
		if let Some(console) = &self.host.bindings.console {
			console.log.get().call(&[HostValue::from(record.message.as_str())]);
		}
		self.inner.add_log(record);
	}
}

pub fn button(node: u64) -> TargetNode {
	TargetNode {
		node: NodeId(node),
		path: vec![
			ElementInfo::new("BUTTON").with_classes(["btn", "primary"]),
			ElementInfo::new("FORM").with_id("checkout"),
		],
	}
}

pub fn click(node: u64) -> InteractionEvent {
	InteractionEvent::new("click").on(button(node))
}

/// A started engine on a default simulated page, reporting to a sink.
pub fn started(config: LabConfig) -> (SimulatedPage, InteractionLab, Arc<RecordingSink>) {
	let page = SimulatedPage::builder().build();
	let lab = InteractionLab::inject(page.host());
	let sink = Arc::new(RecordingSink::default());
	let started = lab.start(LabOptions::new(config).with_sink(sink.clone())).unwrap();
	assert!(started);
	(page, lab, sink)
}
