//! The engine's own output path.
//!
//! Records go to the configured [`LogSink`] when there is one, otherwise to the
//! host console with an `[InteractionLab][<tag>]` prefix, otherwise to
//! `tracing`. Every emission runs with the self-emission flag raised so the
//! console bridge can tell engine output from page output.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lab_protocol::{HostValue, Level, LogRecord};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::host::Host;

/// External log collaborator.
pub trait LogSink: Send + Sync {
	fn add_log(&self, record: LogRecord);
}

/// A record waiting to be emitted once the state lock is released.
#[derive(Debug, Clone)]
pub(crate) struct Emission {
	pub level: Level,
	pub tag: &'static str,
	pub message: String,
	pub details: Option<Value>,
	pub interaction_id: Option<String>,
}

impl Emission {
	pub fn new(level: Level, tag: &'static str, message: impl Into<String>) -> Self {
		Self {
			level,
			tag,
			message: message.into(),
			details: None,
			interaction_id: None,
		}
	}

	pub fn details(mut self, details: impl Serialize) -> Self {
		self.details = serde_json::to_value(details).ok();
		self
	}

	pub fn interaction(mut self, id: Option<String>) -> Self {
		self.interaction_id = id;
		self
	}
}

/// Restores the self-emission flag on drop.
pub(crate) struct EmissionGuard<'a> {
	flag: &'a AtomicBool,
	previous: bool,
}

impl Drop for EmissionGuard<'_> {
	fn drop(&mut self) {
		self.flag.store(self.previous, Ordering::SeqCst);
	}
}

pub(crate) struct Emitter {
	sink: RwLock<Option<Arc<dyn LogSink>>>,
	emitting: AtomicBool,
}

impl Emitter {
	pub fn new() -> Self {
		Self {
			sink: RwLock::new(None),
			emitting: AtomicBool::new(false),
		}
	}

	pub fn set_sink(&self, sink: Option<Arc<dyn LogSink>>) {
		*self.sink.write() = sink;
	}

	pub fn sink(&self) -> Option<Arc<dyn LogSink>> {
		self.sink.read().clone()
	}

	/// Raises the self-emission flag; nested entries are allowed.
	pub fn enter(&self) -> EmissionGuard<'_> {
		let previous = self.emitting.swap(true, Ordering::SeqCst);
		EmissionGuard {
			flag: &self.emitting,
			previous,
		}
	}

	/// Raises the flag only if nothing else holds it.
	pub fn try_enter(&self) -> Option<EmissionGuard<'_>> {
		self.emitting
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.ok()
			.map(|previous| EmissionGuard {
				flag: &self.emitting,
				previous,
			})
	}

	pub fn is_emitting(&self) -> bool {
		self.emitting.load(Ordering::SeqCst)
	}

	pub fn emit(&self, host: &Host, emission: Emission) {
		let _guard = self.enter();
		let record = LogRecord {
			tag: emission.tag.to_string(),
			level: emission.level,
			message: emission.message,
			timestamp: host.clock.wall_time(),
			interaction_id: emission.interaction_id,
			details: emission.details,
		};

		if let Some(sink) = self.sink() {
			match catch_unwind(AssertUnwindSafe(|| sink.add_log(record.clone()))) {
				Ok(()) => return,
				Err(_) => warn!(target = "lab.emit", tag = %record.tag, "log sink panicked; falling back"),
			}
		}

		if let Some(method) = host.console_method(record.level) {
			let mut args = vec![
				HostValue::String(format!("[InteractionLab][{}]", record.tag)),
				HostValue::String(record.message.clone()),
			];
			if let Some(details) = &record.details {
				args.push(HostValue::Object {
					constructor: "Object".to_string(),
					repr: details.to_string(),
				});
			}
			match catch_unwind(AssertUnwindSafe(|| method.call(&args))) {
				Ok(()) => return,
				Err(_) => warn!(target = "lab.emit", tag = %record.tag, "host console panicked; falling back"),
			}
		}

		trace_record(&record);
	}
}

fn trace_record(record: &LogRecord) {
	let interaction = record.interaction_id.as_deref().unwrap_or("-");
	match record.level {
		Level::Debug => debug!(target = "lab", tag = %record.tag, interaction, "{}", record.message),
		Level::Log | Level::Info => info!(target = "lab", tag = %record.tag, interaction, "{}", record.message),
		Level::Warn => warn!(target = "lab", tag = %record.tag, interaction, "{}", record.message),
		Level::Error => error!(target = "lab", tag = %record.tag, interaction, "{}", record.message),
	}
}
