//! Global script errors and unhandled rejections.

use std::sync::{Arc, Weak};

use lab_protocol::{HostEvent, ScriptError};
use tracing::debug;

use super::shield;
use crate::host::ErrorHandler;
use crate::lab::LabInner;
use crate::lifecycle::{BindingPatch, Instrumentation};

/// Records the error, then hands it to the page's previous handler.
struct TracedErrorHandler {
	original: Arc<dyn ErrorHandler>,
	lab: Weak<LabInner>,
}

impl ErrorHandler for TracedErrorHandler {
	fn call(&self, error: &ScriptError) -> bool {
		if let Some(lab) = self.lab.upgrade() {
			shield("errors", || lab.record_onerror(error));
		}
		self.original.call(error)
	}
}

pub(super) fn install(lab: &Arc<LabInner>, inst: &mut Instrumentation) {
	match lab.host.bindings.on_error.clone() {
		Some(binding) => {
			let weak = lab.weak();
			inst.patch(
				"errors",
				Box::new(BindingPatch::new("onerror", binding, move |original| {
					Arc::new(TracedErrorHandler {
						original,
						lab: weak.clone(),
					}) as Arc<dyn ErrorHandler>
				})),
			);
		}
		None => debug!(target = "lab.errors", "no onerror slot; handler hook skipped"),
	}

	let Some(window) = lab.host.window.clone() else {
		debug!(target = "lab.errors", "no window; error listeners skipped");
		return;
	};

	for event_type in ["error", "unhandledrejection"] {
		let weak = lab.weak();
		let listener = Arc::new(move |event: &HostEvent| {
			let Some(lab) = weak.upgrade() else { return };
			shield("errors", || match event {
				HostEvent::Error(error) => lab.record_error(error),
				HostEvent::UnhandledRejection { reason } => lab.record_rejection(reason.as_ref()),
				_ => {}
			});
		});
		inst.listen("errors", &window, event_type, true, listener);
	}
}
