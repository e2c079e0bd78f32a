//! Capturing interaction listeners on the document.

use std::sync::Arc;

use lab_protocol::HostEvent;
use tracing::debug;

use super::shield;
use crate::config::LabConfig;
use crate::lab::LabInner;
use crate::lifecycle::Instrumentation;

pub(super) fn install(lab: &Arc<LabInner>, config: &LabConfig, inst: &mut Instrumentation) {
	let Some(document) = lab.host.document.clone() else {
		debug!(target = "lab.dom", "no document; interaction listeners skipped");
		return;
	};

	for event_type in &config.primary_events {
		let weak = lab.weak();
		let listener = Arc::new(move |event: &HostEvent| {
			let Some(lab) = weak.upgrade() else { return };
			if let HostEvent::Interaction(interaction) = event {
				shield("interactions", || lab.start_interaction(interaction));
			}
		});
		inst.listen("interactions", &document, event_type, true, listener);
	}
}
