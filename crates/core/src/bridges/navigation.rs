//! History entry points and navigation events.

use std::sync::{Arc, Weak};

use lab_protocol::{HostEvent, NavKind};
use tracing::debug;

use super::shield;
use crate::host::HistoryEntry;
use crate::lab::LabInner;
use crate::lifecycle::{BindingPatch, Instrumentation};

/// Records before/after URLs around the original history call.
struct TracedHistory {
	kind: NavKind,
	original: Arc<dyn HistoryEntry>,
	lab: Weak<LabInner>,
}

impl HistoryEntry for TracedHistory {
	fn call(&self, url: Option<&str>) {
		let Some(lab) = self.lab.upgrade() else {
			self.original.call(url);
			return;
		};
		let before = lab.host.href();
		self.original.call(url);
		shield("nav", || {
			let mut record = lab.nav_record(self.kind);
			record.before = Some(before);
			record.after = Some(record.href.clone());
			record.url = url.map(str::to_string);
			lab.record_nav(record);
		});
	}
}

pub(super) fn install(lab: &Arc<LabInner>, inst: &mut Instrumentation) {
	let history = [
		(NavKind::PushState, "pushState", lab.host.bindings.push_state.clone()),
		(NavKind::ReplaceState, "replaceState", lab.host.bindings.replace_state.clone()),
	];
	for (kind, name, binding) in history {
		let Some(binding) = binding else {
			debug!(target = "lab.nav", entry = name, "history entry point absent");
			continue;
		};
		let weak = lab.weak();
		inst.patch(
			"nav",
			Box::new(BindingPatch::new(name, binding, move |original| {
				Arc::new(TracedHistory {
					kind,
					original,
					lab: weak.clone(),
				}) as Arc<dyn HistoryEntry>
			})),
		);
	}

	let Some(window) = lab.host.window.clone() else {
		debug!(target = "lab.nav", "no window; navigation listeners skipped");
		return;
	};
	for event_type in ["popstate", "hashchange", "pageshow", "pagehide"] {
		let weak = lab.weak();
		let listener = Arc::new(move |event: &HostEvent| {
			let Some(lab) = weak.upgrade() else { return };
			shield("nav", || {
				let record = match event {
					HostEvent::PopState => lab.nav_record(NavKind::PopState),
					HostEvent::HashChange { old_url, new_url } => {
						let mut record = lab.nav_record(NavKind::HashChange);
						record.old_url = Some(old_url.clone());
						record.new_url = Some(new_url.clone());
						record
					}
					HostEvent::PageShow { persisted } => {
						let mut record = lab.nav_record(NavKind::PageShow);
						record.persisted = Some(*persisted);
						record
					}
					HostEvent::PageHide { persisted } => {
						let mut record = lab.nav_record(NavKind::PageHide);
						record.persisted = Some(*persisted);
						record
					}
					_ => return,
				};
				lab.record_nav(record);
			});
		});
		inst.listen("nav", &window, event_type, true, listener);
	}
}
