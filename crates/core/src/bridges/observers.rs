//! Intersection, resize and mutation observers.
//!
//! Intersection and resize observers start empty; the engine observes each
//! session's target when the session opens and unobserves it on close or
//! eviction.

use std::sync::Arc;

use lab_protocol::{IntersectionEntry, Level, ResizeEntry};
use tracing::{debug, warn};

use super::shield;
use crate::emit::Emission;
use crate::host::HostError;
use crate::lab::LabInner;
use crate::lifecycle::Instrumentation;

fn skipped(lab: &LabInner, bridge: &'static str, err: HostError) {
	match err {
		HostError::Unsupported(_) => debug!(target = "lab.observers", bridge, "observer not available"),
		err => {
			warn!(target = "lab.observers", bridge, error = %err, "failed to attach observer");
			lab.emit(Emission::new(Level::Warn, "Observers", format!("Failed to attach {bridge} observer")).details(err.to_string()));
		}
	}
}

pub(super) fn install(lab: &Arc<LabInner>, inst: &mut Instrumentation) {
	let Some(factory) = lab.host.observers.clone() else {
		debug!(target = "lab.observers", "no observer support; skipped");
		return;
	};

	let weak = lab.weak();
	let on_intersection = Arc::new(move |entries: Vec<IntersectionEntry>| {
		if let Some(lab) = weak.upgrade() {
			shield("intersection", || lab.handle_intersections(entries));
		}
	});
	match factory.intersection(on_intersection) {
		Ok(observer) => inst.observe_intersection(observer),
		Err(err) => skipped(lab, "intersection", err),
	}

	let weak = lab.weak();
	let on_resize = Arc::new(move |entries: Vec<ResizeEntry>| {
		if let Some(lab) = weak.upgrade() {
			shield("resize", || lab.handle_resizes(entries));
		}
	});
	match factory.resize(on_resize) {
		Ok(observer) => inst.observe_resize(observer),
		Err(err) => skipped(lab, "resize", err),
	}

	let weak = lab.weak();
	let on_mutation = Arc::new(move |count: usize| {
		if let Some(lab) = weak.upgrade() {
			shield("mutation", || lab.handle_mutations(count));
		}
	});
	match factory.mutation(on_mutation) {
		Ok(handle) => inst.observe("mutation", handle),
		Err(err) => skipped(lab, "mutation", err),
	}
}
