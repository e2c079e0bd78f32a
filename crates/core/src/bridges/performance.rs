//! Performance timeline and reporting observers.

use std::sync::Arc;

use lab_protocol::{EntryType, HostReport, Level, PerformanceEntry};
use tracing::{debug, warn};

use super::shield;
use crate::config::LabConfig;
use crate::emit::Emission;
use crate::host::HostError;
use crate::lab::LabInner;
use crate::lifecycle::Instrumentation;

/// Bridge name reported in the state snapshot for each observed entry type.
fn bridge_name(kind: EntryType) -> &'static str {
	match kind {
		EntryType::Event => "eventTiming",
		EntryType::LongAnimationFrame => "longAnimationFrame",
		EntryType::LongTask => "longtask",
		EntryType::LayoutShift => "layoutShift",
		EntryType::LargestContentfulPaint => "lcp",
		EntryType::Paint => "paint",
		EntryType::Navigation => "navigation",
		EntryType::Resource => "resource",
	}
}

pub(super) fn install(lab: &Arc<LabInner>, config: &LabConfig, inst: &mut Instrumentation) {
	let Some(performance) = lab.host.performance.clone() else {
		debug!(target = "lab.perf", "no performance timeline; observers skipped");
		return;
	};

	let supported = performance.supported_entry_types();
	for kind in EntryType::ALL {
		if kind == EntryType::Resource && !config.enable_resource_timings {
			continue;
		}
		if !supported.contains(&kind) {
			debug!(target = "lab.perf", entry_type = %kind, "entry type unsupported");
			continue;
		}
		let weak = lab.weak();
		let callback = Arc::new(move |entries: Vec<PerformanceEntry>| {
			if let Some(lab) = weak.upgrade() {
				shield("performance", || lab.handle_performance(entries));
			}
		});
		match performance.observe(kind, true, callback) {
			Ok(handle) => inst.observe(bridge_name(kind), handle),
			Err(HostError::Unsupported(_)) => debug!(target = "lab.perf", entry_type = %kind, "entry type unsupported"),
			Err(err) => warn!(target = "lab.perf", entry_type = %kind, error = %err, "failed to observe"),
		}
	}

	let navigation = shield("performance", || performance.entries_by_type(EntryType::Navigation)).unwrap_or_default();
	if let Some(entry) = navigation.first() {
		lab.emit(Emission::new(Level::Info, "NavigationTiming", "snapshot").details(entry));
	}
}

pub(super) fn install_reporting(lab: &Arc<LabInner>, inst: &mut Instrumentation) {
	let Some(reporting) = lab.host.reporting.clone() else {
		debug!(target = "lab.reporting", "ReportingObserver not available");
		return;
	};

	let weak = lab.weak();
	let callback = Arc::new(move |reports: Vec<HostReport>| {
		if let Some(lab) = weak.upgrade() {
			shield("reporting", || lab.handle_reports(reports));
		}
	});
	match reporting.observe(&["deprecation", "intervention"], callback) {
		Ok(handle) => inst.observe("reporting", handle),
		Err(HostError::Unsupported(_)) => debug!(target = "lab.reporting", "ReportingObserver not available"),
		Err(err) => {
			warn!(target = "lab.reporting", error = %err, "failed to create reporting observer");
			lab.emit(Emission::new(Level::Warn, "ReportingObserver", "Failed to create ReportingObserver").details(err.to_string()));
		}
	}
}
