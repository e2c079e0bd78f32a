//! Telemetry collectors.
//!
//! Each bridge turns one family of host signals into [`Telemetry`] and hands it
//! to the engine. Bridges register everything they install with the
//! [`Instrumentation`] record so `stop` can undo it, and skip themselves with
//! a debug notice when the host lacks the capability they need.
//!
//! [`Telemetry`]: lab_protocol::Telemetry

mod console;
mod dom;
mod errors;
mod navigation;
mod network;
mod observers;
mod performance;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::warn;

pub use console::normalize_arg;

use crate::config::LabConfig;
use crate::lab::LabInner;
use crate::lifecycle::Instrumentation;

/// Runs hook code at a host boundary; panics are logged and swallowed.
pub(crate) fn shield<R>(bridge: &'static str, f: impl FnOnce() -> R) -> Option<R> {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(value) => Some(value),
		Err(payload) => {
			let message = payload
				.downcast_ref::<&str>()
				.map(|s| s.to_string())
				.or_else(|| payload.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "unknown panic".to_string());
			warn!(target = "lab.bridge", bridge, panic = %message, "hook failed");
			None
		}
	}
}

/// Applies every enabled bridge, in the order the page would see them.
pub(crate) fn install(lab: &Arc<LabInner>, config: &LabConfig) -> Instrumentation {
	let mut inst = Instrumentation::default();
	if config.enable_console_adapter {
		console::install(lab, &mut inst);
	}
	dom::install(lab, config, &mut inst);
	if config.enable_performance_hooks {
		performance::install(lab, config, &mut inst);
	}
	if config.enable_reporting {
		performance::install_reporting(lab, &mut inst);
	}
	if config.enable_dom_observers {
		observers::install(lab, &mut inst);
	}
	if config.enable_network_hooks {
		network::install(lab, &mut inst);
	}
	if config.enable_error_hooks {
		errors::install(lab, &mut inst);
	}
	if config.enable_nav_hooks {
		navigation::install(lab, &mut inst);
	}
	inst
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shield_returns_value_or_swallows_panic() {
		assert_eq!(shield("test", || 7), Some(7));
		assert_eq!(shield("test", || -> i32 { panic!("boom") }), None);
	}
}
