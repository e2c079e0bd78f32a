//! Console capture.
//!
//! Wrapped methods always call the original first. Capture is skipped while
//! the engine itself is emitting, so the engine's own console output never
//! becomes a captured record.

use std::sync::{Arc, Weak};

use lab_protocol::{HostValue, Level};
use tracing::debug;

use super::shield;
use crate::host::ConsoleMethod;
use crate::lab::LabInner;
use crate::lifecycle::{BindingPatch, Instrumentation};

const MAX_ARG_CHARS: usize = 2000;

/// Truncates long string arguments to 2000 characters plus an ellipsis.
pub fn normalize_arg(value: &HostValue) -> HostValue {
	match value {
		HostValue::String(s) if s.chars().count() > MAX_ARG_CHARS => {
			let mut truncated: String = s.chars().take(MAX_ARG_CHARS).collect();
			truncated.push('…');
			HostValue::String(truncated)
		}
		other => other.clone(),
	}
}

struct CapturingConsole {
	level: Level,
	original: Arc<dyn ConsoleMethod>,
	lab: Weak<LabInner>,
}

impl ConsoleMethod for CapturingConsole {
	fn call(&self, args: &[HostValue]) {
		shield("console", || self.original.call(args));

		let Some(lab) = self.lab.upgrade() else { return };
		let Some(_guard) = lab.emitter.try_enter() else { return };
		let normalized = args.iter().map(normalize_arg).collect();
		shield("console", || lab.capture_console(self.level, normalized));
	}
}

pub(super) fn install(lab: &Arc<LabInner>, inst: &mut Instrumentation) {
	let Some(console) = lab.host.bindings.console.as_ref() else {
		debug!(target = "lab.console", "no console; adapter skipped");
		return;
	};

	for level in Level::CONSOLE {
		let Some(binding) = console.get(level) else {
			debug!(target = "lab.console", level = %level, "console method absent");
			continue;
		};
		let weak = lab.weak();
		inst.patch(
			"console",
			Box::new(BindingPatch::new(level.as_str(), Arc::clone(binding), move |original| {
				Arc::new(CapturingConsole {
					level,
					original,
					lab: weak.clone(),
				}) as Arc<dyn ConsoleMethod>
			})),
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn long_strings_are_truncated() {
		let long = "x".repeat(2500);
		match normalize_arg(&HostValue::String(long)) {
			HostValue::String(s) => {
				assert_eq!(s.chars().count(), 2001);
				assert!(s.ends_with('…'));
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[test]
	fn short_and_non_string_args_pass_through() {
		assert_eq!(normalize_arg(&HostValue::from("hi")), HostValue::from("hi"));
		assert_eq!(normalize_arg(&HostValue::Number(1.5)), HostValue::Number(1.5));
		let exact = "y".repeat(2000);
		assert_eq!(normalize_arg(&HostValue::String(exact.clone())), HostValue::String(exact));
	}
}
