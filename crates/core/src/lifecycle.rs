//! Applying and reversing instrumentation.
//!
//! Everything a bridge installs on the host is recorded in an
//! [`Instrumentation`]: event listeners, observers and binding patches.
//! Teardown walks the record once, attempting every step independently so a
//! single host failure cannot leave the rest installed.

use std::collections::BTreeSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::host::{Binding, EventTarget, HostError, Listener, ListenerId, NodeObserver, ObserverHandle};

/// A reversible modification of a host binding.
pub trait Patch: Send {
	fn name(&self) -> &'static str;
	fn installed(&self) -> bool;
	/// Installs the patch. Installing twice is a no-op.
	fn install(&mut self) -> Result<(), HostError>;
	/// Puts the original back. Restoring an uninstalled patch is a no-op.
	fn restore(&mut self) -> Result<(), HostError>;
}

type Wrap<T> = Box<dyn Fn(Arc<T>) -> Arc<T> + Send>;

/// Replaces a binding's occupant with a wrapper around it.
pub struct BindingPatch<T: ?Sized> {
	name: &'static str,
	binding: Arc<Binding<T>>,
	wrap: Wrap<T>,
	original: Option<Arc<T>>,
}

impl<T: ?Sized> BindingPatch<T> {
	pub fn new(name: &'static str, binding: Arc<Binding<T>>, wrap: impl Fn(Arc<T>) -> Arc<T> + Send + 'static) -> Self {
		Self {
			name,
			binding,
			wrap: Box::new(wrap),
			original: None,
		}
	}
}

impl<T: ?Sized + Send + Sync> Patch for BindingPatch<T> {
	fn name(&self) -> &'static str {
		self.name
	}

	fn installed(&self) -> bool {
		self.original.is_some()
	}

	fn install(&mut self) -> Result<(), HostError> {
		if self.original.is_some() {
			return Ok(());
		}
		let original = self.binding.get();
		self.binding.replace((self.wrap)(Arc::clone(&original)))?;
		self.original = Some(original);
		Ok(())
	}

	fn restore(&mut self) -> Result<(), HostError> {
		let Some(original) = self.original.as_ref() else {
			return Ok(());
		};
		self.binding.replace(Arc::clone(original))?;
		self.original = None;
		Ok(())
	}
}

enum Observer {
	Plain(Box<dyn ObserverHandle>),
	Node(Arc<dyn NodeObserver>),
}

impl Observer {
	fn disconnect(&self) -> Result<(), HostError> {
		match self {
			Observer::Plain(handle) => handle.disconnect(),
			Observer::Node(observer) => observer.disconnect(),
		}
	}
}

struct ListenerRegistration {
	bridge: &'static str,
	event_type: String,
	target: Arc<dyn EventTarget>,
	id: ListenerId,
}

struct ObserverRegistration {
	bridge: &'static str,
	observer: Observer,
}

/// A teardown step that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownFailure {
	pub step: String,
	pub error: String,
}

/// What `stop` managed to undo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeardownReport {
	pub listeners_removed: usize,
	pub observers_disconnected: usize,
	pub patches_restored: usize,
	pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}

	fn fail(&mut self, step: String, error: String) {
		warn!(target = "lab.lifecycle", step = %step, error = %error, "teardown step failed");
		self.failures.push(TeardownFailure { step, error });
	}
}

/// Everything currently installed on the host.
#[derive(Default)]
pub struct Instrumentation {
	listeners: Vec<ListenerRegistration>,
	observers: Vec<ObserverRegistration>,
	patches: Vec<(&'static str, Box<dyn Patch>)>,
	intersection: Option<Arc<dyn NodeObserver>>,
	resize: Option<Arc<dyn NodeObserver>>,
}

impl Instrumentation {
	/// Adds a listener and records it. Failures are logged and skipped.
	pub fn listen(&mut self, bridge: &'static str, target: &Arc<dyn EventTarget>, event_type: &str, capture: bool, listener: Listener) {
		match target.add_listener(event_type, capture, listener) {
			Ok(id) => self.listeners.push(ListenerRegistration {
				bridge,
				event_type: event_type.to_string(),
				target: Arc::clone(target),
				id,
			}),
			Err(err) => warn!(target = "lab.lifecycle", bridge, event_type, error = %err, "failed to add listener"),
		}
	}

	pub fn observe(&mut self, bridge: &'static str, handle: Box<dyn ObserverHandle>) {
		self.observers.push(ObserverRegistration {
			bridge,
			observer: Observer::Plain(handle),
		});
	}

	pub fn observe_intersection(&mut self, observer: Arc<dyn NodeObserver>) {
		self.intersection = Some(Arc::clone(&observer));
		self.observers.push(ObserverRegistration {
			bridge: "intersection",
			observer: Observer::Node(observer),
		});
	}

	pub fn observe_resize(&mut self, observer: Arc<dyn NodeObserver>) {
		self.resize = Some(Arc::clone(&observer));
		self.observers.push(ObserverRegistration {
			bridge: "resize",
			observer: Observer::Node(observer),
		});
	}

	/// Installs `patch` and records it on success.
	pub fn patch(&mut self, bridge: &'static str, mut patch: Box<dyn Patch>) -> bool {
		match catch_unwind(AssertUnwindSafe(|| patch.install())) {
			Ok(Ok(())) => {
				debug!(target = "lab.lifecycle", bridge, patch = patch.name(), "patched");
				self.patches.push((bridge, patch));
				true
			}
			Ok(Err(err)) => {
				warn!(target = "lab.lifecycle", bridge, patch = patch.name(), error = %err, "failed to patch");
				false
			}
			Err(_) => {
				warn!(target = "lab.lifecycle", bridge, patch = patch.name(), "patch install panicked");
				false
			}
		}
	}

	/// Node observers that follow session targets.
	pub fn node_observers(&self) -> Vec<Arc<dyn NodeObserver>> {
		self.intersection.iter().chain(self.resize.iter()).cloned().collect()
	}

	/// Names of bridges with at least one live registration.
	pub fn active_bridges(&self) -> Vec<String> {
		let names: BTreeSet<&str> = self
			.listeners
			.iter()
			.map(|l| l.bridge)
			.chain(self.observers.iter().map(|o| o.bridge))
			.chain(self.patches.iter().map(|(bridge, _)| *bridge))
			.collect();
		names.into_iter().map(str::to_string).collect()
	}

	pub fn listener_count(&self) -> usize {
		self.listeners.len()
	}

	pub fn observer_count(&self) -> usize {
		self.observers.len()
	}

	pub fn patch_count(&self) -> usize {
		self.patches.len()
	}

	/// Removes listeners, disconnects observers and restores patches in
	/// reverse install order.
	pub fn teardown(self) -> TeardownReport {
		let mut report = TeardownReport::default();

		for reg in self.listeners.into_iter().rev() {
			match catch_unwind(AssertUnwindSafe(|| reg.target.remove_listener(reg.id))) {
				Ok(Ok(())) => report.listeners_removed += 1,
				Ok(Err(err)) => report.fail(format!("{}:listener:{}", reg.bridge, reg.event_type), err.to_string()),
				Err(_) => report.fail(format!("{}:listener:{}", reg.bridge, reg.event_type), "panicked".into()),
			}
		}

		for reg in self.observers.into_iter().rev() {
			match catch_unwind(AssertUnwindSafe(|| reg.observer.disconnect())) {
				Ok(Ok(())) => report.observers_disconnected += 1,
				Ok(Err(err)) => report.fail(format!("{}:observer", reg.bridge), err.to_string()),
				Err(_) => report.fail(format!("{}:observer", reg.bridge), "panicked".into()),
			}
		}

		for (bridge, mut patch) in self.patches.into_iter().rev() {
			let name = patch.name();
			match catch_unwind(AssertUnwindSafe(|| patch.restore())) {
				Ok(Ok(())) => report.patches_restored += 1,
				Ok(Err(err)) => report.fail(format!("{bridge}:patch:{name}"), err.to_string()),
				Err(_) => report.fail(format!("{bridge}:patch:{name}"), "panicked".into()),
			}
		}

		report
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	trait Greeter: Send + Sync {
		fn greet(&self) -> String;
	}

	struct Plain;

	impl Greeter for Plain {
		fn greet(&self) -> String {
			"hello".into()
		}
	}

	struct Loud(Arc<dyn Greeter>);

	impl Greeter for Loud {
		fn greet(&self) -> String {
			self.0.greet().to_uppercase()
		}
	}

	fn binding() -> Arc<Binding<dyn Greeter>> {
		let plain: Arc<dyn Greeter> = Arc::new(Plain);
		Arc::new(Binding::new("greet", plain))
	}

	fn loud_patch(binding: &Arc<Binding<dyn Greeter>>) -> BindingPatch<dyn Greeter> {
		BindingPatch::new("greet", Arc::clone(binding), |inner| Arc::new(Loud(inner)) as Arc<dyn Greeter>)
	}

	#[test]
	fn install_and_restore_round_trip() {
		let binding = binding();
		let mut patch = loud_patch(&binding);
		patch.install().unwrap();
		assert!(patch.installed());
		assert_eq!(binding.get().greet(), "HELLO");

		patch.install().unwrap();
		assert_eq!(binding.get().greet(), "HELLO");

		patch.restore().unwrap();
		assert!(!patch.installed());
		assert_eq!(binding.get().greet(), "hello");
		patch.restore().unwrap();
	}

	#[test]
	fn frozen_binding_is_reported_and_others_still_restore() {
		let frozen = binding();
		let open = binding();
		let mut instrumentation = Instrumentation::default();
		assert!(instrumentation.patch("a", Box::new(loud_patch(&frozen))));
		assert!(instrumentation.patch("b", Box::new(loud_patch(&open))));
		frozen.freeze();

		let report = instrumentation.teardown();
		assert_eq!(report.patches_restored, 1);
		assert_eq!(report.failures.len(), 1);
		assert_eq!(report.failures[0].step, "a:patch:greet");
		assert_eq!(open.get().greet(), "hello");
		assert_eq!(frozen.get().greet(), "HELLO");
	}

	#[test]
	fn failed_install_is_not_recorded() {
		let frozen = binding();
		frozen.freeze();
		let mut instrumentation = Instrumentation::default();
		assert!(!instrumentation.patch("a", Box::new(loud_patch(&frozen))));
		assert_eq!(instrumentation.patch_count(), 0);
		assert!(instrumentation.active_bridges().is_empty());
	}
}
