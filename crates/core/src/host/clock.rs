//! Time sources and timer drivers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::HostError;

/// Monotonic page clock in milliseconds.
pub trait Clock: Send + Sync {
	fn now(&self) -> f64;

	/// Wall-clock timestamp stamped on emitted records.
	fn wall_time(&self) -> String {
		Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
	}
}

/// Milliseconds elapsed since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
	origin: Instant,
}

impl MonotonicClock {
	pub fn new() -> Self {
		Self { origin: Instant::now() }
	}
}

impl Default for MonotonicClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for MonotonicClock {
	fn now(&self) -> f64 {
		self.origin.elapsed().as_secs_f64() * 1000.0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(pub u64);

pub type TimerTask = Box<dyn FnOnce() + Send>;

/// One-shot timers, the host's `setTimeout`/`clearTimeout`.
pub trait TimerDriver: Send + Sync {
	fn set_timeout(&self, delay_ms: f64, task: TimerTask) -> Result<TimerId, HostError>;

	/// Cancels a pending timer. Unknown or already fired ids are ignored.
	fn clear_timeout(&self, id: TimerId);
}

/// Timers spawned on the current tokio runtime.
#[derive(Default)]
pub struct TokioTimers {
	next_id: AtomicU64,
	pending: Arc<Mutex<HashMap<TimerId, AbortHandle>>>,
}

impl TokioTimers {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn pending(&self) -> usize {
		self.pending.lock().len()
	}
}

impl TimerDriver for TokioTimers {
	fn set_timeout(&self, delay_ms: f64, task: TimerTask) -> Result<TimerId, HostError> {
		let handle = Handle::try_current().map_err(|_| HostError::TimerUnavailable)?;
		let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		let delay = Duration::from_secs_f64(delay_ms.max(0.0) / 1000.0);
		let pending = Arc::clone(&self.pending);

		// Held across spawn so the task cannot remove its entry before it exists.
		let mut guard = self.pending.lock();
		let join = handle.spawn(async move {
			tokio::time::sleep(delay).await;
			pending.lock().remove(&id);
			task();
		});
		guard.insert(id, join.abort_handle());
		Ok(id)
	}

	fn clear_timeout(&self, id: TimerId) {
		if let Some(handle) = self.pending.lock().remove(&id) {
			handle.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use super::*;

	#[tokio::test(start_paused = true)]
	async fn tokio_timer_fires_after_delay() {
		let timers = TokioTimers::new();
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&fired);
		timers
			.set_timeout(
				50.0,
				Box::new(move || {
					counter.fetch_add(1, Ordering::SeqCst);
				}),
			)
			.unwrap();
		assert_eq!(timers.pending(), 1);

		tokio::time::sleep(Duration::from_millis(60)).await;
		tokio::task::yield_now().await;
		assert_eq!(fired.load(Ordering::SeqCst), 1);
		assert_eq!(timers.pending(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn cleared_timer_never_fires() {
		let timers = TokioTimers::new();
		let fired = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&fired);
		let id = timers
			.set_timeout(
				50.0,
				Box::new(move || {
					counter.fetch_add(1, Ordering::SeqCst);
				}),
			)
			.unwrap();
		timers.clear_timeout(id);

		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(fired.load(Ordering::SeqCst), 0);
		assert_eq!(timers.pending(), 0);
	}

	#[test]
	fn timers_need_a_runtime() {
		let timers = TokioTimers::new();
		let err = timers.set_timeout(1.0, Box::new(|| {})).unwrap_err();
		assert_eq!(err, HostError::TimerUnavailable);
	}

	#[tokio::test(start_paused = true)]
	async fn monotonic_clock_follows_tokio_time() {
		let clock = MonotonicClock::new();
		tokio::time::advance(Duration::from_millis(250)).await;
		assert!((clock.now() - 250.0).abs() < 1.0);
	}
}
