//! Network policy decision point.
//!
//! Every wrapped network primitive asks the configured [`NetworkPolicy`]
//! before the host call runs. A policy that errors or panics fails open: the
//! call is allowed and a warning is logged.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use lab_protocol::NetworkEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum PolicyDecision {
	Allow,
	Deny {
		/// Human-readable reason, recorded on the blocked event.
		reason: String,
	},
}

impl PolicyDecision {
	#[must_use]
	pub const fn allow() -> Self {
		Self::Allow
	}

	#[must_use]
	pub fn deny(reason: impl Into<String>) -> Self {
		Self::Deny { reason: reason.into() }
	}

	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow)
	}
}

/// A policy callback failed to produce a decision.
#[derive(Debug, Clone, Error)]
#[error("policy evaluation failed: {0}")]
pub struct PolicyError(pub String);

/// Decides whether an outbound request may proceed.
///
/// `request` is the pending network event: kind, absolute URL, method and
/// start time are filled in, completion fields are not.
pub trait NetworkPolicy: Send + Sync {
	fn decide(&self, request: &NetworkEvent) -> Result<PolicyDecision, PolicyError>;
}

/// Policy backed by a closure. Built with [`from_fn`].
pub struct FnPolicy<F>(F);

impl<F> NetworkPolicy for FnPolicy<F>
where
	F: Fn(&NetworkEvent) -> Result<PolicyDecision, PolicyError> + Send + Sync,
{
	fn decide(&self, request: &NetworkEvent) -> Result<PolicyDecision, PolicyError> {
		(self.0)(request)
	}
}

/// Wraps a closure as a [`NetworkPolicy`].
pub fn from_fn<F>(f: F) -> FnPolicy<F>
where
	F: Fn(&NetworkEvent) -> Result<PolicyDecision, PolicyError> + Send + Sync,
{
	FnPolicy(f)
}

/// Evaluates `policy` for `request`, failing open on error or panic.
pub(crate) fn evaluate(policy: Option<&Arc<dyn NetworkPolicy>>, request: &NetworkEvent) -> PolicyDecision {
	let Some(policy) = policy else {
		return PolicyDecision::Allow;
	};

	match catch_unwind(AssertUnwindSafe(|| policy.decide(request))) {
		Ok(Ok(decision)) => decision,
		Ok(Err(err)) => {
			warn!(target = "lab.policy", url = %request.url, error = %err, "network policy failed; allowing");
			PolicyDecision::Allow
		}
		Err(_) => {
			warn!(target = "lab.policy", url = %request.url, "network policy panicked; allowing");
			PolicyDecision::Allow
		}
	}
}

#[cfg(test)]
mod tests {
	use lab_protocol::{NetworkEventKind, NetworkKind};

	use super::*;

	fn request(url: &str) -> NetworkEvent {
		NetworkEvent::pending(NetworkKind::Fetch, NetworkEventKind::Fetch, url, "GET", 0.0)
	}

	#[test]
	fn no_policy_allows() {
		assert_eq!(evaluate(None, &request("https://a.test/")), PolicyDecision::Allow);
	}

	#[test]
	fn closure_policy_can_deny() {
		let policy: Arc<dyn NetworkPolicy> = Arc::new(from_fn(|req| {
			if req.url.contains("tracker") {
				Ok(PolicyDecision::deny("tracker"))
			} else {
				Ok(PolicyDecision::allow())
			}
		}));
		assert_eq!(evaluate(Some(&policy), &request("https://tracker.test/p")), PolicyDecision::deny("tracker"));
		assert!(evaluate(Some(&policy), &request("https://a.test/")).is_allowed());
	}

	#[test]
	fn failing_policy_fails_open() {
		let policy: Arc<dyn NetworkPolicy> = Arc::new(from_fn(|_| Err(PolicyError("backend down".into()))));
		assert!(evaluate(Some(&policy), &request("https://a.test/")).is_allowed());
	}

	#[test]
	fn panicking_policy_fails_open() {
		let policy: Arc<dyn NetworkPolicy> = Arc::new(from_fn(|_| panic!("decider bug")));
		assert!(evaluate(Some(&policy), &request("https://a.test/")).is_allowed());
	}
}
