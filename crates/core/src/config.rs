//! Engine configuration.
//!
//! [`LabConfig`] is plain serde data: every field has a default, so a partial
//! JSON document overrides only the keys it names. [`LabOptions`] adds the
//! collaborators that cannot be serialized (policy and log sink).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::emit::LogSink;
use crate::error::{Error, Result};
use crate::policy::NetworkPolicy;

pub const DEFAULT_INTERACTION_WINDOW_MS: f64 = 4000.0;
pub const DEFAULT_MAX_STORED_INTERACTIONS: usize = 50;
pub const DEFAULT_MAX_RECENT_RESOURCES: usize = 250;
pub const DEFAULT_RESOURCE_MATCH_WINDOW_MS: f64 = 250.0;
pub const DEFAULT_SELECTOR_DEPTH: usize = 4;
pub const DEFAULT_MUTATION_BATCH_MS: f64 = 250.0;

/// Interaction types that open a session unless configured otherwise.
pub const DEFAULT_PRIMARY_EVENTS: [&str; 4] = ["click", "pointerup", "keydown", "submit"];

/// Per-bucket caps applied to every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketCaps {
	/// Cap for each performance sub-bucket.
	pub perf: usize,
	pub network: usize,
	pub console: usize,
	pub errors: usize,
	pub reports: usize,
	pub nav: usize,
}

impl Default for BucketCaps {
	fn default() -> Self {
		Self {
			perf: 500,
			network: 500,
			console: 200,
			errors: 500,
			reports: 500,
			nav: 500,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabConfig {
	/// Length of each session's attribution window.
	pub interaction_window_ms: f64,
	/// Registry cap; the oldest session is evicted beyond it.
	pub max_stored_interactions: usize,
	/// DOM event types that open a session.
	pub primary_events: Vec<String>,
	pub enable_performance_hooks: bool,
	pub enable_dom_observers: bool,
	pub enable_reporting: bool,
	pub enable_network_hooks: bool,
	pub enable_error_hooks: bool,
	pub enable_nav_hooks: bool,
	pub enable_resource_timings: bool,
	pub enable_console_adapter: bool,
	/// Emit every accepted resource entry, not just attach it.
	pub log_resource_entries: bool,
	pub max_recent_resources: usize,
	/// Tolerance for matching a network call to a resource entry.
	pub resource_match_window_ms: f64,
	pub min_resource_duration_ms: f64,
	pub bucket_caps: BucketCaps,
	/// Maximum number of elements in a derived target selector.
	pub selector_depth: usize,
	pub mutation_batch_ms: f64,
}

impl Default for LabConfig {
	fn default() -> Self {
		Self {
			interaction_window_ms: DEFAULT_INTERACTION_WINDOW_MS,
			max_stored_interactions: DEFAULT_MAX_STORED_INTERACTIONS,
			primary_events: DEFAULT_PRIMARY_EVENTS.iter().map(|s| s.to_string()).collect(),
			enable_performance_hooks: true,
			enable_dom_observers: true,
			enable_reporting: true,
			enable_network_hooks: true,
			enable_error_hooks: true,
			enable_nav_hooks: true,
			enable_resource_timings: true,
			enable_console_adapter: false,
			log_resource_entries: false,
			max_recent_resources: DEFAULT_MAX_RECENT_RESOURCES,
			resource_match_window_ms: DEFAULT_RESOURCE_MATCH_WINDOW_MS,
			min_resource_duration_ms: 0.0,
			bucket_caps: BucketCaps::default(),
			selector_depth: DEFAULT_SELECTOR_DEPTH,
			mutation_batch_ms: DEFAULT_MUTATION_BATCH_MS,
		}
	}
}

impl LabConfig {
	/// Parses a (possibly partial) JSON config document.
	pub fn from_json(json: &str) -> Result<Self> {
		let config: LabConfig = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads and parses a JSON config file.
	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|err| Error::InvalidConfig(format!("{}: {err}", path.display())))?;
		Self::from_json(&raw)
	}

	pub fn validate(&self) -> Result<()> {
		fn positive(name: &str, value: f64) -> Result<()> {
			if value.is_finite() && value > 0.0 {
				Ok(())
			} else {
				Err(Error::InvalidConfig(format!("{name} must be a positive number, got {value}")))
			}
		}

		positive("interactionWindowMs", self.interaction_window_ms)?;
		positive("resourceMatchWindowMs", self.resource_match_window_ms)?;
		positive("mutationBatchMs", self.mutation_batch_ms)?;

		if !self.min_resource_duration_ms.is_finite() || self.min_resource_duration_ms < 0.0 {
			return Err(Error::InvalidConfig(format!(
				"minResourceDurationMs must be zero or positive, got {}",
				self.min_resource_duration_ms
			)));
		}

		let caps = [
			("maxStoredInteractions", self.max_stored_interactions),
			("maxRecentResources", self.max_recent_resources),
			("selectorDepth", self.selector_depth),
			("bucketCaps.perf", self.bucket_caps.perf),
			("bucketCaps.network", self.bucket_caps.network),
			("bucketCaps.console", self.bucket_caps.console),
			("bucketCaps.errors", self.bucket_caps.errors),
			("bucketCaps.reports", self.bucket_caps.reports),
			("bucketCaps.nav", self.bucket_caps.nav),
		];
		if let Some((name, _)) = caps.iter().find(|(_, cap)| *cap == 0) {
			return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
		}

		if self.primary_events.iter().any(|ev| ev.trim().is_empty()) {
			return Err(Error::InvalidConfig("primaryEvents must not contain empty names".into()));
		}

		Ok(())
	}
}

/// Everything `start` accepts: config plus optional collaborators.
#[derive(Clone, Default)]
pub struct LabOptions {
	pub config: LabConfig,
	pub policy: Option<Arc<dyn NetworkPolicy>>,
	pub sink: Option<Arc<dyn LogSink>>,
}

impl LabOptions {
	pub fn new(config: LabConfig) -> Self {
		Self {
			config,
			policy: None,
			sink: None,
		}
	}

	/// Installs a network policy decision point.
	pub fn with_policy(mut self, policy: impl NetworkPolicy + 'static) -> Self {
		self.policy = Some(Arc::new(policy));
		self
	}

	/// Routes emitted records to `sink` instead of the host console.
	pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
		self.sink = Some(sink);
		self
	}
}

impl fmt::Debug for LabOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LabOptions")
			.field("config", &self.config)
			.field("policy", &self.policy.is_some())
			.field("sink", &self.sink.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_json_keeps_defaults() {
		let config = LabConfig::from_json(r#"{"interactionWindowMs": 1000, "bucketCaps": {"console": 5}}"#).unwrap();
		assert_eq!(config.interaction_window_ms, 1000.0);
		assert_eq!(config.max_stored_interactions, 50);
		assert_eq!(config.bucket_caps.console, 5);
		assert_eq!(config.bucket_caps.perf, 500);
		assert_eq!(config.primary_events, vec!["click", "pointerup", "keydown", "submit"]);
		assert!(!config.enable_console_adapter);
	}

	#[test]
	fn serializes_camel_case() {
		let value = serde_json::to_value(LabConfig::default()).unwrap();
		assert_eq!(value["resourceMatchWindowMs"], 250.0);
		assert_eq!(value["maxRecentResources"], 250);
		assert_eq!(value["enableNetworkHooks"], true);
	}

	#[test]
	fn rejects_non_positive_window() {
		let err = LabConfig::from_json(r#"{"interactionWindowMs": 0}"#).unwrap_err();
		assert!(matches!(err, Error::InvalidConfig(msg) if msg.contains("interactionWindowMs")));
	}

	#[test]
	fn rejects_zero_caps() {
		let config = LabConfig {
			bucket_caps: BucketCaps { nav: 0, ..BucketCaps::default() },
			..LabConfig::default()
		};
		let err = config.validate().unwrap_err();
		assert!(err.to_string().contains("bucketCaps.nav"));
	}

	#[test]
	fn options_debug_hides_collaborators() {
		let options = LabOptions::default().with_policy(crate::policy::from_fn(|_| Ok(crate::policy::PolicyDecision::Allow)));
		let text = format!("{options:?}");
		assert!(text.contains("policy: true"));
		assert!(text.contains("sink: false"));
	}
}
