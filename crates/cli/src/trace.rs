//! Recorded page traces.
//!
//! A trace is a JSON document listing host events at points in page time:
//!
//! ```json
//! {
//!   "href": "https://shop.test/cart",
//!   "block": ["tracker.test"],
//!   "steps": [
//!     { "at": 100, "interact": { "type": "click", "target": { "node": 1, "path": [{ "tag": "BUTTON" }] } } },
//!     { "at": 120, "fetch": { "url": "/api/cart", "method": "POST", "status": 201, "latencyMs": 40 } },
//!     { "at": 200, "console": { "level": "warn", "args": ["slow cart"] } }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result, bail};
use lab::LabConfig;
use lab::host::sim::{Route, RouteOutcome};
use lab::protocol::{HostEvent, HostReport, HostValue, InteractionEvent, IntersectionEntry, Level, PerformanceEntry, ResizeEntry, ScriptError};
use serde::Deserialize;
use serde_json::Value;

fn default_href() -> String {
	"https://app.test/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
	/// Page URL at time zero.
	#[serde(default = "default_href")]
	pub href: String,
	#[serde(default)]
	pub viewport: Option<ViewportSize>,
	/// Partial engine config merged over the defaults.
	#[serde(default)]
	pub config: Option<LabConfig>,
	/// URL substrings denied by the replay's network policy.
	#[serde(default)]
	pub block: Vec<String>,
	pub steps: Vec<Step>,
	/// Page time to run the clock to after the last step. Defaults to one
	/// interaction window past the last step so every session closes.
	#[serde(default)]
	pub until: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ViewportSize {
	pub width: f64,
	pub height: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
	pub at: f64,
	#[serde(flatten)]
	pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
	Interact(InteractionEvent),
	Performance(Vec<PerformanceEntry>),
	Fetch(Call),
	Xhr(Call),
	Beacon(Call),
	Socket(SocketScript),
	Error(ScriptError),
	Rejection {
		#[serde(default)]
		reason: Option<Value>,
	},
	Console {
		level: Level,
		#[serde(default)]
		args: Vec<Value>,
	},
	PushState(Option<String>),
	ReplaceState(Option<String>),
	/// Raw window event: popstate, hashchange, pageshow or pagehide.
	Window(HostEvent),
	Intersect(IntersectionEntry),
	Resize(ResizeEntry),
	Mutate(usize),
	Report(HostReport),
	Scroll(f64),
}

fn default_status() -> u16 {
	200
}

fn default_true() -> bool {
	true
}

/// One outbound request and the scripted response it gets.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
	pub url: String,
	#[serde(default)]
	pub method: Option<String>,
	#[serde(default)]
	pub headers: BTreeMap<String, String>,
	#[serde(default)]
	pub body_size: usize,
	#[serde(default = "default_status")]
	pub status: u16,
	/// Network failure message; the request rejects with a `TypeError`.
	#[serde(default)]
	pub fail: Option<String>,
	#[serde(default)]
	pub timeout: bool,
	#[serde(default)]
	pub abort: bool,
	#[serde(default)]
	pub latency_ms: f64,
	#[serde(default)]
	pub redirected: bool,
	#[serde(default = "default_true")]
	pub resource_timing: bool,
}

impl Call {
	pub fn route(&self) -> Route {
		let mut route = if let Some(message) = &self.fail {
			Route::fail("TypeError", message)
		} else if self.timeout {
			Route::timeout()
		} else if self.abort {
			Route {
				outcome: RouteOutcome::Abort,
				..Route::timeout()
			}
		} else {
			Route::status(self.status)
		};
		route = route.latency(self.latency_ms);
		if self.redirected {
			route = route.redirected();
		}
		if !self.resource_timing {
			route = route.without_resource_timing();
		}
		route
	}

	pub fn headers(&self) -> Vec<(String, String)> {
		self.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}

	pub fn body(&self) -> Option<Vec<u8>> {
		(self.body_size > 0).then(|| vec![0; self.body_size])
	}
}

/// A socket connection: server messages, client sends, then an optional
/// server hang-up.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketScript {
	pub url: String,
	#[serde(default)]
	pub receive: Vec<usize>,
	#[serde(default)]
	pub send: Vec<usize>,
	#[serde(default)]
	pub close: Option<u16>,
	#[serde(default)]
	pub reason: String,
}

impl Trace {
	pub fn from_json(raw: &str) -> Result<Self> {
		let trace: Trace = serde_json::from_str(raw)?;
		trace.validate()?;
		Ok(trace)
	}

	pub fn load(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).with_context(|| format!("reading trace {}", path.display()))?;
		Self::from_json(&raw).with_context(|| format!("parsing trace {}", path.display()))
	}

	fn validate(&self) -> Result<()> {
		for (index, step) in self.steps.iter().enumerate() {
			if !step.at.is_finite() || step.at < 0.0 {
				bail!("step {index}: `at` must be a non-negative number, got {}", step.at);
			}
		}
		if let Some(until) = self.until {
			if !until.is_finite() {
				bail!("`until` must be a finite number");
			}
		}
		if let Some(config) = &self.config {
			config.validate().context("invalid config block")?;
		}
		Ok(())
	}

	/// Steps in time order; steps sharing a timestamp keep file order.
	pub fn ordered_steps(&self) -> Vec<&Step> {
		let mut steps: Vec<&Step> = self.steps.iter().collect();
		steps.sort_by(|a, b| a.at.total_cmp(&b.at));
		steps
	}
}

/// Plain JSON as the host value a page script would have passed.
pub fn host_value(value: &Value) -> HostValue {
	match value {
		Value::Null => HostValue::Null,
		Value::Bool(b) => HostValue::Bool(*b),
		Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
		Value::String(s) => HostValue::String(s.clone()),
		Value::Array(_) => HostValue::Object {
			constructor: "Array".to_string(),
			repr: value.to_string(),
		},
		Value::Object(_) => HostValue::Object {
			constructor: "Object".to_string(),
			repr: value.to_string(),
		},
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_mixed_steps() {
		let trace = Trace::from_json(
			r#"{
				"href": "https://shop.test/",
				"steps": [
					{ "at": 10, "interact": { "type": "click" } },
					{ "at": 20, "fetch": { "url": "/api", "latencyMs": 30 } },
					{ "at": 30, "rejection": {} },
					{ "at": 40, "pushState": "/next" },
					{ "at": 50, "window": { "event": "popState" } },
					{ "at": 60, "mutate": 3 }
				]
			}"#,
		)
		.unwrap();
		assert_eq!(trace.href, "https://shop.test/");
		assert_eq!(trace.steps.len(), 6);
		assert!(matches!(&trace.steps[0].action, Action::Interact(ev) if ev.kind == "click"));
		let Action::Fetch(call) = &trace.steps[1].action else {
			panic!("expected fetch");
		};
		assert_eq!(call.status, 200);
		assert!(call.resource_timing);
		assert_eq!(call.route().latency_ms, 30.0);
		assert!(matches!(&trace.steps[2].action, Action::Rejection { reason: None }));
		assert!(matches!(&trace.steps[3].action, Action::PushState(Some(url)) if url == "/next"));
		assert!(matches!(&trace.steps[4].action, Action::Window(HostEvent::PopState)));
		assert!(matches!(trace.steps[5].action, Action::Mutate(3)));
	}

	#[test]
	fn call_outcome_precedence() {
		let call: Call = serde_json::from_value(json!({ "url": "/x", "fail": "offline", "timeout": true })).unwrap();
		assert!(matches!(call.route().outcome, RouteOutcome::Fail(_)));
		let call: Call = serde_json::from_value(json!({ "url": "/x", "abort": true })).unwrap();
		assert_eq!(call.route().outcome, RouteOutcome::Abort);
		let call: Call = serde_json::from_value(json!({ "url": "/x", "status": 404, "resourceTiming": false })).unwrap();
		let route = call.route();
		assert_eq!(route.outcome, RouteOutcome::Status(404));
		assert!(!route.resource_timing);
		assert_eq!(call.body(), None);
	}

	#[test]
	fn rejects_negative_times() {
		let err = Trace::from_json(r#"{ "steps": [{ "at": -1, "mutate": 1 }] }"#).unwrap_err();
		assert!(err.to_string().contains("step 0"));
	}

	#[test]
	fn rejects_invalid_config_block() {
		assert!(Trace::from_json(r#"{ "config": { "interactionWindowMs": 0 }, "steps": [] }"#).is_err());
	}

	#[test]
	fn ordering_is_stable() {
		let trace = Trace::from_json(
			r#"{ "steps": [
				{ "at": 50, "mutate": 1 },
				{ "at": 10, "mutate": 2 },
				{ "at": 50, "mutate": 3 }
			] }"#,
		)
		.unwrap();
		let order: Vec<_> = trace
			.ordered_steps()
			.iter()
			.map(|s| match s.action {
				Action::Mutate(n) => n,
				_ => 0,
			})
			.collect();
		assert_eq!(order, vec![2, 1, 3]);
	}

	#[test]
	fn host_values_follow_json_types() {
		assert_eq!(host_value(&json!("a")), HostValue::String("a".into()));
		assert_eq!(host_value(&json!(2)), HostValue::Number(2.0));
		assert_eq!(host_value(&json!(null)), HostValue::Null);
		assert!(matches!(host_value(&json!({ "k": 1 })), HostValue::Object { constructor, .. } if constructor == "Object"));
	}
}
