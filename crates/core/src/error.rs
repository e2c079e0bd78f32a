//! Error types for the interaction lab engine.

use thiserror::Error;

/// Errors surfaced by the engine's public API.
///
/// Hook-internal failures never reach this type: they are logged at the bridge
/// boundary and the host page keeps running. Only configuration problems fail
/// a call.
#[derive(Debug, Error)]
pub enum Error {
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	#[error("serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
