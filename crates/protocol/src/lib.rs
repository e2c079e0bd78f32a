//! Wire types for the interaction lab.
//!
//! This crate contains the serde-serializable shapes that cross the boundary
//! between a host page and the correlation engine:
//! * host input events (interactions, script errors, console arguments)
//! * normalized telemetry records attached to interaction sessions
//! * log records handed to an external log sink
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization and a few accessors
//! * Closed: every telemetry kind is a tagged variant, never an untyped map
//! * camelCase on the wire, matching what browser-side tooling expects
//!
//! The engine itself lives in the `interaction-lab` crate.

pub mod event;
pub mod log;
pub mod telemetry;
pub mod types;

pub use event::*;
pub use log::*;
pub use telemetry::*;
pub use types::*;
