//! Interaction correlation engine.
//!
//! Injected into a [`Host`] page, the engine opens a session for every primary
//! user interaction and attributes each piece of telemetry that follows
//! (performance entries, network calls, console output, errors, navigation,
//! reports) to the session whose time window contains it. Everything it
//! installs on the host is recorded and reversed by [`InteractionLab::stop`].
//!
//! [`Host`]: host::Host

mod bridges;

pub mod buffer;
pub mod config;
pub mod emit;
pub mod error;
pub mod factory;
pub mod host;
pub mod lab;
pub mod lifecycle;
pub mod matcher;
pub mod policy;
pub mod registry;
pub mod resource;
pub mod session;

pub use bridges::normalize_arg;
pub use config::{BucketCaps, LabConfig, LabOptions};
pub use emit::LogSink;
pub use error::{Error, Result};
pub use host::sim::{Route, SimulatedPage};
pub use host::{Host, HostError, NetworkError};
pub use lab::{InstalledCounts, InteractionLab, StateSnapshot};
pub use lab_protocol as protocol;
pub use lifecycle::{TeardownFailure, TeardownReport};
pub use policy::{NetworkPolicy, PolicyDecision, PolicyError, from_fn};
pub use session::{Session, SessionId};
