//! Command-line front end for the interaction correlation engine.
//!
//! `lab replay` drives a simulated page from a recorded trace and prints what
//! the engine attributed to each interaction.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod output;
pub mod trace;
