//! Presence, sync and retirement of a component shared by a suite of
//! host extensions.
//!
//! The [`Orchestrator`] receives host events and keeps one shared component
//! installed, active and current while any sibling extension needs it,
//! falling back to a locally synthesized copy when the remote is unreachable
//! and retiring it when the last sibling goes away.

pub mod cli;
pub mod clock;
pub mod component;
pub mod config;
pub mod error;
pub mod host;
pub mod menu;
pub mod orchestrator;
pub mod remote;
pub mod store;
pub mod tracing_fmt;

pub use config::SuiteConfig;
pub use orchestrator::{EventOutcome, HostEvent, Orchestrator};
