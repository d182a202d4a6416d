//! botvisor core - platform-independent abstractions shared by the supervisor
//!
//! This crate provides the configuration, error taxonomy, event and wire
//! protocol types, status registry, log persistence and the process traits
//! that platform-specific crates implement.

mod collaborator;
mod config;
mod error;
mod event;
mod logstore;
mod name;
mod process;
mod registry;
mod stdio;

pub use collaborator::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use logstore::*;
pub use name::*;
pub use process::*;
pub use registry::*;
pub use stdio::*;
