//! botvisor - supervises bot programs and streams their output to clients
//!
//! The [`ProcessSupervisor`] owns every bot's child process. Its events flow
//! through the [`EventHub`] to WebSocket clients, while the [`Controller`]
//! turns client commands into supervisor calls after fetching and installing
//! the bot's source.

pub mod acquire;
pub mod config;
pub mod controller;
pub mod factory;
pub mod hub;
pub mod server;
pub mod supervisor;
pub mod web;

pub use acquire::{CommandInstaller, GitSourceProvider};
pub use config::ServerConfig;
pub use controller::{BotSummary, Controller};
pub use factory::{PlatformProcessManager, PlatformProcessManagerFactory};
pub use hub::{Delivery, EventHub, Subscription};
pub use supervisor::{ProcessSupervisor, Started, Stopped};

// Re-export core types for convenience
pub use botvisor_core::{
    BotError, BotEvent, ClientMessage, LifecycleState, ServerMessage, SupervisorConfig,
    SupervisorConfigBuilder, TimingConfig,
};
