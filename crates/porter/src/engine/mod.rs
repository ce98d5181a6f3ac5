//! Container engine: configuration, creation, lifecycle, and state.
//!
//! This module handles:
//! - The engine configuration envelope passed by the CLI
//! - Container creation and the mount orchestration around it
//! - Fork, exec handoff, and payload monitoring
//! - State persistence, privilege bracketing, and teardown

mod cleanup;
mod config;
mod create;
mod privilege;
mod process;
mod state;

pub use cleanup::cleanup_container;
pub use config::{CommonConfig, ENGINE_NAME, EngineConfig};
pub use create::Engine;
pub use privilege::PrivilegeGuard;
pub use process::{monitor_container, run, start_process};
pub use state::StateManager;
