//! # Command Handlers
//!
//! Command handlers for the galleyctl CLI, one submodule per resource.
//!
//! ## Structure
//!
//! - `auth` - sign in, token exchange and sign out
//! - `vessel` - vessel listing and renaming
//! - `charter`, `project`, `compute_plan`, `connection` - charter resources
//! - `engine` - commands relayed to a vessel engine's agent
//! - `shared` - Shared utilities and validation functions

pub mod auth;
pub mod charter;
pub mod compute_plan;
pub mod connection;
pub mod engine;
pub mod errors;
pub mod project;
pub mod shared;
pub mod vessel;

pub use auth::handle_auth_command;
pub use charter::handle_charter_command;
pub use compute_plan::handle_compute_plan_command;
pub use connection::handle_connection_command;
pub use engine::handle_engine_command;
pub use project::handle_project_command;
pub use vessel::handle_vessel_command;
