//! nixfleet library
//!
//! Host selection, remote execution over SSH, health checks and the plan
//! scheduler behind the `nixfleet` command.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod healthchecks;
pub mod logs;
pub mod models;
pub mod nix;
pub mod planner;
pub mod secrets;
pub mod selector;
pub mod ssh;
pub mod utils;
