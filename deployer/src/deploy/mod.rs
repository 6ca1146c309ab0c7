//! Fleet rollout on top of the plan scheduler

pub mod activate;
pub mod orchestrator;

pub use activate::{activate, SYSTEM_PROFILE};
pub use orchestrator::Orchestrator;
