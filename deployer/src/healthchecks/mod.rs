//! Health and pre-deploy checks

pub mod check;
pub mod engine;

pub use check::run_check;
pub use engine::{perform_checks, perform_health_checks, perform_pre_deploy_checks};
