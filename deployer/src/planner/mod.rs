//! Execution plans and their scheduler

pub mod cache;
pub mod scheduler;
pub mod status;
pub mod step;

pub use cache::{closure_key, ClosureCache};
pub use scheduler::{ExitOnFailure, FailurePolicy, Scheduler};
pub use status::{StatusRegistry, StepPhase, StepStatus};
pub use step::{create_build_plan, create_plan, create_push_plan, OnFailure, PlanKind, Step, StepAction};
