//! Plan execution

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::errors::FleetError;
use crate::models::Host;
use crate::nix::{NixBuilder, Transfer};
use crate::planner::cache::{closure_key, ClosureCache};
use crate::planner::status::{StatusRegistry, StepPhase};
use crate::planner::step::{OnFailure, Step, StepAction};

/// Decides what a failing step means for the rest of the plan.
///
/// Returning `Ok` lets the step carry on with its children and report done;
/// returning the error halts that branch.
pub trait FailurePolicy: Send + Sync {
    fn on_failure(&self, step: &Step, error: FleetError) -> Result<(), FleetError>;
}

/// Propagates every failure, whatever the step declares
pub struct ExitOnFailure;

impl FailurePolicy for ExitOnFailure {
    fn on_failure(&self, step: &Step, error: FleetError) -> Result<(), FleetError> {
        if step.on_failure != OnFailure::Exit {
            warn!(
                "Step '{}' asks for {:?} on failure, which is not supported; exiting",
                step.description, step.on_failure
            );
        }
        Err(error)
    }
}

/// Runs plans against a builder and a transfer collaborator.
///
/// Each scheduler owns its status registry and closure cache, so two plans
/// never see each other's steps.
pub struct Scheduler {
    builder: Arc<dyn NixBuilder>,
    transfer: Arc<dyn Transfer>,
    deployment: PathBuf,
    hosts: HashMap<String, Host>,
    status: StatusRegistry,
    cache: ClosureCache,
    permits: Arc<Semaphore>,
    policy: Arc<dyn FailurePolicy>,
}

impl Scheduler {
    /// Must be called from within a tokio runtime
    pub fn new(
        builder: Arc<dyn NixBuilder>,
        transfer: Arc<dyn Transfer>,
        deployment: PathBuf,
        hosts: &[Host],
        max_parallel: usize,
    ) -> Self {
        Self {
            builder,
            transfer,
            deployment,
            hosts: hosts.iter().map(|h| (h.name.clone(), h.clone())).collect(),
            status: StatusRegistry::spawn(),
            cache: ClosureCache::spawn(),
            permits: Arc::new(Semaphore::new(max_parallel.max(1))),
            policy: Arc::new(ExitOnFailure),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Validate and run the whole plan
    pub async fn execute(&self, plan: &Step) -> Result<(), FleetError> {
        plan.validate()?;
        self.execute_step(plan, None).await
    }

    /// Closure built for `host` by an earlier build step
    pub async fn closure_for(&self, host: &str) -> Result<Option<String>, FleetError> {
        self.cache.get(&closure_key(host)).await
    }

    fn execute_step<'a>(
        &'a self,
        step: &'a Step,
        siblings: Option<Arc<Semaphore>>,
    ) -> BoxFuture<'a, Result<(), FleetError>> {
        async move {
            self.status.announce(&step.id, StepPhase::Started)?;

            for dependency in &step.depends_on {
                debug!("Step '{}' waiting for {}", step.description, dependency);
                self.status.wait_done(dependency).await?;
            }

            {
                // taken only after the dependency wait, never across it
                let _turn = match &siblings {
                    Some(gate) => Some(gate.clone().acquire_owned().await.map_err(closed)?),
                    None => None,
                };
                let _permit = self.permits.acquire().await.map_err(closed)?;

                if let Err(e) = self.run_action(step).await {
                    self.policy.on_failure(step, e)?;
                }
            }

            let gate = (!step.parallel).then(|| Arc::new(Semaphore::new(1)));
            try_join_all(
                step.steps
                    .iter()
                    .map(|child| self.execute_step(child, gate.clone())),
            )
            .await?;

            self.status.announce(&step.id, StepPhase::Done)?;
            Ok(())
        }
        .boxed()
    }

    async fn run_action(&self, step: &Step) -> Result<(), FleetError> {
        match step.action {
            StepAction::None => Ok(()),
            StepAction::Build => self.build(step).await,
            StepAction::Push => self.push(step).await,
        }
    }

    async fn build(&self, step: &Step) -> Result<(), FleetError> {
        let hosts = step.option_strings("hosts");
        info!("Building {} hosts", hosts.len());

        let result = self.builder.build(&self.deployment, &hosts).await?;
        for host in &hosts {
            let closure = self.builder.resolve_closure(&result, host).await?;
            self.cache.put(closure_key(host), closure)?;
        }

        Ok(())
    }

    async fn push(&self, step: &Step) -> Result<(), FleetError> {
        let name = step
            .option_str("to")
            .ok_or_else(|| FleetError::PlanError(format!("push step '{}' has no target", step.description)))?;
        let host = self
            .hosts
            .get(name)
            .ok_or_else(|| FleetError::PlanError(format!("unknown host {}", name)))?;

        let closure = self
            .closure_for(name)
            .await?
            .ok_or_else(|| FleetError::PlanError(format!("no closure built for {}", name)))?;

        info!("Pushing {} to {}", closure, host.name);
        self.transfer.copy(&closure, host).await
    }
}

fn closed(_: tokio::sync::AcquireError) -> FleetError {
    FleetError::Internal("scheduler permits closed".to_string())
}
