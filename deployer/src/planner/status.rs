//! Step status registry.
//!
//! A single task owns the per-step completion signals. Everyone else talks to
//! it over a channel, either announcing a phase change or asking for the
//! signal of a step so it can wait on it. Signals are created on first use
//! by either side, so waiting on a step that has not started yet is fine.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::trace;

use crate::errors::FleetError;

/// Lifecycle of a step as seen by its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StepPhase {
    Pending,
    Started,
    Done,
}

/// Event announcing that a step reached a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub id: String,
    pub phase: StepPhase,
}

enum Message {
    Event(StepStatus),
    Subscribe {
        id: String,
        reply: oneshot::Sender<watch::Receiver<StepPhase>>,
    },
}

/// Handle to the registry task
#[derive(Clone)]
pub struct StatusRegistry {
    tx: mpsc::UnboundedSender<Message>,
}

impl StatusRegistry {
    /// Spawn the registry task. It stops once every handle is dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    pub fn announce(&self, id: &str, phase: StepPhase) -> Result<(), FleetError> {
        self.tx
            .send(Message::Event(StepStatus {
                id: id.to_string(),
                phase,
            }))
            .map_err(|_| FleetError::Internal("status registry stopped".to_string()))
    }

    /// Wait until step `id` is done
    pub async fn wait_done(&self, id: &str) -> Result<(), FleetError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Subscribe {
                id: id.to_string(),
                reply,
            })
            .map_err(|_| FleetError::Internal("status registry stopped".to_string()))?;

        let mut phase = rx
            .await
            .map_err(|_| FleetError::Internal("status registry stopped".to_string()))?;

        phase
            .wait_for(|phase| *phase == StepPhase::Done)
            .await
            .map_err(|_| FleetError::Internal(format!("status of step {} was dropped", id)))?;

        Ok(())
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut registry: HashMap<String, watch::Sender<StepPhase>> = HashMap::new();

    while let Some(message) = rx.recv().await {
        match message {
            Message::Event(StepStatus { id, phase }) => {
                trace!("step {} is {:?}", id, phase);
                let signal = registry
                    .entry(id)
                    .or_insert_with(|| watch::channel(StepPhase::Pending).0);
                // phases only move forward
                signal.send_if_modified(|current| {
                    if phase > *current {
                        *current = phase;
                        true
                    } else {
                        false
                    }
                });
            }
            Message::Subscribe { id, reply } => {
                let signal = registry
                    .entry(id)
                    .or_insert_with(|| watch::channel(StepPhase::Pending).0);
                let _ = reply.send(signal.subscribe());
            }
        }
    }
}
