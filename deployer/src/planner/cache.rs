//! Closure cache owned by a single task

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::errors::FleetError;

/// Cache key of a host's built closure
pub fn closure_key(host: &str) -> String {
    format!("closure:{}", host)
}

enum Message {
    Put { key: String, value: String },
    Get {
        key: String,
        reply: oneshot::Sender<Option<String>>,
    },
}

/// Handle to the cache task.
///
/// Writes and reads travel through the same channel, so a read sent after a
/// write has been sent always observes it.
#[derive(Clone)]
pub struct ClosureCache {
    tx: mpsc::UnboundedSender<Message>,
}

impl ClosureCache {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), FleetError> {
        self.tx
            .send(Message::Put {
                key: key.into(),
                value: value.into(),
            })
            .map_err(|_| FleetError::Internal("closure cache stopped".to_string()))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, FleetError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Message::Get {
                key: key.to_string(),
                reply,
            })
            .map_err(|_| FleetError::Internal("closure cache stopped".to_string()))?;

        rx.await
            .map_err(|_| FleetError::Internal("closure cache stopped".to_string()))
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Message>) {
    let mut entries: HashMap<String, String> = HashMap::new();

    while let Some(message) = rx.recv().await {
        match message {
            Message::Put { key, value } => {
                debug!("cache {} = {}", key, value);
                entries.insert(key, value);
            }
            Message::Get { key, reply } => {
                let _ = reply.send(entries.get(&key).cloned());
            }
        }
    }
}
