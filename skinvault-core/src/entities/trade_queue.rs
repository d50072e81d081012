//! Durable FIFO of captured trade events.
//!
//! The whole queue is one JSON document rewritten atomically on every
//! mutation. A mutation is applied to a copy, the copy is persisted, and only
//! then does it replace the in-memory state, so the two never diverge and a
//! failed write leaves both untouched.
//!
//! Dequeuing moves the head into a persisted in-flight slot instead of
//! dropping it. The slot is cleared by [`TradeQueue::complete`], pushed back
//! to the head by [`TradeQueue::requeue`], or moved to the dead-letter file by
//! [`TradeQueue::dead_letter`]. After a restart the in-flight entry is handed
//! out again first.

use crate::utils::atomic_file::{ensure_parent_dir, read_optional, write_atomic};
use serde::{Deserialize, Serialize};
use skinvault_sdk::objects::TradeEvent;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is not a valid queue file: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize queue state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("trade {0} is not in flight")]
    NotInFlight(String),
}

/// A queue entry: the immutable event plus delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTrade {
    pub event: TradeEvent,
    /// Number of failed processing attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl QueuedTrade {
    pub fn new(event: TradeEvent) -> Self {
        Self { event, attempts: 0 }
    }

    pub fn id(&self) -> &str {
        &self.event.id
    }
}

/// Everything persisted in the queue file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    pub in_flight: Option<QueuedTrade>,
    #[serde(default)]
    pub pending: VecDeque<QueuedTrade>,
}

impl QueueState {
    fn contains(&self, id: &str) -> bool {
        self.in_flight.as_ref().is_some_and(|t| t.id() == id)
            || self.pending.iter().any(|t| t.id() == id)
    }

    fn take_in_flight(&mut self, id: &str) -> Result<QueuedTrade, QueueError> {
        match self.in_flight.take() {
            Some(trade) if trade.id() == id => Ok(trade),
            other => {
                self.in_flight = other;
                Err(QueueError::NotInFlight(id.to_owned()))
            }
        }
    }
}

/// A trade given up on after exhausting its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub trade: QueuedTrade,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub failed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// An entry with the same trade id is already pending or in flight.
    Duplicate,
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub in_flight: Option<String>,
    pub dead_letters: usize,
}

pub struct TradeQueue {
    path: PathBuf,
    dead_letter_path: PathBuf,
    state: Mutex<QueueState>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    work_available: Notify,
}

impl TradeQueue {
    /// Open the queue, restoring the last persisted state.
    pub async fn open(
        path: impl Into<PathBuf>,
        dead_letter_path: impl Into<PathBuf>,
    ) -> Result<Self, QueueError> {
        let path = path.into();
        let dead_letter_path = dead_letter_path.into();

        let state: QueueState = load_json(&path).await?.unwrap_or_default();
        let dead_letters: Vec<DeadLetter> = load_json(&dead_letter_path).await?.unwrap_or_default();

        info!(
            path = %path.display(),
            pending = state.pending.len(),
            in_flight = ?state.in_flight.as_ref().map(QueuedTrade::id),
            dead_letters = dead_letters.len(),
            "Trade queue loaded"
        );

        Ok(Self {
            path,
            dead_letter_path,
            state: Mutex::new(state),
            dead_letters: Mutex::new(dead_letters),
            work_available: Notify::new(),
        })
    }

    /// Append an event to the tail.
    pub async fn enqueue(&self, event: TradeEvent) -> Result<EnqueueOutcome, QueueError> {
        let id = event.id.clone();
        let outcome = self
            .mutate(|state| {
                if state.contains(&event.id) {
                    return Ok(None);
                }
                state.pending.push_back(QueuedTrade::new(event));
                Ok(Some(state.pending.len()))
            })
            .await?;

        match outcome {
            Some(depth) => {
                debug!(trade_id = %id, depth, "Trade enqueued");
                self.work_available.notify_one();
                Ok(EnqueueOutcome::Enqueued)
            }
            None => {
                warn!(trade_id = %id, "Ignoring duplicate trade notification");
                Ok(EnqueueOutcome::Duplicate)
            }
        }
    }

    /// Hand out the next trade to process.
    ///
    /// An entry left in flight by a previous run is returned first. Otherwise
    /// the head moves into the in-flight slot and that change is persisted
    /// before returning.
    pub async fn dequeue(&self) -> Result<Option<QueuedTrade>, QueueError> {
        {
            let state = self.state.lock().await;
            if let Some(trade) = &state.in_flight {
                return Ok(Some(trade.clone()));
            }
            if state.pending.is_empty() {
                return Ok(None);
            }
        }

        self.mutate(|state| {
            if let Some(trade) = &state.in_flight {
                return Ok(Some(trade.clone()));
            }
            let next = state.pending.pop_front();
            state.in_flight = next.clone();
            Ok(next)
        })
        .await
    }

    /// Wait until an enqueue happens or `timeout` elapses.
    pub async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.work_available.notified()).await;
    }

    /// Permanently remove the in-flight trade.
    pub async fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.mutate(|state| state.take_in_flight(id).map(|_| ()))
            .await
    }

    /// Put the in-flight trade back at the head, counting the failed attempt.
    ///
    /// The event itself is reinserted unchanged.
    pub async fn requeue(&self, id: &str) -> Result<u32, QueueError> {
        self.mutate(|state| {
            let mut trade = state.take_in_flight(id)?;
            trade.attempts = trade.attempts.saturating_add(1);
            let attempts = trade.attempts;
            state.pending.push_front(trade);
            Ok(attempts)
        })
        .await
    }

    /// Move the in-flight trade to the dead-letter file.
    ///
    /// The dead letter is persisted before the trade leaves the queue, so a
    /// crash in between can only leave it in both places.
    pub async fn dead_letter(&self, id: &str, reason: String) -> Result<(), QueueError> {
        let trade = {
            let state = self.state.lock().await;
            match &state.in_flight {
                Some(trade) if trade.id() == id => trade.clone(),
                _ => return Err(QueueError::NotInFlight(id.to_owned())),
            }
        };

        {
            let mut dead_letters = self.dead_letters.lock().await;
            let mut next = dead_letters.clone();
            next.retain(|d| d.trade.id() != id);
            next.push(DeadLetter {
                trade: QueuedTrade {
                    attempts: trade.attempts.saturating_add(1),
                    ..trade
                },
                reason,
                failed_at: OffsetDateTime::now_utc(),
            });
            persist_json(&self.dead_letter_path, &next).await?;
            *dead_letters = next;
        }

        self.mutate(|state| state.take_in_flight(id).map(|_| ()))
            .await
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock().await;
        let dead_letters = self.dead_letters.lock().await.len();
        QueueSnapshot {
            pending: state.pending.len(),
            in_flight: state.in_flight.as_ref().map(|t| t.id().to_owned()),
            dead_letters,
        }
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    async fn mutate<R>(
        &self,
        apply: impl FnOnce(&mut QueueState) -> Result<R, QueueError>,
    ) -> Result<R, QueueError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = apply(&mut next)?;
        if next != *guard {
            persist_json(&self.path, &next).await?;
            *guard = next;
        }
        Ok(out)
    }
}

async fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, QueueError> {
    ensure_parent_dir(path).await.map_err(|source| QueueError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(bytes) = read_optional(path).await.map_err(|source| QueueError::Load {
        path: path.to_path_buf(),
        source,
    })?
    else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| QueueError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

async fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<(), QueueError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
        .await
        .map_err(|source| QueueError::Persist {
            path: path.to_path_buf(),
            source,
        })
}
