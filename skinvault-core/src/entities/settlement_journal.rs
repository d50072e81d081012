//! Per-trade record of settlement steps already performed.
//!
//! A trade that fails after crediting but before redeeming is reprocessed
//! from scratch. The journal lets the retry skip whatever already went
//! through and reuse the amount computed the first time, so one trade never
//! pays out twice even when the rate moves between attempts.

use crate::settlement::NativeAmount;
use crate::utils::atomic_file::{ensure_parent_dir, read_optional, write_atomic};
use serde::{Deserialize, Serialize};
use skinvault_sdk::objects::SettlementAddress;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("journal {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize journal: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub address: SettlementAddress,
    pub amount: NativeAmount,
    /// Transaction reference of the credit call, once it succeeded.
    #[serde(default)]
    pub credited: Option<String>,
    #[serde(default)]
    pub redeemed: Option<String>,
}

impl SettlementRecord {
    pub fn new(address: SettlementAddress, amount: NativeAmount) -> Self {
        Self {
            address,
            amount,
            credited: None,
            redeemed: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.credited.is_some() && self.redeemed.is_some()
    }
}

pub struct SettlementJournal {
    path: PathBuf,
    records: Mutex<BTreeMap<String, SettlementRecord>>,
}

impl SettlementJournal {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        let io_err = |source| JournalError::Io {
            path: path.clone(),
            source,
        };
        ensure_parent_dir(&path).await.map_err(io_err)?;
        let records = match read_optional(&path).await.map_err(io_err)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|source| JournalError::Corrupt {
                path: path.clone(),
                source,
            })?,
            None => BTreeMap::new(),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub async fn get(&self, trade_id: &str) -> Option<SettlementRecord> {
        self.records.lock().await.get(trade_id).cloned()
    }

    /// Insert or overwrite the record for `trade_id`.
    pub async fn record(&self, trade_id: &str, record: SettlementRecord) -> Result<(), JournalError> {
        self.mutate(|records| {
            records.insert(trade_id.to_owned(), record);
        })
        .await
    }

    /// Drop the record once its trade has left the queue.
    pub async fn prune(&self, trade_id: &str) -> Result<(), JournalError> {
        self.mutate(|records| {
            records.remove(trade_id);
        })
        .await
    }

    async fn mutate(
        &self,
        apply: impl FnOnce(&mut BTreeMap<String, SettlementRecord>),
    ) -> Result<(), JournalError> {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        apply(&mut next);
        if next == *guard {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| JournalError::Io {
                path: self.path.clone(),
                source,
            })?;
        *guard = next;
        Ok(())
    }
}
