//! Inventory ledger kept as a CSV table.
//!
//! One row per item name with header `Skin,QTY,Price,LastUpdated`. The file
//! is rewritten in full on every change using the atomic replace helper.
//! Rows keep their file order and new items are appended at the end.

use crate::utils::atomic_file::{ensure_parent_dir, read_optional, write_atomic};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// `LastUpdated` marker for rows whose price is maintained by hand.
const NEVER: &str = "NEVER";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read ledger {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to persist ledger {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed ledger csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid quantity {value:?} for {skin}")]
    InvalidQuantity { skin: String, value: String },
}

/// When a row's price was last refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastUpdated {
    Unset,
    /// Pinned row; kept verbatim until a priced delta touches it.
    Never,
    At(OffsetDateTime),
}

impl LastUpdated {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Unset;
        }
        if raw.eq_ignore_ascii_case(NEVER) {
            return Self::Never;
        }
        match OffsetDateTime::parse(raw, &Rfc3339) {
            Ok(at) => Self::At(at),
            Err(e) => {
                warn!(value = raw, error = %e, "Unreadable LastUpdated cell, treating as unset");
                Self::Unset
            }
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Unset => String::new(),
            Self::Never => NEVER.to_owned(),
            Self::At(at) => at.format(&Rfc3339).unwrap_or_default(),
        }
    }
}

/// One inventory line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub skin: String,
    pub quantity: i64,
    pub price_usd: Option<Decimal>,
    pub last_updated: LastUpdated,
}

impl LedgerEntry {
    /// `quantity × price`, zero when the price is unknown.
    pub fn value_usd(&self) -> Decimal {
        self.price_usd
            .map(|p| p * Decimal::from(self.quantity))
            .unwrap_or(Decimal::ZERO)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Skin")]
    skin: String,
    #[serde(rename = "QTY")]
    qty: String,
    #[serde(rename = "Price", default)]
    price: String,
    #[serde(rename = "LastUpdated", default)]
    last_updated: String,
}

impl CsvRow {
    fn into_entry(self) -> Result<LedgerEntry, LedgerError> {
        let quantity = self
            .qty
            .trim()
            .parse::<i64>()
            .map_err(|_| LedgerError::InvalidQuantity {
                skin: self.skin.clone(),
                value: self.qty.clone(),
            })?;
        Ok(LedgerEntry {
            price_usd: parse_price(&self.skin, &self.price),
            last_updated: LastUpdated::parse(&self.last_updated),
            skin: self.skin,
            quantity,
        })
    }

    fn from_entry(entry: &LedgerEntry) -> Self {
        Self {
            skin: entry.skin.clone(),
            qty: entry.quantity.to_string(),
            price: entry.price_usd.map(|p| p.to_string()).unwrap_or_default(),
            last_updated: entry.last_updated.render(),
        }
    }
}

/// Accepts `12.5`, `$12.50` and `1,234.00`.
fn parse_price(skin: &str, raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    match Decimal::from_str(&cleaned) {
        Ok(price) => Some(price),
        Err(e) => {
            warn!(skin, value = raw, error = %e, "Unreadable price cell, treating as unset");
            None
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(bytes);
    let mut entries = Vec::new();
    for row in reader.deserialize::<CsvRow>() {
        let entry = row?.into_entry()?;
        if entry.quantity <= 0 {
            warn!(skin = %entry.skin, quantity = entry.quantity, "Dropping non-positive ledger row");
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn encode(entries: &[LedgerEntry]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if entries.is_empty() {
        writer.write_record(["Skin", "QTY", "Price", "LastUpdated"])?;
    }
    for entry in entries {
        writer.serialize(CsvRow::from_entry(entry))?;
    }
    writer
        .into_inner()
        .map_err(|e| LedgerError::Csv(e.into_error().into()))
}

/// Adjust an item's quantity, optionally recording a fresh unit price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyLedgerDelta {
    pub skin: String,
    pub delta: i64,
    pub price_usd: Option<Decimal>,
}

/// Read every ledger row in file order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadLedger;

/// CSV-file backed ledger.
///
/// The file is the only copy of the table. The reconciliation pass and
/// operators rewrite it too, so every command reads it afresh; the lock only
/// serializes this process's own read-modify-write cycles.
pub struct CsvLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvLedger {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        ensure_parent_dir(&path).await.map_err(|source| LedgerError::Load {
            path: path.clone(),
            source,
        })?;
        let entries = match read_optional(&path).await {
            Ok(Some(bytes)) => decode(&bytes)?,
            Ok(None) => Vec::new(),
            Err(source) => return Err(LedgerError::Load { path, source }),
        };
        info!(path = %path.display(), rows = entries.len(), "Ledger loaded");
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => decode(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(LedgerError::Load {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Processor<ApplyLedgerDelta> for CsvLedger {
    type Output = ();
    type Error = LedgerError;
    #[tracing::instrument(skip_all, err, name = "Ledger:ApplyDelta", fields(skin = %change.skin, delta = change.delta))]
    async fn process(&self, change: ApplyLedgerDelta) -> Result<(), LedgerError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;

        let index = match entries.iter().position(|e| e.skin == change.skin) {
            Some(index) => index,
            None => {
                entries.push(LedgerEntry {
                    skin: change.skin.clone(),
                    quantity: 0,
                    price_usd: change.price_usd,
                    last_updated: LastUpdated::At(OffsetDateTime::now_utc()),
                });
                entries.len() - 1
            }
        };

        let entry = &mut entries[index];
        entry.quantity = entry.quantity.saturating_add(change.delta);
        if let Some(price) = change.price_usd {
            entry.price_usd = Some(price);
            entry.last_updated = LastUpdated::At(OffsetDateTime::now_utc());
        }
        let quantity = entry.quantity;
        if quantity <= 0 {
            entries.remove(index);
        }

        let bytes = encode(&entries)?;
        write_atomic(&self.path, &bytes)
            .await
            .map_err(|source| LedgerError::Persist {
                path: self.path.clone(),
                source,
            })?;

        debug!(quantity, "Ledger row updated");
        Ok(())
    }
}

impl Processor<ReadLedger> for CsvLedger {
    type Output = Vec<LedgerEntry>;
    type Error = LedgerError;
    async fn process(&self, _query: ReadLedger) -> Result<Vec<LedgerEntry>, LedgerError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }
}

/// Sum of `quantity × price` across rows with a known price.
pub fn total_value_usd(entries: &[LedgerEntry]) -> Decimal {
    entries.iter().map(LedgerEntry::value_usd).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open(dir: &tempfile::TempDir) -> CsvLedger {
        CsvLedger::open(dir.path().join("inventory.csv"))
            .await
            .unwrap()
    }

    fn delta(skin: &str, delta: i64, price: Option<&str>) -> ApplyLedgerDelta {
        ApplyLedgerDelta {
            skin: skin.to_owned(),
            delta,
            price_usd: price.map(|p| Decimal::from_str(p).unwrap()),
        }
    }

    async fn rows(ledger: &CsvLedger) -> Vec<LedgerEntry> {
        ledger.process(ReadLedger).await.unwrap()
    }

    #[tokio::test]
    async fn test_new_item_is_created_with_price() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir).await;
        ledger
            .process(delta("AK-47 | Redline (Field-Tested)", 1, Some("12.50")))
            .await
            .unwrap();

        let rows = rows(&ledger).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 1);
        assert_eq!(rows[0].price_usd.unwrap().to_string(), "12.50");
        assert!(matches!(rows[0].last_updated, LastUpdated::At(_)));

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Skin,QTY,Price,LastUpdated"));
        assert!(lines.next().unwrap().starts_with("AK-47 | Redline (Field-Tested),1,12.50,"));
    }

    #[tokio::test]
    async fn test_plus_then_minus_restores_quantity() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir).await;
        ledger.process(delta("Glock-18 | Fade", 2, None)).await.unwrap();
        ledger
            .process(delta("Glock-18 | Fade", 1, Some("900.00")))
            .await
            .unwrap();
        ledger.process(delta("Glock-18 | Fade", -1, None)).await.unwrap();

        let rows = rows(&ledger).await;
        assert_eq!(rows[0].quantity, 2);
        assert_eq!(rows[0].price_usd, Some(Decimal::from(900)));
    }

    #[tokio::test]
    async fn test_row_reaching_zero_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir).await;
        ledger.process(delta("P250 | Sand Dune", 1, None)).await.unwrap();
        ledger.process(delta("P250 | Sand Dune", -1, None)).await.unwrap();
        assert!(rows(&ledger).await.is_empty());

        // Removing an item that was never held does not leave a negative row.
        ledger.process(delta("M4A4 | Howl", -1, None)).await.unwrap();
        assert!(rows(&ledger).await.is_empty());

        let reloaded = open(&dir).await;
        assert!(rows(&reloaded).await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = open(&dir).await;
            ledger.process(delta("b", 3, Some("1.10"))).await.unwrap();
            ledger.process(delta("a", 1, None)).await.unwrap();
            ledger.process(delta("c", 2, Some("0.05"))).await.unwrap();
        }
        let ledger = open(&dir).await;
        let triples: Vec<_> = rows(&ledger)
            .await
            .into_iter()
            .map(|e| (e.skin, e.quantity, e.price_usd.map(|p| p.to_string())))
            .collect();
        assert_eq!(
            triples,
            vec![
                ("b".to_owned(), 3, Some("1.10".to_owned())),
                ("a".to_owned(), 1, None),
                ("c".to_owned(), 2, Some("0.05".to_owned())),
            ]
        );
    }

    #[tokio::test]
    async fn test_hand_edited_file_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        std::fs::write(
            &path,
            "Skin,QTY,Price,LastUpdated\n\
             Karambit | Doppler,1,\"$1,234.50\",NEVER\n\
             Zeus x27,0,$1.00,\n\
             MP9 | Hydra,4,,2024-01-02T03:04:05Z\n",
        )
        .unwrap();

        let ledger = CsvLedger::open(&path).await.unwrap();
        let rows = rows(&ledger).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].price_usd, Some(Decimal::from_str("1234.50").unwrap()));
        assert_eq!(rows[0].last_updated, LastUpdated::Never);
        assert_eq!(rows[1].price_usd, None);
        assert_eq!(total_value_usd(&rows), Decimal::from_str("1234.50").unwrap());

        // An unpriced delta keeps the pinned marker.
        ledger.process(delta("Karambit | Doppler", 1, None)).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Karambit | Doppler,2,1234.50,NEVER"));
    }

    #[tokio::test]
    async fn test_invalid_quantity_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.csv");
        std::fs::write(&path, "Skin,QTY,Price,LastUpdated\nUSP-S | Kill Confirmed,lots,,\n").unwrap();
        assert!(matches!(
            CsvLedger::open(&path).await,
            Err(LedgerError::InvalidQuantity { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir).await;
        ledger.process(delta("a", 1, None)).await.unwrap();

        std::fs::create_dir(dir.path().join("inventory.csv.tmp")).unwrap();
        assert!(matches!(
            ledger.process(delta("a", 1, None)).await,
            Err(LedgerError::Persist { .. })
        ));
        assert_eq!(rows(&ledger).await[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_external_rewrite_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open(&dir).await;
        ledger.process(delta("A", 1, None)).await.unwrap();
        ledger.process(delta("B", 1, None)).await.unwrap();

        // Refreshed prices written by the reconciliation pass.
        std::fs::write(
            ledger.path(),
            "Skin,QTY,Price,LastUpdated\n\
             A,1,99.00,2026-01-01T00:00:00Z\n\
             B,1,5.00,NEVER\n",
        )
        .unwrap();
        assert_eq!(rows(&ledger).await[0].price_usd, Some(Decimal::from(99)));

        ledger.process(delta("B", 1, None)).await.unwrap();

        let rows = rows(&ledger).await;
        assert_eq!(rows[0].skin, "A");
        assert_eq!(rows[0].price_usd, Some(Decimal::from(99)));
        assert_eq!(rows[1].quantity, 2);
        assert_eq!(rows[1].price_usd, Some(Decimal::from(5)));
        assert_eq!(rows[1].last_updated, LastUpdated::Never);

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        assert!(text.contains("A,1,99.00,2026-01-01T00:00:00Z"));
        assert!(text.contains("B,2,5.00,NEVER"));
    }
}
