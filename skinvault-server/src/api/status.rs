use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use kanau::processor::Processor;
use serde::Serialize;
use skinvault_core::entities::ledger::{LastUpdated, LedgerEntry, ReadLedger, total_value_usd};
use time::format_description::well_known::Rfc3339;

use crate::state::AppState;

/// `GET /queue`
pub(super) async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.queue.snapshot().await)
}

#[derive(Debug, Serialize)]
struct InventoryItem {
    skin: String,
    quantity: i64,
    price_usd: Option<String>,
    last_updated: Option<String>,
}

impl From<LedgerEntry> for InventoryItem {
    fn from(entry: LedgerEntry) -> Self {
        let last_updated = match entry.last_updated {
            LastUpdated::Unset => None,
            LastUpdated::Never => Some("NEVER".to_owned()),
            LastUpdated::At(at) => at.format(&Rfc3339).ok(),
        };
        Self {
            skin: entry.skin,
            quantity: entry.quantity,
            price_usd: entry.price_usd.map(|p| p.to_string()),
            last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
struct InventoryResponse {
    items: Vec<InventoryItem>,
    total_usd: String,
}

/// `GET /inventory`: current ledger contents.
pub(super) async fn inventory(State(state): State<AppState>) -> impl IntoResponse {
    match state.ledger.process(ReadLedger).await {
        Ok(entries) => {
            let total_usd = total_value_usd(&entries).round_dp(2).to_string();
            Json(InventoryResponse {
                items: entries.into_iter().map(InventoryItem::from).collect(),
                total_usd,
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to read ledger");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::testing::TestApp;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use kanau::processor::Processor;
    use rust_decimal::Decimal;
    use serde_json::json;
    use skinvault_core::entities::ledger::ApplyLedgerDelta;
    use std::str::FromStr;

    #[tokio::test]
    async fn test_inventory_lists_rows_and_total() {
        let app = TestApp::new().await;
        for (skin, delta, price) in [("AWP | Asiimov", 2, Some("45.10")), ("Sticker", 1, None)] {
            app.state
                .ledger
                .process(ApplyLedgerDelta {
                    skin: skin.into(),
                    delta,
                    price_usd: price.map(|p| Decimal::from_str(p).unwrap()),
                })
                .await
                .unwrap();
        }

        let (status, body) = app
            .send(Request::get("/inventory").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_usd"], json!("90.20"));
        assert_eq!(body["items"][0]["quantity"], json!(2));
        assert_eq!(body["items"][0]["price_usd"], json!("45.10"));
        assert_eq!(body["items"][1]["price_usd"], json!(null));
    }

    #[tokio::test]
    async fn test_queue_status() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(Request::get("/queue").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"pending": 0, "in_flight": null, "dead_letters": 0})
        );
    }
}
