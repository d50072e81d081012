use axum::extract::rejection::JsonRejection;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use skinvault_sdk::objects::{
    AddressError, DepositRequest, DepositResponse, OfferItem, OfferRequest, SettlementAddress,
};

use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub(super) enum DepositError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid ethAddress: {0}")]
    InvalidAddress(#[from] AddressError),
    #[error("invalid request body: {0}")]
    InvalidBody(String),
}

impl From<JsonRejection> for DepositError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

impl IntoResponse for DepositError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, DepositError> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(DepositError::MissingField(field))
}

/// `POST /deposit`: ask the bridge to offer a trade for the given assets.
///
/// Replies as soon as the request is valid; the offer is sent in the
/// background and a failure there is only logged.
pub(super) async fn create_deposit(
    State(state): State<AppState>,
    body: Result<Json<DepositRequest>, JsonRejection>,
) -> Result<impl IntoResponse, DepositError> {
    let Json(body) = body?;
    let trade_url = non_empty(body.trade_url, "tradeUrl")?;
    let address = SettlementAddress::parse(non_empty(body.eth_address, "ethAddress")?.as_str())?;
    let asset_ids: Vec<String> = body
        .asset_ids
        .unwrap_or_default()
        .into_iter()
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
        .collect();
    if asset_ids.is_empty() {
        return Err(DepositError::MissingField("assetids"));
    }

    let offer = {
        let bridge = state.bridge.read().await;
        OfferRequest {
            trade_url,
            their_items: asset_ids
                .into_iter()
                .map(|asset_id| OfferItem {
                    app_id: bridge.app_id,
                    context_id: bridge.context_id.clone(),
                    asset_id,
                })
                .collect(),
            message: format!("Ethereum address: {address}"),
        }
    };

    let offers = state.offers.clone();
    tokio::spawn(async move {
        if let Err(e) = offers.send_offer(offer).await {
            tracing::error!(error = %e, "Failed to send deposit offer");
        }
    });

    Ok(Json(DepositResponse {
        status: "sent".to_owned(),
    }))
}
