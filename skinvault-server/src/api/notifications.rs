use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use skinvault_core::entities::trade_queue::{EnqueueOutcome, QueueError};
use skinvault_sdk::objects::TradeNotification;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::api::extractors::SignedBody;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct NotificationAck {
    status: &'static str,
}

pub(super) enum NotificationError {
    Queue(QueueError),
}

impl IntoResponse for NotificationError {
    fn into_response(self) -> axum::response::Response {
        match self {
            NotificationError::Queue(e) => {
                tracing::error!(error = %e, "Failed to persist trade notification");
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to persist trade").into_response()
            }
        }
    }
}

/// `POST /trades/notifications`: a trade offer changed state.
///
/// Only accepted trades are queued. A 2xx reply means the trade is durably
/// queued (or deliberately ignored); on 500 the bridge should retry.
pub(super) async fn receive_notification(
    State(state): State<AppState>,
    SignedBody(notification): SignedBody<TradeNotification>,
) -> Result<impl IntoResponse, NotificationError> {
    if !notification.state.is_accepted() {
        debug!(trade_id = %notification.id, state = ?notification.state, "Ignoring trade that was not accepted");
        return Ok((StatusCode::OK, Json(NotificationAck { status: "ignored" })));
    }

    let trade_id = notification.id.clone();
    let direction = notification.direction;
    let event = notification.into_event(OffsetDateTime::now_utc());
    let outcome = state
        .queue
        .enqueue(event)
        .await
        .map_err(NotificationError::Queue)?;

    Ok(match outcome {
        EnqueueOutcome::Enqueued => {
            info!(trade_id = %trade_id, %direction, "Trade queued");
            (StatusCode::ACCEPTED, Json(NotificationAck { status: "queued" }))
        }
        EnqueueOutcome::Duplicate => (StatusCode::OK, Json(NotificationAck { status: "duplicate" })),
    })
}
