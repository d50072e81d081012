//! HTTP ingress.
//!
//! # Endpoints
//!
//! - `POST /deposit`              - ask the bridge to send a deposit offer
//! - `POST /trades/notifications` - signed trade-completion callback
//! - `GET  /queue`                - queue depth and dead letters
//! - `GET  /inventory`            - ledger rows and their total value

mod deposit;
pub mod extractors;
mod notifications;
mod status;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deposit", post(deposit::create_deposit))
        .route("/trades/notifications", post(notifications::receive_notification))
        .route("/queue", get(status::queue_status))
        .route("/inventory", get(status::inventory))
}
