//! Custom Axum extractors for request authentication.
//!
//! `SignedBody<T>` verifies the `Skinvault-Signature` header against the raw
//! JSON body using the bridge secret. Cryptography lives in
//! [`skinvault_sdk::signature`].

use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use skinvault_sdk::signature::{SIGNATURE_HEADER, Signature, SignatureError, SignedObject};

use crate::state::AppState;

/// Upper bound on a signed request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// A JSON body authenticated by the bridge.
///
/// ```text
/// Skinvault-Signature: {unix_timestamp}.{base64_signature}
/// ```
///
/// The signature is `HMAC-SHA256("{timestamp}.{json_body}", notify_secret)`.
pub struct SignedBody<T: Signature>(pub T);

#[derive(Debug, thiserror::Error)]
pub enum SignedBodyError {
    #[error("missing Skinvault-Signature header")]
    MissingHeader,
    #[error("invalid Skinvault-Signature header format")]
    InvalidHeader,
    #[error("invalid signature encoding")]
    InvalidBase64,
    #[error("failed to read request body")]
    BodyReadError,
    #[error("invalid JSON body: {0}")]
    JsonError(serde_json::Error),
    #[error("signature verification failed")]
    VerificationFailed,
}

impl From<SignatureError> for SignedBodyError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader,
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::Json(e) => Self::JsonError(e),
            SignatureError::SignatureMismatch | SignatureError::Expired => Self::VerificationFailed,
        }
    }
}

impl IntoResponse for SignedBodyError {
    fn into_response(self) -> Response {
        let status = match self {
            SignedBodyError::MissingHeader | SignedBodyError::VerificationFailed => {
                StatusCode::UNAUTHORIZED
            }
            SignedBodyError::InvalidHeader
            | SignedBodyError::InvalidBase64
            | SignedBodyError::BodyReadError
            | SignedBodyError::JsonError(_) => StatusCode::BAD_REQUEST,
        };
        tracing::warn!(error = %self, "Rejected signed request");
        (status, self.to_string()).into_response()
    }
}

impl<T: Signature + Send> FromRequest<AppState> for SignedBody<T> {
    type Rejection = SignedBodyError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = req
            .headers()
            .get(SIGNATURE_HEADER)
            .ok_or(SignedBodyError::MissingHeader)?
            .to_str()
            .map_err(|_| SignedBodyError::InvalidHeader)?
            .to_owned();

        let body_bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|_| SignedBodyError::BodyReadError)?;

        let json =
            String::from_utf8(body_bytes.to_vec()).map_err(|_| SignedBodyError::BodyReadError)?;

        let signed = SignedObject::<T>::from_header_and_body(&header_value, json)?;

        let bridge = state.bridge.read().await;
        let verified_body = signed.verify(&bridge.notify_secret)?;
        drop(bridge);

        Ok(SignedBody(verified_body))
    }
}
