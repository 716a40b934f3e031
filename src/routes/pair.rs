//! Pairing trigger endpoint
//!
//! `GET /pair?number=<raw>` runs the lifecycle head and answers exactly
//! once: the pairing code on success, or a validation/availability error.
//! Everything after code issuance happens asynchronously and is reported to
//! the linked identity over the messaging channel, never here.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::routes::json_response;
use crate::server::AppState;
use crate::session::PairingTicket;
use crate::types::PairwayError;

/// The one response body shape the trigger endpoint ever produces; `code`
/// carries either the pairing code or a human-readable error message.
#[derive(Serialize)]
struct PairResponse {
    code: String,
}

const UNAVAILABLE_MESSAGE: &str = "Service Unavailable";
const CODE_FAILURE_MESSAGE: &str =
    "Failed to get pairing code. Please check your phone number and try again.";

/// Answer for an account that is already linked; there is no code to enter.
const ALREADY_REGISTERED: &str = "already-registered";

pub async fn handle_pair(state: Arc<AppState>, query: Option<&str>) -> Response<Full<Bytes>> {
    let number = query_param(query, "number").unwrap_or_default();

    match state.controller.begin(&number).await {
        Ok(PairingTicket::Code(code)) => json_response(StatusCode::OK, &PairResponse { code }),
        Ok(PairingTicket::AlreadyRegistered) => json_response(
            StatusCode::OK,
            &PairResponse {
                code: ALREADY_REGISTERED.to_string(),
            },
        ),
        Err(PairwayError::InvalidNumber(message)) => {
            json_response(StatusCode::BAD_REQUEST, &PairResponse { code: message })
        }
        Err(PairwayError::PairingCode(reason)) => {
            error!("Pairing code request failed: {}", reason);
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &PairResponse {
                    code: CODE_FAILURE_MESSAGE.to_string(),
                },
            )
        }
        Err(e) => {
            error!("Pairing session failed to start: {}", e);
            json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &PairResponse {
                    code: UNAVAILABLE_MESSAGE.to_string(),
                },
            )
        }
    }
}

/// Minimal query-string lookup. The only parameter this service reads is a
/// phone number, whose meaningful characters survive any urlencoding.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
