//! HTTP route handlers

mod health;
mod pair;

pub use health::health_check;
pub use pair::handle_pair;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(json)))
        .unwrap()
}

pub(crate) fn not_found(path: &str) -> Response<Full<Bytes>> {
    #[derive(Serialize)]
    struct NotFound<'a> {
        error: &'a str,
        path: &'a str,
    }
    json_response(
        StatusCode::NOT_FOUND,
        &NotFound {
            error: "not found",
            path,
        },
    )
}
