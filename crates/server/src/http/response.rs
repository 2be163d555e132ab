//! JSON envelope shared by every endpoint
//!
//! `{"Msg": "...", "Code": "0", "Data": ...}` with code `"0"` on success and
//! `"1"` on failure. `Data` is omitted when empty.

use common::ScanFailureKind;
use serde::Serialize;
use warp::http::StatusCode;
use warp::Reply;
use warp::reply::Response;

pub const CODE_SUCCESS: &str = "0";
pub const CODE_ERROR: &str = "1";

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    #[serde(rename = "Msg")]
    pub msg: String,
    #[serde(rename = "Code")]
    pub code: &'static str,
    #[serde(rename = "Data", skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            msg: "success".to_string(),
            code: CODE_SUCCESS,
            data: None,
        }
    }

    pub fn ok_with_data(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                data: Some(value),
                ..Self::ok()
            },
            Err(e) => Self::error(format!("failed to encode response: {}", e)),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            code: CODE_ERROR,
            data: None,
        }
    }

    pub fn into_reply(self, status: StatusCode) -> Response {
        warp::reply::with_status(warp::reply::json(&self), status).into_response()
    }
}

/// Success envelope carrying `data`
pub fn success(data: impl Serialize) -> Response {
    ApiResponse::ok_with_data(data).into_reply(StatusCode::OK)
}

/// Error envelope with `status`
pub fn failure(status: StatusCode, msg: impl Into<String>) -> Response {
    ApiResponse::error(msg).into_reply(status)
}

/// HTTP status for an error coming back from the scan worker
pub fn status_for(err: &common::Error) -> StatusCode {
    match err {
        common::Error::InvalidId { .. } => StatusCode::BAD_REQUEST,
        common::Error::Scan { kind, .. } => match kind {
            ScanFailureKind::NoMatchingDevice | ScanFailureKind::InvalidDescriptor => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
