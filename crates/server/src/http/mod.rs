//! HTTP API
//!
//! - `POST /api/scan` run a scan and store the result as an attachment
//! - `GET /api/devices` list attached USB devices
//! - `GET /api/download/<id>` fetch a stored scan
//! - `GET /health` liveness
//!
//! Handlers never touch USB themselves; everything goes through the scan
//! bridge to the worker thread.

pub mod response;

use crate::storage::{AttachmentError, AttachmentStore};
use anyhow::{Context, Result};
use common::{DeviceDescriptor, ScanBridge, ScanJob};
use protocol::ScanOptions;
use response::{ApiResponse, failure, status_for, success};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Largest accepted request body
const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub bridge: ScanBridge,
    pub store: Arc<AttachmentStore>,
    /// Used when a request carries no options
    pub defaults: ScanOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReq {
    #[serde(default, alias = "Device")]
    pub device: Option<DeviceDescriptor>,
    #[serde(default, alias = "Option")]
    pub option: Option<ScanOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResp {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "FileType")]
    pub file_type: String,
    #[serde(rename = "Bytes")]
    pub bytes: u64,
    #[serde(rename = "Req")]
    pub req: ScanReq,
}

/// All routes, with rejections rendered as error envelopes
pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_state = warp::any().map(move || state.clone());

    let scan = warp::path!("api" / "scan")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_state.clone())
        .and_then(handle_scan);

    let devices = warp::path!("api" / "devices")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(handle_devices);

    let download = warp::path!("api" / "download" / String)
        .and(warp::get())
        .and(with_state)
        .and_then(handle_download);

    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and_then(handle_health);

    scan.or(devices)
        .or(download)
        .or(health)
        .recover(handle_rejection)
        .with(warp::trace::request())
}

/// Serve until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .with_context(|| format!("Failed to bind HTTP API to {}", addr))?;

    info!("HTTP API listening on http://{}", bound);
    server.await;
    info!("HTTP API stopped");
    Ok(())
}

async fn handle_scan(req: ScanReq, state: AppState) -> Result<Response, Rejection> {
    let options = req.option.unwrap_or(state.defaults);

    let device = match req.device.filter(|d| !d.is_unspecified()) {
        Some(device) => device,
        None => match state.bridge.list_devices().await {
            Ok(devices) => match devices.into_iter().next() {
                Some(device) => device,
                None => return Ok(failure(StatusCode::NOT_FOUND, "no USB device found")),
            },
            Err(e) => return Ok(failure(status_for(&e), e.to_string())),
        },
    };

    let (attach_id, output) = match state.store.allocate() {
        Ok(allocated) => allocated,
        Err(e) => {
            error!("Failed to allocate attachment: {}", e);
            return Ok(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    };

    info!("Scan requested on {} into {}", device, attach_id);
    let job = ScanJob {
        device: device.clone(),
        options,
        output: output.clone(),
    };

    match state.bridge.scan(job).await {
        Ok(report) => Ok(success(ScanResp {
            url: format!("/api/download/{}", attach_id),
            file_type: options.compression.file_type().to_string(),
            bytes: report.bytes_written,
            req: ScanReq {
                device: Some(device),
                option: Some(options),
            },
        })),
        Err(e) => {
            // The worker removes its partial output; this covers a lost worker
            let _ = tokio::fs::remove_file(&output).await;
            Ok(failure(status_for(&e), e.to_string()))
        }
    }
}

async fn handle_devices(state: AppState) -> Result<Response, Rejection> {
    match state.bridge.list_devices().await {
        Ok(devices) => Ok(success(devices)),
        Err(e) => Ok(failure(status_for(&e), e.to_string())),
    }
}

async fn handle_download(id: String, state: AppState) -> Result<Response, Rejection> {
    let path = match state.store.resolve(&id) {
        Ok(path) => path,
        Err(e @ AttachmentError::InvalidId(_)) => {
            return Ok(failure(StatusCode::BAD_REQUEST, e.to_string()));
        }
        Err(e @ AttachmentError::NotFound(_)) => {
            return Ok(failure(StatusCode::NOT_FOUND, e.to_string()));
        }
        Err(e) => return Ok(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let reply = warp::reply::with_header(bytes, "Content-Type", "application/octet-stream");
            let reply = warp::reply::with_header(
                reply,
                "Content-Disposition",
                format!("attachment; filename={}", id),
            );
            Ok(reply.into_response())
        }
        Err(e) => {
            error!("Failed to read attachment {}: {}", path.display(), e);
            Ok(failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn handle_health() -> Result<Response, Rejection> {
    Ok(ApiResponse::ok().into_reply(StatusCode::OK))
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let (status, msg) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "request body too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
    };
    Ok(failure(status, msg))
}
