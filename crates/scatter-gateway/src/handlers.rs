//! Gateway request handlers.
//!
//! Uploads stream the request body straight into the engine and downloads
//! stream the engine's ordered chunk stream straight into the response, so
//! neither side ever holds a whole file in memory.

use std::io;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use futures::{StreamExt, TryStreamExt};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use scatter_codec::encode_share;
use scatter_engine::{
    SettingsSnapshot, SettingsUpdate, TaskKind, TaskRemoval, TaskSnapshot, TransferTask, resolve,
};
use scatter_types::ShareDescriptor;
use serde::{Deserialize, Serialize};
use tokio_util::io::StreamReader;
use tracing::{debug, info, instrument, warn};

use crate::AppState;
use crate::error::GatewayError;
use crate::history::HistoryEntry;
use crate::range::{RangeRequest, content_range, parse_range};

/// Cancels its task if dropped before the task finished.
///
/// Axum drops a handler future (or a response body) when the client goes
/// away, which is the only signal of a disconnect the handler gets.
struct CancelOnDrop(Arc<TransferTask>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if !self.0.is_finished() {
            debug!(task = self.0.id(), "client went away, cancelling transfer");
            self.0.cancel();
        }
    }
}

fn decode_code(code: Option<String>) -> Result<ShareDescriptor, GatewayError> {
    let code = code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("missing share code".into()))?;
    Ok(resolve(&code)?)
}

// -----------------------------------------------------------------------
// PUT /api/upload
// -----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct UploadParams {
    name: Option<String>,
    add: Option<String>,
}

/// Upload the request body and answer with its share code.
#[instrument(skip_all)]
pub(crate) async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<String, GatewayError> {
    let name = params
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("file name required".into()))?;
    let record = params
        .add
        .as_deref()
        .is_none_or(|a| a.eq_ignore_ascii_case("true"));

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if size == 0 {
        return Err(GatewayError::InvalidRequest(
            "content length must be positive".into(),
        ));
    }

    let task = state.engine.tasks().create(TaskKind::Upload, &name, size);
    let _guard = CancelOnDrop(task.clone());

    let source = StreamReader::new(body.into_data_stream().map_err(io::Error::other));
    let descriptor = state
        .engine
        .uploads()
        .upload(source, &name, size, &task)
        .await?;

    let code = encode_share(&descriptor, state.compact_codes);
    task.complete(Some(code.clone()));
    info!(file = %name, size, url = %descriptor.url, "upload_complete");

    if record {
        let entry = HistoryEntry {
            share_info_data: code.clone(),
            name,
            size,
        };
        if let Err(e) = state.history.add(entry).await {
            warn!(error = %e, "failed to save upload history");
        }
    }

    Ok(code)
}

// -----------------------------------------------------------------------
// GET /api/download, GET /api/download/{name}
// -----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct ShareParams {
    s: Option<String>,
}

pub(crate) async fn download(
    State(state): State<AppState>,
    Query(params): Query<ShareParams>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    serve_download(state, params, headers).await
}

/// The name segment only gives players a file name to show; the share code
/// decides what is served.
pub(crate) async fn download_named(
    State(state): State<AppState>,
    Path(_name): Path<String>,
    Query(params): Query<ShareParams>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    serve_download(state, params, headers).await
}

#[instrument(skip_all)]
async fn serve_download(
    state: AppState,
    params: ShareParams,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let descriptor = decode_code(params.s)?;
    let size = descriptor.file_size;

    let requested = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map_or(RangeRequest::Full, |h| parse_range(h, size));
    let range = match requested {
        RangeRequest::Full => None,
        RangeRequest::Partial(range) => Some(range),
        RangeRequest::Unsatisfiable => return Err(GatewayError::RangeNotSatisfiable { size }),
    };
    let len = range.map_or(size, |r| r.len());

    let task = state
        .engine
        .tasks()
        .create(TaskKind::Download, &descriptor.file_name, len);
    let guard = CancelOnDrop(task.clone());
    let stream = state.engine.downloads().open(&descriptor, range, task).await?;

    info!(
        file = %descriptor.file_name,
        size,
        start = stream.range().start,
        end = stream.range().end,
        "download_started"
    );

    // The guard lives as long as the body, so a client that hangs up
    // mid-transfer cancels the task.
    let body = Body::from_stream(stream.map(move |piece| {
        let _alive = &guard;
        piece
    }));

    let mime = mime_guess::from_path(&descriptor.file_name)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, mime)
        .header(header::CONTENT_LENGTH, len)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&descriptor.file_name),
        );
    builder = match range {
        Some(range) => builder
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, content_range(range, size)),
        None => builder.status(StatusCode::OK),
    };

    builder
        .body(body)
        .map_err(|e| GatewayError::Internal(e.to_string()))
}

/// `inline` disposition carrying the UTF-8 file name (RFC 6266).
fn content_disposition(file_name: &str) -> HeaderValue {
    let encoded = utf8_percent_encode(file_name, NON_ALPHANUMERIC);
    HeaderValue::from_str(&format!("inline; filename*=UTF-8''{encoded}"))
        .unwrap_or_else(|_| HeaderValue::from_static("inline"))
}

// -----------------------------------------------------------------------
// GET /api/file_info
// -----------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct FileInfo {
    name: String,
    size: u64,
}

pub(crate) async fn file_info(
    Query(params): Query<ShareParams>,
) -> Result<Json<FileInfo>, GatewayError> {
    let descriptor = decode_code(params.s)?;
    Ok(Json(FileInfo {
        name: descriptor.file_name,
        size: descriptor.file_size,
    }))
}

// -----------------------------------------------------------------------
// GET /api/upload_history
// -----------------------------------------------------------------------

/// Share codes carry their keys, so web pages on other origins must not
/// be able to read them.
pub(crate) async fn upload_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<HistoryEntry>>, GatewayError> {
    if headers.contains_key(header::ORIGIN) {
        return Err(GatewayError::CrossOrigin);
    }
    Ok(Json(state.history.list()))
}

// -----------------------------------------------------------------------
// Tasks
// -----------------------------------------------------------------------

pub(crate) async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskSnapshot>> {
    Json(state.engine.tasks().list())
}

#[derive(Debug, Serialize)]
pub(crate) struct RemoveTaskResponse {
    id: u64,
    result: &'static str,
}

/// Cancel a running task, or forget a finished one.
pub(crate) async fn remove_task(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<RemoveTaskResponse>, GatewayError> {
    let removal = state
        .engine
        .tasks()
        .cancel_or_remove(id)
        .ok_or(GatewayError::NoSuchTask(id))?;
    let result = match removal {
        TaskRemoval::Cancelled => "cancelled",
        TaskRemoval::Removed => "removed",
    };
    info!(task = id, result, "task_removed");
    Ok(Json(RemoveTaskResponse { id, result }))
}

// -----------------------------------------------------------------------
// Settings
// -----------------------------------------------------------------------

pub(crate) async fn get_settings(State(state): State<AppState>) -> Json<SettingsSnapshot> {
    Json(state.engine.settings().snapshot())
}

pub(crate) async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Json<SettingsSnapshot> {
    let settings = state.engine.settings();
    settings.apply(&update);
    info!(?update, "settings_updated");
    Json(settings.snapshot())
}
