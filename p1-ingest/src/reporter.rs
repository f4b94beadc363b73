//! Read-only HTTP access to the record store.
//!
//! - `GET /records?from=&to=&fields=` streams matching records as NDJSON,
//!   ordered by timestamp then id. Absent registers are `null`.
//! - `GET /records/latest` and `GET /records/{id}` return one record as JSON.
//! - `GET /health` answers `ok`.

use std::net::SocketAddr;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    BoxError, Json, Router,
};
use futures::StreamExt;
use meter_store::{FieldFilter, Record, RecordStore, StoreError};
use serde::Deserialize;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ApiError::NotFound(format!("record {id} not found")),
            StoreError::Validation(e) => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "reporter store access failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<i64>,
    pub to: Option<i64>,
    /// Comma separated column names; omitted means every column.
    pub fields: Option<String>,
}

pub fn router(store: RecordStore) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/records", get(list_records))
        .route("/records/latest", get(latest_record))
        .route("/records/:id", get(get_record))
        .with_state(store)
}

/// Bind `bind_addr` and serve `app` on a background task.
pub async fn serve(bind_addr: &str, app: Router) -> anyhow::Result<JoinHandle<()>> {
    let addr: SocketAddr = bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid http.bind_addr '{bind_addr}': {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "reporter listening");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!(error = %e, "reporter server error");
        }
    }))
}

async fn health() -> &'static str {
    "ok"
}

async fn list_records(
    State(store): State<RecordStore>,
    Query(params): Query<RangeParams>,
) -> Result<Response, ApiError> {
    metrics::counter!("reporter_requests_total", "route" => "records").increment(1);

    let filter = match params.fields.as_deref() {
        Some(fields) => fields
            .parse::<FieldFilter>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => FieldFilter::all(),
    };
    let from = params.from.unwrap_or(i64::MIN);
    let to = params.to.unwrap_or(i64::MAX);

    let lines = store
        .range_query(from, to, filter)
        .map(|item| -> Result<Bytes, BoxError> {
            let record = item?;
            let mut line = serde_json::to_vec(&record)?;
            line.push(b'\n');
            Ok(Bytes::from(line))
        });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

async fn latest_record(State(store): State<RecordStore>) -> Result<Json<Record>, ApiError> {
    metrics::counter!("reporter_requests_total", "route" => "latest").increment(1);

    store
        .latest()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no records stored".to_string()))
}

async fn get_record(State(store): State<RecordStore>, Path(id): Path<i64>) -> Result<Json<Record>, ApiError> {
    metrics::counter!("reporter_requests_total", "route" => "record").increment(1);

    Ok(Json(store.get(id).await?))
}
