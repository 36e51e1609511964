use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::error::AppError;
use crate::ingest::InputSource;
use crate::server::AppContext;

pub fn stream_routes() -> Router<AppContext> {
    Router::new()
        .route("/streams", get(list_streams))
        .route("/streams/{name}", get(get_stream))
        .route("/streams/{name}/start", post(start_stream))
        .route("/streams/{name}/stop", post(stop_stream))
}

async fn list_streams(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.ingest.list())
}

async fn get_stream(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.ingest.status(&name)?))
}

#[derive(Debug, Deserialize)]
struct StartStreamRequest {
    /// Where the worker pulls the stream from, e.g. `rtmp://host/live/key`.
    input: String,
}

async fn start_stream(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    Json(req): Json<StartStreamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.input.trim().is_empty() {
        return Err(crate::Error::Validation("input must not be empty".into()).into());
    }
    let summary = ctx
        .ingest
        .on_publish_start(&name, InputSource::Locator(req.input))
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn stop_stream(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    ctx.ingest.on_publish_stop(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
