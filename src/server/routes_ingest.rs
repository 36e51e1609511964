//! Push ingest: the request body is the live stream.
//!
//! `ffmpeg -re -i input -c copy -f mpegts -method PUT http://host/ingest/name`

use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::put,
    Router,
};
use futures::StreamExt;
use tokio::sync::mpsc;

use super::error::AppError;
use crate::ingest::InputSource;
use crate::server::AppContext;

pub fn ingest_routes() -> Router<AppContext> {
    Router::new().route("/{name}", put(ingest_stream).post(ingest_stream))
}

async fn ingest_stream(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let (tx, rx) = mpsc::channel(ctx.ingest.relay_config().channel_capacity);
    let summary = ctx
        .ingest
        .on_publish_start(&name, InputSource::Stream(rx))
        .await?;

    let mut body = body.into_data_stream();
    let mut received = 0u64;
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                received += bytes.len() as u64;
                if tx.send(bytes).await.is_err() {
                    tracing::info!(stream = %name, "Session closed while receiving input");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(stream = %name, "Publisher connection failed: {}", e);
                break;
            }
        }
    }
    drop(tx);

    tracing::info!(
        stream = %name,
        session_id = %summary.id,
        bytes = received,
        "Push ingest finished"
    );
    Ok(StatusCode::NO_CONTENT)
}
