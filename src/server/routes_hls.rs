use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use liveforged_media::hls::CONTENT_TYPE as PLAYLIST_CONTENT_TYPE;
use tokio_util::io::ReaderStream;

use super::error::AppError;
use crate::error::Error;
use crate::relay::validate_stream_name;
use crate::segment::{parse_segment_file_name, PLAYLIST_FILE};
use crate::server::AppContext;

const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

pub fn hls_routes() -> Router<AppContext> {
    Router::new()
        .route("/{name}/playlist.m3u8", get(get_playlist))
        .route("/{name}/{segment}", get(get_segment))
}

async fn get_playlist(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    serve(&ctx, &name, PLAYLIST_FILE, PLAYLIST_CONTENT_TYPE, "no-cache").await
}

async fn get_segment(
    State(ctx): State<AppContext>,
    Path((name, segment)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if parse_segment_file_name(&segment).is_none() {
        return Err(Error::not_found("segment", segment).into());
    }
    serve(
        &ctx,
        &name,
        &segment,
        SEGMENT_CONTENT_TYPE,
        "public, max-age=60",
    )
    .await
}

async fn serve(
    ctx: &AppContext,
    stream: &str,
    file: &str,
    content_type: &'static str,
    cache_control: &'static str,
) -> Result<Response, AppError> {
    if validate_stream_name(stream).is_err() {
        return Err(Error::not_found("stream", stream).into());
    }

    let reader = ctx
        .ingest
        .storage()
        .open(stream, file)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("file", format!("{}/{}", stream, file)),
            _ => Error::from(e),
        })?;

    let body = Body::from_stream(ReaderStream::with_capacity(reader, 64 * 1024));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
        body,
    )
        .into_response())
}
