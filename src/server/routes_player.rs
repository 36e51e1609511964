//! Minimal browser viewer for a relayed stream.

use axum::{extract::Path, response::Html, routing::get, Router};

use super::error::AppError;
use crate::error::Error;
use crate::relay::validate_stream_name;
use crate::server::AppContext;

const HLS_JS: &str = "https://cdn.jsdelivr.net/npm/hls.js@1";

pub fn player_routes() -> Router<AppContext> {
    Router::new().route("/{name}", get(player_page))
}

async fn player_page(Path(name): Path<String>) -> Result<Html<String>, AppError> {
    // Valid names are plain ASCII, safe to embed as-is.
    if validate_stream_name(&name).is_err() {
        return Err(Error::not_found("stream", name).into());
    }
    Ok(Html(render_player(&name)))
}

fn render_player(name: &str) -> String {
    let src = format!("/hls/{}/playlist.m3u8", name);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{name}</title>
</head>
<body>
<video id="video" controls muted autoplay width="640" height="360"></video>
<script src="{hls_js}"></script>
<script>
var video = document.getElementById('video');
var src = '{src}';
if (window.Hls && Hls.isSupported()) {{
    var hls = new Hls();
    hls.loadSource(src);
    hls.attachMedia(video);
    hls.on(Hls.Events.MANIFEST_PARSED, function () {{ video.play(); }});
}} else if (video.canPlayType('application/vnd.apple.mpegurl')) {{
    video.src = src;
}}
</script>
</body>
</html>
"#,
        name = name,
        hls_js = HLS_JS,
        src = src,
    )
}
