//! API integration tests
//!
//! Exercises the router in-process with `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use http_body_util::BodyExt;
use tower::ServiceExt;

use common::{FakeLauncher, TestHarness};
use liveforged::server::{create_router, AppContext};

fn app(h: &TestHarness) -> axum::Router {
    create_router(AppContext::new(h.config.clone(), h.ingest.clone()))
}

/// Helper to get response body as string
async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));

    let response = app(&h)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_list_streams_empty() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));

    let response = app(&h)
        .oneshot(Request::get("/api/streams").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_string(response.into_body()).await, "[]");
}

#[tokio::test]
async fn test_start_without_body_is_rejected() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));

    let response = app(&h)
        .oneshot(
            Request::post("/api/streams/cam1/start")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
    assert!(h.ingest.list().is_empty());
}

#[tokio::test]
async fn test_launch_failure_is_reported() {
    // No scripted workers: every launch fails.
    let h = TestHarness::new(FakeLauncher::new(vec![]));

    let response = app(&h)
        .oneshot(
            Request::post("/api/streams/cam1/start")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"input":"rtmp://localhost/live/key"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let summary = h.wait_terminated("cam1").await;
    assert!(summary
        .last_error
        .unwrap()
        .contains("no scripted worker left"));

    let response = app(&h)
        .oneshot(Request::get("/api/streams/cam1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_string(response.into_body()).await;
    assert!(body.contains(r#""state":"failed""#));
}

#[tokio::test]
async fn test_segment_name_outside_relay_output() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));
    std::fs::create_dir_all(h.stream_dir("cam1")).unwrap();
    std::fs::write(h.stream_dir("cam1").join("secret.txt"), "x").unwrap();

    let response = app(&h)
        .oneshot(
            Request::get("/hls/cam1/secret.txt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_to_string(response.into_body()).await;
    assert!(body.contains("not_found"));
}

#[tokio::test]
async fn test_recent_events_limit() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));
    for _ in 0..5 {
        h.events
            .broadcast(liveforged::events::EventPayload::SegmentsEvicted {
                stream: "cam1".into(),
                sequences: vec![1],
            });
    }

    let response = app(&h)
        .oneshot(
            Request::get("/api/events/recent?limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let events: serde_json::Value =
        serde_json::from_str(&body_to_string(response.into_body()).await).unwrap();
    assert_eq!(events.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_player_page() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));

    let response = app(&h)
        .oneshot(Request::get("/player/cam1").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/html"));
    let body = body_to_string(response.into_body()).await;
    assert!(body.contains("/hls/cam1/playlist.m3u8"));
    assert!(body.contains("hls.js"));
}

#[tokio::test]
async fn test_player_rejects_invalid_name() {
    let h = TestHarness::new(FakeLauncher::new(vec![]));

    let response = app(&h)
        .oneshot(Request::get("/player/.hidden").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
