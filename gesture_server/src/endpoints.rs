//! Endpoints of HTTP server.
//!
use std::{convert::Infallible, sync::Arc};

use axum::{
    body::StreamBody,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use futures::StreamExt;
use hand_pose::protocol::{GestureMsg, HealthMsg};

use crate::{
    annotate::{encode_jpeg, stream_content_type},
    context::GestureContext,
};

const SNAPSHOT_JPEG_QUALITY: u8 = 90;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Hand Gestures</title>
</head>
<body>
  <h1>Hand Gestures</h1>
  <img src="/video_feed" alt="Video feed">
  <p>Gesture: <span id="gesture">Waiting...</span></p>
  <script>
    async function poll() {
      try {
        const resp = await fetch("/api/gesture");
        const data = await resp.json();
        document.getElementById("gesture").textContent =
          data.gesture === "No hands detected" ? "Waiting..." : data.gesture;
      } catch (err) {
        console.log(err);
      }
    }
    setInterval(poll, 500);
  </script>
</body>
</html>
"#;

/// All routes served by the gesture server.
pub fn router(context: Arc<GestureContext>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed))
        .route("/api/gesture", get(gesture))
        .route("/api/health", get(healthcheck))
        .route("/api/frame.jpg", get(frame_snapshot))
        .layer(Extension(context))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// MJPEG stream of annotated frames.
pub async fn video_feed(Extension(context): Extension<Arc<GestureContext>>) -> impl IntoResponse {
    log::info!("Video feed requested");

    let stream = context.frame_stream().map(Ok::<_, Infallible>);

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(header::CONTENT_TYPE, stream_content_type())];

    (headers, body)
}

/// Latest gesture label.
pub async fn gesture(Extension(context): Extension<Arc<GestureContext>>) -> Json<GestureMsg> {
    Json(context.state().read_label().into())
}

/// Health check endpoint.
pub async fn healthcheck() -> Json<HealthMsg> {
    Json(HealthMsg::ok())
}

/// Latest annotated frame as a single JPEG.
pub async fn frame_snapshot(Extension(context): Extension<Arc<GestureContext>>) -> Response {
    let Some(frame) = context.state().read().frame else {
        return (StatusCode::NOT_FOUND, "no frame captured yet").into_response();
    };

    let encoded =
        tokio::task::spawn_blocking(move || encode_jpeg(&frame, SNAPSHOT_JPEG_QUALITY)).await;
    match encoded {
        Ok(Ok(jpeg)) => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
        Ok(Err(err)) => {
            log::warn!("Failed to encode snapshot: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            log::error!("Snapshot task failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
