use std::{
    net::{SocketAddr, TcpListener},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use gesture_server::{
    capture::CaptureConfig,
    context::GestureContext,
    endpoints::router,
    nn::LandmarkModel,
    sensors::{get_capture_fn_linux, get_scripted_capture_fn, CaptureError, CaptureFn, OpenCaptureFn},
};
use hand_pose::{
    landmarks::{
        INDEX_MCP, INDEX_TIP, MIDDLE_MCP, MIDDLE_TIP, PINKY_MCP, PINKY_TIP, RING_MCP, RING_TIP,
        THUMB_IP, THUMB_TIP,
    },
    Landmark, LandmarkSet, NUM_LANDMARKS,
};
use image::RgbImage;
use reqwest::{header::CONTENT_TYPE, StatusCode};
use serde_json::{json, Value};

/// Sees a peace sign in every frame.
struct PeaceModel;

impl LandmarkModel for PeaceModel {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<LandmarkSet>> {
        let mut points = [Landmark::new(0.5, 0.5); NUM_LANDMARKS];
        points[THUMB_IP] = Landmark::new(0.4, 0.6);
        points[THUMB_TIP] = Landmark::new(0.45, 0.6);
        points[INDEX_MCP] = Landmark::new(0.5, 0.5);
        points[INDEX_TIP] = Landmark::new(0.5, 0.2);
        for (tip, mcp) in [
            (MIDDLE_TIP, MIDDLE_MCP),
            (RING_TIP, RING_MCP),
            (PINKY_TIP, PINKY_MCP),
        ] {
            points[mcp] = Landmark::new(0.55, 0.5);
            points[tip] = Landmark::new(0.55, 0.7);
        }

        Ok(vec![LandmarkSet::new(points)])
    }
}

fn open_blank_camera() -> OpenCaptureFn {
    Box::new(|| -> Result<CaptureFn> {
        Ok(Box::new(|| -> Result<RgbImage, CaptureError> {
            Ok(RgbImage::new(64, 48))
        }))
    })
}

fn open_dead_camera() -> OpenCaptureFn {
    Box::new(|| -> Result<CaptureFn> { Ok(get_scripted_capture_fn(vec![])) })
}

fn spawn_context(open_capture: OpenCaptureFn) -> Result<Arc<GestureContext>> {
    let config = CaptureConfig {
        cycle_interval: Duration::from_millis(5),
        retry_backoff: Duration::from_millis(5),
        ..Default::default()
    };
    let context = GestureContext::spawn(open_capture, Box::new(PeaceModel), config)?;

    Ok(Arc::new(context))
}

/// Serve all routes on a free local port.
fn serve(context: Arc<GestureContext>) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let server = axum::Server::from_tcp(listener)?.serve(router(context).into_make_service());
    tokio::spawn(server);

    Ok(addr)
}

/// Stop the capture loop off the async runtime, joining it blocks.
async fn stop(context: &Arc<GestureContext>) -> Result<()> {
    let context = Arc::clone(context);
    tokio::task::spawn_blocking(move || context.stop()).await?;

    Ok(())
}

async fn wait_for_cycle(context: &GestureContext) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while context.state().cycle() == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let context = spawn_context(open_dead_camera())?;
    let addr = serve(Arc::clone(&context))?;

    let resp = reqwest::get(format!("http://{addr}/api/health")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.json::<Value>().await?, json!({ "status": "ok" }));

    stop(&context).await?;
    Ok(())
}

#[tokio::test]
async fn test_gesture_before_and_after_detection() -> Result<()> {
    let context = spawn_context(open_dead_camera())?;
    let addr = serve(Arc::clone(&context))?;

    // No cycle ever succeeds
    let resp = reqwest::get(format!("http://{addr}/api/gesture")).await?;
    assert_eq!(
        resp.json::<Value>().await?,
        json!({ "gesture": "No hands detected" })
    );
    stop(&context).await?;

    let context = spawn_context(open_blank_camera())?;
    let addr = serve(Arc::clone(&context))?;
    wait_for_cycle(&context).await;

    let resp = reqwest::get(format!("http://{addr}/api/gesture")).await?;
    assert_eq!(resp.json::<Value>().await?, json!({ "gesture": "Peace" }));

    stop(&context).await?;
    Ok(())
}

#[tokio::test]
async fn test_snapshot() -> Result<()> {
    let context = spawn_context(open_dead_camera())?;
    let addr = serve(Arc::clone(&context))?;

    let resp = reqwest::get(format!("http://{addr}/api/frame.jpg")).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    stop(&context).await?;

    let context = spawn_context(open_blank_camera())?;
    let addr = serve(Arc::clone(&context))?;
    wait_for_cycle(&context).await;

    let resp = reqwest::get(format!("http://{addr}/api/frame.jpg")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[CONTENT_TYPE], "image/jpeg");

    let frame = image::load_from_memory(&resp.bytes().await?)?;
    assert_eq!((frame.width(), frame.height()), (64, 48));

    stop(&context).await?;
    Ok(())
}

#[tokio::test]
async fn test_video_feed() -> Result<()> {
    let context = spawn_context(open_blank_camera())?;
    let addr = serve(Arc::clone(&context))?;

    let mut resp = reqwest::get(format!("http://{addr}/video_feed")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    let mut received = vec![];
    while received.len() < header.len() {
        let chunk = tokio::time::timeout(Duration::from_secs(5), resp.chunk())
            .await??
            .expect("stream ended early");
        received.extend_from_slice(&chunk);
    }
    assert!(received.starts_with(header));

    // Feeds end once the capture loop stops
    stop(&context).await?;
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while resp.chunk().await?.is_some() {}
        Ok::<_, reqwest::Error>(())
    })
    .await;
    assert!(matches!(drained, Ok(Ok(()))));

    Ok(())
}

#[tokio::test]
async fn test_index_page() -> Result<()> {
    let context = spawn_context(open_dead_camera())?;
    let addr = serve(Arc::clone(&context))?;

    let resp = reqwest::get(format!("http://{addr}/")).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let page = resp.text().await?;
    assert!(page.contains(r#"src="/video_feed""#));
    assert!(page.contains("/api/gesture"));

    stop(&context).await?;
    Ok(())
}

#[test]
fn test_missing_camera_is_fatal() {
    let open_capture: OpenCaptureFn = Box::new(|| {
        get_capture_fn_linux("/dev/no-such-camera", "MJPG", Some((640, 480)), Some((1, 30)))
    });
    let config = CaptureConfig::default();

    assert!(GestureContext::spawn(open_capture, Box::new(PeaceModel), config).is_err());
}
