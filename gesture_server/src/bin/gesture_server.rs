//! Gesture server binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use gesture_server::{
    capture::CaptureConfig,
    context::GestureContext,
    endpoints::router,
    nn::{HandTracker, TrackerConfig, DEFAULT_MAX_HANDS, DEFAULT_MIN_CONFIDENCE},
    sensors::{get_capture_fn_linux, get_replay_capture_fn, OpenCaptureFn},
    utils::{default_model_dir, ensure_model_file, LANDMARK_MODEL_FILE_NAME, PALM_MODEL_FILE_NAME},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve the HTTP endpoints on
    #[clap(long, default_value = "127.0.0.1:5000")]
    server_address: String,

    /// Video device to capture from
    #[clap(long, default_value = "/dev/video0")]
    device: String,

    /// Pixel format requested from the video device
    #[clap(long, default_value = "MJPG")]
    format: String,

    /// Capture width, the highest supported resolution is used if not given
    #[clap(long, requires = "height")]
    width: Option<u32>,

    /// Capture height
    #[clap(long, requires = "width")]
    height: Option<u32>,

    /// Capture frames per second, the highest supported rate is used if not given
    #[clap(long)]
    fps: Option<u32>,

    /// Replay the JPEG files of this directory instead of opening the video device
    #[clap(long)]
    replay_dir: Option<PathBuf>,

    /// Directory holding palm_detection.onnx and hand_landmark.onnx [default: user cache directory]
    #[clap(long)]
    model_dir: Option<PathBuf>,

    /// URL to download the palm detection model from if the file does not exist
    #[clap(long)]
    palm_model_url: Option<String>,

    /// URL to download the hand landmark model from if the file does not exist
    #[clap(long)]
    landmark_model_url: Option<String>,

    /// Minimum palm detection score
    #[clap(long, default_value_t = DEFAULT_MIN_CONFIDENCE)]
    min_confidence: f32,

    /// Maximum number of hands tracked per frame
    #[clap(long, default_value_t = DEFAULT_MAX_HANDS)]
    max_hands: usize,

    /// Target duration of one capture cycle in milliseconds
    #[clap(long, default_value_t = 33)]
    cycle_interval_ms: u64,

    /// Pause after a failed capture cycle in milliseconds
    #[clap(long, default_value_t = 100)]
    retry_backoff_ms: u64,

    /// Quality of the streamed JPEG frames
    #[clap(long, default_value_t = 80)]
    jpeg_quality: u8,
}

impl Args {
    fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            cycle_interval: Duration::from_millis(self.cycle_interval_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            jpeg_quality: self.jpeg_quality,
        }
    }

    fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            min_confidence: self.min_confidence,
            max_hands: self.max_hands,
        }
    }

    fn open_capture_fn(&self) -> OpenCaptureFn {
        if let Some(dir) = self.replay_dir.clone() {
            log::info!("Replaying frames from {}", dir.display());
            return Box::new(move || get_replay_capture_fn(dir));
        }

        let device = self.device.clone();
        let format = self.format.clone();
        let resolution = self.width.zip(self.height);
        let frame_rate = self.fps.map(|fps| (1, fps));

        Box::new(move || get_capture_fn_linux(&device, &format, resolution, frame_rate))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let model_dir = args.model_dir.clone().unwrap_or_else(default_model_dir);
    let palm_model_path = model_dir.join(PALM_MODEL_FILE_NAME);
    let landmark_model_path = model_dir.join(LANDMARK_MODEL_FILE_NAME);
    ensure_model_file(&palm_model_path, args.palm_model_url.as_deref()).await?;
    ensure_model_file(&landmark_model_path, args.landmark_model_url.as_deref()).await?;
    let model = HandTracker::load(&palm_model_path, &landmark_model_path, args.tracker_config())?;

    // Camera and model live on the capture thread from here on
    let open_capture = args.open_capture_fn();
    let config = args.capture_config();
    let context = tokio::task::spawn_blocking(move || {
        GestureContext::spawn(open_capture, Box::new(model), config)
    })
    .await??;
    let context = Arc::new(context);

    context.spawn_rate_logger(Duration::from_secs(2));

    // Stopping the capture loop ends open video feeds, so the server can drain
    let shutdown = {
        let context = Arc::clone(&context);
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {err}");
            }
            log::info!("Shutting down");
            tokio::task::spawn_blocking(move || context.stop()).await.ok();
        }
    };

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(context).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
