//! The capture loop.
//!
//! One cycle captures a frame, mirrors it, detects hands, draws skeletons and the gesture label,
//! encodes it, publishes frame and label to the [`GestureState`] and emits the JPEG to the
//! stream channel. The loop runs on a dedicated thread since detection blocks for most of a
//! cycle and neither camera nor model may be used concurrently.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use hand_pose::{GestureLabel, LandmarkSet};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    annotate::{as_jpeg_stream_item, draw_hand, draw_label, encode_jpeg},
    nn::LandmarkModel,
    rates::FrameCounters,
    sensors::{CaptureError, CaptureFn},
    state::GestureState,
};

/// Sender of encoded multipart items. Holds only the latest item.
pub type FrameSender = watch::Sender<Option<Bytes>>;
pub type FrameReceiver = watch::Receiver<Option<Bytes>>;

#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Target duration of one cycle, caps the frame rate.
    pub cycle_interval: Duration,
    /// Pause after a failed cycle before trying again.
    pub retry_backoff: Duration,
    pub jpeg_quality: u8,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(33),
            retry_backoff: Duration::from_millis(100),
            jpeg_quality: 80,
        }
    }
}

/// Failure of a single cycle. The cycle is skipped and the loop carries on after a backoff.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to capture frame: {0}")]
    Capture(#[from] CaptureError),
    #[error("hand detection failed: {0:#}")]
    Detect(anyhow::Error),
    #[error("failed to encode frame: {0:#}")]
    Encode(anyhow::Error),
}

pub struct CaptureLoop {
    capture_fn: CaptureFn,
    model: Box<dyn LandmarkModel>,
    state: Arc<GestureState>,
    frames_tx: FrameSender,
    counters: Arc<FrameCounters>,
    config: CaptureConfig,
}

impl CaptureLoop {
    pub fn new(
        capture_fn: CaptureFn,
        model: Box<dyn LandmarkModel>,
        state: Arc<GestureState>,
        frames_tx: FrameSender,
        counters: Arc<FrameCounters>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            capture_fn,
            model,
            state,
            frames_tx,
            counters,
            config,
        }
    }

    /// Run one cycle and return the published label.
    pub fn step(&mut self) -> Result<GestureLabel, CycleError> {
        let frame = (self.capture_fn)()?;
        let frame = image::imageops::flip_horizontal(&frame);

        let hands = self.model.detect(&frame).map_err(CycleError::Detect)?;
        let (frame, label) = annotate(frame, &hands);

        // Encode first so a failed cycle leaves state and stream untouched
        let jpeg = encode_jpeg(&frame, self.config.jpeg_quality).map_err(CycleError::Encode)?;

        self.state.publish(frame, label);
        self.frames_tx.send_replace(Some(as_jpeg_stream_item(&jpeg)));
        self.counters.count_processed();

        Ok(label)
    }

    /// Run cycles until `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) {
        log::info!("Capture loop started");

        while running.load(Ordering::Acquire) {
            let start = Instant::now();

            match self.step() {
                Ok(label) => {
                    log::trace!("Published gesture {label}");
                    thread::sleep(self.config.cycle_interval.saturating_sub(start.elapsed()));
                }
                Err(err @ CycleError::Capture(_)) => {
                    log::debug!("{err}, retrying");
                    thread::sleep(self.config.retry_backoff);
                }
                Err(err @ (CycleError::Detect(_) | CycleError::Encode(_))) => {
                    log::warn!("Skipping cycle: {err}");
                    thread::sleep(self.config.retry_backoff);
                }
            }
        }

        log::info!("Capture loop stopped");
    }
}

/// Draw all hands and the resulting label onto the frame.
fn annotate(frame: RgbImage, hands: &[LandmarkSet]) -> (RgbImage, GestureLabel) {
    let frame = hands.iter().fold(frame, draw_hand);
    let label = GestureLabel::from_hands(hands);

    (draw_label(frame, &label), label)
}
