//! Capture thread lifecycle and the handles shared with the HTTP server.
//!
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::{future, Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::{
    capture::{CaptureConfig, CaptureLoop, FrameReceiver},
    nn::LandmarkModel,
    rates::{FrameCounters, FrameRates},
    sensors::OpenCaptureFn,
    state::GestureState,
};

/// Running capture loop plus everything the endpoints need to read its output.
pub struct GestureContext {
    state: Arc<GestureState>,
    counters: Arc<FrameCounters>,
    running: Arc<AtomicBool>,
    frames_rx: FrameReceiver,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GestureContext {
    /// Open the camera on a dedicated thread and start the capture loop there.
    ///
    /// Returns once the camera is open. Failing to open it is reported as an error and no loop
    /// is left running.
    pub fn spawn(
        open_capture: OpenCaptureFn,
        model: Box<dyn LandmarkModel>,
        config: CaptureConfig,
    ) -> Result<Self> {
        let state = Arc::new(GestureState::new());
        let counters = Arc::new(FrameCounters::new());
        let running = Arc::new(AtomicBool::new(true));
        let (frames_tx, frames_rx) = watch::channel(None);
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);

        let worker = {
            let state = Arc::clone(&state);
            let counters = Arc::clone(&counters);
            let running = Arc::clone(&running);

            thread::Builder::new()
                .name("capture-loop".into())
                .spawn(move || {
                    let capture_fn = match open_capture() {
                        Ok(capture_fn) => {
                            opened_tx.send(Ok(())).ok();
                            capture_fn
                        }
                        Err(err) => {
                            opened_tx.send(Err(err)).ok();
                            return;
                        }
                    };

                    CaptureLoop::new(capture_fn, model, state, frames_tx, counters, config)
                        .run(&running);
                })?
        };

        let opened = opened_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow!("capture thread exited early")));
        if let Err(err) = opened {
            running.store(false, Ordering::Release);
            worker.join().ok();
            return Err(err.context("failed to open camera"));
        }
        log::info!("Camera opened");

        Ok(Self {
            state,
            counters,
            running,
            frames_rx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stream of multipart items, starting with the latest one if any.
    ///
    /// Slow consumers skip items, they never queue up. Every yielded item counts as streamed.
    pub fn frame_stream(&self) -> impl Stream<Item = Bytes> + Send + 'static {
        let counters = Arc::clone(&self.counters);

        WatchStream::new(self.frames_rx.clone())
            .filter_map(future::ready)
            .inspect(move |_| counters.count_streamed())
    }

    pub fn state(&self) -> &Arc<GestureState> {
        &self.state
    }

    /// Frame rates since the previous call, `elapsed` being the time passed since then.
    pub fn take_rates(&self, elapsed: Duration) -> FrameRates {
        self.counters.take_rates(elapsed)
    }

    /// Log frame rates every `period` on the tokio runtime.
    pub fn spawn_rate_logger(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let counters = Arc::clone(&self.counters);

        tokio::spawn(async move {
            let mut log_interval = tokio::time::interval(period);
            log_interval.tick().await;

            loop {
                let start = Instant::now();
                log_interval.tick().await;
                counters.take_rates(start.elapsed()).log();
            }
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self
                .lock_worker()
                .as_ref()
                .map_or(false, |worker| !worker.is_finished())
    }

    /// Signal the capture loop to stop and wait for it. Blocks for up to one cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("Capture loop panicked");
            }
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for GestureContext {
    fn drop(&mut self) {
        self.stop();
    }
}
