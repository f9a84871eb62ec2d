//! Latest annotated frame and gesture label, shared between the capture loop and HTTP handlers.
//!
//! Frame and label are always written and read together under one lock, so a reader never sees
//! the label of one cycle next to the frame of another. Slow readers skip cycles: every publish
//! replaces the previous snapshot.
use std::sync::{Mutex, MutexGuard, PoisonError};

use hand_pose::GestureLabel;
use image::RgbImage;

/// Contents of the gesture state at one point in time.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Annotated frame, `None` before the first publish.
    pub frame: Option<RgbImage>,
    pub label: GestureLabel,
    /// Number of publishes so far.
    pub cycle: u64,
}

#[derive(Debug, Default)]
pub struct GestureState {
    inner: Mutex<Snapshot>,
}

impl GestureState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace frame and label.
    pub fn publish(&self, frame: RgbImage, label: GestureLabel) {
        let mut snapshot = self.lock();
        snapshot.frame = Some(frame);
        snapshot.label = label;
        snapshot.cycle += 1;
    }

    /// Copy of frame and label as published together.
    pub fn read(&self) -> Snapshot {
        self.lock().clone()
    }

    pub fn read_label(&self) -> GestureLabel {
        self.lock().label
    }

    pub fn cycle(&self) -> u64 {
        self.lock().cycle
    }

    // The snapshot is replaced as a whole, a panicking holder cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
