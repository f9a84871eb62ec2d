//! Hand landmark detection.
//!
//! The capture loop only relies on the [`LandmarkModel`] trait. [`HandTracker`] implements it with
//! two MediaPipe-style networks exported to ONNX and run with `tract`: a palm detector finds the
//! hands, then the landmark network runs on a crop around each of them.
use std::path::Path;

use anyhow::{bail, Result};
use hand_pose::{Landmark, LandmarkSet, NUM_LANDMARKS};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::palm::{HandRegion, Palm, PalmDetector};

pub(crate) type NnModel =
    SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Side length of the square landmark network input.
pub const LANDMARK_INPUT_SIZE: u32 = 224;

/// Minimum palm score, matching the usual MediaPipe detection confidence.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;
pub const DEFAULT_MAX_HANDS: usize = 5;
/// Minimum hand presence score of a landmark crop.
const MIN_PRESENCE: f32 = 0.5;

/// Detect zero or more hands in a frame.
pub trait LandmarkModel: Send {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<LandmarkSet>>;
}

/// First stage: find palms in a full frame.
pub trait PalmModel: Send {
    fn detect_palms(&self, frame: &RgbImage, max_palms: usize) -> Result<Vec<Palm>>;
}

/// Second stage: landmarks of the hand in a square crop, normalized to the crop.
pub trait CropLandmarkModel: Send {
    fn crop_size(&self) -> u32;
    fn landmarks(&self, crop: &RgbImage) -> Result<Option<LandmarkSet>>;
}

/// Load an ONNX network taking one NHWC image of `input_size` x `input_size`.
pub(crate) fn load_model(model_path: &Path, input_size: u32) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, input_size as usize, input_size as usize, 3),
    );

    let model = tract_onnx::onnx()
        .model_for_path(model_path)?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

impl PalmModel for PalmDetector {
    fn detect_palms(&self, frame: &RgbImage, max_palms: usize) -> Result<Vec<Palm>> {
        self.detect(frame, max_palms)
    }
}

/// Hand landmark network.
///
/// Its first output holds 21 `(x, y, z)` triples in input pixels, its second output the hand
/// presence score.
pub struct HandLandmarkModel {
    model: NnModel,
}

impl HandLandmarkModel {
    pub fn new(model_path: impl AsRef<Path>) -> Result<Self> {
        let model_path = model_path.as_ref();
        log::info!("Loading hand landmark model from {}", model_path.display());

        Ok(Self {
            model: load_model(model_path, LANDMARK_INPUT_SIZE)?,
        })
    }

    fn preproc(&self, crop: &RgbImage) -> Tensor {
        tract_ndarray::Array4::from_shape_fn(
            (1, LANDMARK_INPUT_SIZE as usize, LANDMARK_INPUT_SIZE as usize, 3),
            |(_, y, x, c)| crop[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }
}

impl CropLandmarkModel for HandLandmarkModel {
    fn crop_size(&self) -> u32 {
        LANDMARK_INPUT_SIZE
    }

    fn landmarks(&self, crop: &RgbImage) -> Result<Option<LandmarkSet>> {
        let outputs = self.model.run(tvec!(self.preproc(crop).into()))?;
        if outputs.len() < 2 {
            bail!("expected landmark and presence outputs, got {}", outputs.len());
        }

        let presence = outputs[1]
            .to_array_view::<f32>()?
            .iter()
            .next()
            .cloned()
            .unwrap_or(0.0);
        // NaN presence counts as absent
        if !(presence >= MIN_PRESENCE) {
            log::trace!("Hand presence {presence:.2} below threshold");
            return Ok(None);
        }

        let raw: Vec<f32> = outputs[0].to_array_view::<f32>()?.iter().cloned().collect();
        parse_landmarks(&raw, LANDMARK_INPUT_SIZE as f32).map(Some)
    }
}

/// Turn `(x, y, z)` triples in pixels of a square input into a normalized landmark set.
///
/// Fails on short output and on any non-finite value.
pub fn parse_landmarks(raw: &[f32], input_size: f32) -> Result<LandmarkSet> {
    if raw.len() < NUM_LANDMARKS * 3 {
        bail!(
            "expected {} landmark values, got {}",
            NUM_LANDMARKS * 3,
            raw.len()
        );
    }

    let mut points = [Landmark::default(); NUM_LANDMARKS];
    for (point, xyz) in points.iter_mut().zip(raw.chunks_exact(3)) {
        *point = Landmark {
            x: xyz[0] / input_size,
            y: xyz[1] / input_size,
            z: xyz[2] / input_size,
        };
    }

    let landmarks = LandmarkSet::new(points);
    if !landmarks.is_finite() {
        bail!("landmark output contains non-finite values");
    }

    Ok(landmarks)
}

/// Map landmarks normalized to a hand region onto the normalized frame.
fn map_to_frame(
    landmarks: &LandmarkSet,
    region: &HandRegion,
    width: u32,
    height: u32,
) -> LandmarkSet {
    let (width, height) = (width as f32, height as f32);

    LandmarkSet::new(landmarks.points().map(|point| {
        let (x, y) = region.to_frame(point.x, point.y);
        Landmark {
            x: x / width,
            y: y / height,
            z: point.z * region.side / width,
        }
    }))
}

/// Limits of the two-stage tracker.
#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    pub min_confidence: f32,
    pub max_hands: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            max_hands: DEFAULT_MAX_HANDS,
        }
    }
}

/// Palm detection followed by landmark detection on each hand region.
pub struct HandTracker<P = PalmDetector, L = HandLandmarkModel> {
    palms: P,
    landmarks: L,
    max_hands: usize,
}

impl HandTracker {
    /// Load both networks from disk.
    pub fn load(
        palm_model_path: impl AsRef<Path>,
        landmark_model_path: impl AsRef<Path>,
        config: TrackerConfig,
    ) -> Result<Self> {
        let palms = PalmDetector::new(palm_model_path, config.min_confidence)?;
        let landmarks = HandLandmarkModel::new(landmark_model_path)?;

        Ok(Self::new(palms, landmarks, config.max_hands))
    }
}

impl<P: PalmModel, L: CropLandmarkModel> HandTracker<P, L> {
    pub fn new(palms: P, landmarks: L, max_hands: usize) -> Self {
        Self {
            palms,
            landmarks,
            max_hands,
        }
    }
}

impl<P: PalmModel, L: CropLandmarkModel> LandmarkModel for HandTracker<P, L> {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<LandmarkSet>> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 || self.max_hands == 0 {
            return Ok(vec![]);
        }

        let palms = self.palms.detect_palms(frame, self.max_hands)?;
        log::trace!("Found {} palms", palms.len());

        let mut hands = Vec::with_capacity(palms.len());
        for palm in palms.iter().take(self.max_hands) {
            let region = HandRegion::from_palm(palm);
            let crop = region.crop(frame, self.landmarks.crop_size());
            if let Some(landmarks) = self.landmarks.landmarks(&crop)? {
                hands.push(map_to_frame(&landmarks, &region, width, height));
            }
        }

        Ok(hands)
    }
}
