//! Palm detection, the first stage of hand tracking.
//!
//! A single-shot detector looks for palms on a letterboxed 192x192 copy of the frame. Every palm
//! is widened into a square [`HandRegion`] around the whole hand, which is what the landmark
//! network gets to see.
use std::{cmp::Ordering, path::Path};

use anyhow::{bail, Result};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::nn::{load_model, NnModel};

/// Side length of the square detector input.
pub const PALM_INPUT_SIZE: u32 = 192;
pub const DEFAULT_MAX_IOU: f32 = 0.3;

const NUM_KEYPOINTS: usize = 7;
/// Box center and size followed by the keypoints, all relative to the anchor.
const REGRESSOR_LEN: usize = 4 + 2 * NUM_KEYPOINTS;
const WRIST_KEYPOINT: usize = 0;
const MIDDLE_MCP_KEYPOINT: usize = 2;

/// Side of a hand region relative to the palm box.
const REGION_SCALE: f32 = 2.6;
/// Shift of a hand region from the palm towards the fingers, relative to the palm box.
const REGION_SHIFT: f32 = 0.5;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Center of one detector anchor, normalized to the input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

/// Anchors of the palm detector in output order.
///
/// One 8 pixel stride layer with 2 anchors per cell and the merged 16 pixel stride layers with 6
/// anchors per cell, 2016 anchors for a 192x192 input.
pub fn palm_anchors(input_size: u32) -> Vec<Anchor> {
    const LAYERS: [(u32, usize); 2] = [(8, 2), (16, 6)];

    let mut anchors = vec![];
    for (stride, per_cell) in LAYERS {
        let grid = (input_size + stride - 1) / stride;
        for y in 0..grid {
            for x in 0..grid {
                let anchor = Anchor {
                    x: (x as f32 + 0.5) / grid as f32,
                    y: (y as f32 + 0.5) / grid as f32,
                };
                anchors.extend(std::iter::repeat(anchor).take(per_cell));
            }
        }
    }

    anchors
}

/// Aspect preserving fit of a frame into the square detector input, padded with black.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    size: u32,
    scaled: (u32, u32),
    scale: f32,
    pad: (u32, u32),
}

impl Letterbox {
    pub fn new(width: u32, height: u32, size: u32) -> Self {
        let scale = size as f32 / width.max(height).max(1) as f32;
        let scaled = (
            ((width as f32 * scale).round() as u32).clamp(1, size),
            ((height as f32 * scale).round() as u32).clamp(1, size),
        );
        let pad = ((size - scaled.0) / 2, (size - scaled.1) / 2);

        Self {
            size,
            scaled,
            scale,
            pad,
        }
    }

    pub fn apply(&self, frame: &RgbImage) -> RgbImage {
        let resized = image::imageops::resize(
            frame,
            self.scaled.0,
            self.scaled.1,
            image::imageops::FilterType::Triangle,
        );
        let mut input = RgbImage::new(self.size, self.size);
        image::imageops::overlay(&mut input, &resized, self.pad.0 as i64, self.pad.1 as i64);

        input
    }

    /// Map a point normalized to the detector input back to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let size = self.size as f32;
        (
            (x * size - self.pad.0 as f32) / self.scale,
            (y * size - self.pad.1 as f32) / self.scale,
        )
    }
}

/// One detected palm in frame pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct Palm {
    pub score: f32,
    /// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`
    pub bbox: [f32; 4],
    /// Wrist first, middle finger knuckle third.
    pub keypoints: [(f32, f32); NUM_KEYPOINTS],
}

/// Turn raw detector outputs into palms scoring at least `min_score`.
pub fn decode_palms(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[Anchor],
    letterbox: &Letterbox,
    min_score: f32,
) -> Result<Vec<Palm>> {
    if regressors.len() != anchors.len() * REGRESSOR_LEN || scores.len() != anchors.len() {
        bail!(
            "expected {} anchors, got {} regressor and {} score values",
            anchors.len(),
            regressors.len(),
            scores.len()
        );
    }
    let size = PALM_INPUT_SIZE as f32;

    let palms = regressors
        .chunks_exact(REGRESSOR_LEN)
        .zip(scores)
        .zip(anchors)
        .filter_map(|((raw, logit), anchor)| {
            let score = sigmoid(*logit);
            // NaN scores fail this as well
            if !(score >= min_score) {
                return None;
            }

            let center = (raw[0] / size + anchor.x, raw[1] / size + anchor.y);
            let half = (raw[2] / size / 2.0, raw[3] / size / 2.0);
            let top_left = letterbox.to_frame(center.0 - half.0, center.1 - half.1);
            let bottom_right = letterbox.to_frame(center.0 + half.0, center.1 + half.1);

            let mut keypoints = [(0.0, 0.0); NUM_KEYPOINTS];
            for (k, keypoint) in keypoints.iter_mut().enumerate() {
                *keypoint = letterbox.to_frame(
                    raw[4 + 2 * k] / size + anchor.x,
                    raw[5 + 2 * k] / size + anchor.y,
                );
            }

            Some(Palm {
                score,
                bbox: [top_left.0, top_left.1, bottom_right.0, bottom_right.1],
                keypoints,
            })
        })
        .filter(|palm| raw_values_finite(palm))
        .collect();

    Ok(palms)
}

fn raw_values_finite(palm: &Palm) -> bool {
    palm.bbox.iter().all(|v| v.is_finite())
        && palm
            .keypoints
            .iter()
            .all(|(x, y)| x.is_finite() && y.is_finite())
}

fn sigmoid(logit: f32) -> f32 {
    1.0 / (1.0 + (-logit.clamp(-100.0, 100.0)).exp())
}

/// Run non-maximum-suppression on candidate palms.
///
/// Walk the palms in the order of sinking score and keep those which do not overlap more than
/// `max_iou` with an already kept one, at most `max_count`.
pub fn non_maximum_suppression(
    mut palms: Vec<Palm>,
    max_iou: f32,
    max_count: usize,
) -> Vec<Palm> {
    palms.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut selected: Vec<Palm> = vec![];
    for palm in palms {
        if selected.len() >= max_count {
            break;
        }
        if selected
            .iter()
            .all(|kept| iou(&palm.bbox, &kept.bbox) <= max_iou)
        {
            selected.push(palm);
        }
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // Disjoint boxes give an ill defined overlap box with zero area
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);
    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area of a `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]` box, zero if ill defined.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

/// Axis aligned square around one whole hand, in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HandRegion {
    pub center: (f32, f32),
    pub side: f32,
}

impl HandRegion {
    /// Widen a palm box to the hand, shifted from the wrist towards the fingers.
    pub fn from_palm(palm: &Palm) -> Self {
        let [x0, y0, x1, y1] = palm.bbox;
        let size = (x1 - x0).max(y1 - y0);

        let (wrist_x, wrist_y) = palm.keypoints[WRIST_KEYPOINT];
        let (mcp_x, mcp_y) = palm.keypoints[MIDDLE_MCP_KEYPOINT];
        let (dx, dy) = (mcp_x - wrist_x, mcp_y - wrist_y);
        let length = (dx * dx + dy * dy).sqrt();
        let direction = if length > EPS {
            (dx / length, dy / length)
        } else {
            (0.0, -1.0)
        };

        Self {
            center: (
                (x0 + x1) / 2.0 + direction.0 * size * REGION_SHIFT,
                (y0 + y1) / 2.0 + direction.1 * size * REGION_SHIFT,
            ),
            side: size * REGION_SCALE,
        }
    }

    pub fn top_left(&self) -> (f32, f32) {
        (
            self.center.0 - self.side / 2.0,
            self.center.1 - self.side / 2.0,
        )
    }

    /// Cut the region out of the frame, scaled to `size` x `size`. Black outside the frame.
    pub fn crop(&self, frame: &RgbImage, size: u32) -> RgbImage {
        let (left, top) = self.top_left();
        let step = self.side / size as f32;
        let (width, height) = frame.dimensions();

        RgbImage::from_fn(size, size, |u, v| {
            let x = (left + (u as f32 + 0.5) * step).floor();
            let y = (top + (v as f32 + 0.5) * step).floor();
            if x >= 0.0 && y >= 0.0 && x < width as f32 && y < height as f32 {
                *frame.get_pixel(x as u32, y as u32)
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    /// Map a point normalized to the region back to frame pixels.
    pub fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        let (left, top) = self.top_left();
        (left + x * self.side, top + y * self.side)
    }
}

/// Palm detection network.
pub struct PalmDetector {
    model: NnModel,
    anchors: Vec<Anchor>,
    min_score: f32,
    max_iou: f32,
}

impl PalmDetector {
    pub fn new(model_path: impl AsRef<Path>, min_score: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        log::info!("Loading palm detection model from {}", model_path.display());
        let model = load_model(model_path, PALM_INPUT_SIZE)?;

        Ok(Self {
            model,
            anchors: palm_anchors(PALM_INPUT_SIZE),
            min_score,
            max_iou: DEFAULT_MAX_IOU,
        })
    }

    fn preproc(&self, frame: &RgbImage) -> (Tensor, Letterbox) {
        let (width, height) = frame.dimensions();
        let letterbox = Letterbox::new(width, height, PALM_INPUT_SIZE);
        let input = letterbox.apply(frame);

        let tensor = tract_ndarray::Array4::from_shape_fn(
            (1, PALM_INPUT_SIZE as usize, PALM_INPUT_SIZE as usize, 3),
            |(_, y, x, c)| input[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into();

        (tensor, letterbox)
    }

    /// Find up to `max_palms` palms, most confident first.
    pub fn detect(&self, frame: &RgbImage, max_palms: usize) -> Result<Vec<Palm>> {
        let (input, letterbox) = self.preproc(frame);
        let outputs = self.model.run(tvec!(input.into()))?;

        let mut regressors = None;
        let mut scores = None;
        for output in outputs.iter() {
            match output.shape().last() {
                Some(&REGRESSOR_LEN) => regressors = Some(output.to_array_view::<f32>()?),
                Some(&1) => scores = Some(output.to_array_view::<f32>()?),
                _ => (),
            }
        }
        let (Some(regressors), Some(scores)) = (regressors, scores) else {
            bail!("palm detector is missing its regressor or score output");
        };

        let regressors: Vec<f32> = regressors.iter().cloned().collect();
        let scores: Vec<f32> = scores.iter().cloned().collect();
        let palms = decode_palms(
            &regressors,
            &scores,
            &self.anchors,
            &letterbox,
            self.min_score,
        )?;

        Ok(non_maximum_suppression(palms, self.max_iou, max_palms))
    }
}
