//! Drawing hand skeletons and gesture labels onto frames, and encoding them for streaming.
//!
//! All drawing functions take the frame by value and return the annotated frame.
use std::io::Cursor;

use anyhow::Result;
use bytes::Bytes;
use hand_pose::{GestureLabel, Landmark, LandmarkSet, HAND_CONNECTIONS};
use image::{codecs::jpeg::JpegEncoder, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut};
use lazy_static::lazy_static;
use rusttype::Scale;

/// Boundary token of the multipart stream.
pub const BOUNDARY: &str = "frame";

const BONE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const JOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

const JOINT_RADIUS: i32 = 4;
const LABEL_POSITION: (i32, i32) = (20, 20);
const LABEL_SCALE: f32 = 32.0;

/// Draw the skeleton of one hand.
///
/// Points outside the frame are pulled onto its border, non-finite points are left out.
pub fn draw_hand(mut frame: RgbImage, landmarks: &LandmarkSet) -> RgbImage {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return frame;
    }
    let pixels = landmarks
        .points()
        .map(|landmark| clamped_pixels(&landmark, width, height));

    for (from, to) in HAND_CONNECTIONS.iter() {
        if let (Some(start), Some(end)) = (pixels[*from], pixels[*to]) {
            draw_line_segment_mut(&mut frame, start, end, BONE_COLOR);
        }
    }

    for (x, y) in pixels.iter().flatten() {
        draw_filled_circle_mut(&mut frame, (*x as i32, *y as i32), JOINT_RADIUS, JOINT_COLOR);
    }

    frame
}

fn clamped_pixels(landmark: &Landmark, width: u32, height: u32) -> Option<(f32, f32)> {
    if !landmark.is_finite() {
        return None;
    }
    let (x, y) = landmark.to_pixels(width, height);

    Some((
        x.clamp(0.0, (width - 1) as f32),
        y.clamp(0.0, (height - 1) as f32),
    ))
}

/// Burn the gesture label into the top left corner.
pub fn draw_label(mut frame: RgbImage, label: &GestureLabel) -> RgbImage {
    draw_text_mut(
        &mut frame,
        LABEL_COLOR,
        LABEL_POSITION.0,
        LABEL_POSITION.1,
        Scale::uniform(LABEL_SCALE),
        &DEJAVU_MONO,
        label.as_str(),
    );

    frame
}

/// Encode a frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(frame)?;

    Ok(buf.into_inner())
}

/// Content type announcing a stream of [`as_jpeg_stream_item`] parts.
pub fn stream_content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={BOUNDARY}")
}

/// Frame JPEG data as one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n").as_bytes(),
            data,
            "\r\n".as_bytes(),
        ]
        .concat(),
    )
}

lazy_static! {
    static ref DEJAVU_MONO: rusttype::Font<'static> = {
        let font_data: &[u8] = include_bytes!("../../resources/DejaVuSansMono.ttf");
        rusttype::Font::try_from_bytes(font_data).expect("failed to load font")
    };
}

#[cfg(test)]
mod test {
    use super::*;
    use hand_pose::{landmarks::INDEX_TIP, Gesture, NUM_LANDMARKS};

    #[test]
    fn test_draw_hand_marks_joints() {
        let mut points = [Landmark::new(0.1, 0.1); NUM_LANDMARKS];
        points[INDEX_TIP] = Landmark::new(0.5, 0.5);
        let hand = LandmarkSet::new(points);

        let frame = draw_hand(RgbImage::new(100, 100), &hand);
        assert_eq!(*frame.get_pixel(50, 50), JOINT_COLOR);
        assert_eq!(*frame.get_pixel(10, 10), JOINT_COLOR);
        assert_eq!(*frame.get_pixel(90, 10), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_hand_tolerates_out_of_frame_points() {
        let hand = LandmarkSet::new([Landmark::new(1.5, -0.5); NUM_LANDMARKS]);
        let frame = draw_hand(RgbImage::new(32, 32), &hand);
        assert_eq!(frame.dimensions(), (32, 32));
    }

    #[test]
    fn test_draw_hand_skips_non_finite_points() {
        let mut points = [Landmark::new(f32::INFINITY, f32::NAN); NUM_LANDMARKS];
        points[INDEX_TIP] = Landmark::new(0.5, 0.5);
        let frame = draw_hand(RgbImage::new(64, 64), &LandmarkSet::new(points));

        assert_eq!(*frame.get_pixel(32, 32), JOINT_COLOR);
        assert_eq!(frame.pixels().filter(|pixel| **pixel == BONE_COLOR).count(), 0);
    }

    #[test]
    fn test_draw_hand_clamps_far_away_points() {
        let mut points = [Landmark::new(0.5, 0.5); NUM_LANDMARKS];
        points[INDEX_TIP] = Landmark::new(1e9, -1e9);
        let frame = draw_hand(RgbImage::new(64, 64), &LandmarkSet::new(points));

        assert_eq!(*frame.get_pixel(63, 0), JOINT_COLOR);
        assert_eq!(draw_hand(RgbImage::new(0, 0), &LandmarkSet::new(points)).len(), 0);
    }

    #[test]
    fn test_draw_label_changes_frame() {
        let blank = RgbImage::new(320, 120);
        let labeled = draw_label(blank.clone(), &GestureLabel::Detected(Gesture::Peace));
        assert_ne!(blank, labeled);
        assert!(labeled.pixels().any(|pixel| pixel[1] > 0));
    }

    #[test]
    fn test_stream_item_framing() -> Result<()> {
        let jpeg = encode_jpeg(&RgbImage::new(8, 8), 80)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let item = as_jpeg_stream_item(&jpeg);
        let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(item.starts_with(header));
        assert!(item.ends_with(b"\r\n"));
        assert_eq!(item.len(), header.len() + jpeg.len() + 2);

        Ok(())
    }

    #[test]
    fn test_content_type_names_item_boundary() {
        let content_type = stream_content_type();
        let boundary = content_type
            .split_once("boundary=")
            .map(|(_, boundary)| boundary)
            .expect("boundary parameter");

        let item = as_jpeg_stream_item(b"jpeg");
        assert!(item.starts_with(format!("--{boundary}\r\n").as_bytes()));
    }
}
