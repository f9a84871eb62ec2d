//! Sensors module.
//!
//! A camera is handed to the capture loop as a [`CaptureFn`] which returns the next decoded RGB
//! frame on every call. The function is created on the capture thread and never leaves it.
use std::path::Path;

use anyhow::{bail, Result};
use image::{ImageFormat, RgbImage};
use thiserror::Error;

/// Capture the next frame of an opened camera.
pub type CaptureFn = Box<dyn FnMut() -> Result<RgbImage, CaptureError>>;

/// Open a camera. Called once on the capture thread, failure is fatal for the capture loop.
pub type OpenCaptureFn = Box<dyn FnOnce() -> Result<CaptureFn> + Send>;

/// Reasons why no frame could be captured in one cycle.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera returned no frame")]
    NoFrame,
    #[error("failed to read frame from camera")]
    Read(#[from] std::io::Error),
    #[error("failed to decode frame")]
    Decode(#[from] image::ImageError),
}

/// Decode a JPEG buffer as delivered by MJPG cameras.
pub fn decode_jpeg(data: &[u8]) -> Result<RgbImage, CaptureError> {
    Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8())
}

/// Get a capture function to a video device on a Linux machine.
#[cfg(feature = "v4l")]
pub fn get_capture_fn_linux(
    device_name: &str,
    format: &str,
    resolution: Option<(u32, u32)>,
    frame_rate: Option<(u32, u32)>,
) -> Result<CaptureFn> {
    use rscam::{Camera, Config};

    let mut cam = Camera::new(device_name)?;
    log_supported_formats(&cam, format);
    let format = format.as_bytes();

    log::info!("Using camera {}", device_name);

    let resolution = resolution
        .map(Ok)
        .unwrap_or_else(|| get_max_resolution(&cam, format))?;

    let frame_rate = frame_rate
        .map(Ok)
        .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

    log::info!(
        "Capturing {}x{} at {}/{}s",
        resolution.0,
        resolution.1,
        frame_rate.0,
        frame_rate.1
    );

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format,
        ..Default::default()
    })?;

    let callback = move || -> Result<RgbImage, CaptureError> {
        let frame = cam.capture()?;
        decode_jpeg(&frame[..])
    };
    Ok(Box::new(callback))
}

#[cfg(not(feature = "v4l"))]
pub fn get_capture_fn_linux(
    device_name: &str,
    _format: &str,
    _resolution: Option<(u32, u32)>,
    _frame_rate: Option<(u32, u32)>,
) -> Result<CaptureFn> {
    bail!("cannot open {device_name}: built without the `v4l` feature")
}

/// Get a capture function replaying all JPEG files of a directory in a loop.
///
/// Files are played in the order of their names.
pub fn get_replay_capture_fn(dir: impl AsRef<Path>) -> Result<CaptureFn> {
    let dir = dir.as_ref();
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();

    if files.is_empty() {
        bail!("no JPEG files found in {}", dir.display());
    }
    log::info!("Replaying {} frames from {}", files.len(), dir.display());

    let mut files = files.into_iter().cycle();
    let callback = move || -> Result<RgbImage, CaptureError> {
        match files.next() {
            Some(path) => decode_jpeg(&std::fs::read(path)?),
            None => Err(CaptureError::NoFrame),
        }
    };
    Ok(Box::new(callback))
}

/// Get a capture function handing out the given results in order and then `NoFrame` forever.
pub fn get_scripted_capture_fn<I>(frames: I) -> CaptureFn
where
    I: IntoIterator<Item = Result<RgbImage, CaptureError>>,
    I::IntoIter: 'static,
{
    let mut frames = frames.into_iter();
    Box::new(move || frames.next().unwrap_or(Err(CaptureError::NoFrame)))
}

/// Get the maximum supported resolution for the given format.
#[cfg(feature = "v4l")]
fn get_max_resolution(cam: &rscam::Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height) num_pixels)
            .map(|res| (res, res.0 * res.1))
            // Get the highest resolution in terms of number of pixels
            .max_by(|a, b| a.1.cmp(&b.1))
            // Extract width and height values
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise {
            min: _,
            max,
            step: _,
        } => Some(max),
    }
    .ok_or_else(|| anyhow::anyhow!("no resolution found"))
}

/// Get the maximum supported frame rate for the given format and resolution.
#[cfg(feature = "v4l")]
fn get_max_frame_rate(
    cam: &rscam::Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are (numerator, denominator) seconds per frame
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .max_by(|a, b| (a.1 * b.0).cmp(&(b.1 * a.0)))
            .copied(),
        rscam::IntervalInfo::Stepwise {
            min,
            max: _,
            step: _,
        } => Some(min),
    }
    .ok_or_else(|| anyhow::anyhow!("no frame rate found"))
}

#[cfg(feature = "v4l")]
fn log_supported_formats(cam: &rscam::Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;

    fn jpeg_bytes(color: [u8; 3]) -> Vec<u8> {
        let frame = RgbImage::from_pixel(16, 8, image::Rgb(color));
        let mut buf = std::io::Cursor::new(Vec::new());
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 90)
            .encode_image(&frame)
            .expect("encode");
        buf.into_inner()
    }

    #[test]
    fn test_decode_jpeg() -> Result<()> {
        let frame = decode_jpeg(&jpeg_bytes([200, 10, 10]))?;
        assert_eq!(frame.dimensions(), (16, 8));
        assert!(frame.get_pixel(4, 4)[0] > 150);

        assert!(matches!(
            decode_jpeg(b"not a jpeg"),
            Err(CaptureError::Decode(_))
        ));

        Ok(())
    }

    #[test]
    fn test_scripted_capture_fn() {
        let mut capture = get_scripted_capture_fn(vec![
            Err(CaptureError::NoFrame),
            Ok(RgbImage::new(4, 4)),
        ]);

        assert!(capture().is_err());
        assert!(capture().is_ok());
        assert!(matches!(capture(), Err(CaptureError::NoFrame)));
    }

    #[test]
    fn test_replay_capture_fn_loops() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("gesture-replay-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("frame-0.jpg"), jpeg_bytes([0, 0, 0]))?;
        std::fs::write(dir.join("frame-1.jpg"), jpeg_bytes([255, 255, 255]))?;
        std::fs::write(dir.join("notes.txt"), b"ignored")?;

        let mut capture = get_replay_capture_fn(&dir)?;
        let first = capture()?;
        let second = capture()?;
        let third = capture()?;
        assert!(first.get_pixel(0, 0)[0] < 50);
        assert!(second.get_pixel(0, 0)[0] > 200);
        assert_eq!(first, third);

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_replay_capture_fn_needs_frames() {
        let dir = std::env::temp_dir().join(format!("gesture-empty-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create dir");
        assert!(get_replay_capture_fn(&dir).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(feature = "v4l")]
    #[test]
    fn get_cam_info_if_available() -> Result<()> {
        let cam_name = "/dev/video0";
        let cam = rscam::Camera::new(cam_name);

        match cam {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let formats: Vec<_> = cam.formats().collect();
                println!("Supported formats: {formats:?}");

                let format = b"MJPG";

                let resolutions = cam.resolutions(format)?;
                println!("Supported resolutions: {resolutions:?}");

                let selected_resolution = get_max_resolution(&cam, format)?;
                let frame_rates = cam.intervals(format, selected_resolution)?;
                println!("Supported frame rates: {frame_rates:?}");
            }
        }

        Ok(())
    }
}
