//! Hand gesture recognition on a live camera feed.
//!
//! A dedicated capture thread reads frames, detects hand landmarks, classifies the pose and
//! publishes the annotated frame. The HTTP endpoints serve the results as an MJPEG stream and
//! small JSON payloads.
pub mod annotate;
pub mod capture;
pub mod context;
pub mod endpoints;
pub mod nn;
pub mod palm;
pub mod rates;
pub mod sensors;
pub mod state;
pub mod utils;
