//! Hand pose types shared between the capture pipeline and the HTTP surface.
//!
//! Everything in here is pure: landmark sets come in, gesture labels come out.
pub mod gesture;
pub mod landmarks;
pub mod protocol;

pub use gesture::{classify, FingerStates, Gesture, GestureLabel};
pub use landmarks::{Landmark, LandmarkSet, HAND_CONNECTIONS, NUM_LANDMARKS};
