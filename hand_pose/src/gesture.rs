//! Coarse gesture classification from hand landmarks.
//!
//! A hand is reduced to five extended/curled finger states which are then matched exactly
//! against a small table of known poses.
//!
//! The thumb test compares horizontal positions of the tip and the IP joint and therefore
//! assumes a mirrored frame of a hand facing the camera. It is a 2D heuristic and flips for the
//! back of the hand.
use std::fmt;

use crate::landmarks::{
    LandmarkSet, INDEX_MCP, INDEX_TIP, MIDDLE_MCP, MIDDLE_TIP, PINKY_MCP, PINKY_TIP, RING_MCP,
    RING_TIP, THUMB_IP, THUMB_TIP,
};

/// Fingertip and knuckle indices of index, middle, ring and pinky finger.
const FINGER_TIPS_AND_KNUCKLES: [(usize, usize); 4] = [
    (INDEX_TIP, INDEX_MCP),
    (MIDDLE_TIP, MIDDLE_MCP),
    (RING_TIP, RING_MCP),
    (PINKY_TIP, PINKY_MCP),
];

/// Extended (`true`) or curled state of thumb, index, middle, ring and pinky finger.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FingerStates(pub [bool; 5]);

impl FingerStates {
    pub fn from_landmarks(landmarks: &LandmarkSet) -> Self {
        let mut states = [false; 5];

        states[0] = landmarks[THUMB_TIP].x < landmarks[THUMB_IP].x;

        // Image y grows downwards, an extended fingertip sits above its knuckle
        for (state, (tip, knuckle)) in states[1..].iter_mut().zip(FINGER_TIPS_AND_KNUCKLES) {
            *state = landmarks[tip].y < landmarks[knuckle].y;
        }

        Self(states)
    }

    /// Build from a literal `[thumb, index, middle, ring, pinky]` vector of `0`/`1`.
    pub fn from_bits(bits: [u8; 5]) -> Self {
        Self(bits.map(|bit| bit != 0))
    }

    pub fn as_bits(&self) -> [u8; 5] {
        self.0.map(u8::from)
    }
}

/// Known hand poses.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Gesture {
    Peace,
    OpenHand,
    ThumbsUp,
    Fist,
    Unknown,
}

impl Gesture {
    pub fn from_finger_states(states: FingerStates) -> Self {
        match states.0 {
            [false, true, false, false, false] => Gesture::Peace,
            [true, true, true, true, true] => Gesture::OpenHand,
            [true, false, false, false, false] => Gesture::ThumbsUp,
            [false, false, false, false, false] => Gesture::Fist,
            _ => Gesture::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Gesture::Peace => "Peace",
            Gesture::OpenHand => "Open Hand",
            Gesture::ThumbsUp => "Thumbs Up",
            Gesture::Fist => "Fist",
            Gesture::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the pose of a single hand.
pub fn classify(landmarks: &LandmarkSet) -> Gesture {
    Gesture::from_finger_states(FingerStates::from_landmarks(landmarks))
}

/// Gesture shown to consumers for one frame.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum GestureLabel {
    #[default]
    NoHands,
    Detected(Gesture),
}

impl GestureLabel {
    /// Label of a frame with the given hands. With several hands the last one wins.
    pub fn from_hands<'a>(hands: impl IntoIterator<Item = &'a LandmarkSet>) -> Self {
        hands
            .into_iter()
            .map(classify)
            .last()
            .map(GestureLabel::Detected)
            .unwrap_or(GestureLabel::NoHands)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GestureLabel::NoHands => "No hands detected",
            GestureLabel::Detected(gesture) => gesture.as_str(),
        }
    }
}

impl From<Gesture> for GestureLabel {
    fn from(gesture: Gesture) -> Self {
        GestureLabel::Detected(gesture)
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
