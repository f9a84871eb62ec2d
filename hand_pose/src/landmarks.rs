//! Landmarks of a single detected hand.
//!
//! Indices follow the anatomical layout used by MediaPipe-style hand landmark networks:
//! the wrist is point 0, every finger contributes four points from knuckle to tip.

/// Number of landmarks per hand.
pub const NUM_LANDMARKS: usize = 21;

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_DIP: usize = 7;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_DIP: usize = 11;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_PIP: usize = 14;
pub const RING_DIP: usize = 15;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;

/// Skeleton edges between landmarks, used to draw the hand overlay.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    // Palm
    (WRIST, THUMB_CMC),
    (WRIST, INDEX_MCP),
    (INDEX_MCP, MIDDLE_MCP),
    (MIDDLE_MCP, RING_MCP),
    (RING_MCP, PINKY_MCP),
    (WRIST, PINKY_MCP),
    // Thumb
    (THUMB_CMC, THUMB_MCP),
    (THUMB_MCP, THUMB_IP),
    (THUMB_IP, THUMB_TIP),
    // Index finger
    (INDEX_MCP, INDEX_PIP),
    (INDEX_PIP, INDEX_DIP),
    (INDEX_DIP, INDEX_TIP),
    // Middle finger
    (MIDDLE_MCP, MIDDLE_PIP),
    (MIDDLE_PIP, MIDDLE_DIP),
    (MIDDLE_DIP, MIDDLE_TIP),
    // Ring finger
    (RING_MCP, RING_PIP),
    (RING_PIP, RING_DIP),
    (RING_DIP, RING_TIP),
    // Pinky
    (PINKY_MCP, PINKY_PIP),
    (PINKY_PIP, PINKY_DIP),
    (PINKY_DIP, PINKY_TIP),
];

/// Single point, normalized to the frame: `(0, 0)` is the top left corner, `(1, 1)` the bottom
/// right one. `z` is the relative depth if the detector provides it, `0.0` otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// Project into pixel coordinates of a `width` x `height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> (f32, f32) {
        (self.x * width as f32, self.y * height as f32)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// The 21 landmarks of one detected hand.
#[derive(Clone, Debug, PartialEq)]
pub struct LandmarkSet {
    points: [Landmark; NUM_LANDMARKS],
}

impl LandmarkSet {
    pub fn new(points: [Landmark; NUM_LANDMARKS]) -> Self {
        Self { points }
    }

    /// Build a set from a slice, `None` unless it holds exactly 21 points.
    pub fn from_slice(points: &[Landmark]) -> Option<Self> {
        let points: [Landmark; NUM_LANDMARKS] = points.try_into().ok()?;
        Some(Self { points })
    }

    /// Whether every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        self.points.iter().all(Landmark::is_finite)
    }

    pub fn points(&self) -> &[Landmark; NUM_LANDMARKS] {
        &self.points
    }
}

impl std::ops::Index<usize> for LandmarkSet {
    type Output = Landmark;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}
