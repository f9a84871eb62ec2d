//! Payloads of the JSON endpoints.
//!
use serde::{Deserialize, Serialize};

use crate::gesture::GestureLabel;

/// Current gesture, e.g. `{"gesture": "Peace"}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct GestureMsg {
    pub gesture: String,
}

impl From<GestureLabel> for GestureMsg {
    fn from(label: GestureLabel) -> Self {
        Self {
            gesture: label.to_string(),
        }
    }
}

/// Liveness of the process, always `{"status": "ok"}`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HealthMsg {
    pub status: String,
}

impl HealthMsg {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_owned(),
        }
    }
}
