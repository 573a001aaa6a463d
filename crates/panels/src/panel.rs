//! Per-feature panel state.

use copanel_core::feature::LogicalPosition;
use serde::{Deserialize, Serialize};

/// Visibility and size of one feature's panel.
///
/// Created the first time the feature is opened. The size survives feature
/// switches; `is_open` does not.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelState {
    pub is_open: bool,
    pub size: f32,
    pub position: LogicalPosition,
}

/// Lifecycle phase of a feature's panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelPhase {
    /// Never opened
    Idle,
    Open,
    Closed,
}

impl PanelPhase {
    pub fn of(state: Option<&PanelState>) -> Self {
        match state {
            None => PanelPhase::Idle,
            Some(s) if s.is_open => PanelPhase::Open,
            Some(_) => PanelPhase::Closed,
        }
    }
}
