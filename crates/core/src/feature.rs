//! Feature table — the static set of application modes and their panels.
//!
//! A feature is addressable by a route prefix and owns zero or one side panel.
//! Panel positions are expressed direction-agnostically (`start`/`end`) and
//! only mapped to a concrete screen edge once the text direction is known.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of features the shell knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureId {
    /// Plain chat; the default for unmatched paths. Owns no panel.
    Chat,
    /// Communication board generator
    Boards,
    /// Communication interpreter
    Interpret,
    /// Document tool
    Docs,
    /// Program and goal planning
    Programs,
}

impl FeatureId {
    pub const ALL: [FeatureId; 5] = [
        FeatureId::Chat,
        FeatureId::Boards,
        FeatureId::Interpret,
        FeatureId::Docs,
        FeatureId::Programs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureId::Chat => "chat",
            FeatureId::Boards => "boards",
            FeatureId::Interpret => "interpret",
            FeatureId::Docs => "docs",
            FeatureId::Programs => "programs",
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a feature name that is not in [`FeatureId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureId {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureId::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}

/// Direction-agnostic panel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalPosition {
    Start,
    End,
    Top,
    Bottom,
}

/// A concrete screen edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhysicalEdge {
    Left,
    Right,
    Top,
    Bottom,
}

impl fmt::Display for PhysicalEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhysicalEdge::Left => "left",
            PhysicalEdge::Right => "right",
            PhysicalEdge::Top => "top",
            PhysicalEdge::Bottom => "bottom",
        };
        f.write_str(s)
    }
}

/// Text direction of the surrounding UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

impl LogicalPosition {
    /// Map to a screen edge. `start` is left in LTR and right in RTL; `end`
    /// mirrors it; `top`/`bottom` are unaffected.
    pub fn to_physical(self, direction: TextDirection) -> PhysicalEdge {
        match (self, direction) {
            (LogicalPosition::Start, TextDirection::Ltr) => PhysicalEdge::Left,
            (LogicalPosition::Start, TextDirection::Rtl) => PhysicalEdge::Right,
            (LogicalPosition::End, TextDirection::Ltr) => PhysicalEdge::Right,
            (LogicalPosition::End, TextDirection::Rtl) => PhysicalEdge::Left,
            (LogicalPosition::Top, _) => PhysicalEdge::Top,
            (LogicalPosition::Bottom, _) => PhysicalEdge::Bottom,
        }
    }
}

/// Static description of one feature and its panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub feature_id: FeatureId,

    /// Route prefix, e.g. `/boards`
    pub path_prefix: String,

    pub position: LogicalPosition,

    /// Panel sizes, in percent of the viewport along the panel's axis
    pub default_size: f32,
    pub min_size: f32,
    pub max_size: f32,

    /// Whether the feature shows an auxiliary bar above its panel
    #[serde(default)]
    pub top_bar: bool,

    /// Whether the feature shows an auxiliary bar below its panel
    #[serde(default)]
    pub bottom_bar: bool,
}

impl Feature {
    /// Clamp a requested size into this feature's bounds.
    pub fn clamp_size(&self, size: f32) -> f32 {
        size.clamp(self.min_size, self.max_size)
    }

    /// Whether `path` falls under this feature's route prefix.
    fn matches_path(&self, path: &str) -> bool {
        let prefix = self.path_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return path.starts_with('/');
        }
        path == prefix
            || path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
    }
}

/// The static feature table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    /// Look up a feature by id.
    pub fn get(&self, id: FeatureId) -> Option<&Feature> {
        self.features.iter().find(|f| f.feature_id == id)
    }

    /// Mutable lookup, used when applying configuration overrides.
    pub fn get_mut(&mut self, id: FeatureId) -> Option<&mut Feature> {
        self.features.iter_mut().find(|f| f.feature_id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Resolve the feature implied by a navigation path.
    ///
    /// Longest matching route prefix wins; unmatched paths fall back to
    /// [`FeatureId::Chat`].
    pub fn resolve(&self, path: &str) -> FeatureId {
        let path = path.split('#').next().unwrap_or(path);
        self.features
            .iter()
            .filter(|f| f.matches_path(path))
            .max_by_key(|f| f.path_prefix.trim_end_matches('/').len())
            .map(|f| f.feature_id)
            .unwrap_or(FeatureId::Chat)
    }
}

impl Default for FeatureTable {
    fn default() -> Self {
        let feature = |feature_id, path_prefix: &str, position, sizes: (f32, f32, f32)| Feature {
            feature_id,
            path_prefix: path_prefix.into(),
            position,
            default_size: sizes.0,
            min_size: sizes.1,
            max_size: sizes.2,
            top_bar: false,
            bottom_bar: false,
        };

        let mut boards = feature(FeatureId::Boards, "/boards", LogicalPosition::End, (55.0, 30.0, 75.0));
        boards.top_bar = true;
        let mut docs = feature(FeatureId::Docs, "/docs", LogicalPosition::End, (50.0, 30.0, 70.0));
        docs.bottom_bar = true;

        Self::new(vec![
            feature(FeatureId::Chat, "/chat", LogicalPosition::End, (0.0, 0.0, 0.0)),
            boards,
            feature(FeatureId::Interpret, "/interpret", LogicalPosition::End, (40.0, 25.0, 60.0)),
            docs,
            feature(FeatureId::Programs, "/programs", LogicalPosition::Start, (35.0, 25.0, 55.0)),
        ])
    }
}
