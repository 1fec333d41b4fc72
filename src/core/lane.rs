use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, StemError};

/// Behavior class a lane string resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    /// Every model stem is returned as-is.
    Raw,
    /// Vocals plus one instrumental mixed from the remaining stems.
    Reduction,
}

/// What to do with a lane that is neither a reduction lane nor a listed raw lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownLanePolicy {
    #[default]
    Raw,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanePolicy {
    pub reduction_marker: String,
    /// Lanes known to be raw. Empty means any non-reduction lane is raw.
    pub raw_lanes: Vec<String>,
    pub unknown: UnknownLanePolicy,
}

impl Default for LanePolicy {
    fn default() -> Self {
        Self {
            reduction_marker: "acca".into(),
            raw_lanes: vec!["default".into()],
            unknown: UnknownLanePolicy::Raw,
        }
    }
}

impl LanePolicy {
    /// Pure classification; the marker match is case-sensitive.
    pub fn classify(&self, lane: &str) -> Result<Lane> {
        if !self.reduction_marker.is_empty() && lane.contains(&self.reduction_marker) {
            return Ok(Lane::Reduction);
        }
        if self.raw_lanes.is_empty() || self.raw_lanes.iter().any(|l| l == lane) {
            return Ok(Lane::Raw);
        }
        match self.unknown {
            UnknownLanePolicy::Raw => {
                warn!(%lane, "unrecognized lane, falling back to raw output");
                Ok(Lane::Raw)
            }
            UnknownLanePolicy::Reject => Err(StemError::UnknownLane(lane.to_string())),
        }
    }
}

