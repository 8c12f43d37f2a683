//! Response shapes served to clients.

use chrono::{DateTime, Utc};
use runtime::{BoundaryKind, SessionBoundary};
use serde::{Deserialize, Serialize};
use storage::SensorId;

/// Recent activity of one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorActivity {
    pub id: SensorId,
    pub alias: Option<String>,
    /// Most recent first.
    pub history: Vec<DateTime<Utc>>,
    /// `None` only when `history` is empty.
    pub latest: Option<DateTime<Utc>>,
}

/// One session edge as served to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryView {
    pub date: DateTime<Utc>,
    pub event: BoundaryKind,
}

impl From<&SessionBoundary> for BoundaryView {
    fn from(boundary: &SessionBoundary) -> Self {
        Self {
            date: boundary.timestamp,
            event: boundary.kind,
        }
    }
}

/// Session edges of one sensor within the trailing window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHistory {
    pub id: SensorId,
    pub alias: Option<String>,
    pub events: Vec<BoundaryView>,
}
