//! The recorder contract shared by every backend.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::{Result, SensorId};

/// Default number of entries kept in a sensor's recent history.
pub const DEFAULT_HISTORY_LENGTH: usize = 10;

/// Append-only, per-sensor ordered log of motion events.
///
/// Implementations must be safe to call from many threads at once. Reads may
/// miss an event recorded concurrently but never observe a partial one.
pub trait Recorder: Send + Sync {
    /// Append an event. On error nothing was recorded.
    fn record(&self, sensor_id: &SensorId, timestamp: DateTime<Utc>) -> Result<()>;

    /// Up to `limit` timestamps for the sensor, most recent first.
    ///
    /// An unknown sensor yields an empty list.
    fn recent_history(&self, sensor_id: &SensorId, limit: usize) -> Result<Vec<DateTime<Utc>>>;

    /// Every sensor with at least one retained event.
    fn known_sensors(&self) -> Result<BTreeSet<SensorId>>;

    /// Timestamps in `[from, to]`, ascending. Equal timestamps keep insertion order.
    fn events_in_window(
        &self,
        sensor_id: &SensorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;
}
