//! Bounded in-memory recorder.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::recorder::DEFAULT_HISTORY_LENGTH;
use crate::{Recorder, Result, SensorId};

type Ring = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// Keeps the most recent `capacity` events per sensor and drops the oldest
/// on overflow.
///
/// The sensor table lock is only held long enough to find or create a
/// sensor's ring; each ring has its own mutex, so recording for one sensor
/// never waits on another.
#[derive(Debug)]
pub struct MemoryRecorder {
    capacity: usize,
    sensors: RwLock<HashMap<SensorId, Ring>>,
}

impl MemoryRecorder {
    /// Create a recorder holding at most `capacity` events per sensor.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sensors: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ring(&self, sensor_id: &SensorId) -> Option<Ring> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        sensors.get(sensor_id).cloned()
    }

    fn ring_or_insert(&self, sensor_id: &SensorId) -> Ring {
        if let Some(ring) = self.ring(sensor_id) {
            return ring;
        }
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        sensors
            .entry(sensor_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LENGTH)
    }
}

impl Recorder for MemoryRecorder {
    fn record(&self, sensor_id: &SensorId, timestamp: DateTime<Utc>) -> Result<()> {
        let ring = self.ring_or_insert(sensor_id);
        let mut events = ring.lock().unwrap_or_else(PoisonError::into_inner);

        // Late arrivals go after every entry at or before their timestamp.
        let at = events.partition_point(|t| *t <= timestamp);
        events.insert(at, timestamp);

        while events.len() > self.capacity {
            events.pop_front();
        }
        Ok(())
    }

    fn recent_history(&self, sensor_id: &SensorId, limit: usize) -> Result<Vec<DateTime<Utc>>> {
        let Some(ring) = self.ring(sensor_id) else {
            return Ok(Vec::new());
        };
        let events = ring.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events.iter().rev().take(limit).copied().collect())
    }

    fn known_sensors(&self) -> Result<BTreeSet<SensorId>> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sensors
            .iter()
            .filter(|(_, ring)| !ring.lock().unwrap_or_else(PoisonError::into_inner).is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn events_in_window(
        &self,
        sensor_id: &SensorId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let Some(ring) = self.ring(sensor_id) else {
            return Ok(Vec::new());
        };
        let events = ring.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(events
            .iter()
            .copied()
            .filter(|t| *t >= from && *t <= to)
            .collect())
    }
}
