//! Presence session derivation.
//!
//! A session is a maximal run of a sensor's events in which no two
//! consecutive events are more than `gap` apart. Only events inside the
//! trailing window take part: an event just outside the window never acts
//! as a neighbour of one inside it, so activity that straddles the window's
//! left edge starts a session there.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use storage::{Recorder, SensorId};

use crate::Result;

/// Default look-back window, in hours.
pub const DEFAULT_WINDOW_HOURS: i64 = 48;

/// Default gap that splits two sessions, in minutes.
pub const DEFAULT_GAP_MINUTES: i64 = 60;

/// Edge of a session.
///
/// `End` orders before `Start`, which is the tie-break required at equal
/// timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoundaryKind {
    End,
    Start,
}

impl std::fmt::Display for BoundaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundaryKind::End => f.write_str("END"),
            BoundaryKind::Start => f.write_str("START"),
        }
    }
}

/// A derived session edge. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBoundary {
    pub sensor_id: SensorId,
    pub timestamp: DateTime<Utc>,
    pub kind: BoundaryKind,
}

/// A session as a closed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Number of events in the session.
    pub events: usize,
}

impl SessionSpan {
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Computes session boundaries for a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionDeriver {
    window: TimeDelta,
    gap: TimeDelta,
}

impl SessionDeriver {
    pub fn new(window: TimeDelta, gap: TimeDelta) -> Self {
        Self { window, gap }
    }

    pub fn with_window(mut self, window: TimeDelta) -> Self {
        self.window = window;
        self
    }

    pub fn with_gap(mut self, gap: TimeDelta) -> Self {
        self.gap = gap;
        self
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }

    pub fn gap(&self) -> TimeDelta {
        self.gap
    }

    /// Session boundaries for `sensor_id` over `[now - window, now]`.
    ///
    /// An unknown sensor, or one with no events in the window, yields an
    /// empty list.
    pub fn derive<R: Recorder + ?Sized>(
        &self,
        recorder: &R,
        sensor_id: &SensorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionBoundary>> {
        let events = self.events(recorder, sensor_id, now)?;
        Ok(boundaries(sensor_id, &events, self.gap))
    }

    /// Sessions for `sensor_id` over `[now - window, now]`, oldest first.
    pub fn spans<R: Recorder + ?Sized>(
        &self,
        recorder: &R,
        sensor_id: &SensorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionSpan>> {
        let events = self.events(recorder, sensor_id, now)?;
        Ok(spans(&events, self.gap))
    }

    fn events<R: Recorder + ?Sized>(
        &self,
        recorder: &R,
        sensor_id: &SensorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        // A window reaching past the earliest representable instant covers
        // everything up to `now`.
        let from = now
            .checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(recorder.events_in_window(sensor_id, from, now)?)
    }
}

impl Default for SessionDeriver {
    fn default() -> Self {
        Self::new(
            TimeDelta::hours(DEFAULT_WINDOW_HOURS),
            TimeDelta::minutes(DEFAULT_GAP_MINUTES),
        )
    }
}

/// Boundaries for `events`, which must be ascending.
///
/// Output is sorted by timestamp with `End` before `Start` at equal
/// timestamps. An isolated event produces both at its own timestamp.
pub fn boundaries(
    sensor_id: &SensorId,
    events: &[DateTime<Utc>],
    gap: TimeDelta,
) -> Vec<SessionBoundary> {
    let mut out = Vec::new();
    for (i, &timestamp) in events.iter().enumerate() {
        let starts = i == 0 || timestamp - events[i - 1] > gap;
        let ends = i + 1 == events.len() || events[i + 1] - timestamp > gap;

        if starts {
            out.push(SessionBoundary {
                sensor_id: sensor_id.clone(),
                timestamp,
                kind: BoundaryKind::Start,
            });
        }
        if ends {
            out.push(SessionBoundary {
                sensor_id: sensor_id.clone(),
                timestamp,
                kind: BoundaryKind::End,
            });
        }
    }

    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.kind.cmp(&b.kind)));
    out
}

/// Sessions in `events`, which must be ascending.
pub fn spans(events: &[DateTime<Utc>], gap: TimeDelta) -> Vec<SessionSpan> {
    let mut out: Vec<SessionSpan> = Vec::new();
    for &timestamp in events {
        match out.last_mut() {
            Some(span) if timestamp - span.end <= gap => {
                span.end = timestamp;
                span.events += 1;
            }
            _ => out.push(SessionSpan {
                start: timestamp,
                end: timestamp,
                events: 1,
            }),
        }
    }
    out
}
