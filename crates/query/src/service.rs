//! Composition of recorder and deriver output into client views.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use runtime::SessionDeriver;
use storage::{DEFAULT_HISTORY_LENGTH, Recorder};

use crate::{Aliases, BoundaryView, Result, SensorActivity, SessionHistory};

/// Answers the two presence queries.
pub struct QueryService {
    recorder: Arc<dyn Recorder>,
    deriver: SessionDeriver,
    history_length: usize,
    aliases: Aliases,
}

impl QueryService {
    pub fn new(recorder: Arc<dyn Recorder>) -> Self {
        Self {
            recorder,
            deriver: SessionDeriver::default(),
            history_length: DEFAULT_HISTORY_LENGTH,
            aliases: Aliases::default(),
        }
    }

    pub fn with_deriver(mut self, deriver: SessionDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    pub fn with_history_length(mut self, history_length: usize) -> Self {
        self.history_length = history_length;
        self
    }

    pub fn with_aliases(mut self, aliases: Aliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Bounded history for every known sensor.
    pub fn latest_activity(&self) -> Result<Vec<SensorActivity>> {
        let mut out = Vec::new();
        for id in self.recorder.known_sensors()? {
            let history = self.recorder.recent_history(&id, self.history_length)?;
            let latest = history.first().copied();
            out.push(SensorActivity {
                alias: self.aliases.get(&id).map(str::to_string),
                id,
                history,
                latest,
            });
        }
        Ok(out)
    }

    /// Session edges for every sensor active in the window ending at `now`.
    pub fn session_history(&self, now: DateTime<Utc>) -> Result<Vec<SessionHistory>> {
        let mut out = Vec::new();
        for id in self.recorder.known_sensors()? {
            let boundaries = self.deriver.derive(self.recorder.as_ref(), &id, now)?;
            if boundaries.is_empty() {
                continue;
            }
            out.push(SessionHistory {
                alias: self.aliases.get(&id).map(str::to_string),
                events: boundaries.iter().map(BoundaryView::from).collect(),
                id,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};
    use runtime::BoundaryKind;
    use storage::{MemoryRecorder, SensorId, SqliteRecorder};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap()
    }

    fn seeded() -> Arc<MemoryRecorder> {
        let recorder = Arc::new(MemoryRecorder::new(10));
        let isel = SensorId::new("14693767");
        let robo = SensorId::new("91150");
        for minutes in [90, 80, 70] {
            recorder
                .record(&isel, now() - TimeDelta::minutes(minutes))
                .unwrap();
        }
        recorder
            .record(&robo, now() - TimeDelta::hours(50))
            .unwrap();
        recorder
    }

    fn aliases() -> Aliases {
        [(SensorId::new("14693767"), "isel".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_latest_activity() {
        let service = QueryService::new(seeded()).with_aliases(aliases());
        let views = service.latest_activity().unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, SensorId::new("14693767"));
        assert_eq!(views[0].alias.as_deref(), Some("isel"));
        assert_eq!(views[0].history.len(), 3);
        assert_eq!(views[0].latest, Some(now() - TimeDelta::minutes(70)));
        assert_eq!(views[1].alias, None);
        assert_eq!(views[1].latest, Some(now() - TimeDelta::hours(50)));
    }

    #[test]
    fn test_history_length_limits_view() {
        let service = QueryService::new(seeded()).with_history_length(2);
        let views = service.latest_activity().unwrap();
        assert_eq!(
            views[0].history,
            vec![
                now() - TimeDelta::minutes(70),
                now() - TimeDelta::minutes(80)
            ]
        );
    }

    #[test]
    fn test_session_history_skips_inactive_sensors() {
        let service = QueryService::new(seeded()).with_aliases(aliases());
        let views = service.session_history(now()).unwrap();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].alias.as_deref(), Some("isel"));
        assert_eq!(
            views[0].events,
            vec![
                BoundaryView {
                    date: now() - TimeDelta::minutes(90),
                    event: BoundaryKind::Start,
                },
                BoundaryView {
                    date: now() - TimeDelta::minutes(70),
                    event: BoundaryKind::End,
                },
            ]
        );
    }

    #[test]
    fn test_empty_recorder() {
        let service = QueryService::new(Arc::new(SqliteRecorder::in_memory().unwrap()));
        assert!(service.latest_activity().unwrap().is_empty());
        assert!(service.session_history(now()).unwrap().is_empty());
    }
}
