//! Display labels for sensors.

use std::collections::HashMap;

use storage::SensorId;

/// Read-only sensor label lookup.
#[derive(Debug, Clone, Default)]
pub struct Aliases {
    labels: HashMap<SensorId, String>,
}

impl Aliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add labels that are not already present.
    pub fn merge(mut self, labels: impl IntoIterator<Item = (SensorId, String)>) -> Self {
        for (id, label) in labels {
            self.labels.entry(id).or_insert(label);
        }
        self
    }

    pub fn get(&self, sensor_id: &SensorId) -> Option<&str> {
        self.labels.get(sensor_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(SensorId, String)> for Aliases {
    fn from_iter<I: IntoIterator<Item = (SensorId, String)>>(iter: I) -> Self {
        Self {
            labels: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_label_wins_on_merge() {
        let aliases: Aliases = [(SensorId::new("91150"), "robo".to_string())]
            .into_iter()
            .collect();
        let aliases = aliases.merge([
            (SensorId::new("91150"), "other".to_string()),
            (SensorId::new("14693932"), "lounge".to_string()),
        ]);

        assert_eq!(aliases.len(), 2);
        assert_eq!(aliases.get(&SensorId::new("91150")), Some("robo"));
        assert_eq!(aliases.get(&SensorId::new("14693932")), Some("lounge"));
        assert_eq!(aliases.get(&SensorId::new("unknown")), None);
    }
}
