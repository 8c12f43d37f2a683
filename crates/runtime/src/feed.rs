//! Line-oriented broker feed.
//!
//! Reads `topic [payload]` lines, the format printed by `mosquitto_sub -v`,
//! and forwards them to the ingestion queue. Connecting to the broker and
//! resubscribing after a drop are left to whatever produces the lines.

use std::io::BufRead;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{Notification, Result};

/// MQTT-style topic filter supporting `+` and a trailing `#`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    levels: Vec<String>,
}

impl TopicFilter {
    pub fn new(pattern: &str) -> Self {
        Self {
            levels: pattern.split('/').map(str::to_string).collect(),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            if level == "#" {
                return true;
            }
            match topic_levels.next() {
                Some(_) if level == "+" => {}
                Some(actual) if actual == level => {}
                _ => return false,
            }
        }
        topic_levels.next().is_none()
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.levels.join("/"))
    }
}

/// Forwards topic lines from a reader to the ingestion queue.
#[derive(Debug, Clone, Default)]
pub struct LineFeed {
    filter: Option<TopicFilter>,
}

impl LineFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only forward topics matching `filter`.
    pub fn with_filter(mut self, filter: TopicFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Read until end of input or until the queue closes.
    ///
    /// Blocks the calling thread, so run it on a thread of its own. Payloads
    /// are never decoded; a line whose topic is not UTF-8 is skipped.
    /// Returns the number of notifications forwarded.
    pub fn forward<B: BufRead>(
        &self,
        mut reader: B,
        tx: &mpsc::Sender<Notification>,
    ) -> Result<u64> {
        let mut line = Vec::new();
        let mut forwarded = 0;

        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let Some(raw) = line
                .split(u8::is_ascii_whitespace)
                .find(|token| !token.is_empty())
            else {
                continue;
            };
            let Ok(topic) = std::str::from_utf8(raw) else {
                warn!(
                    topic = %String::from_utf8_lossy(raw),
                    "skipping line with non UTF-8 topic"
                );
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.matches(topic) {
                    debug!(topic, %filter, "ignoring topic outside subscription");
                    continue;
                }
            }
            if tx.blocking_send(Notification::new(topic, Utc::now())).is_err() {
                info!("ingestion queue closed, stopping feed");
                break;
            }
            forwarded += 1;
        }
        Ok(forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::channel;

    #[test]
    fn test_filter_single_level_wildcard() {
        let filter = TopicFilter::new("/iot/cave/motion0/+");
        assert!(filter.matches("/iot/cave/motion0/14693767"));
        assert!(!filter.matches("/iot/cave/motion0/14693767/extra"));
        assert!(!filter.matches("/iot/cave/motion1/14693767"));
        assert!(!filter.matches("/iot/cave/motion0"));
    }

    #[test]
    fn test_filter_multi_level_wildcard() {
        let filter = TopicFilter::new("/iot/#");
        assert!(filter.matches("/iot/cave/motion0/91150"));
        assert!(!filter.matches("/home/cave"));
    }

    #[test]
    fn test_filter_exact() {
        let filter = TopicFilter::new("a/b");
        assert!(filter.matches("a/b"));
        assert!(!filter.matches("a/c"));
        assert_eq!(filter.to_string(), "a/b");
    }

    fn drain(mut rx: mpsc::Receiver<Notification>) -> Vec<String> {
        let mut topics = Vec::new();
        while let Some(notification) = rx.blocking_recv() {
            topics.push(notification.topic);
        }
        topics
    }

    #[test]
    fn test_forward_skips_blank_and_foreign_lines() {
        let input = b"/iot/cave/motion0/14693767 1\n\n/other/topic 1\n/iot/cave/motion0/91150\n";
        let (tx, rx) = channel(8);
        let feed = LineFeed::new().with_filter(TopicFilter::new("/iot/cave/motion0/+"));

        let forwarded = feed.forward(&input[..], &tx).unwrap();
        drop(tx);

        assert_eq!(forwarded, 2);
        assert_eq!(
            drain(rx),
            vec!["/iot/cave/motion0/14693767", "/iot/cave/motion0/91150"]
        );
    }

    #[test]
    fn test_forward_ignores_binary_payload() {
        let input = b"/iot/cave/motion0/a \xff\xfe\x00\n/iot/cave/motion0/b 1\n";
        let (tx, rx) = channel(8);

        let forwarded = LineFeed::new().forward(&input[..], &tx).unwrap();
        drop(tx);

        assert_eq!(forwarded, 2);
        assert_eq!(drain(rx), vec!["/iot/cave/motion0/a", "/iot/cave/motion0/b"]);
    }

    #[test]
    fn test_forward_skips_non_utf8_topic() {
        let input = b"/iot/cave/motion0/\xff 1\n/iot/cave/motion0/91150 1";
        let (tx, rx) = channel(8);

        let forwarded = LineFeed::new().forward(&input[..], &tx).unwrap();
        drop(tx);

        assert_eq!(forwarded, 1);
        assert_eq!(drain(rx), vec!["/iot/cave/motion0/91150"]);
    }

    #[test]
    fn test_forward_stops_when_queue_closes() {
        let input = b"a/1\na/2\n";
        let (tx, rx) = channel(8);
        drop(rx);

        let forwarded = LineFeed::new().forward(&input[..], &tx).unwrap();
        assert_eq!(forwarded, 0);
    }
}
