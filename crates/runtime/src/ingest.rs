//! Event ingestion from broker notifications.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use storage::{Recorder, SensorEvent, SensorId};
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn};

use crate::{Error, Result};

/// Queue depth of each worker when ingesting with more than one worker.
const WORKER_QUEUE: usize = 64;

type Shutdown = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A message delivered by the broker. Payload content is never carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub arrival: DateTime<Utc>,
}

impl Notification {
    pub fn new(topic: impl Into<String>, arrival: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            arrival,
        }
    }
}

/// Counters reported when an ingestion loop finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Events written to the recorder.
    pub recorded: u64,
    /// Messages dropped for a malformed topic or a failed write.
    pub dropped: u64,
}

impl IngestStats {
    fn merge(&mut self, other: IngestStats) {
        self.recorded += other.recorded;
        self.dropped += other.dropped;
    }

    fn count<T>(&mut self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.recorded += 1,
            Err(_) => self.dropped += 1,
        }
    }
}

/// Create the bounded queue between the broker and the ingestor.
pub fn channel(capacity: usize) -> (mpsc::Sender<Notification>, mpsc::Receiver<Notification>) {
    mpsc::channel(capacity.max(1))
}

/// Extract the sensor id: the final `/`-separated segment of the topic.
pub fn parse_sensor_id(topic: &str) -> Result<SensorId> {
    match topic.rsplit('/').next() {
        Some(id) if !id.is_empty() => Ok(SensorId::new(id)),
        _ => Err(Error::MalformedTopic(topic.to_string())),
    }
}

/// Turns broker notifications into recorded events.
pub struct Ingestor<R: ?Sized> {
    recorder: Arc<R>,
}

impl<R: ?Sized> Clone for Ingestor<R> {
    fn clone(&self) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
        }
    }
}

impl<R: Recorder + ?Sized + 'static> Ingestor<R> {
    pub fn new(recorder: Arc<R>) -> Self {
        Self { recorder }
    }

    /// Record one notification and return the event it produced.
    ///
    /// Failures are logged and returned; nothing is retried. This calls the
    /// recorder directly, so async callers should go through [`Ingestor::run`].
    pub fn on_message(&self, topic: &str, arrival: DateTime<Utc>) -> Result<SensorEvent> {
        let sensor_id = parse_sensor_id(topic).inspect_err(|_| {
            warn!(topic, "dropping message with malformed topic");
        })?;
        let event = SensorEvent::new(sensor_id, arrival);
        self.store(&event)?;
        Ok(event)
    }

    fn store(&self, event: &SensorEvent) -> Result<()> {
        match self.recorder.record(&event.sensor_id, event.timestamp) {
            Ok(()) => {
                info!(sensor = %event.sensor_id, "logged activity");
                Ok(())
            }
            Err(e) => {
                warn!(sensor = %event.sensor_id, error = %e, "failed to record event");
                Err(e.into())
            }
        }
    }

    async fn store_blocking(&self, event: SensorEvent) -> Result<()> {
        let ingestor = self.clone();
        task::spawn_blocking(move || ingestor.store(&event)).await?
    }

    /// Consume notifications until every sender is dropped.
    ///
    /// With more than one worker, messages are sharded by sensor id so a
    /// sensor's messages are still recorded in arrival order.
    pub async fn run(self, rx: mpsc::Receiver<Notification>, workers: usize) -> IngestStats {
        self.run_with(rx, workers, None).await
    }

    /// Like [`Ingestor::run`], but once `shutdown` completes the queue is
    /// closed to new messages and the ones already queued are drained.
    pub async fn run_until<F>(
        self,
        rx: mpsc::Receiver<Notification>,
        workers: usize,
        shutdown: F,
    ) -> IngestStats
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.run_with(rx, workers, Some(Box::pin(shutdown))).await
    }

    async fn run_with(
        self,
        rx: mpsc::Receiver<Notification>,
        workers: usize,
        shutdown: Option<Shutdown>,
    ) -> IngestStats {
        let stats = if workers <= 1 {
            self.run_inline(rx, shutdown).await
        } else {
            self.run_sharded(rx, workers, shutdown).await
        };
        info!(
            recorded = stats.recorded,
            dropped = stats.dropped,
            "ingestion stopped"
        );
        stats
    }

    async fn run_inline(
        &self,
        mut rx: mpsc::Receiver<Notification>,
        mut shutdown: Option<Shutdown>,
    ) -> IngestStats {
        let mut stats = IngestStats::default();
        while let Some(notification) = next_notification(&mut rx, &mut shutdown).await {
            let outcome = match parse_sensor_id(&notification.topic) {
                Ok(sensor_id) => {
                    self.store_blocking(SensorEvent::new(sensor_id, notification.arrival))
                        .await
                }
                Err(e) => {
                    warn!(topic = %notification.topic, "dropping message with malformed topic");
                    Err(e)
                }
            };
            stats.count(&outcome);
        }
        stats
    }

    async fn run_sharded(
        &self,
        mut rx: mpsc::Receiver<Notification>,
        workers: usize,
        mut shutdown: Option<Shutdown>,
    ) -> IngestStats {
        let mut shards = Vec::with_capacity(workers);
        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let (tx, mut shard_rx) = mpsc::channel::<SensorEvent>(WORKER_QUEUE);
            shards.push(tx);
            let ingestor = self.clone();
            tasks.spawn(async move {
                let mut stats = IngestStats::default();
                while let Some(event) = shard_rx.recv().await {
                    let outcome = ingestor.store_blocking(event).await;
                    if let Err(Error::Task(e)) = &outcome {
                        error!(worker, error = %e, "recorder call panicked");
                    }
                    stats.count(&outcome);
                }
                debug!(worker, "ingest worker finished");
                stats
            });
        }

        let mut stats = IngestStats::default();
        while let Some(notification) = next_notification(&mut rx, &mut shutdown).await {
            let sensor_id = match parse_sensor_id(&notification.topic) {
                Ok(id) => id,
                Err(_) => {
                    warn!(topic = %notification.topic, "dropping message with malformed topic");
                    stats.dropped += 1;
                    continue;
                }
            };
            let shard = shard_for(&sensor_id, workers);
            let event = SensorEvent::new(sensor_id, notification.arrival);
            if shards[shard].send(event).await.is_err() {
                error!(worker = shard, "ingest worker stopped unexpectedly");
                stats.dropped += 1;
            }
        }

        drop(shards);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(worker_stats) => stats.merge(worker_stats),
                Err(e) => error!(error = %e, "ingest worker panicked"),
            }
        }
        stats
    }
}

/// Next queued notification. After `shutdown` fires the queue is closed, so
/// this keeps returning what was already queued and then `None`.
async fn next_notification(
    rx: &mut mpsc::Receiver<Notification>,
    shutdown: &mut Option<Shutdown>,
) -> Option<Notification> {
    let fired = match shutdown.as_mut() {
        Some(signal) => tokio::select! {
            notification = rx.recv() => return notification,
            () = signal => true,
        },
        None => false,
    };
    if fired {
        info!("closing ingestion queue");
        rx.close();
        *shutdown = None;
    }
    rx.recv().await
}

fn shard_for(sensor_id: &SensorId, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    sensor_id.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, mpsc as std_mpsc};
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use storage::MemoryRecorder;
    use tokio::sync::oneshot;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_final_segment() {
        assert_eq!(
            parse_sensor_id("/iot/cave/motion0/14693767").unwrap(),
            SensorId::new("14693767")
        );
        assert_eq!(parse_sensor_id("91150").unwrap(), SensorId::new("91150"));
    }

    #[test]
    fn test_parse_rejects_missing_segment() {
        assert!(matches!(parse_sensor_id(""), Err(Error::MalformedTopic(_))));
        assert!(matches!(
            parse_sensor_id("/iot/cave/motion0/"),
            Err(Error::MalformedTopic(_))
        ));
    }

    #[test]
    fn test_on_message_records() {
        let recorder = Arc::new(MemoryRecorder::default());
        let ingestor = Ingestor::new(Arc::clone(&recorder));

        let event = ingestor
            .on_message("/iot/cave/motion0/14693767", t0())
            .unwrap();

        assert_eq!(event, SensorEvent::new(SensorId::new("14693767"), t0()));
        assert_eq!(
            recorder.recent_history(&event.sensor_id, 10).unwrap(),
            vec![t0()]
        );
    }

    #[test]
    fn test_malformed_topic_is_not_recorded() {
        let recorder = Arc::new(MemoryRecorder::default());
        let ingestor = Ingestor::new(Arc::clone(&recorder));

        assert!(ingestor.on_message("/iot/cave/motion0/", t0()).is_err());
        assert!(recorder.known_sensors().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_inline_counts_and_isolates_failures() {
        let recorder = Arc::new(MemoryRecorder::default());
        let ingestor = Ingestor::new(Arc::clone(&recorder));
        let (tx, rx) = channel(8);

        tx.send(Notification::new("/iot/cave/motion0/a", t0()))
            .await
            .unwrap();
        tx.send(Notification::new("/iot/cave/motion0/", t0()))
            .await
            .unwrap();
        tx.send(Notification::new(
            "/iot/cave/motion0/a",
            t0() + TimeDelta::seconds(1),
        ))
        .await
        .unwrap();
        drop(tx);

        let stats = ingestor.run(rx, 1).await;
        assert_eq!(
            stats,
            IngestStats {
                recorded: 2,
                dropped: 1
            }
        );
        assert_eq!(
            recorder
                .recent_history(&SensorId::new("a"), 10)
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_run_sharded_keeps_per_sensor_order() {
        let recorder = Arc::new(MemoryRecorder::new(100));
        let ingestor = Ingestor::new(Arc::clone(&recorder));
        let (tx, rx) = channel(16);

        let handle = tokio::spawn(ingestor.run(rx, 4));
        for i in 0..30 {
            let topic = format!("/iot/cave/motion0/sensor-{}", i % 5);
            tx.send(Notification::new(topic, t0() + TimeDelta::seconds(i)))
                .await
                .unwrap();
        }
        tx.send(Notification::new("", t0())).await.unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.recorded, 30);
        assert_eq!(stats.dropped, 1);

        let known = recorder.known_sensors().unwrap();
        assert_eq!(known.len(), 5);
        for id in &known {
            let history = recorder.recent_history(id, 100).unwrap();
            assert_eq!(history.len(), 6);
            assert!(history.windows(2).all(|w| w[0] > w[1]));
        }
    }

    #[tokio::test]
    async fn test_run_until_drains_queue_on_shutdown() {
        let recorder = Arc::new(MemoryRecorder::default());
        let ingestor = Ingestor::new(Arc::clone(&recorder));
        let (tx, rx) = channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        for i in 0..3 {
            tx.send(Notification::new(
                "/iot/cave/motion0/a",
                t0() + TimeDelta::seconds(i),
            ))
            .await
            .unwrap();
        }
        let handle = tokio::spawn(ingestor.run_until(rx, 1, async move {
            let _ = stop_rx.await;
        }));
        stop_tx.send(()).unwrap();

        // The sender is still alive; shutdown alone ends the run.
        let stats = handle.await.unwrap();
        assert_eq!(stats.recorded, 3);
        assert!(
            tx.send(Notification::new("/iot/cave/motion0/a", t0()))
                .await
                .is_err()
        );
        assert_eq!(
            recorder
                .recent_history(&SensorId::new("a"), 10)
                .unwrap()
                .len(),
            3
        );
    }

    /// Holds every `record` call until the test releases it.
    struct Gated {
        inner: MemoryRecorder,
        started: AtomicBool,
        release: Mutex<std_mpsc::Receiver<()>>,
    }

    impl Recorder for Gated {
        fn record(&self, sensor_id: &SensorId, timestamp: DateTime<Utc>) -> storage::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            let release = self.release.lock().unwrap();
            if release.recv_timeout(Duration::from_secs(2)).is_err() {
                return Err(storage::Error::Timestamp(
                    DateTime::parse_from_rfc3339("never released").unwrap_err(),
                ));
            }
            self.inner.record(sensor_id, timestamp)
        }

        fn recent_history(
            &self,
            sensor_id: &SensorId,
            limit: usize,
        ) -> storage::Result<Vec<DateTime<Utc>>> {
            self.inner.recent_history(sensor_id, limit)
        }

        fn known_sensors(&self) -> storage::Result<BTreeSet<SensorId>> {
            self.inner.known_sensors()
        }

        fn events_in_window(
            &self,
            sensor_id: &SensorId,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> storage::Result<Vec<DateTime<Utc>>> {
            self.inner.events_in_window(sensor_id, from, to)
        }
    }

    #[tokio::test]
    async fn test_recorder_calls_leave_runtime_free() {
        for workers in [1, 3] {
            let (release_tx, release_rx) = std_mpsc::channel();
            let recorder = Arc::new(Gated {
                inner: MemoryRecorder::default(),
                started: AtomicBool::new(false),
                release: Mutex::new(release_rx),
            });
            let (tx, rx) = channel(8);
            let handle = tokio::spawn(Ingestor::new(Arc::clone(&recorder)).run(rx, workers));

            tx.send(Notification::new("/iot/cave/motion0/a", t0()))
                .await
                .unwrap();
            drop(tx);

            // Only reachable while `record` is blocked if it is off this thread.
            while !recorder.started.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            release_tx.send(()).unwrap();

            let stats = handle.await.unwrap();
            assert_eq!(
                stats,
                IngestStats {
                    recorded: 1,
                    dropped: 0
                },
                "workers = {workers}"
            );
        }
    }

    #[test]
    fn test_shard_is_stable() {
        let id = SensorId::new("14694519");
        assert_eq!(shard_for(&id, 4), shard_for(&id, 4));
        assert!(shard_for(&id, 4) < 4);
    }
}
