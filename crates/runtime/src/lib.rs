//! Presence runtime: event ingestion and session derivation.
//!
//! This crate sits between the broker and the query layer. It turns raw
//! notifications into recorded events and, on demand, turns recorded events
//! back into presence sessions.
//!
//! # Overview
//!
//! - **Ingestor**: extracts the sensor id from a notification's topic and
//!   records the arrival time. Runs as a consumer of a bounded queue, inline
//!   or sharded across workers by sensor.
//! - **LineFeed**: reads `topic payload` lines from a blocking reader on its
//!   own thread and feeds the queue, filtered by an MQTT-style subscription.
//! - **SessionDeriver**: recomputes session boundaries for a trailing window
//!   from the recorder on every call. Nothing is cached.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use runtime::{Ingestor, SessionDeriver};
//! use storage::{MemoryRecorder, SensorId};
//!
//! # fn example() -> runtime::Result<()> {
//! let recorder = Arc::new(MemoryRecorder::default());
//! let ingestor = Ingestor::new(Arc::clone(&recorder));
//!
//! ingestor.on_message("/iot/cave/motion0/14693767", Utc::now())?;
//!
//! let deriver = SessionDeriver::default();
//! let sensor = SensorId::new("14693767");
//! for boundary in deriver.derive(recorder.as_ref(), &sensor, Utc::now())? {
//!     println!("{} {}", boundary.timestamp, boundary.kind);
//! }
//! # Ok(())
//! # }
//! ```

pub mod derive;
mod error;
pub mod feed;
pub mod ingest;

pub use derive::{BoundaryKind, SessionBoundary, SessionDeriver, SessionSpan};
pub use error::{Error, Result};
pub use feed::{LineFeed, TopicFilter};
pub use ingest::{IngestStats, Ingestor, Notification, parse_sensor_id};
