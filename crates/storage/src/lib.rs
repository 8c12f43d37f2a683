//! Motion event storage.
//!
//! This crate owns the raw event log that presence sessions are derived
//! from. Every motion detection a sensor reports is recorded here as a
//! timestamp against the sensor's identifier, and nothing else: payloads are
//! never stored, and sessions are never persisted.
//!
//! # Core Concepts
//!
//! ## Recorder
//!
//! The [`Recorder`] trait is the only way in or out of the log. It appends
//! events, returns a sensor's bounded recent history (most recent first),
//! lists known sensors, and returns the ascending timestamps inside a time
//! window for session derivation.
//!
//! ## Backends
//!
//! - [`MemoryRecorder`] keeps a fixed number of events per sensor and drops
//!   the oldest on overflow.
//! - [`SqliteRecorder`] keeps every event in an append-only table and
//!   computes the bounded history at read time. It also holds the alias
//!   table used for display labels.
//!
//! Both backends order events by timestamp and break ties by insertion
//! order, so callers see identical results from either.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Recorder, SensorId, SqliteRecorder};
//! use chrono::Utc;
//!
//! let recorder = SqliteRecorder::open("events.db")?;
//! let sensor = SensorId::new("14693767");
//!
//! recorder.record(&sensor, Utc::now())?;
//!
//! for timestamp in recorder.recent_history(&sensor, 10)? {
//!     println!("{timestamp}");
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod memory;
mod recorder;
mod store;

pub use error::{Error, Result};
pub use event::{SensorEvent, SensorId};
pub use memory::MemoryRecorder;
pub use recorder::{DEFAULT_HISTORY_LENGTH, Recorder};
pub use store::SqliteRecorder;
