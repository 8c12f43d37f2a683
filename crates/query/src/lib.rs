//! Presence queries over recorded motion events.
//!
//! Two read-only views are served:
//!
//! - **Latest activity**: every known sensor with its bounded recent history
//!   (most recent first) and latest timestamp.
//! - **Session history**: for every sensor active in the trailing window,
//!   the START/END boundaries of its presence sessions, in the deriver's
//!   order (`END` before `START` at equal timestamps).
//!
//! [`QueryService`] composes the views; [`router`] exposes them over HTTP.

mod alias;
mod error;
mod http;
mod service;
mod view;

pub use alias::Aliases;
pub use error::{Error, Result};
pub use http::router;
pub use service::QueryService;
pub use view::{BoundaryView, SensorActivity, SessionHistory};
