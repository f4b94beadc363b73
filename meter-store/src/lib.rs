//! Durable record model for electricity-meter telemetry.
//!
//! A [`RecordStore`] keeps one SQLite table of [`Record`]s, keyed by a
//! store-assigned id and indexed by timestamp. Records are append-only:
//! they are created by [`RecordStore::append`], read by id or by timestamp
//! range, and removed only by [`RecordStore::purge`].

pub mod db;
pub mod domain;
pub mod error;
mod store;

pub use domain::{Field, FieldFilter, NewRecord, Record, UnknownField};
pub use error::{StoreError, ValidationError};
pub use store::{RecordStore, RecordStream, StoreConfig};
