pub mod config;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod reporter;
pub mod retention;
pub mod sinks;
pub mod sources;
pub mod telegram;
pub mod transform;

pub use pipeline::{Envelope, Pipeline};
