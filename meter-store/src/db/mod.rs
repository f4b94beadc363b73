pub mod record_queries;
pub mod schema;
