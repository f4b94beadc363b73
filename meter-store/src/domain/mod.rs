mod field;
mod record;

pub use field::{Field, FieldFilter, UnknownField};
pub use record::{NewRecord, Record};
