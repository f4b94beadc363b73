pub mod p1_serial;
pub mod p1_telegram;
pub mod record_backfill_file;
pub mod record_csv_file;

pub use p1_serial::P1SerialSource;
pub use p1_telegram::P1CaptureFileSource;
pub use record_backfill_file::RecordBackfillFileSource;
pub use record_csv_file::RecordCsvFileSource;
