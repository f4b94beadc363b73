use time::OffsetDateTime;

use super::Field;
use crate::error::ValidationError;

/// A committed meter observation.
///
/// Records are immutable once the store hands them out: there are no setters,
/// and corrections are appended as new records.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Record {
    id: i64,
    timestamp: i64,
    delivered_1: Option<f64>,
    delivered_2: Option<f64>,
    received_1: Option<f64>,
    received_2: Option<f64>,
    current_tariff: Option<i32>,
    actual_delivered: Option<f64>,
    actual_received: Option<f64>,
    max_power: Option<f64>,
    switch_mode: Option<i32>,
}

impl Record {
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Seconds since the Unix epoch, UTC.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn delivered_1(&self) -> Option<f64> {
        self.delivered_1
    }

    pub fn delivered_2(&self) -> Option<f64> {
        self.delivered_2
    }

    pub fn received_1(&self) -> Option<f64> {
        self.received_1
    }

    pub fn received_2(&self) -> Option<f64> {
        self.received_2
    }

    pub fn current_tariff(&self) -> Option<i32> {
        self.current_tariff
    }

    pub fn actual_delivered(&self) -> Option<f64> {
        self.actual_delivered
    }

    pub fn actual_received(&self) -> Option<f64> {
        self.actual_received
    }

    pub fn max_power(&self) -> Option<f64> {
        self.max_power
    }

    pub fn switch_mode(&self) -> Option<i32> {
        self.switch_mode
    }

    /// The payload of this record without its surrogate key, e.g. as the
    /// starting point for appending a correction.
    pub fn to_new_record(&self) -> NewRecord {
        NewRecord {
            timestamp: Some(self.timestamp),
            delivered_1: self.delivered_1,
            delivered_2: self.delivered_2,
            received_1: self.received_1,
            received_2: self.received_2,
            current_tariff: self.current_tariff,
            actual_delivered: self.actual_delivered,
            actual_received: self.actual_received,
            max_power: self.max_power,
            switch_mode: self.switch_mode,
        }
    }
}

/// Input to [`RecordStore::append`](crate::RecordStore::append).
///
/// `timestamp` is optional here only so that a sample without one can be
/// represented and rejected; the store never persists such a record.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct NewRecord {
    pub timestamp: Option<i64>,
    pub delivered_1: Option<f64>,
    pub delivered_2: Option<f64>,
    pub received_1: Option<f64>,
    pub received_2: Option<f64>,
    pub current_tariff: Option<i32>,
    pub actual_delivered: Option<f64>,
    pub actual_received: Option<f64>,
    pub max_power: Option<f64>,
    pub switch_mode: Option<i32>,
}

impl NewRecord {
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::default()
        }
    }

    pub fn with_delivered(mut self, tariff_1: f64, tariff_2: f64) -> Self {
        self.delivered_1 = Some(tariff_1);
        self.delivered_2 = Some(tariff_2);
        self
    }

    pub fn with_received(mut self, tariff_1: f64, tariff_2: f64) -> Self {
        self.received_1 = Some(tariff_1);
        self.received_2 = Some(tariff_2);
        self
    }

    pub fn with_tariff(mut self, tariff: i32) -> Self {
        self.current_tariff = Some(tariff);
        self
    }

    pub fn with_actual(mut self, delivered: f64, received: f64) -> Self {
        self.actual_delivered = Some(delivered);
        self.actual_received = Some(received);
        self
    }

    pub fn with_max_power(mut self, max_power: f64) -> Self {
        self.max_power = Some(max_power);
        self
    }

    pub fn with_switch_mode(mut self, switch_mode: i32) -> Self {
        self.switch_mode = Some(switch_mode);
        self
    }

    /// True when no optional register was reported.
    pub fn is_empty(&self) -> bool {
        self.real_values().iter().all(|(_, v)| v.is_none())
            && self.current_tariff.is_none()
            && self.switch_mode.is_none()
    }

    /// Checks the record against the store's rules and returns the timestamp
    /// that will be persisted.
    ///
    /// Rules:
    /// - `timestamp` must be present and representable as a UTC instant.
    /// - real-valued registers must be finite. SQLite stores NaN as NULL, which
    ///   would turn a reading into an absent one.
    pub fn validate(&self) -> Result<i64, ValidationError> {
        let timestamp = self.timestamp.ok_or(ValidationError::MissingTimestamp)?;

        OffsetDateTime::from_unix_timestamp(timestamp)
            .map_err(|_| ValidationError::TimestampOutOfRange(timestamp))?;

        for (field, value) in self.real_values() {
            match value {
                Some(v) if !v.is_finite() => {
                    return Err(ValidationError::NonFinite { field, value: v });
                }
                _ => {}
            }
        }

        Ok(timestamp)
    }

    fn real_values(&self) -> [(Field, Option<f64>); 7] {
        [
            (Field::Delivered1, self.delivered_1),
            (Field::Delivered2, self.delivered_2),
            (Field::Received1, self.received_1),
            (Field::Received2, self.received_2),
            (Field::ActualDelivered, self.actual_delivered),
            (Field::ActualReceived, self.actual_received),
            (Field::MaxPower, self.max_power),
        ]
    }
}
