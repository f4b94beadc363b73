use meter_store::NewRecord;

use crate::pipeline::{Envelope, PipelineError, Transform};

/// Reject records the store would refuse, before they reach the sink.
///
/// The store validates again on append; checking here keeps rejects out of
/// the sink's retry path and gives them their own counter.
pub fn validate_record(env: Envelope<NewRecord>) -> Result<Envelope<NewRecord>, PipelineError> {
    env.payload.validate()?;
    Ok(env)
}

#[derive(Clone, Default)]
pub struct RecordValidation;

#[async_trait::async_trait]
impl Transform<NewRecord, NewRecord> for RecordValidation {
    async fn apply(&self, input: Envelope<NewRecord>) -> Result<Envelope<NewRecord>, PipelineError> {
        validate_record(input).inspect_err(|e| {
            tracing::warn!(error = %e, "dropping invalid record");
            metrics::counter!("validation_record_rejected_total").increment(1);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meter_store::ValidationError;

    #[test]
    fn record_validation_accepts_stamped_record() {
        let env = Envelope::new(NewRecord::at(1_700_000_000).with_tariff(1));
        assert!(validate_record(env).is_ok());
    }

    #[test]
    fn record_validation_rejects_unstamped_record() {
        let env = Envelope::new(NewRecord::default().with_max_power(1.0));
        let res = validate_record(env);
        assert!(matches!(
            res,
            Err(PipelineError::Rejected(ValidationError::MissingTimestamp))
        ));
    }

    #[test]
    fn record_validation_rejects_nan_reading() {
        let env = Envelope::new(NewRecord::at(1).with_delivered(f64::NAN, 1.0));
        assert!(matches!(
            validate_record(env),
            Err(PipelineError::Rejected(ValidationError::NonFinite { .. }))
        ));
    }
}
