//! Write-back of reconciliation results into the form system.
//!
//! A successful reconciliation leaves three fields on the record's enrolment
//! instrument: the registry subject login, the human-readable identifier,
//! and the instrument's completion status forced to COMPLETE. The write is
//! fire-and-forget from the registry's point of view; a failure never rolls
//! back the registry state, it only keeps the trigger retryable.

use crate::errors::EngineError;
use forms::trigger::{InstrumentStatus, instrument_status_field};
use forms::{FieldWrite, FormClient};
use registry::Subject;
use std::sync::Arc;

/// Form field receiving the registry subject login.
pub const SUBJECT_LOGIN_FIELD: &str = "subject_id";
/// Form field receiving the derived display identifier.
pub const HUMAN_READABLE_ID_FIELD: &str = "human_readable_id";

pub struct FeedbackWriter {
    form: Arc<dyn FormClient>,
}

impl FeedbackWriter {
    pub fn new(form: Arc<dyn FormClient>) -> Self {
        FeedbackWriter { form }
    }

    /// Writes the subject's identifiers back to the record. Returns whether
    /// the form system accepted the import.
    pub async fn write_back(
        &self,
        subject: &Subject,
        record_id: i64,
        enrolment_event: &str,
        instrument: &str,
    ) -> Result<bool, EngineError> {
        let writes = feedback_fields(subject, record_id, enrolment_event, instrument)?;
        Ok(self.form.write_fields(&writes, record_id).await?)
    }
}

/// The three rows written back on success.
pub fn feedback_fields(
    subject: &Subject,
    record_id: i64,
    enrolment_event: &str,
    instrument: &str,
) -> Result<Vec<FieldWrite>, EngineError> {
    let human_readable_id =
        subject
            .human_readable_id()
            .ok_or_else(|| EngineError::MissingHumanReadableId {
                login: subject.login.clone(),
            })?;

    let row = |field_name: &str, value: &str| FieldWrite {
        record: record_id.to_string(),
        redcap_event_name: enrolment_event.to_owned(),
        field_name: field_name.to_owned(),
        value: value.to_owned(),
    };

    Ok(vec![
        row(SUBJECT_LOGIN_FIELD, &subject.login),
        row(HUMAN_READABLE_ID_FIELD, human_readable_id),
        row(
            &instrument_status_field(instrument),
            &InstrumentStatus::Complete.code().to_string(),
        ),
    ])
}
