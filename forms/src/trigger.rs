//! Webhook trigger parsing.
//!
//! The form system fires a request at the configured endpoint on every form
//! or survey save. The body is URL-encoded and carries, at minimum, the
//! project id, the record name, the instrument name, and the instrument's
//! `<instrument>_complete` status field. Longitudinal projects also send the
//! unique event name.

use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("trigger is missing required parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("trigger parameter `{field}` has invalid value `{value}`")]
    InvalidParameter { field: &'static str, value: String },

    #[error("trigger URL could not be parsed: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Completion status of a data-entry instrument or survey.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstrumentStatus {
    Incomplete,
    Unverified,
    Complete,
}

impl InstrumentStatus {
    pub fn from_code(code: &str) -> Result<Self, TriggerError> {
        match code {
            "0" => Ok(InstrumentStatus::Incomplete),
            "1" => Ok(InstrumentStatus::Unverified),
            "2" => Ok(InstrumentStatus::Complete),
            other => Err(TriggerError::InvalidParameter {
                field: "instrument status",
                value: other.to_string(),
            }),
        }
    }

    pub const fn code(&self) -> u8 {
        match self {
            InstrumentStatus::Incomplete => 0,
            InstrumentStatus::Unverified => 1,
            InstrumentStatus::Complete => 2,
        }
    }
}

impl fmt::Display for InstrumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Name of the status field for the given instrument.
pub fn instrument_status_field(instrument: &str) -> String {
    format!("{instrument}_complete")
}

/// One parsed webhook event. Built once per inbound request, never mutated.
#[derive(Clone, Debug)]
pub struct Trigger {
    pub project_id: i64,
    pub record_id: i64,
    pub instrument: String,
    pub event_name: Option<String>,
    pub username: Option<String>,
    pub data_access_group: Option<String>,
    pub status: Option<InstrumentStatus>,
    /// Base address of the form-system instance that fired the trigger.
    pub form_url: Url,
    pub project_url: Option<Url>,
}

impl Trigger {
    /// Parses the URL-encoded webhook body.
    pub fn from_body(body: &str) -> Result<Self, TriggerError> {
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.trim().to_owned()))
            .collect();

        let get = |key: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .filter(|v| !v.is_empty())
        };

        let project_id = parse_int("project_id", get("project_id"))?;
        let record_id = parse_int("record", get("record"))?;
        let instrument = get("instrument")
            .ok_or(TriggerError::MissingParameter("instrument"))?
            .to_owned();

        // The instance base URL is the canonical origin. When only the
        // project URL is sent, the base is recovered by truncating its path.
        let project_url = get("project_url").map(Url::parse).transpose()?;
        let form_url = match get("redcap_url") {
            Some(v) => Url::parse(v)?,
            None => project_url
                .as_ref()
                .and_then(base_from_project_url)
                .ok_or(TriggerError::MissingParameter("redcap_url"))?,
        };

        let status = get(&instrument_status_field(&instrument))
            .map(InstrumentStatus::from_code)
            .transpose()?;

        Ok(Trigger {
            project_id,
            record_id,
            instrument,
            event_name: get("redcap_event_name").map(str::to_owned),
            username: get("username").map(str::to_owned),
            data_access_group: get("redcap_data_access_group").map(str::to_owned),
            status,
            form_url,
            project_url,
        })
    }

    /// Whether this trigger belongs to the configured enrolment event.
    /// Non-longitudinal projects send no event name; they never match.
    pub fn is_enrolment(&self, enrolment_event: &str) -> bool {
        self.event_name
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(enrolment_event))
    }
}

fn parse_int(field: &'static str, value: Option<&str>) -> Result<i64, TriggerError> {
    let raw = value.ok_or(TriggerError::MissingParameter(field))?;
    raw.parse().map_err(|_| TriggerError::InvalidParameter {
        field,
        value: raw.to_string(),
    })
}

fn base_from_project_url(project_url: &Url) -> Option<Url> {
    let s = project_url.as_str();
    s.find("index.php?")
        .and_then(|idx| Url::parse(&s[..idx]).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "redcap_url=https%3A%2F%2Fforms.example.org%2F&\
         project_url=https%3A%2F%2Fforms.example.org%2Fredcap_v8.5.0%2Findex.php%3Fpid%3D33&\
         project_id=33&username=alice&record=7&redcap_event_name=enrolment_arm_1&\
         instrument=subject_info&subject_info_complete=2";

    #[test]
    fn parses_full_body() {
        let trigger = Trigger::from_body(BODY).unwrap();
        assert_eq!(trigger.project_id, 33);
        assert_eq!(trigger.record_id, 7);
        assert_eq!(trigger.instrument, "subject_info");
        assert_eq!(trigger.event_name.as_deref(), Some("enrolment_arm_1"));
        assert_eq!(trigger.username.as_deref(), Some("alice"));
        assert_eq!(trigger.status, Some(InstrumentStatus::Complete));
        assert_eq!(trigger.form_url.as_str(), "https://forms.example.org/");
    }

    #[test]
    fn base_recovered_from_project_url_when_instance_url_absent() {
        let body = "project_url=https%3A%2F%2Fforms.example.org%2Fredcap_v8.5.0%2Findex.php%3Fpid%3D33&\
             project_id=33&record=7&instrument=subject_info";
        let trigger = Trigger::from_body(body).unwrap();
        assert_eq!(
            trigger.form_url.as_str(),
            "https://forms.example.org/redcap_v8.5.0/"
        );
    }

    #[test]
    fn falls_back_to_instance_url_without_project_url() {
        let body = "redcap_url=https%3A%2F%2Fforms.example.org%2F&project_id=4&\
             record=12&instrument=consent&consent_complete=0";
        let trigger = Trigger::from_body(body).unwrap();
        assert_eq!(trigger.form_url.as_str(), "https://forms.example.org/");
        assert_eq!(trigger.status, Some(InstrumentStatus::Incomplete));
        assert_eq!(trigger.event_name, None);
    }

    #[test]
    fn enrolment_check_is_case_insensitive() {
        let trigger = Trigger::from_body(BODY).unwrap();
        assert!(trigger.is_enrolment("Enrolment_arm_1"));
        assert!(!trigger.is_enrolment("followup_arm_1"));
    }

    #[test]
    fn missing_record_is_an_error() {
        let body = "redcap_url=https%3A%2F%2Fforms.example.org%2F&project_id=4&instrument=consent";
        let err = Trigger::from_body(body).unwrap_err();
        assert!(matches!(err, TriggerError::MissingParameter("record")));
    }

    #[test]
    fn non_numeric_record_is_an_error() {
        let body =
            "redcap_url=https%3A%2F%2Fforms.example.org%2F&project_id=4&record=abc&instrument=x";
        let err = Trigger::from_body(body).unwrap_err();
        assert!(matches!(
            err,
            TriggerError::InvalidParameter { field: "record", .. }
        ));
    }

    #[test]
    fn unknown_status_code_is_an_error() {
        let body = "redcap_url=https%3A%2F%2Fforms.example.org%2F&project_id=4&record=1&\
             instrument=consent&consent_complete=9";
        assert!(Trigger::from_body(body).is_err());
    }

    #[test]
    fn status_field_naming() {
        assert_eq!(instrument_status_field("subject_info"), "subject_info_complete");
    }
}
