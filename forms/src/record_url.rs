//! Deep link to a record's enrolment instrument, stored on registry subjects
//! as their external link.

use url::Url;

/// Builds the data-entry URL for a record's instrument within a project.
pub fn record_url(
    base: &Url,
    project_id: i64,
    record_id: i64,
    event: &str,
    instrument: &str,
) -> Result<Url, url::ParseError> {
    let mut address = base.as_str().trim_end_matches('/').to_owned();
    address.push_str(&format!(
        "/DataEntry/index.php?pid={project_id}&id={record_id}&event_id={event}&page={instrument}"
    ));
    Url::parse(&address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_data_entry_link() {
        let base = Url::parse("https://forms.example.org/").unwrap();
        let url = record_url(&base, 33, 7, "enrolment_arm_1", "subject_info").unwrap();
        assert_eq!(
            url.as_str(),
            "https://forms.example.org/DataEntry/index.php?pid=33&id=7&event_id=enrolment_arm_1&page=subject_info"
        );
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let with = Url::parse("https://forms.example.org/app/").unwrap();
        let without = Url::parse("https://forms.example.org/app").unwrap();
        assert_eq!(
            record_url(&with, 1, 2, "e", "i").unwrap(),
            record_url(&without, 1, 2, "e", "i").unwrap()
        );
    }
}
