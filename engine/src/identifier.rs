//! Human-readable identifier derivation.

use thiserror::Error;

const SEPARATOR: &str = "-";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("registry project carries no {0}; cannot derive an identifier")]
    MissingComponent(&'static str),
}

/// Derives the display identifier `WORKPACKAGE-PROJECTID-LOCATION-RECORDID`.
///
/// Pure over its inputs; an empty work-package or location signals a
/// misconfigured registry project and is an error, never defaulted.
pub fn derive_human_readable_id(
    work_package: &str,
    registry_project_id: i64,
    location: &str,
    record_id: i64,
) -> Result<String, IdentifierError> {
    if work_package.trim().is_empty() {
        return Err(IdentifierError::MissingComponent("work-package"));
    }
    if location.trim().is_empty() {
        return Err(IdentifierError::MissingComponent("location"));
    }

    Ok([
        work_package.to_uppercase(),
        registry_project_id.to_string(),
        location.to_uppercase(),
        record_id.to_string(),
    ]
    .join(SEPARATOR))
}
