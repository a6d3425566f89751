//! Registry data model.
//!
//! Projects and subjects are read and written as JSON. A project is linked
//! to a form-system project through its attribute tags; both the external
//! project id and the external project URL must match the trigger's origin
//! before the project is trusted for reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

/// Attribute tag naming the equivalent form-system project URL.
pub const EXTERNAL_PROJECT_URL_KEY: &str = "External-project-url";
/// Attribute tag naming the equivalent form-system project identifier.
pub const EXTERNAL_PROJECT_ID_KEY: &str = "External-project-id";
/// Attribute tag naming the project's work-package.
pub const WORK_PACKAGE_KEY: &str = "Work-package";
/// Subject attribute holding the derived display identifier.
pub const HUMAN_READABLE_IDENTIFIER_KEY: &str = "Human-readable-identifier";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Project {
    pub id: i64,
    #[serde(rename = "projectName")]
    pub project_name: String,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Project {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn work_package(&self) -> Option<&str> {
        self.attribute(WORK_PACKAGE_KEY)
    }

    pub fn external_project_id(&self) -> Option<i64> {
        self.attribute(EXTERNAL_PROJECT_ID_KEY)?.parse().ok()
    }

    pub fn external_project_url(&self) -> Option<Url> {
        self.attribute(EXTERNAL_PROJECT_URL_KEY)
            .and_then(|v| Url::parse(v).ok())
    }

    /// Whether this project's linkage tags point at the given form-system
    /// origin. Both the id and the URL must match.
    pub fn is_linked_to(&self, form_url: &Url, form_project_id: i64) -> bool {
        let id_matches = self.external_project_id() == Some(form_project_id);
        let url_matches = self
            .external_project_url()
            .is_some_and(|u| urls_equal(&u, form_url));
        id_matches && url_matches
    }
}

/// Trailing-slash-insensitive URL comparison.
pub fn urls_equal(a: &Url, b: &Url) -> bool {
    a.as_str().trim_end_matches('/') == b.as_str().trim_end_matches('/')
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubjectStatus {
    Deactivated,
    Activated,
    Discontinued,
    Invalid,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Subject {
    /// Registry-assigned primary key; absent until the subject is created.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<i64>,
    pub login: String,
    #[serde(rename = "externalId", default)]
    pub external_id: String,
    #[serde(rename = "externalLink", default, skip_serializing_if = "Option::is_none")]
    pub external_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default = "default_status")]
    pub status: SubjectStatus,
}

fn default_status() -> SubjectStatus {
    SubjectStatus::Activated
}

impl Subject {
    pub fn human_readable_id(&self) -> Option<&str> {
        self.attributes
            .get(HUMAN_READABLE_IDENTIFIER_KEY)
            .map(String::as_str)
    }
}
