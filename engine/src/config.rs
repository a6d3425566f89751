use registry::RegistryConnection;
use registry::types::urls_equal;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Registry client id cannot be empty")]
    EmptyClientId,

    #[error("No project links configured")]
    NoProjects,

    #[error("Duplicate project link for {form_url} project {form_project_id}")]
    DuplicateProjectLink { form_url: String, form_project_id: i64 },

    #[error("Project link for {0} has an empty registry project name")]
    EmptyRegistryProject(String),

    #[error("Project link for {0} has an empty enrolment event")]
    EmptyEnrolmentEvent(String),

    #[error("Project link for {0} has an empty enrolment instrument")]
    EmptyInstrument(String),

    #[error("Project link for {0} has an empty form API token")]
    EmptyFormToken(String),

    #[error("Project link for {0} has an empty attribute field name")]
    EmptyAttributeField(String),
}

/// Trigger service configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for the webhook endpoint
    pub listener: Listener,
    /// Listener for health/readiness endpoints
    pub admin_listener: Listener,
    /// Registry instance and credentials
    pub registry: RegistryConnection,
    /// Form-system projects bridged into the registry
    pub projects: Vec<ProjectLink>,
    #[serde(default)]
    pub http: HttpTimeouts,
}

impl Config {
    /// Validates the service configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.registry.client_id.is_empty() {
            return Err(ValidationError::EmptyClientId);
        }
        if self.registry.base_url.scheme() != "https" {
            tracing::warn!(
                url = %self.registry.base_url,
                "Registry connection is not using an encrypted connection"
            );
        }

        if self.projects.is_empty() {
            return Err(ValidationError::NoProjects);
        }

        let mut seen = HashSet::new();
        for link in &self.projects {
            link.validate()?;
            if !seen.insert((normalized(&link.form_url), link.form_project_id)) {
                return Err(ValidationError::DuplicateProjectLink {
                    form_url: link.form_url.to_string(),
                    form_project_id: link.form_project_id,
                });
            }
        }

        Ok(())
    }

    /// Finds the link configured for a trigger's origin, if any.
    pub fn find_link(&self, form_url: &Url, form_project_id: i64) -> Option<&ProjectLink> {
        self.projects.iter().find(|link| {
            link.form_project_id == form_project_id && urls_equal(&link.form_url, form_url)
        })
    }
}

fn normalized(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_owned()
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// One bridged form-system project.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ProjectLink {
    /// Base URL of the form-system instance
    pub form_url: Url,
    /// Project identifier within that instance
    pub form_project_id: i64,
    /// API token used to read and write record fields
    pub form_api_token: String,
    /// Unique event name designating enrolment
    pub enrolment_event: String,
    /// Instrument whose completion status is forced on write-back
    pub enrolment_instrument: String,
    /// Name of the linked registry project
    pub registry_project: String,
    /// Form fields mirrored into the registry as subject attributes
    #[serde(default)]
    pub attribute_fields: Vec<String>,
}

impl ProjectLink {
    fn validate(&self) -> Result<(), ValidationError> {
        let origin = format!("{} project {}", self.form_url, self.form_project_id);
        if self.registry_project.is_empty() {
            return Err(ValidationError::EmptyRegistryProject(origin));
        }
        if self.enrolment_event.is_empty() {
            return Err(ValidationError::EmptyEnrolmentEvent(origin));
        }
        if self.enrolment_instrument.is_empty() {
            return Err(ValidationError::EmptyInstrument(origin));
        }
        if self.form_api_token.is_empty() {
            return Err(ValidationError::EmptyFormToken(origin));
        }
        if self.attribute_fields.iter().any(String::is_empty) {
            return Err(ValidationError::EmptyAttributeField(origin));
        }
        if self.form_url.scheme() != "https" {
            tracing::warn!(
                url = %self.form_url,
                "Form-system instance is not using an encrypted connection"
            );
        }
        Ok(())
    }
}

/// Outbound HTTP timeouts; no remote call may block indefinitely.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HttpTimeouts {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        HttpTimeouts {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    30
}
