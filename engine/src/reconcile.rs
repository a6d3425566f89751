//! The reconciliation state machine.
//!
//! One trigger maps to exactly one of CREATE, UPDATE, NOOP, or FAILED. The
//! engine resolves the registry project, validates its linkage to the
//! trigger's origin, derives the human-readable identifier, and then decides
//! against the registry's current subject state. The engine never retries;
//! re-delivery of the trigger is the only retry mechanism.

use crate::identifier::{IdentifierError, derive_human_readable_id};
use crate::outcome::{FailureReason, SubjectOutcome};
use forms::record_url::record_url;
use registry::types::HUMAN_READABLE_IDENTIFIER_KEY;
use registry::{Project, RegistryClient, RegistryError, Subject, SubjectStatus};
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;
use uuid::Uuid;

/// Inputs of one reconciliation, assembled by the trigger service from the
/// trigger event, the project link, and the fields pulled from the form
/// system.
#[derive(Clone, Debug)]
pub struct ReconcileRequest {
    pub form_url: Url,
    pub form_project_id: i64,
    pub record_id: i64,
    /// Registry project name configured for this form project.
    pub registry_project: String,
    pub enrolment_event: String,
    pub instrument: String,
    /// Form attributes to mirror into the registry, already normalized.
    pub attributes: HashMap<String, String>,
    /// Subject login previously written back into the form system, if any.
    pub form_subject_login: Option<String>,
}

struct Failure {
    reason: FailureReason,
    message: String,
}

impl From<RegistryError> for Failure {
    fn from(err: RegistryError) -> Self {
        let reason = match &err {
            RegistryError::ProjectNotFound(_) | RegistryError::InvalidUrl(_) => {
                FailureReason::Configuration
            }
            RegistryError::Token(token) if token.is_auth_failure() => {
                FailureReason::Configuration
            }
            RegistryError::DuplicateSubjects { .. } | RegistryError::AlreadyExists { .. } => {
                FailureReason::Conflict
            }
            _ => FailureReason::Transient,
        };
        Failure {
            reason,
            message: err.to_string(),
        }
    }
}

impl From<IdentifierError> for Failure {
    fn from(err: IdentifierError) -> Self {
        Failure {
            reason: FailureReason::Configuration,
            message: err.to_string(),
        }
    }
}

pub struct ReconciliationEngine {
    registry: Arc<dyn RegistryClient>,
}

impl ReconciliationEngine {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        ReconciliationEngine { registry }
    }

    /// Decides and applies the correct registry state for one trigger.
    pub async fn reconcile(&self, request: &ReconcileRequest) -> SubjectOutcome {
        match self.run(request).await {
            Ok(outcome) => outcome,
            Err(failure) => SubjectOutcome::Failed {
                reason: failure.reason,
                message: failure.message,
            },
        }
    }

    async fn run(&self, request: &ReconcileRequest) -> Result<SubjectOutcome, Failure> {
        let project = self.registry.get_project(&request.registry_project).await?;

        if !project.is_linked_to(&request.form_url, request.form_project_id) {
            return Ok(SubjectOutcome::Failed {
                reason: FailureReason::Configuration,
                message: format!(
                    "registry project {} ({}) is not linked to {} project {}; check its {} and {} attributes",
                    project.project_name,
                    project.id,
                    request.form_url,
                    request.form_project_id,
                    registry::types::EXTERNAL_PROJECT_ID_KEY,
                    registry::types::EXTERNAL_PROJECT_URL_KEY,
                ),
            });
        }

        let human_readable_id = derive_human_readable_id(
            project.work_package().unwrap_or(""),
            project.id,
            &project.location,
            request.record_id,
        )?;

        let existing = self
            .registry
            .find_subject(&project.project_name, &request.record_id.to_string())
            .await?;

        match existing {
            None => self.create(request, project, &human_readable_id).await,
            Some(subject) => self.update(request, subject, &human_readable_id).await,
        }
    }

    /// First sync of this record: mint a login and create the subject.
    async fn create(
        &self,
        request: &ReconcileRequest,
        project: Project,
        human_readable_id: &str,
    ) -> Result<SubjectOutcome, Failure> {
        let login = Uuid::new_v4().to_string();
        let external_link = record_url(
            &request.form_url,
            request.form_project_id,
            request.record_id,
            &request.enrolment_event,
            &request.instrument,
        )
        .ok()
        .map(|u| u.to_string());

        let subject = Subject {
            registry_id: None,
            login,
            external_id: request.record_id.to_string(),
            external_link,
            project: Some(project),
            attributes: merge_attributes(&request.attributes, human_readable_id),
            status: SubjectStatus::Activated,
        };

        let created = self.registry.create_subject(&subject).await?;
        tracing::info!(
            login = %created.login,
            human_readable_id,
            record_id = request.record_id,
            "Created registry subject"
        );
        Ok(SubjectOutcome::Created(created))
    }

    /// The record already has a subject: guard identity, then update or
    /// no-op depending on whether the attributes changed.
    async fn update(
        &self,
        request: &ReconcileRequest,
        existing: Subject,
        human_readable_id: &str,
    ) -> Result<SubjectOutcome, Failure> {
        if let Some(form_login) = &request.form_subject_login
            && form_login != &existing.login
        {
            tracing::warn!(
                record_id = request.record_id,
                registry_login = %existing.login,
                form_login = %form_login,
                "Form system points at a different registry identity"
            );
            return Ok(SubjectOutcome::Failed {
                reason: FailureReason::IdentityMismatch,
                message: format!(
                    "form system records login {} but the registry holds {} for record {}",
                    form_login, existing.login, request.record_id
                ),
            });
        }

        let merged = merge_attributes(&request.attributes, human_readable_id);
        if existing.attributes == merged {
            tracing::info!(
                login = %existing.login,
                record_id = request.record_id,
                "Attributes unchanged; skipping registry write"
            );
            return Ok(SubjectOutcome::Noop(existing));
        }

        let mut updated = existing;
        updated.attributes = merged;
        let saved = self.registry.update_subject(&updated).await?;
        tracing::info!(
            login = %saved.login,
            record_id = request.record_id,
            "Updated registry subject attributes"
        );
        Ok(SubjectOutcome::Updated(saved))
    }
}

fn merge_attributes(
    attributes: &HashMap<String, String>,
    human_readable_id: &str,
) -> HashMap<String, String> {
    let mut merged = attributes.clone();
    merged.insert(
        HUMAN_READABLE_IDENTIFIER_KEY.to_owned(),
        human_readable_id.to_owned(),
    );
    merged
}
