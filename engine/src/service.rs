//! Webhook endpoint.
//!
//! One inbound request is one reconciliation: parse the trigger, check the
//! origin is configured, skip non-enrolment events, pull the record's
//! current state from the form system, run the engine under the record lock,
//! and write the result back. The response status is the only signal the
//! form system gets; anything non-2xx means "safe to re-trigger later".

use crate::config::{Config, ProjectLink};
use crate::errors::EngineError;
use crate::feedback::{FeedbackWriter, SUBJECT_LOGIN_FIELD};
use crate::locks::RecordLocks;
use crate::metrics_defs;
use crate::outcome::{FailureReason, SubjectOutcome};
use crate::reconcile::{ReconcileRequest, ReconciliationEngine};
use forms::{FormClient, Trigger, parser};
use http_body_util::{BodyExt, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use registry::RegistryClient;
use shared::http::{make_error_response, make_text_response};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

pub type LinkKey = (String, i64);

pub fn link_key(form_url: &Url, form_project_id: i64) -> LinkKey {
    (
        form_url.as_str().trim_end_matches('/').to_owned(),
        form_project_id,
    )
}

#[derive(Clone)]
pub struct TriggerService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: Config,
    engine: ReconciliationEngine,
    locks: RecordLocks,
    form_clients: HashMap<LinkKey, Arc<dyn FormClient>>,
}

impl TriggerService {
    pub fn new(
        config: Config,
        registry: Arc<dyn RegistryClient>,
        form_clients: HashMap<LinkKey, Arc<dyn FormClient>>,
    ) -> Self {
        TriggerService {
            inner: Arc::new(ServiceInner {
                config,
                engine: ReconciliationEngine::new(registry),
                locks: RecordLocks::new(),
                form_clients,
            }),
        }
    }

    /// Handles one webhook body end to end.
    pub async fn handle_body(&self, body: &str) -> Response<BoxBody<Bytes, EngineError>> {
        let start = Instant::now();

        let trigger = match Trigger::from_body(body) {
            Ok(trigger) => trigger,
            Err(err) => {
                tracing::warn!(error = %err, "Rejected malformed trigger");
                return make_error_response(StatusCode::BAD_REQUEST);
            }
        };

        let Some(link) = self
            .inner
            .config
            .find_link(&trigger.form_url, trigger.project_id)
        else {
            tracing::warn!(
                form_url = %trigger.form_url,
                project_id = trigger.project_id,
                "Trigger from unconfigured origin cannot be managed"
            );
            return make_error_response(StatusCode::BAD_REQUEST);
        };

        if !trigger.is_enrolment(&link.enrolment_event) {
            tracing::info!(
                project_id = trigger.project_id,
                instrument = %trigger.instrument,
                event = trigger.event_name.as_deref().unwrap_or(""),
                "Skipping trigger outside the enrolment event"
            );
            shared::counter!(metrics_defs::TRIGGERS_SKIPPED).increment(1);
            return make_text_response(StatusCode::OK, "ok\n");
        }

        let Some(form) = self
            .inner
            .form_clients
            .get(&link_key(&link.form_url, link.form_project_id))
        else {
            tracing::error!(
                form_url = %link.form_url,
                project_id = link.form_project_id,
                "No form client built for configured link"
            );
            return make_error_response(StatusCode::INTERNAL_SERVER_ERROR);
        };

        let (attributes, form_subject_login) =
            fetch_form_state(form.as_ref(), link, &trigger).await;

        let request = ReconcileRequest {
            form_url: trigger.form_url.clone(),
            form_project_id: trigger.project_id,
            record_id: trigger.record_id,
            registry_project: link.registry_project.clone(),
            enrolment_event: link.enrolment_event.clone(),
            instrument: link.enrolment_instrument.clone(),
            attributes,
            form_subject_login: form_subject_login.clone(),
        };

        // Serialize per record; concurrent re-triggers for the same record
        // would otherwise race the create path.
        let _guard = self
            .inner
            .locks
            .acquire(trigger.project_id, trigger.record_id)
            .await;

        let outcome = self.inner.engine.reconcile(&request).await;

        shared::counter!(metrics_defs::RECONCILIATIONS, "outcome" => outcome.label())
            .increment(1);
        shared::histogram!(metrics_defs::TRIGGER_DURATION)
            .record(start.elapsed().as_secs_f64());

        match &outcome {
            SubjectOutcome::Failed { reason, message } => {
                tracing::error!(
                    record_id = trigger.record_id,
                    project_id = trigger.project_id,
                    reason = %reason,
                    cause = %message,
                    "Reconciliation failed"
                );
                make_error_response(failure_status(*reason))
            }
            success => {
                tracing::info!(
                    record_id = trigger.record_id,
                    project_id = trigger.project_id,
                    outcome = success.label(),
                    "Reconciliation finished"
                );
                self.write_back(success, form.clone(), link, &trigger, form_subject_login)
                    .await
            }
        }
    }

    /// CREATED always writes back; UPDATED/NOOP only when the form system
    /// has no login on record yet (retrying an earlier failed write-back).
    async fn write_back(
        &self,
        outcome: &SubjectOutcome,
        form: Arc<dyn FormClient>,
        link: &ProjectLink,
        trigger: &Trigger,
        form_subject_login: Option<String>,
    ) -> Response<BoxBody<Bytes, EngineError>> {
        let needed =
            matches!(outcome, SubjectOutcome::Created(_)) || form_subject_login.is_none();
        if !needed {
            return make_text_response(StatusCode::OK, "ok\n");
        }

        let subject = match outcome.subject() {
            Some(subject) => subject,
            None => return make_error_response(StatusCode::INTERNAL_SERVER_ERROR),
        };

        let writer = FeedbackWriter::new(form);
        match writer
            .write_back(
                subject,
                trigger.record_id,
                &link.enrolment_event,
                &link.enrolment_instrument,
            )
            .await
        {
            Ok(true) => make_text_response(StatusCode::OK, "ok\n"),
            Ok(false) => {
                tracing::warn!(
                    record_id = trigger.record_id,
                    "Form system rejected the write-back; leaving trigger retryable"
                );
                make_error_response(StatusCode::BAD_GATEWAY)
            }
            Err(err) => {
                tracing::warn!(
                    record_id = trigger.record_id,
                    error = %err,
                    "Write-back failed; leaving trigger retryable"
                );
                make_error_response(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

fn failure_status(reason: FailureReason) -> StatusCode {
    match reason {
        FailureReason::Transient => StatusCode::BAD_GATEWAY,
        FailureReason::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        FailureReason::IdentityMismatch | FailureReason::Conflict => StatusCode::CONFLICT,
    }
}

/// Pulls the mirrored attribute fields and the previously recorded subject
/// login. Either fetch failing downgrades to empty state with a warning; the
/// registry stays authoritative.
async fn fetch_form_state(
    form: &dyn FormClient,
    link: &ProjectLink,
    trigger: &Trigger,
) -> (HashMap<String, String>, Option<String>) {
    let mut attributes = HashMap::new();
    if !link.attribute_fields.is_empty() {
        match form
            .fetch_fields(&link.attribute_fields, trigger.record_id, None)
            .await
        {
            Ok(fields) => {
                attributes = fields
                    .into_iter()
                    .map(|(key, value)| (key, parser::parse_field(&value)))
                    .collect();
            }
            Err(err) => tracing::warn!(
                record_id = trigger.record_id,
                error = %err,
                "Could not fetch attribute fields; continuing with none"
            ),
        }
    }

    let login_fields = vec![SUBJECT_LOGIN_FIELD.to_owned()];
    let form_subject_login = match form
        .fetch_fields(&login_fields, trigger.record_id, Some(&link.enrolment_event))
        .await
    {
        Ok(mut fields) => fields
            .remove(SUBJECT_LOGIN_FIELD)
            .filter(|login| !login.is_empty()),
        Err(err) => {
            tracing::warn!(
                record_id = trigger.record_id,
                error = %err,
                "Could not fetch recorded subject login"
            );
            None
        }
    };

    (attributes, form_subject_login)
}

impl Service<Request<Incoming>> for TriggerService {
    type Response = Response<BoxBody<Bytes, EngineError>>;
    type Error = EngineError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            if req.method() != Method::POST || req.uri().path() != "/trigger" {
                return Ok(make_error_response(StatusCode::NOT_FOUND));
            }

            let body = req
                .into_body()
                .collect()
                .await
                .map_err(|err| EngineError::RequestBody(err.to_string()))?
                .to_bytes();

            if body.is_empty() {
                tracing::warn!("Rejected trigger with empty body");
                return Ok(make_error_response(StatusCode::BAD_REQUEST));
            }

            let body = String::from_utf8_lossy(&body);
            Ok(service.handle_body(&body).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpTimeouts, Listener};
    use crate::testutil::{MockFormClient, MockRegistry, linked_project};
    use registry::types::HUMAN_READABLE_IDENTIFIER_KEY;
    use registry::{RegistryConnection, Subject, SubjectStatus};

    const ENROLMENT_BODY: &str = "redcap_url=https%3A%2F%2Fforms.example.org%2F&project_id=33&\
         record=7&redcap_event_name=enrolment_arm_1&instrument=subject_info&\
         subject_info_complete=2";

    fn test_config() -> Config {
        Config {
            listener: Listener {
                host: "127.0.0.1".into(),
                port: 3000,
            },
            admin_listener: Listener {
                host: "127.0.0.1".into(),
                port: 3001,
            },
            registry: RegistryConnection {
                base_url: Url::parse("https://registry.example.org").unwrap(),
                token_endpoint: "oauth/token".into(),
                client_id: "bridge".into(),
                client_secret: "secret".into(),
            },
            projects: vec![ProjectLink {
                form_url: Url::parse("https://forms.example.org/").unwrap(),
                form_project_id: 33,
                form_api_token: "token".into(),
                enrolment_event: "enrolment_arm_1".into(),
                enrolment_instrument: "subject_info".into(),
                registry_project: "study-a".into(),
                attribute_fields: vec!["arm".into()],
            }],
            http: HttpTimeouts::default(),
        }
    }

    fn service(
        registry: Arc<MockRegistry>,
        form: Arc<MockFormClient>,
    ) -> TriggerService {
        let config = test_config();
        let key = link_key(&config.projects[0].form_url, 33);
        TriggerService::new(config, registry, HashMap::from([(key, form as Arc<dyn FormClient>)]))
    }

    fn existing_subject(login: &str, arm: &str) -> Subject {
        Subject {
            registry_id: Some(1),
            login: login.to_owned(),
            external_id: "7".to_owned(),
            external_link: None,
            project: None,
            attributes: HashMap::from([
                ("arm".to_owned(), arm.to_owned()),
                (
                    HUMAN_READABLE_IDENTIFIER_KEY.to_owned(),
                    "MDD-5-LONDON-7".to_owned(),
                ),
            ]),
            status: SubjectStatus::Activated,
        }
    }

    #[tokio::test]
    async fn enrolment_trigger_creates_and_writes_back() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        let form = Arc::new(MockFormClient::with_fields(&[("arm", "Arm 1 (1)")]));

        let response = service(registry.clone(), form.clone())
            .handle_body(ENROLMENT_BODY)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let created = registry.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        // Choice decoration is stripped before the attribute reaches the
        // registry.
        assert_eq!(
            created[0].attributes.get("arm").map(String::as_str),
            Some("Arm 1")
        );

        let writes = form.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 3);
        assert_eq!(writes[0][2].field_name, "subject_info_complete");
        assert_eq!(writes[0][2].value, "2");
    }

    #[tokio::test]
    async fn non_enrolment_trigger_is_acknowledged_without_work() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        let form = Arc::new(MockFormClient::default());
        let body = ENROLMENT_BODY.replace("enrolment_arm_1", "followup_arm_1");

        let response = service(registry.clone(), form.clone()).handle_body(&body).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.created.lock().unwrap().is_empty());
        assert!(form.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_origin_is_rejected() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        let form = Arc::new(MockFormClient::default());
        let body = ENROLMENT_BODY.replace("project_id=33", "project_id=99");

        let response = service(registry, form).handle_body(&body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        let form = Arc::new(MockFormClient::default());

        let response = service(registry, form).handle_body("record=abc").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn identity_mismatch_maps_to_conflict() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        registry
            .subjects
            .lock()
            .unwrap()
            .push(existing_subject("abc", "1"));
        let form = Arc::new(MockFormClient::with_fields(&[("arm", "1")]));
        form.set_login("xyz");

        let response = service(registry.clone(), form.clone())
            .handle_body(ENROLMENT_BODY)
            .await;

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(registry.updated.lock().unwrap().is_empty());
        assert!(form.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn synced_record_is_a_silent_noop() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        registry
            .subjects
            .lock()
            .unwrap()
            .push(existing_subject("abc", "1"));
        let form = Arc::new(MockFormClient::with_fields(&[("arm", "1")]));
        form.set_login("abc");

        let response = service(registry.clone(), form.clone())
            .handle_body(ENROLMENT_BODY)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(registry.updated.lock().unwrap().is_empty());
        // Login already recorded: no redundant write-back.
        assert!(form.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn noop_without_recorded_login_retries_write_back() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        registry
            .subjects
            .lock()
            .unwrap()
            .push(existing_subject("abc", "1"));
        let form = Arc::new(MockFormClient::with_fields(&[("arm", "1")]));

        let response = service(registry, form.clone()).handle_body(ENROLMENT_BODY).await;

        assert_eq!(response.status(), StatusCode::OK);
        let writes = form.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0].value, "abc");
    }

    #[tokio::test]
    async fn rejected_write_back_keeps_trigger_retryable() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        let form = Arc::new(MockFormClient::with_fields(&[("arm", "1")]));
        form.accept_imports
            .store(false, std::sync::atomic::Ordering::SeqCst);

        let response = service(registry.clone(), form).handle_body(ENROLMENT_BODY).await;

        // The subject was created but the form system must see a failure so
        // it re-triggers.
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(registry.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn form_fetch_failure_still_reconciles() {
        let registry = Arc::new(MockRegistry::with_project(linked_project()));
        let form = Arc::new(MockFormClient::with_fields(&[("arm", "1")]));
        form.fail_fetch
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let response = service(registry.clone(), form).handle_body(ENROLMENT_BODY).await;

        assert_eq!(response.status(), StatusCode::OK);
        let created = registry.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        assert!(!created[0].attributes.contains_key("arm"));
    }
}
