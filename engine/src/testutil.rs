//! Mock upstream clients and fixtures shared across the engine's tests.

use crate::feedback::SUBJECT_LOGIN_FIELD;
use crate::reconcile::ReconcileRequest;
use async_trait::async_trait;
use forms::{FieldWrite, FormClient, FormError};
use registry::{Project, RegistryClient, RegistryError, Subject};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use url::Url;

pub fn linked_project() -> Project {
    Project {
        id: 5,
        project_name: "study-a".to_owned(),
        organization: None,
        location: "London".to_owned(),
        attributes: HashMap::from([
            ("Work-package".to_owned(), "mdd".to_owned()),
            ("External-project-id".to_owned(), "33".to_owned()),
            (
                "External-project-url".to_owned(),
                "https://forms.example.org/".to_owned(),
            ),
        ]),
    }
}

pub fn request_with_attributes(attributes: &[(&str, &str)]) -> ReconcileRequest {
    ReconcileRequest {
        form_url: Url::parse("https://forms.example.org/").unwrap(),
        form_project_id: 33,
        record_id: 7,
        registry_project: "study-a".to_owned(),
        enrolment_event: "enrolment_arm_1".to_owned(),
        instrument: "subject_info".to_owned(),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        form_subject_login: None,
    }
}

/// In-memory registry double with switchable failure modes.
#[derive(Default)]
pub struct MockRegistry {
    project: Option<Project>,
    pub subjects: Mutex<Vec<Subject>>,
    pub created: Mutex<Vec<Subject>>,
    pub updated: Mutex<Vec<Subject>>,
    pub find_calls: AtomicUsize,
    duplicate_lookup: AtomicBool,
    transient_lookup: AtomicBool,
    invisible_subjects: AtomicBool,
}

impl MockRegistry {
    pub fn with_project(project: Project) -> Self {
        MockRegistry {
            project: Some(project),
            ..MockRegistry::default()
        }
    }

    pub fn set_duplicate_lookup(&self) {
        self.duplicate_lookup.store(true, Ordering::SeqCst);
    }

    pub fn set_transient_lookup(&self) {
        self.transient_lookup.store(true, Ordering::SeqCst);
    }

    /// Lookups report absence even though creates still collide; simulates
    /// the window of a concurrent CREATE race.
    pub fn set_invisible_subjects(&self) {
        self.invisible_subjects.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistryClient for MockRegistry {
    async fn get_project(&self, project_name: &str) -> Result<Project, RegistryError> {
        self.project
            .clone()
            .filter(|p| p.project_name == project_name)
            .ok_or_else(|| RegistryError::ProjectNotFound(project_name.to_owned()))
    }

    async fn find_subject(
        &self,
        project_name: &str,
        external_id: &str,
    ) -> Result<Option<Subject>, RegistryError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);

        if self.transient_lookup.load(Ordering::SeqCst) {
            return Err(RegistryError::Status {
                context: "looking up subject",
                status: 503,
                body: "unavailable".to_owned(),
            });
        }
        if self.duplicate_lookup.load(Ordering::SeqCst) {
            return Err(RegistryError::DuplicateSubjects {
                project: project_name.to_owned(),
                external_id: external_id.to_owned(),
                count: 2,
            });
        }
        if self.invisible_subjects.load(Ordering::SeqCst) {
            return Ok(None);
        }

        Ok(self
            .subjects
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.external_id == external_id)
            .cloned())
    }

    async fn create_subject(&self, subject: &Subject) -> Result<Subject, RegistryError> {
        let mut subjects = self.subjects.lock().unwrap();
        if subjects.iter().any(|s| s.external_id == subject.external_id) {
            return Err(RegistryError::AlreadyExists {
                external_id: subject.external_id.clone(),
            });
        }

        let mut created = subject.clone();
        created.registry_id = Some(subjects.len() as i64 + 1);
        subjects.push(created.clone());
        self.created.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update_subject(&self, subject: &Subject) -> Result<Subject, RegistryError> {
        let mut subjects = self.subjects.lock().unwrap();
        if let Some(stored) = subjects.iter_mut().find(|s| s.login == subject.login) {
            *stored = subject.clone();
        }
        self.updated.lock().unwrap().push(subject.clone());
        Ok(subject.clone())
    }
}

/// Form-system double recording imports and serving canned exports.
pub struct MockFormClient {
    pub fields: Mutex<HashMap<String, String>>,
    pub login: Mutex<Option<String>>,
    pub writes: Mutex<Vec<Vec<FieldWrite>>>,
    pub accept_imports: AtomicBool,
    pub fail_fetch: AtomicBool,
}

impl Default for MockFormClient {
    fn default() -> Self {
        MockFormClient {
            fields: Mutex::new(HashMap::new()),
            login: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            accept_imports: AtomicBool::new(true),
            fail_fetch: AtomicBool::new(false),
        }
    }
}

impl MockFormClient {
    pub fn with_fields(fields: &[(&str, &str)]) -> Self {
        let mock = MockFormClient::default();
        *mock.fields.lock().unwrap() = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        mock
    }

    pub fn set_login(&self, login: &str) {
        *self.login.lock().unwrap() = Some(login.to_owned());
    }
}

#[async_trait]
impl FormClient for MockFormClient {
    async fn fetch_fields(
        &self,
        fields: &[String],
        _record_id: i64,
        _event: Option<&str>,
    ) -> Result<HashMap<String, String>, FormError> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(FormError::Status {
                status: 503,
                body: "unavailable".to_owned(),
            });
        }

        let mut available = self.fields.lock().unwrap().clone();
        if let Some(login) = self.login.lock().unwrap().clone() {
            available.insert(SUBJECT_LOGIN_FIELD.to_owned(), login);
        }
        Ok(available
            .into_iter()
            .filter(|(key, _)| fields.contains(key))
            .collect())
    }

    async fn write_fields(
        &self,
        writes: &[FieldWrite],
        _record_id: i64,
    ) -> Result<bool, FormError> {
        self.writes.lock().unwrap().push(writes.to_vec());
        Ok(self.accept_imports.load(Ordering::SeqCst))
    }
}
