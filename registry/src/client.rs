use crate::token::{TokenError, TokenProvider};
use crate::types::{Project, Subject};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("registry token error: {0}")]
    Token(#[from] TokenError),

    #[error("registry request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("project `{0}` not found in registry")]
    ProjectNotFound(String),

    #[error("registry returned {status} while {context}: {body}")]
    Status {
        context: &'static str,
        status: u16,
        body: String,
    },

    #[error("a subject with external id {external_id} already exists")]
    AlreadyExists { external_id: String },

    #[error("{count} subjects share external id {external_id} in project `{project}`")]
    DuplicateSubjects {
        project: String,
        external_id: String,
        count: usize,
    },

    #[error("invalid registry URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Connection settings for one registry instance.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RegistryConnection {
    pub base_url: Url,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

fn default_token_endpoint() -> String {
    "oauth/token".to_owned()
}

/// Access to the registry's project and subject resources. Lookup absence is
/// `Ok(None)`, never an error; transport failures stay errors.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn get_project(&self, project_name: &str) -> Result<Project, RegistryError>;

    /// Finds the subject carrying the given external record id within a
    /// project. More than one match is a `DuplicateSubjects` error; the
    /// caller must never pick one silently.
    async fn find_subject(
        &self,
        project_name: &str,
        external_id: &str,
    ) -> Result<Option<Subject>, RegistryError>;

    /// Creates the subject. Fails with `AlreadyExists` if the registry
    /// already holds a subject with that external id.
    async fn create_subject(&self, subject: &Subject) -> Result<Subject, RegistryError>;

    /// Replaces the subject's attributes wholesale. Merging happens before
    /// this call, never in the transport.
    async fn update_subject(&self, subject: &Subject) -> Result<Subject, RegistryError>;
}

/// Registry client speaking the HTTP API with bearer-token auth.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    projects_url: Url,
    subjects_url: Url,
    tokens: TokenProvider,
}

impl HttpRegistryClient {
    pub fn new(
        client: reqwest::Client,
        connection: &RegistryConnection,
    ) -> Result<Self, RegistryError> {
        let mut base = connection.base_url.as_str().trim_end_matches('/').to_owned();
        base.push('/');
        let base = Url::parse(&base)?;

        let tokens = TokenProvider::new(
            client.clone(),
            base.join(&connection.token_endpoint)?,
            connection.client_id.clone(),
            connection.client_secret.clone(),
        );

        Ok(HttpRegistryClient {
            client,
            projects_url: base.join("api/projects/")?,
            subjects_url: base.join("api/subjects")?,
            tokens,
        })
    }

    async fn bearer(&self) -> Result<String, RegistryError> {
        Ok(self.tokens.access_token().await?)
    }
}

async fn error_from(
    context: &'static str,
    response: reqwest::Response,
) -> RegistryError {
    RegistryError::Status {
        context,
        status: response.status().as_u16(),
        body: response.text().await.unwrap_or_default(),
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_project(&self, project_name: &str) -> Result<Project, RegistryError> {
        let url = self.projects_url.join(project_name)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                Err(RegistryError::ProjectNotFound(project_name.to_owned()))
            }
            status if status.is_success() => {
                let project: Project = response.json().await?;
                tracing::debug!(project = %project.project_name, id = project.id, "Retrieved project");
                Ok(project)
            }
            _ => Err(error_from("retrieving project", response).await),
        }
    }

    async fn find_subject(
        &self,
        project_name: &str,
        external_id: &str,
    ) -> Result<Option<Subject>, RegistryError> {
        let response = self
            .client
            .get(self.subjects_url.clone())
            .query(&[("projectName", project_name), ("externalId", external_id)])
            .bearer_auth(self.bearer().await?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from("looking up subject", response).await);
        }

        let mut subjects: Vec<Subject> = response.json().await?;
        match subjects.len() {
            0 => Ok(None),
            1 => Ok(subjects.pop()),
            count => Err(RegistryError::DuplicateSubjects {
                project: project_name.to_owned(),
                external_id: external_id.to_owned(),
                count,
            }),
        }
    }

    async fn create_subject(&self, subject: &Subject) -> Result<Subject, RegistryError> {
        let response = self
            .client
            .post(self.subjects_url.clone())
            .bearer_auth(self.bearer().await?)
            .json(subject)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Err(RegistryError::AlreadyExists {
                external_id: subject.external_id.clone(),
            }),
            status if status.is_success() => {
                let created: Subject = response.json().await?;
                tracing::debug!(login = %created.login, "Created subject");
                Ok(created)
            }
            _ => Err(error_from("creating subject", response).await),
        }
    }

    async fn update_subject(&self, subject: &Subject) -> Result<Subject, RegistryError> {
        let response = self
            .client
            .put(self.subjects_url.clone())
            .bearer_auth(self.bearer().await?)
            .json(subject)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from("updating subject", response).await);
        }
        let updated: Subject = response.json().await?;
        tracing::debug!(login = %updated.login, "Updated subject");
        Ok(updated)
    }
}
