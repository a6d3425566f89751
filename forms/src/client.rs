use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum FormError {
    #[error("form system request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("form system returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed form system payload: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("invalid form system URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// One entity-attribute-value row of a record import.
#[derive(Clone, Debug, Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
pub struct FieldWrite {
    pub record: String,
    pub redcap_event_name: String,
    pub field_name: String,
    pub value: String,
}

/// Access to the form system's record export/import API. No decision logic
/// lives behind this seam; implementations only move field values.
#[async_trait]
pub trait FormClient: Send + Sync {
    /// Fetches the named fields of one record, label-rendered. Absent record
    /// yields an empty map; transport or decode failures are errors.
    async fn fetch_fields(
        &self,
        fields: &[String],
        record_id: i64,
        event: Option<&str>,
    ) -> Result<HashMap<String, String>, FormError>;

    /// Imports the given rows with overwrite semantics. Returns whether the
    /// form system accepted the import.
    async fn write_fields(&self, writes: &[FieldWrite], record_id: i64)
    -> Result<bool, FormError>;
}

/// Form-system client speaking the record export/import API over HTTP.
pub struct HttpFormClient {
    client: reqwest::Client,
    api_url: Url,
    token: String,
}

impl HttpFormClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &Url,
        token: impl Into<String>,
    ) -> Result<Self, FormError> {
        let mut base = base_url.as_str().trim_end_matches('/').to_owned();
        base.push_str("/api/");
        Ok(HttpFormClient {
            client,
            api_url: Url::parse(&base)?,
            token: token.into(),
        })
    }

    async fn post_form(
        &self,
        params: Vec<(String, String)>,
    ) -> Result<reqwest::Response, FormError> {
        let mut params = params;
        params.push(("token".into(), self.token.clone()));
        Ok(self.client.post(self.api_url.clone()).form(&params).send().await?)
    }
}

#[async_trait]
impl FormClient for HttpFormClient {
    async fn fetch_fields(
        &self,
        fields: &[String],
        record_id: i64,
        event: Option<&str>,
    ) -> Result<HashMap<String, String>, FormError> {
        let mut params = vec![
            ("content".to_owned(), "record".to_owned()),
            ("format".to_owned(), "json".to_owned()),
            ("type".to_owned(), "flat".to_owned()),
            ("rawOrLabel".to_owned(), "label".to_owned()),
            ("records[0]".to_owned(), record_id.to_string()),
        ];
        for (i, field) in fields.iter().enumerate() {
            params.push((format!("fields[{i}]"), field.clone()));
        }
        if let Some(event) = event {
            params.push(("events[0]".to_owned(), event.to_owned()));
        }

        let response = self.post_form(params).await?;
        if !response.status().is_success() {
            return Err(FormError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body = response.text().await?;
        let mut rows: Vec<HashMap<String, String>> = serde_json::from_str(&body)?;
        tracing::debug!(record_id, rows = rows.len(), "Fetched record fields");
        Ok(rows.drain(..).next().unwrap_or_default())
    }

    async fn write_fields(
        &self,
        writes: &[FieldWrite],
        record_id: i64,
    ) -> Result<bool, FormError> {
        let params = vec![
            ("data".to_owned(), serde_json::to_string(writes)?),
            ("content".to_owned(), "record".to_owned()),
            ("format".to_owned(), "json".to_owned()),
            ("type".to_owned(), "eav".to_owned()),
            ("overwriteBehavior".to_owned(), "overwrite".to_owned()),
            ("returnContent".to_owned(), "count".to_owned()),
            ("returnFormat".to_owned(), "json".to_owned()),
        ];

        let response = self.post_form(params).await?;
        if response.status().is_success() {
            tracing::info!(record_id, "Successful field import");
            Ok(true)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                record_id,
                status,
                body = %body,
                "Field import rejected"
            );
            Ok(false)
        }
    }
}
