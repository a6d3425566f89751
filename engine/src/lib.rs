pub mod config;
pub mod errors;
pub mod feedback;
pub mod identifier;
pub mod locks;
pub mod metrics_defs;
pub mod outcome;
pub mod reconcile;
pub mod service;

#[cfg(test)]
mod testutil;

pub use errors::EngineError;
pub use outcome::{FailureReason, SubjectOutcome};
pub use reconcile::{ReconcileRequest, ReconciliationEngine};

use crate::service::{TriggerService, link_key};
use forms::{FormClient, HttpFormClient};
use registry::HttpRegistryClient;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Builds the HTTP clients from the configuration and serves the webhook and
/// admin listeners until one of them fails.
pub async fn run(config: config::Config) -> Result<(), EngineError> {
    config.validate()?;

    let http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.http.connect_timeout_secs))
        .timeout(Duration::from_secs(config.http.request_timeout_secs))
        .build()?;

    let registry_client = Arc::new(HttpRegistryClient::new(
        http_client.clone(),
        &config.registry,
    )?);

    let mut form_clients: HashMap<_, Arc<dyn FormClient>> = HashMap::new();
    for link in &config.projects {
        let client = HttpFormClient::new(
            http_client.clone(),
            &link.form_url,
            link.form_api_token.clone(),
        )?;
        form_clients.insert(
            link_key(&link.form_url, link.form_project_id),
            Arc::new(client),
        );
    }

    let listener = config.listener.clone();
    let admin_listener = config.admin_listener.clone();

    let service = TriggerService::new(config, registry_client, form_clients);
    let trigger_task = run_http_service(&listener.host, listener.port, service);
    let admin_task = run_http_service(
        &admin_listener.host,
        admin_listener.port,
        AdminService::new(|| true),
    );

    tokio::try_join!(trigger_task, admin_task)?;
    Ok(())
}
