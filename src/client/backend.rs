//! Client for the KPI backend REST API.
//!
//! The backend wants a bearer token obtained from its login endpoint. The
//! token is fetched on first use and kept for the lifetime of the client;
//! a rejected login is never retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::KpiBackend;
use crate::config::BackendSettings;
use crate::error::{Error, Result};

const LOGIN_PATH: &str = "/api/v1.0/user/login";

/// Parameters of one KPI computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KpiQuery {
    pub machine_id: String,
    pub kpi_id: String,
    pub start_date: String,
    pub end_date: String,
    pub granularity_op: String,
}

impl KpiQuery {
    fn query_params(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("kpi_id", self.kpi_id.as_str()),
            ("start_date", self.start_date.as_str()),
            ("end_date", self.end_date.as_str()),
            ("granularity_op", self.granularity_op.as_str()),
        ]
    }
}

pub struct BackendClient {
    base_url: String,
    email: String,
    password: String,
    client: Client,
    token: OnceCell<String>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("logged_in", &self.token.initialized())
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn new(settings: &BackendSettings, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            email: settings.email.clone(),
            password: settings.password.clone(),
            client,
            token: OnceCell::new(),
        })
    }

    /// Bearer token, logging in on the first call only.
    pub async fn token(&self) -> Result<&str> {
        let token = self.token.get_or_try_init(|| self.login()).await?;
        Ok(token.as_str())
    }

    async fn login(&self) -> Result<String> {
        info!(name: "backend.login", email = %self.email, "Logging in...");

        let response = self
            .client
            .post(format!("{}{}", self.base_url, LOGIN_PATH))
            .json(&json!({ "email": self.email, "password": self.password }))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Error::AuthRejected { status });
        }

        let body: Value = response.json().await?;
        body["data"]["id_token"]
            .as_str()
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
            .ok_or(Error::MissingToken)
    }

    pub fn compute_url(&self, machine_id: &str) -> String {
        format!(
            "{}/api/v1.0/kpi/machine/{}/compute/",
            self.base_url, machine_id
        )
    }
}

#[async_trait]
impl KpiBackend for BackendClient {
    async fn compute_kpi(&self, query: &KpiQuery) -> Result<Value> {
        let token = self.token().await?;

        debug!(
            name: "backend.kpi.request",
            machine_id = %query.machine_id,
            kpi_id = %query.kpi_id,
            "Computing KPI"
        );

        let result = self
            .client
            .get(self.compute_url(&query.machine_id))
            .bearer_auth(token)
            .query(&query.query_params())
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;

        Ok(result)
    }
}
