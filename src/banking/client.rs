//! Client for the downstream banking collaborator.
//!
//! The collaborator actually moves the money; this client only speaks its
//! small REST contract. Every call carries the configured per-call timeout.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

use crate::config::DownstreamSettings;
use crate::state::TransferOrder;

#[derive(Debug, Error, Diagnostic)]
pub enum DownstreamError {
    #[error("downstream request failed: {0}")]
    #[diagnostic(
        code(tellerflow::downstream::request),
        help("Check the downstream base URL and that the service is reachable.")
    )]
    Request(String),

    #[error("downstream returned HTTP {status}: {body}")]
    #[diagnostic(code(tellerflow::downstream::status))]
    Status { status: u16, body: String },

    #[error("downstream payload could not be decoded: {0}")]
    #[diagnostic(code(tellerflow::downstream::decode))]
    Decode(String),
}

/// `GET /api/balance` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalancePayload {
    pub account_id: String,
    pub balance: f64,
}

/// `POST /api/transfer` response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// HTTP client for the banking collaborator.
pub struct BankingClient {
    http: reqwest::Client,
    base_url: String,
}

impl BankingClient {
    pub fn new(settings: &DownstreamSettings) -> Result<Self, DownstreamError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| DownstreamError::Request(e.to_string()))?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self), err)]
    pub async fn balance(&self, account_id: &str) -> Result<BalancePayload, DownstreamError> {
        let response = self
            .http
            .get(format!("{}/api/balance", self.base_url))
            .query(&[("accountId", account_id)])
            .send()
            .await
            .map_err(|e| DownstreamError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| DownstreamError::Decode(e.to_string()))
    }

    #[instrument(skip(self, order), fields(amount = order.amount), err)]
    pub async fn transfer(&self, order: &TransferOrder) -> Result<TransferReceipt, DownstreamError> {
        let response = self
            .http
            .post(format!("{}/api/transfer", self.base_url))
            .json(order)
            .send()
            .await
            .map_err(|e| DownstreamError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| DownstreamError::Decode(e.to_string()))
    }

    #[instrument(skip(self), err)]
    pub async fn statement(&self, account_id: &str) -> Result<String, DownstreamError> {
        self.fetch_text("/api/statement", account_id).await
    }

    #[instrument(skip(self), err)]
    pub async fn loan(&self, account_id: &str) -> Result<String, DownstreamError> {
        self.fetch_text("/api/loan", account_id).await
    }

    async fn fetch_text(&self, path: &str, account_id: &str) -> Result<String, DownstreamError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(&[("accountId", account_id)])
            .send()
            .await
            .map_err(|e| DownstreamError::Request(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .text()
            .await
            .map_err(|e| DownstreamError::Decode(e.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DownstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(DownstreamError::Status {
        status: status.as_u16(),
        body,
    })
}
