use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use crate::error::ApiError;
use crate::model::AttendanceRecord;

/// Body of `POST /attendance/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub device_id: String,
    pub sync_data: Vec<AttendanceRecord>,
}

#[async_trait]
pub trait AttendanceApi: Send + Sync {
    async fn mark_qr_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> Result<serde_json::Value, ApiError>;

    /// The batch succeeds or fails as a whole; the response order is not
    /// tied to the input order.
    async fn sync_offline_attendance(
        &self,
        batch: &SyncBatch,
    ) -> Result<Vec<serde_json::Value>, ApiError>;
}

#[derive(Debug, Clone)]
struct Endpoint {
    base_url: String,
    access_token: Option<String>,
}

/// reqwest-backed client. Request timeouts belong to the transport.
pub struct HttpAttendanceApi {
    client: reqwest::Client,
    endpoint: RwLock<Endpoint>,
}

impl HttpAttendanceApi {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
        user_agent: &str,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self {
            client,
            endpoint: RwLock::new(Endpoint {
                base_url: base_url.into(),
                access_token,
            }),
        })
    }

    /// Applies settings handed over by the auth/session layer.
    pub fn configure(&self, base_url: Option<String>, access_token: Option<Option<String>>) {
        let mut ep = self.endpoint.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(url) = base_url {
            ep.base_url = url;
        }
        if let Some(token) = access_token {
            ep.access_token = token.filter(|t| !t.trim().is_empty());
        }
    }

    pub fn base_url(&self) -> String {
        self.endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .base_url
            .clone()
    }

    pub fn has_token(&self) -> bool {
        self.endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .access_token
            .is_some()
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let ep = self
            .endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let url = format!("{}{}", ep.base_url.trim_end_matches('/'), path);

        let mut req = self.client.post(&url).json(body);
        if let Some(token) = &ep.access_token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::debug!(url = %url, error = %e, "request failed");
            ApiError::Network(e.to_string())
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = error_detail(&body).unwrap_or_else(|| status.to_string());
            tracing::debug!(url = %url, status = status.as_u16(), message = %message, "server rejected request");
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl AttendanceApi for HttpAttendanceApi {
    async fn mark_qr_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> Result<serde_json::Value, ApiError> {
        let resp = self.post("/attendance/qr", record).await?;
        Ok(resp.json().await.unwrap_or(serde_json::Value::Null))
    }

    async fn sync_offline_attendance(
        &self,
        batch: &SyncBatch,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let resp = self.post("/attendance/sync", batch).await?;
        let accepted = match resp.json::<serde_json::Value>().await {
            Ok(serde_json::Value::Array(items)) => items,
            Ok(serde_json::Value::Null) | Err(_) => Vec::new(),
            Ok(other) => vec![other],
        };
        Ok(accepted)
    }
}

/// Pulls the human-readable `detail` out of an error body, FastAPI style.
fn error_detail(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    match v.get("detail")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
