//! Globus-Search-compatible HTTP index.
//!
//! Endpoints used, relative to `base_url`:
//!
//! - `POST   /v1/index/{index_id}/ingest`: a `GIngest` document wrapping a
//!   `GMetaList` of entries
//! - `GET    /v1/index/{index_id}/subject?subject=...`: one subject
//! - `DELETE /v1/index/{index_id}/subject?subject=...`
//!
//! Every request carries `Authorization: Bearer <token>`. Status codes are
//! classified as: 2xx success, 401/403 auth failure, 404 not found (lookups
//! only), 429 and 5xx transient, any other 4xx rejected.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};

use super::{IngestAck, SearchIndex};
use crate::config::PublishConfig;
use crate::error::PublishError;
use crate::models::{Fields, MetadataRecord};

const GMETA_VERSION: &str = "2016-11-09";

/// Opaque bearer credential. `Debug` never prints the secret.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

pub struct GlobusSearchIndex {
    client: Client,
    base_url: String,
    index_id: String,
    token: BearerToken,
}

impl GlobusSearchIndex {
    pub fn new(
        base_url: impl Into<String>,
        index_id: impl Into<String>,
        token: BearerToken,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index_id: index_id.into(),
            token,
        })
    }

    pub fn from_config(config: &PublishConfig, token: BearerToken) -> anyhow::Result<Self> {
        let index_id = config
            .index_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow::anyhow!("publish.index_id is required"))?;
        Self::new(
            config.base_url.clone(),
            index_id,
            token,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/v1/index/{}/{}", self.base_url, self.index_id, tail)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, PublishError> {
        request
            .header("Authorization", self.token.header_value())
            .send()
            .await
            .map_err(|e| PublishError::Transient {
                attempts: 1,
                message: e.to_string(),
            })
    }
}

/// The `GIngest` document for `records`.
pub fn ingest_document(records: &[MetadataRecord]) -> Value {
    let gmeta: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "@datatype": "GMetaEntry",
                "@version": GMETA_VERSION,
                "subject": r.subject,
                "visible_to": r.visible_to,
                "content": r.content,
            })
        })
        .collect();
    json!({
        "@datatype": "GIngest",
        "@version": GMETA_VERSION,
        "ingest_type": "GMetaList",
        "ingest_data": {
            "@datatype": "GMetaList",
            "@version": GMETA_VERSION,
            "gmeta": gmeta,
        },
    })
}

/// Turn a non-success response into the matching error kind.
async fn classify(response: Response, subject: Option<&str>) -> PublishError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<Value> = serde_json::from_str(&body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(body);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PublishError::AuthFailure {
            status: status.as_u16(),
            message,
        },
        StatusCode::NOT_FOUND if subject.is_some() => PublishError::NotFound {
            subject: subject.unwrap_or_default().to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => PublishError::Transient {
            attempts: 1,
            message: format!("HTTP {}: {}", status.as_u16(), message),
        },
        s if s.is_server_error() => PublishError::Transient {
            attempts: 1,
            message: format!("HTTP {}: {}", status.as_u16(), message),
        },
        _ => PublishError::Rejected {
            status: status.as_u16(),
            message,
            subjects: parsed.as_ref().map(rejected_subjects).unwrap_or_default(),
        },
    }
}

/// Subjects named in an error body's `error_data`, if any.
fn rejected_subjects(body: &Value) -> Vec<String> {
    let Some(data) = body.get("error_data") else {
        return Vec::new();
    };
    let items: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut subjects = Vec::new();
    for item in items {
        if let Some(list) = item.get("subjects").and_then(Value::as_array) {
            subjects.extend(list.iter().filter_map(Value::as_str).map(str::to_string));
        }
        if let Some(subject) = item.get("subject").and_then(Value::as_str) {
            subjects.push(subject.to_string());
        }
    }
    subjects
}

fn record_from_subject_response(subject: &str, body: &Value) -> Option<MetadataRecord> {
    let entry = body.get("entries")?.as_array()?.first()?;
    let content = match entry.get("content")? {
        Value::Object(map) => map.clone(),
        _ => Fields::new(),
    };
    let visible_to = body
        .get("visible_to")
        .or_else(|| entry.get("visible_to"))
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    Some(MetadataRecord {
        subject: body
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or(subject)
            .to_string(),
        visible_to,
        content,
    })
}

#[async_trait]
impl SearchIndex for GlobusSearchIndex {
    fn name(&self) -> &str {
        "globus"
    }

    async fn ingest(&self, records: &[MetadataRecord]) -> Result<IngestAck, PublishError> {
        let body = ingest_document(records);
        let response = self
            .send(self.client.post(self.url("ingest")).json(&body))
            .await?;
        if !response.status().is_success() {
            return Err(classify(response, None).await);
        }
        let ack: Value = response
            .json()
            .await
            .map_err(|e| PublishError::Encode {
                message: e.to_string(),
            })?;
        Ok(IngestAck {
            task_id: ack
                .get("task_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            accepted: ack
                .get("num_documents_ingested")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(records.len()),
        })
    }

    async fn get_entry(&self, subject: &str) -> Result<MetadataRecord, PublishError> {
        let response = self
            .send(
                self.client
                    .get(self.url("subject"))
                    .query(&[("subject", subject)]),
            )
            .await?;
        if !response.status().is_success() {
            return Err(classify(response, Some(subject)).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PublishError::Encode {
                message: e.to_string(),
            })?;
        record_from_subject_response(subject, &body).ok_or_else(|| PublishError::NotFound {
            subject: subject.to_string(),
        })
    }

    async fn delete_entry(&self, subject: &str) -> Result<(), PublishError> {
        let response = self
            .send(
                self.client
                    .delete(self.url("subject"))
                    .query(&[("subject", subject)]),
            )
            .await?;
        if !response.status().is_success() {
            return Err(classify(response, Some(subject)).await);
        }
        Ok(())
    }
}
