// src/n8n.rs
//
// Read-only view of the automation workflows hosted on n8n. Clinics toggle
// automations by key; this only lists what exists upstream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum N8nError {
    #[error("n8n request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("n8n answered {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, rename = "updatedAt")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkflowPage {
    data: Vec<WorkflowSummary>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[async_trait]
pub trait WorkflowDirectory: Send + Sync {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, N8nError>;
}

pub struct N8nClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Upper bound on followed cursors, n8n pages are 100 rows.
const MAX_PAGES: usize = 20;

impl N8nClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl WorkflowDirectory for N8nClient {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, N8nError> {
        let url = format!("{}/api/v1/workflows", self.base_url);
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut req = self
                .http
                .get(&url)
                .header("X-N8N-API-KEY", &self.api_key)
                .query(&[("limit", "100")]);
            if let Some(c) = &cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }

            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(N8nError::Status { status: status.as_u16(), body });
            }

            let page: WorkflowPage = resp.json().await?;
            out.extend(page.data);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(count = out.len(), "n8n workflows listed");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lists_and_follows_cursor() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .and(header("X-N8N-API-KEY", "secret"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "id": "2", "name": "Doğum günü mesajı", "active": false }],
                "nextCursor": null
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .and(header("X-N8N-API-KEY", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "id": "1", "name": "Randevu hatırlatma", "active": true, "updatedAt": "2025-01-01T00:00:00.000Z" }],
                "nextCursor": "page2"
            })))
            .mount(&server)
            .await;

        let client = N8nClient::new(&format!("{}/", server.uri()), "secret");
        let workflows = client.list_workflows().await.unwrap();

        assert_eq!(workflows.len(), 2);
        assert_eq!(workflows[0].name, "Randevu hatırlatma");
        assert!(workflows[0].active);
        assert_eq!(workflows[1].id, "2");
    }

    #[tokio::test]
    async fn upstream_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/workflows"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let client = N8nClient::new(&server.uri(), "wrong");
        match client.list_workflows().await {
            Err(N8nError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "unauthorized");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
