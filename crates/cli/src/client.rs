//! API client for communicating with the UPF operator

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Non-success response from the operator
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

/// API client for the operator's HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;
        let response = check(response).await?;

        response.json().await.context("Failed to parse response")
    }

    /// Deliver a lifecycle event; the operator answers 202 with no body
    pub async fn send_event(&self, event: &EventRequest) -> Result<()> {
        let url = self.base_url.join("events").context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .context("Failed to send request")?;
        check(response).await?;

        Ok(())
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        self.get("status").await
    }

    pub async fn relations(&self) -> Result<Vec<RelationRecord>> {
        self.get("relations").await
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ApiError { status, message }.into())
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub phase: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub volume: String,
    pub backing_id: String,
    pub capacity_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
    pub installed: bool,
    pub removed: bool,
    pub ready: Vec<String>,
    pub mounts: BTreeMap<String, Mount>,
    pub passes: u64,
    pub observed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRecord {
    pub relation_id: u32,
    pub interface: String,
    pub role: String,
    pub subscribers: Vec<String>,
    #[serde(default)]
    pub published: Option<serde_json::Value>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Lifecycle event body for `POST /events`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventRequest {
    Install,
    Remove,
    ConfigChanged {
        config: serde_json::Value,
    },
    ResourceAttached {
        resource: String,
        image: String,
    },
    RelationJoined {
        interface: String,
        relation_id: u32,
        remote: String,
    },
    RelationChanged {
        interface: String,
        relation_id: u32,
        remote: String,
    },
    RelationBroken {
        relation_id: u32,
    },
    ContainerReady {
        container: String,
    },
    ContainerUnready {
        container: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const STATUS_BODY: &str = r#"{
        "status": {"phase": "blocked", "message": "waiting for resource: web-image"},
        "installed": true,
        "removed": false,
        "ready": [],
        "mounts": {
            "config": {"volume": "config", "backing_id": "config-upf-0", "capacity_bytes": 1048576}
        },
        "passes": 3,
        "observed_at": 1700000000
    }"#;

    #[tokio::test]
    async fn test_status_parses_operator_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(STATUS_BODY)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let status = client.status().await.unwrap();

        mock.assert_async().await;
        assert_eq!(status.status.phase, "blocked");
        assert_eq!(status.passes, 3);
        assert_eq!(status.mounts["config"].backing_id, "config-upf-0");
    }

    #[tokio::test]
    async fn test_send_event_posts_tagged_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/events")
            .match_body(Matcher::Json(serde_json::json!({
                "kind": "resource-attached",
                "resource": "web-image",
                "image": "omecproject/upf-epc-bess:master-5786085"
            })))
            .with_status(202)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        client
            .send_event(&EventRequest::ResourceAttached {
                resource: "web-image".to_string(),
                image: "omecproject/upf-epc-bess:master-5786085".to_string(),
            })
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_becomes_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/events")
            .with_status(503)
            .with_body(r#"{"error": "reconciliation loop is not running"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.send_event(&EventRequest::Install).await.unwrap_err();
        let api = err.downcast_ref::<ApiError>().unwrap();

        assert_eq!(api.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.message, "reconciliation loop is not running");
    }

    #[tokio::test]
    async fn test_relations_accept_unpublished_records() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/relations")
            .with_status(200)
            .with_body(
                r#"[{"relation_id": 4, "interface": "metrics-endpoint", "role": "provides",
                     "subscribers": ["prometheus/0"], "updated_at": 1700000000}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let relations = client.relations().await.unwrap();

        assert_eq!(relations.len(), 1);
        assert!(relations[0].published.is_none());
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
