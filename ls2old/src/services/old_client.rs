//! Online Linguistic Database (OLD) REST client
//!
//! Session-cookie login through `login/authenticate`, then JSON create,
//! list, delete and update requests.

use crate::config::Endpoint;
use crate::models::DestinationId;
use crate::types::{CreateOutcome, DestinationApi, FileData, TransportError};
use base64::Engine;
use reqwest::{Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("ls2old/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// OLD-backed [`DestinationApi`]
pub struct OldClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl OldClient {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client and authenticate when credentials are configured
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let client = Self::new(&endpoint.url)?;
        if let Some(username) = &endpoint.username {
            client
                .login(username, endpoint.password.as_deref().unwrap_or_default())
                .await?;
        }
        Ok(client)
    }

    /// POST `login/authenticate`; the OLD answers `{"authenticated": true}`
    pub async fn login(&self, username: &str, password: &str) -> Result<(), TransportError> {
        let url = self.url("login/authenticate");
        debug!(url = %url, username = %username, "Logging in to OLD");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        let body = read_json(response).await?;
        let authenticated = body
            .get("authenticated")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if !authenticated {
            return Err(TransportError::Unauthorized(format!(
                "OLD rejected credentials for {} (HTTP {})",
                username,
                status.as_u16()
            )));
        }

        info!(username = %username, "Logged in to OLD");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Interpret the response to a create or update
    async fn create_outcome(response: Response) -> Result<CreateOutcome, TransportError> {
        let status = response.status();
        check_auth(status)?;

        if status.is_success() {
            let body = read_json(response).await?;
            return DestinationId::from_response(&body)
                .map(CreateOutcome::Created)
                .ok_or_else(|| TransportError::Parse(format!("response has no id: {}", body)));
        }

        // Validation errors come back as JSON; anything else is wrapped so
        // the report still shows what the server said.
        let text = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<Value>(&text)
            .unwrap_or_else(|_| json!({"status": status.as_u16(), "error": text}));
        Ok(CreateOutcome::Rejected(error))
    }
}

fn check_auth(status: StatusCode) -> Result<(), TransportError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::Unauthorized(format!(
            "OLD refused the request (HTTP {})",
            status.as_u16()
        )));
    }
    Ok(())
}

async fn read_json(response: Response) -> Result<Value, TransportError> {
    response
        .json()
        .await
        .map_err(|e| TransportError::Parse(e.to_string()))
}

#[async_trait::async_trait]
impl DestinationApi for OldClient {
    async fn create(&self, resource: &str, payload: &Value) -> Result<CreateOutcome, TransportError> {
        let url = self.url(resource);
        debug!(url = %url, "Creating OLD resource");

        let response = self
            .http_client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Self::create_outcome(response).await
    }

    async fn delete(&self, resource: &str, id: &DestinationId) -> Result<(), TransportError> {
        let url = self.url(&format!("{}/{}", resource, id));
        debug!(url = %url, "Deleting OLD resource");

        let response = self
            .http_client
            .delete(&url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        check_auth(status)?;
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(status.as_u16(), text));
        }
        Ok(())
    }

    async fn list(&self, resource: &str) -> Result<Vec<Value>, TransportError> {
        let url = self.url(resource);
        debug!(url = %url, "Listing OLD resources");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        check_auth(status)?;
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(status.as_u16(), text));
        }

        match read_json(response).await? {
            Value::Array(items) => Ok(items),
            // Paginated listings wrap results in {"items": [...], "paginator": {...}}
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(TransportError::Parse(format!("{} listing is not a list", resource))),
            },
            _ => Err(TransportError::Parse(format!("{} listing is not a list", resource))),
        }
    }

    async fn upload_file_data(
        &self,
        id: &DestinationId,
        data: &FileData,
    ) -> Result<CreateOutcome, TransportError> {
        let url = self.url(&format!("files/{}", id));
        debug!(url = %url, bytes = data.bytes.len(), "Sending file data");

        let payload = json!({
            "filename": data.filename,
            "MIME_type": data.mime_type,
            "base64_encoded_file": base64::engine::general_purpose::STANDARD.encode(&data.bytes),
        });

        let response = self
            .http_client
            .put(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Self::create_outcome(response).await
    }
}
