//! LingSync (FieldDB) CouchDB client
//!
//! Logs in through CouchDB's `_session` endpoint (cookie auth) the first time
//! a request needs it, so a run served entirely from the cache never touches
//! the server. Pages through a corpus with Mango `_find` queries; servers
//! without `_find` (CouchDB 1.x, which LingSync ran on) are read through
//! `_all_docs?include_docs=true` instead, and the downloader classifies the
//! documents.

use crate::config::Endpoint;
use crate::models::EntityType;
use crate::types::{PageRequest, SourceApi, TransportError};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("ls2old/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Statuses a CouchDB without Mango answers `_find` with
const FIND_UNSUPPORTED: &[u16] = &[400, 404, 405];

/// CouchDB-backed [`SourceApi`]
pub struct FieldDbClient {
    http_client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    session: OnceCell<()>,
    all_docs_only: AtomicBool,
}

impl FieldDbClient {
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
            credentials: None,
            session: OnceCell::new(),
            all_docs_only: AtomicBool::new(false),
        })
    }

    /// Client for a configured endpoint; no request is sent yet
    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let mut client = Self::new(&endpoint.url)?;
        if let Some(username) = &endpoint.username {
            client.credentials = Some((
                username.clone(),
                endpoint.password.clone().unwrap_or_default(),
            ));
        }
        Ok(client)
    }

    /// Log in once, before the first request that reaches the server
    async fn ensure_session(&self) -> Result<(), TransportError> {
        let Some((username, password)) = &self.credentials else {
            return Ok(());
        };
        self.session
            .get_or_try_init(|| self.login(username, password))
            .await
            .map(|_| ())
    }

    /// POST `_session`; CouchDB answers `{"ok": true, ...}` and sets a cookie
    pub async fn login(&self, username: &str, password: &str) -> Result<(), TransportError> {
        let url = format!("{}/_session", self.base_url);
        debug!(url = %url, username = %username, "Logging in to CouchDB");

        let response = self
            .http_client
            .post(&url)
            .json(&json!({"name": username, "password": password}))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized(format!(
                "CouchDB rejected credentials for {}",
                username
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(status.as_u16(), text));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(TransportError::Unauthorized(format!(
                "CouchDB login for {} was not acknowledged",
                username
            )));
        }

        info!(username = %username, "Logged in to CouchDB");
        Ok(())
    }

    /// Mango selector matching one entity type
    pub fn selector(entity_type: EntityType) -> Value {
        json!({
            "$or": [
                {"collection": entity_type.as_str()},
                {"fieldDBtype": {"$in": entity_type.fielddb_types()}}
            ]
        })
    }

    /// `_find` request body for one page
    pub fn find_body(entity_type: EntityType, page: &PageRequest) -> Value {
        let mut body = json!({
            "selector": Self::selector(entity_type),
            "limit": page.limit,
        });
        if let Some(bookmark) = &page.bookmark {
            body["bookmark"] = Value::String(bookmark.clone());
        }
        if page.skip > 0 {
            body["skip"] = Value::from(page.skip);
        }
        body
    }

    /// `_all_docs` query string for one page
    pub fn all_docs_query(page: &PageRequest) -> Vec<(&'static str, String)> {
        vec![
            ("include_docs", "true".to_string()),
            ("limit", page.limit.to_string()),
            ("skip", page.skip.to_string()),
        ]
    }

    async fn find_page(
        &self,
        corpus: &str,
        entity_type: EntityType,
        page: &PageRequest,
    ) -> Result<Value, TransportError> {
        let url = format!("{}/{}/_find", self.base_url, corpus);
        debug!(
            url = %url,
            entity = %entity_type,
            limit = page.limit,
            bookmark = page.bookmark.as_deref().unwrap_or("-"),
            "Requesting source page"
        );

        let response = self
            .http_client
            .post(&url)
            .json(&Self::find_body(entity_type, page))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::page_body(response, corpus).await
    }

    async fn all_docs_page(&self, corpus: &str, page: &PageRequest) -> Result<Value, TransportError> {
        let url = format!("{}/{}/_all_docs", self.base_url, corpus);
        debug!(url = %url, limit = page.limit, skip = page.skip, "Requesting source page");

        let response = self
            .http_client
            .get(&url)
            .query(&Self::all_docs_query(page))
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Self::page_body(response, corpus).await
    }

    async fn page_body(response: reqwest::Response, corpus: &str) -> Result<Value, TransportError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized(format!(
                "not authorized to read corpus {}",
                corpus
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Api(status.as_u16(), text));
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl SourceApi for FieldDbClient {
    async fn fetch_page(
        &self,
        corpus: &str,
        entity_type: EntityType,
        page: &PageRequest,
    ) -> Result<Value, TransportError> {
        self.ensure_session().await?;

        if !self.all_docs_only.load(Ordering::SeqCst) {
            match self.find_page(corpus, entity_type, page).await {
                Err(TransportError::Api(status, _))
                    if page.bookmark.is_none() && FIND_UNSUPPORTED.contains(&status) =>
                {
                    warn!(
                        corpus = %corpus,
                        status,
                        "Mango _find unavailable; reading the corpus through _all_docs"
                    );
                    self.all_docs_only.store(true, Ordering::SeqCst);
                }
                other => return other,
            }
        }
        self.all_docs_page(corpus, page).await
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        self.ensure_session().await?;
        debug!(url = %url, "Downloading media");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::Unauthorized(url.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Api(status.as_u16(), url.to_string()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
