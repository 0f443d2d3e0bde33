//! HTTP remote store.
//!
//! Upserts surveys with `PUT {base}/surveys/{id}`, which the backend treats
//! as create-or-replace keyed by the survey identifier.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client};
use std::time::Duration;
use tracing::debug;
use url::Url;

use fieldsync_common::{Error, Result, SurveyId};

use crate::remote::{Ack, RemoteError, RemoteStore};

/// Collection path under the base URL.
const SURVEYS_PATH: &str = "surveys";

/// Everything but RFC 3986 unreserved characters is escaped in record ids.
const RECORD_ID: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Remote store speaking JSON over HTTP.
pub struct HttpRemote {
    http: Client,
    base_url: Url,
    timeout: Duration,
    auth_token: Option<String>,
}

impl HttpRemote {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// `timeout` bounds every request end to end.
    ///
    /// # Errors
    /// - Base URL cannot be parsed or cannot carry a path
    /// - HTTP client construction failed
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid remote URL '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "Remote URL '{}' cannot be used as a base",
                base_url
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let http = Client::builder()
            .user_agent(concat!("fieldsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            timeout,
            auth_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Endpoint for a single record.
    pub fn record_url(&self, record_id: &SurveyId) -> Result<Url> {
        // Dot segments would be normalized away even when percent-encoded.
        if matches!(record_id.as_str(), "." | "..") {
            return Err(Error::InvalidInput(format!(
                "Record id '{}' cannot be addressed over HTTP",
                record_id
            )));
        }
        let encoded = utf8_percent_encode(record_id.as_str(), RECORD_ID).to_string();
        self.base_url
            .join(&format!("{}/{}", SURVEYS_PATH, encoded))
            .map_err(|e| Error::InvalidInput(format!("Invalid record URL: {}", e)))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    fn name(&self) -> &str {
        "http"
    }

    async fn upsert(
        &self,
        record_id: &SurveyId,
        payload: &serde_json::Value,
    ) -> std::result::Result<Ack, RemoteError> {
        let url = self
            .record_url(record_id)
            .map_err(|e| RemoteError::Encoding(e.to_string()))?;
        debug!("PUT {}", url);

        let mut request = self
            .http
            .put(url)
            .header(header::ACCEPT, "application/json")
            .json(payload);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout(self.timeout)
            } else {
                RemoteError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ack::now(record_id));
        }

        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
