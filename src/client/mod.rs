//! HTTP status client.
//!
//! [`StatusClient`] performs exactly one GET per call and normalizes whatever
//! happens into a [`StatusPayload`] or a classified [`StatusError`]. It never
//! touches job state; interpreting the payload is the reconciler's job.

mod credentials;

pub use credentials::{Credential, CredentialProvider, SharedCredential, StaticCredential};

use crate::adapters::JobKindAdapter;
use crate::config::ApiConfig;
use crate::error::{Error, Result, StatusError};
use crate::types::{JobId, StatusPayload};
use reqwest::StatusCode;

/// Longest response body excerpt kept in error messages
const ERROR_BODY_LIMIT: usize = 256;

/// Thin wrapper around `reqwest` for status endpoints
#[derive(Clone, Debug)]
pub struct StatusClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl StatusClient {
    /// Build a client from API settings
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be created
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.base_url()?;

        Ok(Self { http, base_url })
    }

    /// Underlying HTTP client, shared with the result materializer
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Base URL all relative paths resolve against
    pub fn base_url(&self) -> &url::Url {
        &self.base_url
    }

    /// Resolve a relative path or absolute URL against the base URL
    ///
    /// Relative paths without a leading slash land beneath the base path;
    /// root-relative paths replace it.
    pub fn resolve(&self, path: &str) -> Result<url::Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Fetch the current status of a job
    ///
    /// # Errors
    /// - [`StatusError::Transport`] when no response was received
    /// - [`StatusError::Unauthorized`] on 401/403
    /// - [`StatusError::Http`] on any other non-success status
    /// - [`StatusError::Malformed`] / [`StatusError::UnknownStatus`] when the body
    ///   cannot be interpreted by the adapter
    pub async fn fetch_status(
        &self,
        id: &JobId,
        adapter: &dyn JobKindAdapter,
        credential: &Credential,
    ) -> std::result::Result<StatusPayload, StatusError> {
        let url = self
            .resolve(&adapter.status_path(id))
            .map_err(|e| StatusError::Malformed(format!("cannot build status URL: {}", e)))?;

        tracing::trace!(job_id = %id, kind = %adapter.kind(), url = %url, "fetching status");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, credential.header_value())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(StatusError::Transport)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(StatusError::Unauthorized {
                status: Some(status.as_u16()),
            });
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(StatusError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(StatusError::Transport)?;
        adapter.decode(&body)
    }
}
