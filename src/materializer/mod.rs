//! Result materializer: fetches and saves the output of succeeded jobs.
//!
//! A job's results are available once it reached `Completed` or
//! `PartiallyCompleted`. They can be fetched one artifact at a time or, for job
//! kinds whose backend bundles results, as a single archive.
//!
//! Artifact fetches retry transient failures with exponential backoff
//! ([`download_with_retry`]). When downloading every artifact separately, one
//! failure never aborts the rest; each result is reported on its own.

use crate::adapters::adapter_for;
use crate::client::{Credential, CredentialProvider, StatusClient};
use crate::config::{Config, DownloadConfig};
use crate::error::{Error, Result};
use crate::retry::download_with_retry;
use crate::types::Job;
use crate::utils::{
    filename_from_content_disposition, get_unique_path, sanitize_filename, url_extension,
};
use crate::watcher::JobWatcher;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extension used when an artifact URL does not reveal one
const DEFAULT_EXTENSION: &str = "png";

/// Which result of a job to fetch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactSelector {
    /// Every result bundled server-side into one zip
    Archive,
    /// One artifact by position in `Job::artifacts`
    Index(usize),
}

/// Fetched result held in memory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadedFile {
    /// Filename to save under (no directory components)
    pub filename: String,
    /// `Content-Type` reported by the server, if any
    pub content_type: Option<String>,
    /// File content
    pub bytes: Vec<u8>,
}

/// Body and headers of one successful fetch
struct Fetched {
    disposition: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Downloads artifacts of succeeded jobs
#[derive(Clone)]
pub struct Materializer {
    client: StatusClient,
    credentials: Arc<dyn CredentialProvider>,
    config: Arc<DownloadConfig>,
}

impl Materializer {
    /// Create a materializer with its own HTTP client
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &Config, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: StatusClient::new(&config.api)?,
            credentials,
            config: Arc::new(config.download.clone()),
        })
    }

    /// Create a materializer sharing a watcher's HTTP client and credentials
    pub fn from_watcher(watcher: &JobWatcher) -> Self {
        Self {
            client: watcher.client.clone(),
            credentials: Arc::clone(&watcher.credentials),
            config: Arc::new(watcher.config.download.clone()),
        }
    }

    /// Default directory for [`Materializer::save_all`]
    pub fn download_dir(&self) -> &Path {
        &self.config.download_dir
    }

    /// Whether all results of this job can be fetched as one archive
    pub fn supports_archive(&self, job: &Job) -> bool {
        self.config.supports_archive(job.kind)
            && adapter_for(job.kind).archive_path(&job.id).is_some()
    }

    /// Fetch one result of a job
    ///
    /// # Errors
    /// - [`Error::NotReady`] unless the job reached a success-bearing terminal state
    /// - [`Error::ArtifactNotFound`] for an out-of-range index or an unsupported archive
    /// - [`Error::Unauthorized`] when the server rejects the credential
    /// - [`Error::DownloadFailed`] / [`Error::Network`] once retries are exhausted
    pub async fn download(&self, job: &Job, selector: ArtifactSelector) -> Result<DownloadedFile> {
        ensure_ready(job)?;

        match selector {
            ArtifactSelector::Archive => self.download_archive(job).await,
            ArtifactSelector::Index(index) => self.download_artifact(job, index).await,
        }
    }

    /// Fetch every result of a job
    ///
    /// Uses the archive when the job kind supports one; otherwise fetches the
    /// artifacts one after another, pausing `inter_download_delay` between them.
    /// A job without artifacts and without archive support yields no results.
    pub async fn download_all(&self, job: &Job) -> Vec<Result<DownloadedFile>> {
        if let Err(e) = ensure_ready(job) {
            return vec![Err(e)];
        }
        if self.supports_archive(job) {
            return vec![self.download_archive(job).await];
        }

        let delay = self.config.inter_download_delay;
        let mut results = Vec::with_capacity(job.artifacts.len());
        for index in 0..job.artifacts.len() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = self.download_artifact(job, index).await;
            if let Err(e) = &result {
                tracing::warn!(job_id = %job.id, index, error = %e, "artifact download failed");
            }
            results.push(result);
        }
        results
    }

    /// Write a fetched result into `dir`, honoring the collision action
    ///
    /// Returns the path actually written, which differs from
    /// `dir/filename` when the file was renamed to avoid a collision.
    ///
    /// # Errors
    /// Returns [`Error::FileCollision`] when the file exists and the action is `Skip`,
    /// or an I/O error.
    pub async fn save(&self, file: &DownloadedFile, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create download directory '{}': {}", dir.display(), e),
            ))
        })?;

        let target = get_unique_path(&dir.join(&file.filename), self.config.file_collision)?;
        tokio::fs::write(&target, &file.bytes).await?;

        tracing::info!(path = %target.display(), bytes = file.bytes.len(), "saved result");
        Ok(target)
    }

    /// Fetch every result of a job and save it into `dir`
    pub async fn save_all(&self, job: &Job, dir: &Path) -> Vec<Result<PathBuf>> {
        let mut saved = Vec::new();
        for result in self.download_all(job).await {
            saved.push(match result {
                Ok(file) => self.save(&file, dir).await,
                Err(e) => Err(e),
            });
        }
        saved
    }

    async fn download_archive(&self, job: &Job) -> Result<DownloadedFile> {
        let path = adapter_for(job.kind)
            .archive_path(&job.id)
            .filter(|_| self.config.supports_archive(job.kind))
            .ok_or_else(|| Error::ArtifactNotFound {
                id: job.id.to_string(),
                reason: format!("{} jobs have no archive download", job.kind),
            })?;
        let url = self.client.resolve(&path)?;
        let credential = self
            .credentials
            .credential()
            .await
            .ok_or_else(|| Error::Unauthorized("no credential available".into()))?;

        tracing::debug!(job_id = %job.id, url = %url, "downloading result archive");
        let fetched = self.fetch_with_retry(url, Some(credential)).await?;

        let filename = fetched
            .disposition
            .unwrap_or_else(|| format!("{}.zip", file_stem_for(job)));
        Ok(DownloadedFile {
            filename,
            content_type: fetched.content_type,
            bytes: fetched.bytes,
        })
    }

    async fn download_artifact(&self, job: &Job, index: usize) -> Result<DownloadedFile> {
        let artifact = job.artifacts.get(index).ok_or_else(|| Error::ArtifactNotFound {
            id: job.id.to_string(),
            reason: format!(
                "index {} out of range ({} artifacts)",
                index,
                job.artifacts.len()
            ),
        })?;
        let url = self.client.resolve(&artifact.url)?;

        // Only send the credential to the backend itself, never to a CDN
        let credential = if same_origin(&url, self.client.base_url()) {
            self.credentials.credential().await
        } else {
            None
        };

        tracing::debug!(job_id = %job.id, index, url = %url, "downloading artifact");
        let fetched = self.fetch_with_retry(url.clone(), credential).await?;

        let filename = artifact
            .filename
            .as_deref()
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                let ext = url_extension(url.as_str())
                    .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
                format!("{}_{}.{}", file_stem_for(job), index + 1, ext)
            });
        Ok(DownloadedFile {
            filename,
            content_type: fetched.content_type,
            bytes: fetched.bytes,
        })
    }

    async fn fetch_with_retry(
        &self,
        url: url::Url,
        credential: Option<Credential>,
    ) -> Result<Fetched> {
        download_with_retry(&self.config.retry, || {
            self.fetch(url.clone(), credential.clone())
        })
        .await
    }

    async fn fetch(&self, url: url::Url, credential: Option<Credential>) -> Result<Fetched> {
        let mut request = self.client.http().get(url.clone());
        if let Some(credential) = &credential {
            request = request.header(reqwest::header::AUTHORIZATION, credential.header_value());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!("HTTP {} for {}", status.as_u16(), url)));
        }
        if !status.is_success() {
            return Err(Error::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let disposition = header(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|value| filename_from_content_disposition(&value));
        let content_type = header(reqwest::header::CONTENT_TYPE);

        let bytes = response.bytes().await?.to_vec();
        Ok(Fetched {
            disposition,
            content_type,
            bytes,
        })
    }
}

fn ensure_ready(job: &Job) -> Result<()> {
    if job.state.is_success() {
        Ok(())
    } else {
        Err(Error::NotReady {
            id: job.id.to_string(),
            state: job.state.to_string(),
        })
    }
}

/// Job id made safe for use in a filename
fn file_stem_for(job: &Job) -> String {
    let stem = sanitize_filename(job.id.as_str());
    if stem.is_empty() { "result".to_string() } else { stem }
}

fn same_origin(a: &url::Url, b: &url::Url) -> bool {
    a.origin() == b.origin()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
