//! Remote repository client.
//!
//! Narrow contract to the version-controlled archive: ensure a folder
//! exists, write a file with a commit message, push. The GitHub
//! implementation drives the contents API, where each file write is its own
//! commit and `push` is implicit; the trait keeps the push step explicit so
//! other backends (a local working copy, a test double) fit the same shape.
//! Authentication never leaves this module.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use std::time::Duration;

use crate::config::PublishConfig;

#[async_trait]
pub trait RepoClient: Send + Sync {
    /// Make sure a folder exists in the repository. Idempotent.
    async fn ensure_folder(&self, path: &str) -> Result<()>;

    /// Create or update a file, committing with the given message.
    /// Returns a commit reference.
    async fn write_file(&self, path: &str, bytes: &[u8], message: &str) -> Result<String>;

    /// Publish accumulated commits to the remote. Idempotent.
    async fn push(&self) -> Result<()>;
}

/// GitHub contents-API backed client.
///
/// Requires the `GITHUB_TOKEN` environment variable.
pub struct GithubRepoClient {
    api_base: String,
    repo: String,
    branch: String,
    token: String,
    client: reqwest::Client,
}

impl GithubRepoClient {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| anyhow::anyhow!("GITHUB_TOKEN environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            token,
            client,
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_base, self.repo, path)
    }

    /// SHA of an existing file or folder, `None` on 404.
    async fn existing_sha(&self, path: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.branch.as_str())])
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "brainbox")
            .send()
            .await
            .context("contents lookup failed")?;

        match response.status().as_u16() {
            404 => Ok(None),
            s if (200..300).contains(&s) => {
                let json: serde_json::Value = response.json().await?;
                // Directories come back as arrays; they exist but have no sha.
                Ok(Some(
                    json.get("sha")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                ))
            }
            _ => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                bail!("GitHub API error {}: {}", status, body)
            }
        }
    }
}

/// Stand-in used when no publishing credentials are configured. Every
/// operation fails, which the publish orchestrator records as a failed
/// attempt that a later run with credentials can retry.
pub struct UnavailableRepo {
    reason: String,
}

impl UnavailableRepo {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl RepoClient for UnavailableRepo {
    async fn ensure_folder(&self, _path: &str) -> Result<()> {
        bail!("publishing unavailable: {}", self.reason)
    }

    async fn write_file(&self, _path: &str, _bytes: &[u8], _message: &str) -> Result<String> {
        bail!("publishing unavailable: {}", self.reason)
    }

    async fn push(&self) -> Result<()> {
        bail!("publishing unavailable: {}", self.reason)
    }
}

#[async_trait]
impl RepoClient for GithubRepoClient {
    async fn ensure_folder(&self, path: &str) -> Result<()> {
        if self.existing_sha(path).await?.is_some() {
            return Ok(());
        }
        // Git has no empty directories; a .gitkeep materializes the folder.
        self.write_file(
            &format!("{}/.gitkeep", path),
            b"",
            &format!("Create folder {}/", path),
        )
        .await?;
        Ok(())
    }

    async fn write_file(&self, path: &str, bytes: &[u8], message: &str) -> Result<String> {
        let existing = self.existing_sha(path).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

        let mut body = serde_json::json!({
            "message": message,
            "content": encoded,
            "branch": self.branch,
        });
        if let Some(sha) = existing.filter(|s| !s.is_empty()) {
            body["sha"] = serde_json::Value::String(sha);
        }

        let response = self
            .client
            .put(self.contents_url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "brainbox")
            .json(&body)
            .send()
            .await
            .context("contents write failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("GitHub API error {} writing {}: {}", status, path, text);
        }

        let json: serde_json::Value = response.json().await?;
        let commit_sha = json
            .get("commit")
            .and_then(|c| c.get("sha"))
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(commit_sha)
    }

    async fn push(&self) -> Result<()> {
        // The contents API commits directly to the branch; nothing to do.
        Ok(())
    }
}
