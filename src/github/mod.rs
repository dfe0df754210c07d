pub mod types;

pub use types::{PullFile, PullSummary, TreeEntry};

use async_trait::async_trait;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use types::{ContentResponse, TreeResponse};

const USER_AGENT: &str = "pr-reporter";

#[derive(Debug, Error)]
pub enum HostError {
    #[error("GitHub API request failed: {0}")]
    ApiRequest(#[from] reqwest::Error),

    #[error("Not found on code host: {0}")]
    NotFound(String),

    #[error("Invalid repository identifier: {0}")]
    InvalidRepo(String),

    #[error("Failed to decode file contents for {path}: {reason}")]
    Decode { path: String, reason: String },
}

/// Read access to a code host.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Open pull requests of `repo` (`owner/name`), newest first, at most `limit`.
    async fn list_pull_requests(&self, repo: &str, limit: usize) -> Result<Vec<PullSummary>, HostError>;

    async fn list_pr_files(&self, repo: &str, number: u64) -> Result<Vec<PullFile>, HostError>;

    async fn fetch_raw_file(&self, raw_url: &str) -> Result<String, HostError>;

    /// Recursive tree of `branch`.
    async fn repo_tree(&self, repo: &str, branch: &str) -> Result<Vec<TreeEntry>, HostError>;

    /// Decoded contents of `path` at `git_ref` (branch, tag or commit).
    async fn fetch_file(&self, repo: &str, git_ref: &str, path: &str) -> Result<String, HostError>;
}

/// GitHub REST client.
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Result<Self, HostError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn repo_url(&self, repo: &str) -> Result<String, HostError> {
        validate_repo(repo)?;
        Ok(format!("{}/repos/{}", self.api_url, repo))
    }
}

/// Check `owner/name` form.
pub fn validate_repo(repo: &str) -> Result<(), HostError> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => Ok(()),
        _ => Err(HostError::InvalidRepo(repo.to_string())),
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    #[instrument(skip(self), fields(repo = %repo))]
    async fn list_pull_requests(&self, repo: &str, limit: usize) -> Result<Vec<PullSummary>, HostError> {
        let url = format!("{}/pulls", self.repo_url(repo)?);
        let per_page = limit.clamp(1, 100).to_string();
        let mut pulls = self
            .get(&url)
            .query(&[("state", "open"), ("per_page", per_page.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PullSummary>>()
            .await?;
        pulls.truncate(limit);
        debug!(count = pulls.len(), "listed pull requests");
        Ok(pulls)
    }

    #[instrument(skip(self), fields(repo = %repo, pr = number))]
    async fn list_pr_files(&self, repo: &str, number: u64) -> Result<Vec<PullFile>, HostError> {
        let url = format!("{}/pulls/{}/files", self.repo_url(repo)?, number);
        let files = self
            .get(&url)
            .query(&[("per_page", "100")])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PullFile>>()
            .await?;
        debug!(count = files.len(), "listed PR files");
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn fetch_raw_file(&self, raw_url: &str) -> Result<String, HostError> {
        let response = self.get(raw_url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HostError::NotFound(raw_url.to_string()));
        }
        let text = response.error_for_status()?.text().await?;
        debug!(bytes = text.len(), "fetched raw file");
        Ok(text)
    }

    #[instrument(skip(self), fields(repo = %repo, branch = %branch))]
    async fn repo_tree(&self, repo: &str, branch: &str) -> Result<Vec<TreeEntry>, HostError> {
        let url = format!("{}/git/trees/{}", self.repo_url(repo)?, branch);
        let response = self
            .get(&url)
            .query(&[("recursive", "1")])
            .send()
            .await?
            .error_for_status()?
            .json::<TreeResponse>()
            .await?;
        if response.truncated {
            warn!("repository tree was truncated by GitHub; some files will not be indexed");
        }
        debug!(entries = response.tree.len(), "fetched repository tree");
        Ok(response.tree)
    }

    #[instrument(skip(self), fields(repo = %repo, git_ref = %git_ref, path = %path))]
    async fn fetch_file(&self, repo: &str, git_ref: &str, path: &str) -> Result<String, HostError> {
        let url = format!("{}/contents/{}", self.repo_url(repo)?, path);
        let response = self.get(&url).query(&[("ref", git_ref)]).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(HostError::NotFound(path.to_string()));
        }
        let content = response.error_for_status()?.json::<ContentResponse>().await?;
        decode_content(path, &content)
    }
}

fn decode_content(path: &str, response: &ContentResponse) -> Result<String, HostError> {
    match response.encoding.as_deref() {
        Some("base64") | None => {
            // GitHub wraps base64 payloads at 60 columns.
            let compact: String = response
                .content
                .chars()
                .filter(|c| !c.is_ascii_whitespace())
                .collect();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| HostError::Decode {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Some(other) => Err(HostError::Decode {
            path: path.to_string(),
            reason: format!("unsupported encoding {}", other),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_repo() {
        assert!(validate_repo("org/repo").is_ok());
        assert!(validate_repo("org").is_err());
        assert!(validate_repo("/repo").is_err());
        assert!(validate_repo("org/repo/extra").is_err());
    }

    #[test]
    fn test_repo_url_trims_trailing_slash() {
        let client = GitHubClient::new("https://api.github.com/", None).unwrap();
        assert_eq!(
            client.repo_url("org/repo").unwrap(),
            "https://api.github.com/repos/org/repo"
        );
    }

    #[test]
    fn test_decode_wrapped_base64() {
        let response = ContentResponse {
            content: "ZGVmIG1h\naW4oKToK\n".to_string(),
            encoding: Some("base64".to_string()),
        };
        assert_eq!(decode_content("main.py", &response).unwrap(), "def main():\n");
    }

    #[test]
    fn test_decode_unknown_encoding() {
        let response = ContentResponse {
            content: String::new(),
            encoding: Some("none".to_string()),
        };
        assert!(matches!(
            decode_content("big.bin", &response),
            Err(HostError::Decode { .. })
        ));
    }
}
