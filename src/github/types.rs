use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::pr::types::FileStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub login: String,
}

/// One entry of `GET /repos/{repo}/pulls`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullSummary {
    pub number: u64,
    pub title: String,
    pub user: User,
    pub html_url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// One entry of `GET /repos/{repo}/pulls/{number}/files`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullFile {
    pub filename: String,
    pub status: FileStatus,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub patch: Option<String>,
    #[serde(default)]
    pub raw_url: Option<String>,
}

/// One entry of the recursive git tree.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub fn is_blob(&self) -> bool {
        self.kind == "blob"
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct TreeResponse {
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ContentResponse {
    pub content: String,
    #[serde(default)]
    pub encoding: Option<String>,
}
