//! Remote collaborators: the workspace settings store and the credential store.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::probe::RepoConnection;

pub const DEFAULT_GITLAB_URL: &str = "https://gitlab.com";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub git_repo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
}

impl Workspace {
    /// The configured URL, if it is non-blank.
    pub fn git_repo_url(&self) -> Option<&str> {
        self.settings
            .git_repo_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CredentialStatus {
    pub exists: bool,
    #[serde(rename = "gitlab_url", default)]
    pub host_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GitLabCredentials {
    pub access_token: String,
    #[serde(rename = "gitlab_url", default = "default_gitlab_url")]
    pub host_url: String,
}

fn default_gitlab_url() -> String {
    DEFAULT_GITLAB_URL.to_string()
}

impl GitLabCredentials {
    pub fn new(access_token: String, host_url: Option<String>) -> Self {
        Self {
            access_token,
            host_url: host_url.unwrap_or_else(default_gitlab_url),
        }
    }
}

impl fmt::Debug for GitLabCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabCredentials")
            .field("access_token", &"********")
            .field("host_url", &self.host_url)
            .finish()
    }
}

/// Body returned by the connection test endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestConnectionResponse {
    pub success: bool,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub branches: Vec<String>,
    #[serde(default)]
    pub branch_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestConnectionResponse {
    pub fn into_result(self) -> Result<RepoConnection, RemoteError> {
        if !self.success {
            return Err(RemoteError::ConnectionFailed(
                self.error
                    .unwrap_or_else(|| "connection test failed".to_string()),
            ));
        }
        let mut seen = HashSet::new();
        let branches: Vec<String> = self
            .branches
            .into_iter()
            .filter(|branch| seen.insert(branch.clone()))
            .collect();
        if branches.len() != self.branch_count {
            debug!(
                "server reported {} branches, listed {} distinct",
                self.branch_count,
                branches.len()
            );
        }
        Ok(RepoConnection {
            project_name: self.project_name.unwrap_or_default(),
            default_branch: self.default_branch,
            branch_count: branches.len(),
            branches,
        })
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("{0}")]
    ConnectionFailed(String),
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Workspace>, RemoteError>;

    /// Replaces the workspace's repository URL. `None` clears it.
    async fn update(
        &self,
        workspace_id: &str,
        settings: &WorkspaceSettings,
    ) -> Result<Workspace, RemoteError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn status(&self) -> Result<CredentialStatus, RemoteError>;
    async fn save(&self, credentials: &GitLabCredentials) -> Result<(), RemoteError>;
    async fn delete(&self) -> Result<(), RemoteError>;
}
