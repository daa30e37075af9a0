//! Editing a workspace's repository configuration.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use log::{error, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::probe::{ConnectionTester, ProbeState, Reconciler};
use crate::store::{RemoteError, Workspace, WorkspaceSettings, WorkspaceStore};
use crate::validate::{validate, SchemeSet, ValidationError};

pub const DEFAULT_BRANCH: &str = "main";

/// How a repository URL is configured and checked before saving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// SSH-only URLs, saved without a connection test. Deprecated.
    GithubSsh,
    /// SSH or HTTPS URLs, saved only after a successful connection test.
    #[default]
    Gitlab,
}

impl Flow {
    pub fn schemes(self) -> SchemeSet {
        match self {
            Flow::GithubSsh => SchemeSet::SshOnly,
            Flow::Gitlab => SchemeSet::SshOrHttps,
        }
    }

    pub fn requires_connection_test(self) -> bool {
        matches!(self, Flow::Gitlab)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceGitConfig {
    pub workspace_id: String,
    pub name: String,
    pub git_repo_url: Option<String>,
    pub default_branch: String,
}

impl WorkspaceGitConfig {
    fn from_workspace(workspace: Workspace, default_branch: String) -> Self {
        Self {
            git_repo_url: workspace.git_repo_url().map(str::to_string),
            workspace_id: workspace.id,
            name: workspace.name,
            default_branch,
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("unknown workspace {0}")]
    UnknownWorkspace(String),
    #[error("invalid repository URL: {0}")]
    Invalid(#[from] ValidationError),
    #[error("no repository URL set for workspace {0}")]
    MissingUrl(String),
    #[error("test the connection for workspace {0} before saving")]
    ConnectionNotVerified(String),
    #[error("connection test for workspace {workspace_id} failed: {message}")]
    ConnectionFailed {
        workspace_id: String,
        message: String,
    },
    #[error("branch {0} is not in the repository")]
    UnknownBranch(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Default)]
struct Draft {
    url: Option<String>,
    branch: Option<String>,
}

/// UI-side state for the repository settings page.
///
/// Holds a cached copy of each workspace's configuration, unsaved edits and
/// the connection probes. The store stays the source of truth; the cache is
/// only overwritten by a load or a successful save.
pub struct GitSettingsSession<S, T> {
    store: Arc<S>,
    reconciler: Reconciler<T>,
    flow: Flow,
    configs: BTreeMap<String, WorkspaceGitConfig>,
    drafts: HashMap<String, Draft>,
    /// Workspaces whose cached branch was written by a save in this session.
    saved_branches: HashSet<String>,
    selected: Option<String>,
}

impl<S: WorkspaceStore, T: ConnectionTester> GitSettingsSession<S, T> {
    pub fn new(store: Arc<S>, tester: Arc<T>, flow: Flow) -> Self {
        if flow == Flow::GithubSsh {
            log::warn!("the SSH-only GitHub flow is deprecated");
        }
        Self {
            store,
            reconciler: Reconciler::new(tester, flow.schemes()),
            flow,
            configs: BTreeMap::new(),
            drafts: HashMap::new(),
            saved_branches: HashSet::new(),
            selected: None,
        }
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub async fn load(&mut self) -> Result<(), RemoteError> {
        let workspaces = self.store.list().await?;
        let mut configs = BTreeMap::new();
        for workspace in workspaces {
            let default_branch = self
                .configs
                .get(&workspace.id)
                .map(|config| config.default_branch.clone())
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            configs.insert(
                workspace.id.clone(),
                WorkspaceGitConfig::from_workspace(workspace, default_branch),
            );
        }
        info!("loaded {} workspaces", configs.len());
        self.configs = configs;
        Ok(())
    }

    pub fn workspaces(&self) -> impl Iterator<Item = &WorkspaceGitConfig> {
        self.configs.values()
    }

    pub fn config(&self, workspace_id: &str) -> Option<&WorkspaceGitConfig> {
        self.configs.get(workspace_id)
    }

    fn known(&self, workspace_id: &str) -> Result<&WorkspaceGitConfig, SaveError> {
        self.configs
            .get(workspace_id)
            .ok_or_else(|| SaveError::UnknownWorkspace(workspace_id.to_string()))
    }

    /// Switches the selected workspace. Probes of other workspaces keep
    /// running and keep their results.
    pub fn select(&mut self, workspace_id: &str) -> Result<(), SaveError> {
        self.known(workspace_id)?;
        self.selected = Some(workspace_id.to_string());
        Ok(())
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// The URL as currently shown in the form: the edit if any, else the
    /// saved value.
    pub fn draft_url(&self, workspace_id: &str) -> Option<&str> {
        match self.drafts.get(workspace_id).and_then(|d| d.url.as_deref()) {
            Some(url) => Some(url),
            None => self
                .configs
                .get(workspace_id)
                .and_then(|config| config.git_repo_url.as_deref()),
        }
    }

    pub fn edit_url(&mut self, workspace_id: &str, url: &str) -> Result<(), SaveError> {
        self.known(workspace_id)?;
        let draft = self.drafts.entry(workspace_id.to_string()).or_default();
        draft.url = Some(url.to_string());
        draft.branch = None;
        self.reconciler.reset_on_edit(workspace_id);
        Ok(())
    }

    pub fn validate_draft(&self, workspace_id: &str) -> Result<(), ValidationError> {
        validate(self.draft_url(workspace_id), self.flow.schemes())
    }

    pub fn test(&self, workspace_id: &str) -> Result<JoinHandle<()>, SaveError> {
        self.known(workspace_id)?;
        let url = self
            .draft_url(workspace_id)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| SaveError::MissingUrl(workspace_id.to_string()))?;
        Ok(self.reconciler.request_test(workspace_id, url)?)
    }

    pub fn test_all(&self) -> Vec<JoinHandle<()>> {
        let workspaces: Vec<Workspace> = self
            .configs
            .values()
            .map(|config| Workspace {
                id: config.workspace_id.clone(),
                name: config.name.clone(),
                settings: WorkspaceSettings {
                    git_repo_url: self.draft_url(&config.workspace_id).map(str::to_string),
                },
            })
            .collect();
        self.reconciler.test_all(&workspaces)
    }

    pub fn probe(&self, workspace_id: &str) -> ProbeState {
        self.reconciler.state(workspace_id)
    }

    pub fn branches(&self, workspace_id: &str) -> Vec<String> {
        self.probe(workspace_id)
            .connection()
            .map(|connection| connection.branches.clone())
            .unwrap_or_default()
    }

    pub fn select_branch(&mut self, workspace_id: &str, branch: &str) -> Result<(), SaveError> {
        self.known(workspace_id)?;
        match self.probe(workspace_id).connection() {
            Some(connection) if !connection.branches.iter().any(|b| b == branch) => {
                return Err(SaveError::UnknownBranch(branch.to_string()));
            }
            Some(_) => {}
            None if self.flow.requires_connection_test() => {
                return Err(self.unverified(workspace_id));
            }
            None if branch.trim().is_empty() => {
                return Err(SaveError::UnknownBranch(branch.to_string()));
            }
            None => {}
        }
        self.drafts
            .entry(workspace_id.to_string())
            .or_default()
            .branch = Some(branch.to_string());
        Ok(())
    }

    /// Branch that would be saved: the user's choice, else the branch saved
    /// for the current URL, else the repository's default from a successful
    /// test, else the cached value.
    pub fn default_branch(&self, workspace_id: &str) -> String {
        let draft = self.drafts.get(workspace_id);
        if let Some(branch) = draft.and_then(|d| d.branch.clone()) {
            return branch;
        }
        let url_edited = draft.map_or(false, |d| d.url.is_some());
        if !url_edited && self.saved_branches.contains(workspace_id) {
            if let Some(config) = self.configs.get(workspace_id) {
                return config.default_branch.clone();
            }
        }
        if let Some(branch) = self
            .probe(workspace_id)
            .connection()
            .and_then(|connection| connection.default_branch.clone())
        {
            return branch;
        }
        self.configs
            .get(workspace_id)
            .map(|config| config.default_branch.clone())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
    }

    pub fn can_save(&self, workspace_id: &str) -> bool {
        if self.validate_draft(workspace_id).is_err() {
            return false;
        }
        let clearing = self
            .draft_url(workspace_id)
            .map_or(true, |url| url.trim().is_empty());
        clearing || !self.flow.requires_connection_test() || self.reconciler.can_save(workspace_id)
    }

    /// Writes the draft URL to the store.
    ///
    /// Either the whole field is replaced and the cache updated, or nothing
    /// changes.
    pub async fn save(&mut self, workspace_id: &str) -> Result<&WorkspaceGitConfig, SaveError> {
        self.known(workspace_id)?;
        self.validate_draft(workspace_id)?;
        if !self.can_save(workspace_id) {
            return Err(self.unverified(workspace_id));
        }

        let git_repo_url = self
            .draft_url(workspace_id)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        let settings = WorkspaceSettings { git_repo_url };

        let workspace = self
            .store
            .update(workspace_id, &settings)
            .await
            .map_err(|err| {
                error!("failed to save repository for workspace {}: {}", workspace_id, err);
                err
            })?;

        let config = WorkspaceGitConfig::from_workspace(workspace, self.default_branch(workspace_id));
        info!(
            "saved repository for workspace {}: {:?} ({})",
            workspace_id, config.git_repo_url, config.default_branch
        );
        self.drafts.remove(workspace_id);
        self.saved_branches.insert(workspace_id.to_string());
        self.configs.insert(workspace_id.to_string(), config);
        Ok(&self.configs[workspace_id])
    }

    fn unverified(&self, workspace_id: &str) -> SaveError {
        match self.probe(workspace_id) {
            ProbeState::Error(message) => SaveError::ConnectionFailed {
                workspace_id: workspace_id.to_string(),
                message,
            },
            _ => SaveError::ConnectionNotVerified(workspace_id.to_string()),
        }
    }
}
