//! Link organization workspaces to GitHub or GitLab repositories.
//!
//! The library validates Git remote URLs, tracks per-workspace connection
//! tests and gates saving a workspace's repository URL on them. The settings
//! API, the credential store and the connection test itself are remote
//! collaborators reached through the traits in [`store`] and [`probe`].

use log::warn;
use serde::{Deserialize, Serialize};

pub mod api;
pub mod github;
pub mod gitlab;
pub mod probe;
pub mod session;
pub mod settings;
pub mod store;
pub mod validate;

use validate::{GitUrl, SchemeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
}

impl Provider {
    /// Guesses the hosting provider from a host name.
    ///
    /// Unknown hosts are assumed to be self-hosted GitLab instances.
    pub fn detect(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if host.contains("github") {
            Provider::GitHub
        } else if host.contains("gitlab") {
            Provider::GitLab
        } else {
            warn!("unknown VCS host {}, defaulting to GitLab", host);
            Provider::GitLab
        }
    }
}

pub trait Endpoint: std::fmt::Debug {
    fn provider(&self) -> Provider;
    fn project_path(&self) -> String;
    /// Schemes accepted when configuring a repository on this provider.
    fn schemes(&self) -> SchemeSet;
    /// Whether a successful connection test must precede saving.
    fn requires_connection_test(&self) -> bool;
}

pub fn create_endpoint(url: &GitUrl) -> Box<dyn Endpoint + 'static> {
    match Provider::detect(&url.host) {
        Provider::GitHub => Box::new(github::GithubEndpoint::new(url)),
        Provider::GitLab => Box::new(gitlab::GitlabEndpoint::new(url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_provider_from_host() {
        assert_eq!(Provider::detect("github.com"), Provider::GitHub);
        assert_eq!(Provider::detect("GitHub.example.org"), Provider::GitHub);
        assert_eq!(Provider::detect("gitlab.com"), Provider::GitLab);
        assert_eq!(Provider::detect("git.internal.corp"), Provider::GitLab);
    }

    #[test]
    fn endpoint_follows_provider_rules() {
        let url = GitUrl::parse(
            "git+ssh://git@github.com/acme/workflows.git",
            SchemeSet::SshOrHttps,
        )
        .unwrap();
        let endpoint = create_endpoint(&url);
        assert_eq!(endpoint.provider(), Provider::GitHub);
        assert_eq!(endpoint.project_path(), "acme/workflows");
        assert_eq!(endpoint.schemes(), SchemeSet::SshOnly);
        assert!(!endpoint.requires_connection_test());

        let url = GitUrl::parse(
            "https://gitlab.com/acme/security/workflows",
            SchemeSet::SshOrHttps,
        )
        .unwrap();
        let endpoint = create_endpoint(&url);
        assert_eq!(endpoint.provider(), Provider::GitLab);
        assert_eq!(endpoint.project_path(), "acme/security/workflows");
        assert_eq!(endpoint.schemes(), SchemeSet::SshOrHttps);
        assert!(endpoint.requires_connection_test());
    }
}
