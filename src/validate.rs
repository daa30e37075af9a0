//! Git remote URL validation.
//!
//! Two syntaxes are accepted:
//!
//! * `git+ssh://git@host[:port]/org/repo[.git][@ref]`
//! * `https://host[:port]/org/repo[.git][@ref]`
//!
//! A rejected URL yields the first failing diagnostic out of a fixed,
//! ordered list so the user sees a specific message instead of a generic one.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SSH_PREFIX: &str = "git+ssh://";
const HTTPS_PREFIX: &str = "https://";
const SSH_USERINFO: &str = "git@";

static GIT_SSH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^git\+ssh://git@(?P<host>[^/:]+)(?::(?P<port>[0-9]+))?/(?P<path>[^/@]+?(?:/[^/@]+?)+?)(?:\.git)?(?:@(?P<ref>[^/@]+))?$",
    )
    .unwrap()
});

static GIT_HTTPS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https://(?P<host>[^/:]+)(?::(?P<port>[0-9]+))?/(?P<path>[^/@]+?(?:/[^/@]+?)+?)(?:\.git)?(?:@(?P<ref>[^/@]+))?$",
    )
    .unwrap()
});

/// The set of URL schemes a form accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeSet {
    /// `git+ssh://` only. Used by the legacy GitHub flow.
    SshOnly,
    /// `git+ssh://` or `https://`.
    SshOrHttps,
}

impl SchemeSet {
    pub fn allows_https(self) -> bool {
        matches!(self, SchemeSet::SshOrHttps)
    }
}

/// Why a candidate remote URL was rejected.
///
/// Variants are declared in the order the checks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("URL must start with {}", scheme_hint(.https_allowed))]
    InvalidScheme { https_allowed: bool },
    #[error("SSH URLs must include the git@ user, e.g. git+ssh://git@github.com/org/repo")]
    MissingUserinfo,
    #[error("URL must include a repository path after the host")]
    MissingPath,
    #[error("URL must include a host")]
    MissingHost,
    #[error("a port number must follow ':' after the host")]
    MissingPort,
    #[error("port must be a number from 0 to 65535")]
    NonNumericPort,
    #[error("path must include at least an organization and a repository (org/repo)")]
    PathTooShort,
    #[error("must be a valid Git remote URL, e.g. git+ssh://git@github.com/org/repo.git@main")]
    GenericGrammarMismatch,
}

fn scheme_hint(https_allowed: &bool) -> &'static str {
    if *https_allowed {
        "https:// or git+ssh://"
    } else {
        "git+ssh://"
    }
}

/// ASCII digits that fit a TCP port.
fn is_port(port: &str) -> bool {
    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && port.parse::<u16>().is_ok()
}

/// Checks a candidate Git remote against the accepted grammar.
///
/// Absent and blank input is valid: whether the field is required is up to
/// the caller.
pub fn validate(url: Option<&str>, schemes: SchemeSet) -> Result<(), ValidationError> {
    let url = match url.map(str::trim) {
        None | Some("") => return Ok(()),
        Some(url) => url,
    };

    if let Some((_, caps)) = grammar_captures(url, schemes) {
        if caps.name("port").map_or(true, |port| is_port(port.as_str())) {
            return Ok(());
        }
    }

    let remainder = if let Some(rest) = url.strip_prefix(SSH_PREFIX) {
        match rest.split_once(SSH_USERINFO) {
            Some((_, rest)) => rest,
            None => return Err(ValidationError::MissingUserinfo),
        }
    } else if let Some(rest) = url
        .strip_prefix(HTTPS_PREFIX)
        .filter(|_| schemes.allows_https())
    {
        rest
    } else {
        return Err(ValidationError::InvalidScheme {
            https_allowed: schemes.allows_https(),
        });
    };

    let (host, path) = remainder
        .split_once('/')
        .ok_or(ValidationError::MissingPath)?;

    if host.is_empty() {
        return Err(ValidationError::MissingHost);
    }

    if let Some((_, port)) = host.rsplit_once(':') {
        if port.is_empty() {
            return Err(ValidationError::MissingPort);
        }
        if !is_port(port) {
            return Err(ValidationError::NonNumericPort);
        }
    }

    if path.split('/').filter(|s| !s.is_empty()).count() < 2 {
        return Err(ValidationError::PathTooShort);
    }

    Err(ValidationError::GenericGrammarMismatch)
}

fn grammar_captures(url: &str, schemes: SchemeSet) -> Option<(GitScheme, Captures<'_>)> {
    if let Some(caps) = GIT_SSH_URL.captures(url) {
        return Some((GitScheme::Ssh, caps));
    }
    if schemes.allows_https() {
        if let Some(caps) = GIT_HTTPS_URL.captures(url) {
            return Some((GitScheme::Https, caps));
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GitScheme {
    Ssh,
    Https,
}

/// Structured form of an accepted remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub host: String,
    pub port: Option<u16>,
    /// Everything in the path before the repository name. Nested groups keep
    /// their slashes.
    pub org: String,
    pub repo: String,
    pub git_ref: Option<String>,
    pub scheme: GitScheme,
}

impl GitUrl {
    pub fn parse(url: &str, schemes: SchemeSet) -> Result<Self, ValidationError> {
        let url = url.trim();
        validate(Some(url), schemes)?;
        // blank input is valid but has no structure
        let (scheme, caps) =
            grammar_captures(url, schemes).ok_or(ValidationError::MissingPath)?;

        let host = caps["host"].to_string();
        let port = match caps.name("port") {
            Some(port) => Some(
                port.as_str()
                    .parse()
                    .map_err(|_| ValidationError::NonNumericPort)?,
            ),
            None => None,
        };
        let path = &caps["path"];
        // the grammar guarantees at least two segments
        let (org, repo) = path
            .rsplit_once('/')
            .ok_or(ValidationError::PathTooShort)?;

        Ok(Self {
            host,
            port,
            org: org.to_string(),
            repo: repo.to_string(),
            git_ref: caps.name("ref").map(|m| m.as_str().to_string()),
            scheme,
        })
    }

    pub fn project_path(&self) -> String {
        format!("{}/{}", self.org, self.repo)
    }

    /// Canonical string form, always with a `.git` suffix.
    pub fn to_url(&self) -> String {
        let authority = match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        };
        let base = match self.scheme {
            GitScheme::Https => format!("{}{}/{}.git", HTTPS_PREFIX, authority, self.project_path()),
            GitScheme::Ssh => format!(
                "{}{}{}/{}.git",
                SSH_PREFIX,
                SSH_USERINFO,
                authority,
                self.project_path()
            ),
        };
        match &self.git_ref {
            Some(git_ref) => format!("{}@{}", base, git_ref),
            None => base,
        }
    }
}

impl fmt::Display for GitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

/// Rewrites a conventional remote (`git@host:org/repo.git`, `ssh://…`,
/// `https://…`) into the syntax accepted by [`validate`].
pub fn suggest_remote(raw: &str, schemes: SchemeSet) -> Option<GitUrl> {
    use git_url_parse::Scheme;

    let parsed = git_url_parse::GitUrl::parse(raw.trim()).ok()?;
    let host = parsed.host.clone()?;

    let scheme = match parsed.scheme {
        Scheme::Https | Scheme::Http if schemes.allows_https() => GitScheme::Https,
        Scheme::Https | Scheme::Http | Scheme::Ssh | Scheme::GitSsh | Scheme::Unspecified => {
            GitScheme::Ssh
        }
        _ => return None,
    };

    let path = parsed.path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let (org, repo) = path.rsplit_once('/')?;
    if org.is_empty() || repo.is_empty() {
        return None;
    }

    let url = GitUrl {
        host,
        // a port only survives when the scheme stays the same
        port: match (&parsed.scheme, scheme) {
            (Scheme::Https, GitScheme::Https) | (Scheme::Ssh, GitScheme::Ssh) => parsed.port,
            _ => None,
        },
        org: org.to_string(),
        repo: repo.to_string(),
        git_ref: None,
        scheme,
    };

    validate(Some(&url.to_url()), schemes).ok().map(|_| url)
}
