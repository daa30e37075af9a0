use crate::validate::{GitUrl, SchemeSet};
use crate::{Endpoint, Provider};

/// Legacy flow: SSH deploy keys, no connection test before saving.
#[derive(Debug)]
pub struct GithubEndpoint {
    name: String,
    owner: String,
}

impl GithubEndpoint {
    pub fn new(url: &GitUrl) -> Self {
        Self {
            name: url.repo.clone(),
            owner: url.org.clone(),
        }
    }
}

impl Endpoint for GithubEndpoint {
    fn provider(&self) -> Provider {
        Provider::GitHub
    }

    fn project_path(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    fn schemes(&self) -> SchemeSet {
        SchemeSet::SshOnly
    }

    fn requires_connection_test(&self) -> bool {
        false
    }
}
