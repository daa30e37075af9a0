use crate::validate::{GitUrl, SchemeSet};
use crate::{Endpoint, Provider};

#[derive(Debug)]
pub struct GitlabEndpoint {
    name: String,
    /// Group path, possibly nested (`group/subgroup`).
    namespace: String,
}

impl GitlabEndpoint {
    pub fn new(url: &GitUrl) -> Self {
        Self {
            name: url.repo.clone(),
            namespace: url.org.clone(),
        }
    }
}

impl Endpoint for GitlabEndpoint {
    fn provider(&self) -> Provider {
        Provider::GitLab
    }

    fn project_path(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    fn schemes(&self) -> SchemeSet {
        SchemeSet::SshOrHttps
    }

    // Saving is only allowed once the access token has been shown to reach
    // the project.
    fn requires_connection_test(&self) -> bool {
        true
    }
}
