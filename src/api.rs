//! HTTP client for the settings API.

use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::probe::{ConnectionTester, RepoConnection};
use crate::store::{
    CredentialStatus, CredentialStore, GitLabCredentials, RemoteError, TestConnectionResponse,
    Workspace, WorkspaceSettings, WorkspaceStore,
};

const GITLAB_VCS_PATH: &str = "organization/vcs/gitlab";

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct UpdateWorkspace<'a> {
    settings: &'a WorkspaceSettings,
}

#[derive(Serialize)]
struct TestConnectionRequest<'a> {
    git_repo_url: &'a str,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            detail: error_detail(&body),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        Ok(self.send(request).await?.json().await?)
    }
}

/// Pulls `detail` out of an API error body, falling back to the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("detail").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl WorkspaceStore for ApiClient {
    async fn list(&self) -> Result<Vec<Workspace>, RemoteError> {
        self.send_json(self.http.get(self.url("workspaces"))).await
    }

    async fn update(
        &self,
        workspace_id: &str,
        settings: &WorkspaceSettings,
    ) -> Result<Workspace, RemoteError> {
        debug!("updating workspace {}: {:?}", workspace_id, settings);
        let request = self
            .http
            .patch(self.url(&format!("workspaces/{}", workspace_id)))
            .json(&UpdateWorkspace { settings });
        self.send_json(request).await
    }
}

#[async_trait]
impl CredentialStore for ApiClient {
    async fn status(&self) -> Result<CredentialStatus, RemoteError> {
        let url = self.url(&format!("{}/credentials/status", GITLAB_VCS_PATH));
        self.send_json(self.http.get(url)).await
    }

    async fn save(&self, credentials: &GitLabCredentials) -> Result<(), RemoteError> {
        let url = self.url(&format!("{}/credentials", GITLAB_VCS_PATH));
        self.send(self.http.post(url).json(credentials)).await?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), RemoteError> {
        let url = self.url(&format!("{}/credentials", GITLAB_VCS_PATH));
        self.send(self.http.delete(url)).await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionTester for ApiClient {
    async fn test(&self, git_repo_url: &str) -> Result<RepoConnection, RemoteError> {
        let url = self.url(&format!("{}/test-connection", GITLAB_VCS_PATH));
        let request = self
            .http
            .post(url)
            .json(&TestConnectionRequest { git_repo_url });
        let response: TestConnectionResponse = self.send_json(request).await.map_err(|err| {
            error!("connection test request for {} failed: {}", git_repo_url, err);
            err
        })?;
        response.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paths_onto_base_url() {
        let client = ApiClient::new("https://app.example.com/api/", None);
        assert_eq!(
            client.url("/workspaces/ws-1"),
            "https://app.example.com/api/workspaces/ws-1"
        );
        assert_eq!(
            client.url("organization/vcs/gitlab/credentials"),
            "https://app.example.com/api/organization/vcs/gitlab/credentials"
        );
    }

    #[test]
    fn extracts_detail_from_error_body() {
        assert_eq!(
            error_detail(r#"{"detail": "Failed to save GitLab credentials: bad token"}"#),
            "Failed to save GitLab credentials: bad token"
        );
        assert_eq!(error_detail("Bad Gateway\n"), "Bad Gateway");
        assert_eq!(error_detail(r#"{"message": "x"}"#), r#"{"message": "x"}"#);
    }

    #[test]
    fn update_body_nests_settings() {
        let settings = WorkspaceSettings {
            git_repo_url: Some("git+ssh://git@github.com/acme/flows.git".into()),
        };
        let body = serde_json::to_value(UpdateWorkspace {
            settings: &settings,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"settings": {"git_repo_url": "git+ssh://git@github.com/acme/flows.git"}})
        );
    }
}
