//! Per-workspace connection tests.
//!
//! Each workspace has at most one probe. Starting a test bumps the
//! workspace's request token; a response is applied only if the token it was
//! issued under is still current, so the latest request always decides the
//! final state no matter in which order responses arrive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::store::{RemoteError, Workspace};
use crate::validate::{validate, SchemeSet, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConnection {
    pub project_name: String,
    pub default_branch: Option<String>,
    /// Server order, duplicates removed.
    pub branches: Vec<String>,
    pub branch_count: usize,
}

#[async_trait]
pub trait ConnectionTester: Send + Sync + 'static {
    async fn test(&self, git_repo_url: &str) -> Result<RepoConnection, RemoteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Idle,
    Testing,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProbeState {
    #[default]
    Idle,
    Testing,
    Success(RepoConnection),
    Error(String),
}

impl ProbeState {
    pub fn status(&self) -> ProbeStatus {
        match self {
            ProbeState::Idle => ProbeStatus::Idle,
            ProbeState::Testing => ProbeStatus::Testing,
            ProbeState::Success(_) => ProbeStatus::Success,
            ProbeState::Error(_) => ProbeStatus::Error,
        }
    }

    pub fn connection(&self) -> Option<&RepoConnection> {
        match self {
            ProbeState::Success(connection) => Some(connection),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ProbeState::Error(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Probe {
    token: u64,
    state: ProbeState,
}

/// Session-local map of workspace probes.
///
/// Clones share the same map.
pub struct Reconciler<T> {
    tester: Arc<T>,
    schemes: SchemeSet,
    probes: Arc<Mutex<HashMap<String, Probe>>>,
}

impl<T> Clone for Reconciler<T> {
    fn clone(&self) -> Self {
        Self {
            tester: Arc::clone(&self.tester),
            schemes: self.schemes,
            probes: Arc::clone(&self.probes),
        }
    }
}

impl<T: ConnectionTester> Reconciler<T> {
    pub fn new(tester: Arc<T>, schemes: SchemeSet) -> Self {
        Self {
            tester,
            schemes,
            probes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn schemes(&self) -> SchemeSet {
        self.schemes
    }

    /// Starts a connection test for `workspace_id`.
    ///
    /// The probe is `Testing` when this returns. An invalid or blank URL
    /// starts nothing and leaves the probe as it was.
    pub fn request_test(
        &self,
        workspace_id: &str,
        url: &str,
    ) -> Result<JoinHandle<()>, ValidationError> {
        validate(Some(url), self.schemes)?;
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(ValidationError::MissingPath);
        }

        let token = {
            let mut probes = self.lock();
            let probe = probes.entry(workspace_id.to_string()).or_default();
            probe.token += 1;
            probe.state = ProbeState::Testing;
            probe.token
        };
        debug!(
            "testing connection for workspace {} (request {}): {}",
            workspace_id, token, url
        );

        let this = self.clone();
        let workspace_id = workspace_id.to_string();
        Ok(tokio::spawn(async move {
            let outcome = this.tester.test(&url).await;
            this.apply(&workspace_id, token, outcome);
        }))
    }

    fn apply(&self, workspace_id: &str, token: u64, outcome: Result<RepoConnection, RemoteError>) {
        let mut probes = self.lock();
        let probe = match probes.get_mut(workspace_id) {
            Some(probe) if probe.token == token => probe,
            Some(probe) => {
                warn!(
                    "ignoring stale connection test response for workspace {} (request {}, current {})",
                    workspace_id, token, probe.token
                );
                return;
            }
            None => return,
        };

        probe.state = match outcome {
            Ok(connection) => {
                debug!(
                    "workspace {} connected to {} ({} branches)",
                    workspace_id, connection.project_name, connection.branch_count
                );
                ProbeState::Success(connection)
            }
            Err(err) => {
                error!("connection test failed for workspace {}: {}", workspace_id, err);
                ProbeState::Error(err.to_string())
            }
        };
    }

    /// Drops any result for `workspace_id` after its URL was edited.
    ///
    /// Responses still in flight become stale.
    pub fn reset_on_edit(&self, workspace_id: &str) {
        let mut probes = self.lock();
        let probe = probes.entry(workspace_id.to_string()).or_default();
        probe.token += 1;
        probe.state = ProbeState::Idle;
    }

    /// Tests every workspace that has a repository URL, all at once.
    pub fn test_all(&self, workspaces: &[Workspace]) -> Vec<JoinHandle<()>> {
        workspaces
            .iter()
            .filter_map(|workspace| {
                let url = workspace.git_repo_url()?;
                match self.request_test(&workspace.id, url) {
                    Ok(handle) => Some(handle),
                    Err(err) => {
                        warn!("skipping workspace {}: {}", workspace.id, err);
                        None
                    }
                }
            })
            .collect()
    }

    pub fn state(&self, workspace_id: &str) -> ProbeState {
        self.lock()
            .get(workspace_id)
            .map(|probe| probe.state.clone())
            .unwrap_or_default()
    }

    pub fn can_save(&self, workspace_id: &str) -> bool {
        self.state(workspace_id).status() == ProbeStatus::Success
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Probe>> {
        self.probes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WorkspaceSettings;
    use tokio::sync::oneshot;

    type Reply = Result<RepoConnection, RemoteError>;

    /// Answers each URL with whatever the test sends through its channel.
    #[derive(Default)]
    struct ScriptedTester {
        pending: Mutex<HashMap<String, oneshot::Receiver<Reply>>>,
    }

    impl ScriptedTester {
        fn expect(&self, url: &str) -> oneshot::Sender<Reply> {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().insert(url.to_string(), rx);
            tx
        }
    }

    #[async_trait]
    impl ConnectionTester for ScriptedTester {
        async fn test(&self, git_repo_url: &str) -> Result<RepoConnection, RemoteError> {
            let rx = self
                .pending
                .lock()
                .unwrap()
                .remove(git_repo_url)
                .expect("unexpected url");
            rx.await
                .unwrap_or_else(|_| Err(RemoteError::ConnectionFailed("dropped".into())))
        }
    }

    fn connection(project: &str) -> RepoConnection {
        RepoConnection {
            project_name: project.to_string(),
            default_branch: Some("main".to_string()),
            branches: vec!["main".to_string(), "dev".to_string()],
            branch_count: 2,
        }
    }

    fn workspace(id: &str, url: Option<&str>) -> Workspace {
        Workspace {
            id: id.to_string(),
            name: id.to_uppercase(),
            settings: WorkspaceSettings {
                git_repo_url: url.map(str::to_string),
            },
        }
    }

    const URL_A: &str = "https://gitlab.com/acme/alpha";
    const URL_B: &str = "https://gitlab.com/acme/beta";

    fn reconciler() -> (Arc<ScriptedTester>, Reconciler<ScriptedTester>) {
        let tester = Arc::new(ScriptedTester::default());
        let reconciler = Reconciler::new(Arc::clone(&tester), SchemeSet::SshOrHttps);
        (tester, reconciler)
    }

    #[tokio::test]
    async fn request_moves_through_testing_to_success() {
        let (tester, reconciler) = reconciler();
        let reply = tester.expect(URL_A);

        assert_eq!(reconciler.state("w1"), ProbeState::Idle);
        let handle = reconciler.request_test("w1", URL_A).unwrap();
        assert_eq!(reconciler.state("w1").status(), ProbeStatus::Testing);
        assert!(!reconciler.can_save("w1"));

        reply.send(Ok(connection("alpha"))).unwrap();
        handle.await.unwrap();

        assert_eq!(reconciler.state("w1"), ProbeState::Success(connection("alpha")));
        assert!(reconciler.can_save("w1"));
    }

    #[tokio::test]
    async fn failure_lands_in_error_without_retry() {
        let (tester, reconciler) = reconciler();
        let reply = tester.expect(URL_A);

        let handle = reconciler.request_test("w1", URL_A).unwrap();
        reply
            .send(Err(RemoteError::ConnectionFailed("401 Unauthorized".into())))
            .unwrap();
        handle.await.unwrap();

        let state = reconciler.state("w1");
        assert_eq!(state.status(), ProbeStatus::Error);
        assert_eq!(state.error_message(), Some("401 Unauthorized"));
        assert!(!reconciler.can_save("w1"));
        assert!(tester.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_starts_nothing() {
        let (_tester, reconciler) = reconciler();
        let err = reconciler
            .request_test("w1", "git+ssh://git@github.com/org")
            .unwrap_err();
        assert_eq!(err, ValidationError::PathTooShort);
        assert_eq!(reconciler.state("w1"), ProbeState::Idle);
    }

    #[tokio::test]
    async fn accepts_exactly_what_validate_accepts() {
        let (tester, reconciler) = reconciler();
        let url = "https://gitlab.com:65535/acme/alpha";
        let reply = tester.expect(url);
        let handle = reconciler.request_test("w1", url).unwrap();
        reply.send(Ok(connection("alpha"))).unwrap();
        handle.await.unwrap();
        assert!(reconciler.can_save("w1"));

        for url in [
            "https://gitlab.com:70000/acme/alpha",
            "https://gitlab.com:\u{661}\u{662}/acme/alpha",
        ] {
            let expected = validate(Some(url), SchemeSet::SshOrHttps).unwrap_err();
            assert_eq!(reconciler.request_test("w2", url).unwrap_err(), expected);
        }
        assert_eq!(reconciler.state("w2"), ProbeState::Idle);
        assert_eq!(
            reconciler.request_test("w2", "  ").unwrap_err(),
            ValidationError::MissingPath
        );
    }

    #[tokio::test]
    async fn latest_request_wins_over_late_response() {
        let (tester, reconciler) = reconciler();
        let reply_a = tester.expect(URL_A);
        let reply_b = tester.expect(URL_B);

        let first = reconciler.request_test("w1", URL_A).unwrap();
        let second = reconciler.request_test("w1", URL_B).unwrap();

        reply_b.send(Ok(connection("beta"))).unwrap();
        second.await.unwrap();
        reply_a.send(Ok(connection("alpha"))).unwrap();
        first.await.unwrap();

        assert_eq!(reconciler.state("w1"), ProbeState::Success(connection("beta")));
    }

    #[tokio::test]
    async fn late_failure_does_not_clobber_newer_success() {
        let (tester, reconciler) = reconciler();
        let reply_a = tester.expect(URL_A);
        let reply_b = tester.expect(URL_B);

        let first = reconciler.request_test("w1", URL_A).unwrap();
        let second = reconciler.request_test("w1", URL_B).unwrap();

        reply_b.send(Ok(connection("beta"))).unwrap();
        second.await.unwrap();
        reply_a
            .send(Err(RemoteError::ConnectionFailed("timeout".into())))
            .unwrap();
        first.await.unwrap();

        assert!(reconciler.can_save("w1"));
    }

    #[tokio::test]
    async fn edit_resets_and_discards_in_flight_result() {
        let (tester, reconciler) = reconciler();
        let reply = tester.expect(URL_A);

        let handle = reconciler.request_test("w1", URL_A).unwrap();
        reconciler.reset_on_edit("w1");
        assert_eq!(reconciler.state("w1"), ProbeState::Idle);

        reply.send(Ok(connection("alpha"))).unwrap();
        handle.await.unwrap();
        assert_eq!(reconciler.state("w1"), ProbeState::Idle);
    }

    #[tokio::test]
    async fn edit_clears_terminal_states() {
        let (tester, reconciler) = reconciler();
        for reply in [
            Ok(connection("alpha")),
            Err(RemoteError::ConnectionFailed("nope".into())),
        ] {
            let tx = tester.expect(URL_A);
            let handle = reconciler.request_test("w1", URL_A).unwrap();
            tx.send(reply).unwrap();
            handle.await.unwrap();
            assert_ne!(reconciler.state("w1"), ProbeState::Idle);

            reconciler.reset_on_edit("w1");
            assert_eq!(reconciler.state("w1"), ProbeState::Idle);
            assert!(reconciler.state("w1").connection().is_none());
            assert!(!reconciler.can_save("w1"));
        }
    }

    #[tokio::test]
    async fn test_all_probes_configured_workspaces_independently() {
        let (tester, reconciler) = reconciler();
        let reply_a = tester.expect(URL_A);
        let reply_b = tester.expect(URL_B);

        let workspaces = vec![
            workspace("w1", Some(URL_A)),
            workspace("w2", Some(URL_B)),
            workspace("w3", None),
            workspace("w4", Some("")),
        ];
        let handles = reconciler.test_all(&workspaces);
        assert_eq!(handles.len(), 2);
        assert_eq!(reconciler.state("w1").status(), ProbeStatus::Testing);
        assert_eq!(reconciler.state("w2").status(), ProbeStatus::Testing);

        // w2 fails first; w1 is still in flight and unaffected
        reply_b
            .send(Err(RemoteError::ConnectionFailed("403 Forbidden".into())))
            .unwrap();
        reply_a.send(Ok(connection("alpha"))).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(reconciler.can_save("w1"));
        assert_eq!(reconciler.state("w2").status(), ProbeStatus::Error);
        assert_eq!(reconciler.state("w3"), ProbeState::Idle);
        assert_eq!(reconciler.state("w4"), ProbeState::Idle);
    }
}
