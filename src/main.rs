use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use git2::Repository;
use log::info;
use prettytable::{row, Table};

use gitlink::api::ApiClient;
use gitlink::create_endpoint;
use gitlink::probe::ProbeState;
use gitlink::session::{Flow, GitSettingsSession};
use gitlink::settings::{Api, Settings};
use gitlink::store::{CredentialStore, GitLabCredentials};
use gitlink::validate::{suggest_remote, validate, GitUrl, SchemeSet};

#[derive(Parser)]
#[command(name = "gitlink", version, about = "Link workspaces to Git repositories")]
struct Cli {
    /// Directory holding .gitlink/config.toml
    #[arg(long, global = true)]
    config_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the API settings
    Init {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long, value_enum, default_value = "gitlab")]
        flow: FlowArg,
    },
    /// Check a repository URL
    Validate {
        url: String,
        /// Only accept git+ssh:// URLs
        #[arg(long)]
        ssh_only: bool,
    },
    /// Suggest a repository URL from a local checkout's origin remote
    Origin { path: Option<String> },
    /// List workspaces and their repositories
    Workspaces,
    /// Test the connection for workspaces
    Test {
        ids: Vec<String>,
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },
    /// Set the repository URL of a workspace
    SetUrl {
        id: String,
        url: String,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Manage GitLab credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialsAction,
    },
}

#[derive(Subcommand)]
enum CredentialsAction {
    Status,
    Save {
        #[arg(long, env = "GITLAB_TOKEN")]
        token: String,
        #[arg(long)]
        host_url: Option<String>,
    },
    Delete,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum FlowArg {
    GithubSsh,
    Gitlab,
}

impl From<FlowArg> for Flow {
    fn from(arg: FlowArg) -> Self {
        match arg {
            FlowArg::GithubSsh => Flow::GithubSsh,
            FlowArg::Gitlab => Flow::Gitlab,
        }
    }
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    if let Err(error) = run(Cli::parse()).await {
        eprintln!("error: {:#}", error);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?
            .to_str()
            .ok_or_else(|| anyhow!("current directory is not valid UTF-8"))?
            .to_owned(),
    };

    match cli.command {
        Command::Init {
            base_url,
            token,
            flow,
        } => {
            let path = Settings::new(Api::new(base_url, token), flow.into()).save(&config_dir)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Command::Validate { url, ssh_only } => check_url(&url, ssh_only),
        Command::Origin { path } => {
            let path = path.unwrap_or_else(|| config_dir.clone());
            let url = get_origin_url(&path)
                .with_context(|| format!("failed to find remotes from path {}", path))?;
            println!("origin: {}", url);
            match suggest_remote(&url, SchemeSet::SshOrHttps) {
                Some(suggestion) => {
                    println!("use:    {}", suggestion);
                    check_url(&suggestion.to_url(), false)
                }
                None => Err(anyhow!("cannot derive a repository URL from {}", url)),
            }
        }
        Command::Credentials { action } => {
            let (client, _) = connect(&config_dir)?;
            credentials(action, &client).await
        }
        command => {
            let (client, flow) = connect(&config_dir)?;
            remote(command, client, flow).await
        }
    }
}

fn connect(config_dir: &str) -> Result<(Arc<ApiClient>, Flow)> {
    let settings = Settings::load(config_dir).context("failed to load settings")?;
    let client = ApiClient::new(&settings.api.base_url, settings.api.token.clone());
    Ok((Arc::new(client), settings.flow))
}

async fn remote(command: Command, client: Arc<ApiClient>, flow: Flow) -> Result<()> {
    let mut session = GitSettingsSession::new(Arc::clone(&client), client, flow);
    session.load().await.context("failed to load workspaces")?;

    match command {
        Command::Test { ids, all } => {
            let handles = if all {
                session.test_all()
            } else {
                ids.iter()
                    .map(|id| session.test(id))
                    .collect::<Result<Vec<_>, _>>()?
            };
            for handle in handles {
                handle.await?;
            }
            let ids: Vec<String> = if all {
                session.workspaces().map(|c| c.workspace_id.clone()).collect()
            } else {
                ids
            };
            for id in ids {
                print_probe(&id, &session.probe(&id));
            }
        }
        Command::SetUrl { id, url, branch } => {
            session.edit_url(&id, &url)?;
            session.validate_draft(&id)?;
            if flow.requires_connection_test() && !url.trim().is_empty() {
                session.test(&id)?.await?;
                print_probe(&id, &session.probe(&id));
            }
            if let Some(branch) = branch {
                session.select_branch(&id, &branch)?;
            }
            let saved = session.save(&id).await?;
            info!("saved workspace {}", saved.workspace_id);
            println!(
                "{}\t{}\t{}",
                saved.workspace_id,
                saved.git_repo_url.as_deref().unwrap_or("-"),
                saved.default_branch
            );
        }
        Command::Workspaces => {
            let mut table = Table::new();
            table.set_titles(row!["ID", "NAME", "REPOSITORY", "BRANCH"]);
            for config in session.workspaces() {
                table.add_row(row![
                    config.workspace_id,
                    config.name,
                    config.git_repo_url.as_deref().unwrap_or("-"),
                    config.default_branch
                ]);
            }
            table.printstd();
        }
        _ => return Err(anyhow!("command does not operate on workspaces")),
    }
    Ok(())
}

async fn credentials(action: CredentialsAction, client: &ApiClient) -> Result<()> {
    match action {
        CredentialsAction::Status => {
            let status = client.status().await?;
            if status.exists {
                println!(
                    "configured for {} (created {})",
                    status.host_url.as_deref().unwrap_or("-"),
                    status.created_at.as_deref().unwrap_or("-")
                );
            } else {
                println!("not configured");
            }
        }
        CredentialsAction::Save { token, host_url } => {
            let credentials = GitLabCredentials::new(token, host_url);
            client.save(&credentials).await?;
            println!("saved credentials for {}", credentials.host_url);
        }
        CredentialsAction::Delete => {
            client.delete().await?;
            println!("deleted credentials");
        }
    }
    Ok(())
}

fn check_url(url: &str, ssh_only: bool) -> Result<()> {
    let schemes = if ssh_only {
        SchemeSet::SshOnly
    } else {
        SchemeSet::SshOrHttps
    };
    validate(Some(url), schemes)?;

    let parsed = GitUrl::parse(url, schemes)?;
    let endpoint = create_endpoint(&parsed);
    // the provider may be stricter than the requested scheme set
    validate(Some(url), endpoint.schemes())
        .with_context(|| format!("{:?} repository", endpoint.provider()))?;

    println!("valid {:?} repository {}", endpoint.provider(), endpoint.project_path());
    if let Some(git_ref) = &parsed.git_ref {
        println!("ref: {}", git_ref);
    }
    if endpoint.requires_connection_test() {
        println!("a connection test is required before saving");
    }
    Ok(())
}

fn print_probe(id: &str, state: &ProbeState) {
    match state {
        ProbeState::Idle => println!("{}\tidle", id),
        ProbeState::Testing => println!("{}\ttesting", id),
        ProbeState::Success(connection) => println!(
            "{}\tok\t{} (default {}, {} branches: {})",
            id,
            connection.project_name,
            connection.default_branch.as_deref().unwrap_or("-"),
            connection.branch_count,
            connection.branches.join(", ")
        ),
        ProbeState::Error(message) => println!("{}\terror\t{}", id, message),
    }
}

fn get_origin_url(path: &str) -> Result<String, git2::Error> {
    let repo = Repository::open(path)?;
    let origin = repo.find_remote("origin")?;
    let url = origin
        .url()
        .ok_or_else(|| git2::Error::from_str("origin URL is not valid UTF-8"))?;
    Ok(url.to_owned())
}
