use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use ghquick_core::{
    ApiError, Credentials, Engine, GitHubClient, PullRequest, PullRequestRequest, SyncOutcome,
    SyncRequest, WorkingContext, within_deadline,
};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "ghquick",
    version,
    about = "Stage, commit, push, and open pull requests with generated commit messages"
)]
pub struct Cli {
    /// Repository name (defaults to the current directory name)
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Show detailed logs, including every git command and its output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Overall deadline for the command
    #[arg(long, global = true, default_value = "2m", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stage, commit, and push all changes to the base branch
    Push {
        /// `start` generates the commit message (the default without --commitmsg)
        #[arg(value_parser = ["start"])]
        mode: Option<String>,

        /// Commit message to use instead of a generated one
        #[arg(short = 'm', long)]
        commitmsg: Option<String>,

        /// Create the repository as private, or make an existing one private
        #[arg(long)]
        private: bool,
    },

    /// Manage pull requests
    Pr {
        #[command(subcommand)]
        command: PrCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum PrCommands {
    /// Commit changes on a new branch and open a pull request
    Create {
        /// Pull request title (defaults to the commit message)
        #[arg(long)]
        title: Option<String>,

        /// Pull request body
        #[arg(long)]
        body: Option<String>,

        /// Base branch to open the pull request against
        #[arg(long)]
        base: Option<String>,

        /// Commit message to use instead of a generated one
        #[arg(short = 'm', long)]
        commitmsg: Option<String>,
    },

    /// Merge a pull request, choosing interactively when several are open
    Merge {
        /// Pull request number
        #[arg(long)]
        number: Option<u64>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let workdir = std::env::current_dir().context("failed to get working directory")?;
        let ctx = WorkingContext::new(workdir, self.debug, self.timeout);

        let credentials = Credentials::from_env().context("failed to load config")?;
        info!("configuration loaded");

        let repo_name = match self.name {
            Some(name) => name,
            None => {
                let name = default_repo_name(&ctx)?;
                info!(repo = %name, "using current directory name as repository name");
                name
            }
        };

        match self.command {
            Commands::Push {
                commitmsg, private, ..
            } => push(&ctx, credentials, &repo_name, commitmsg, private).await,
            Commands::Pr {
                command:
                    PrCommands::Create {
                        title,
                        body,
                        base,
                        commitmsg,
                    },
            } => {
                let request = PullRequestRequest::builder()
                    .repo_name(repo_name.as_str())
                    .base(base)
                    .message(commitmsg)
                    .title(title)
                    .build();
                create_pull_request(&ctx, credentials, &request, body).await
            }
            Commands::Pr {
                command: PrCommands::Merge { number },
            } => merge_pull_request(&ctx, &credentials, &repo_name, number).await,
        }
    }
}

fn default_repo_name(ctx: &WorkingContext) -> Result<String> {
    ctx.dir_name()
        .map(str::to_owned)
        .context("cannot derive a repository name from the working directory; pass --name")
}

fn github_client(credentials: &Credentials) -> Result<GitHubClient> {
    Ok(GitHubClient::new(
        credentials.github_token(),
        credentials.github_username(),
    )?)
}

async fn push(
    ctx: &WorkingContext,
    credentials: Credentials,
    repo_name: &str,
    message: Option<String>,
    private: bool,
) -> Result<()> {
    let github = github_client(&credentials)?;
    let engine = Engine::new(credentials, ctx.workdir())?;

    within_deadline(
        ctx,
        "ensure repository",
        github.ensure_repository(repo_name, private),
    )
    .await
    .context("failed to ensure repository exists")?;

    let request = SyncRequest::builder()
        .repo_name(repo_name)
        .message(message)
        .build();

    match engine.sync(ctx, &request).await? {
        SyncOutcome::NothingToCommit => warn!("no changes to commit"),
        SyncOutcome::Pushed {
            branch, message, ..
        } => info!(%branch, %message, "successfully pushed changes to GitHub"),
    }
    Ok(())
}

async fn create_pull_request(
    ctx: &WorkingContext,
    credentials: Credentials,
    request: &PullRequestRequest,
    body: Option<String>,
) -> Result<()> {
    let github = github_client(&credentials)?;
    let engine = Engine::new(credentials, ctx.workdir())?;

    let draft = engine
        .prepare_pull_request(ctx, request)
        .await
        .context("failed to prepare pull request")?;

    let body = match body.filter(|b| !b.trim().is_empty()) {
        Some(body) => body,
        None => engine.render_pr_body(&draft.message, &draft.branch)?,
    };

    let pr = within_deadline(
        ctx,
        "create pull request",
        github.create_pull_request(
            &request.repo_name,
            &draft.title,
            &body,
            &draft.branch,
            &draft.base,
        ),
    )
    .await?;

    info!("pull request #{} created successfully", pr.number);
    info!("view it here: {}", pr.html_url);
    Ok(())
}

async fn merge_pull_request(
    ctx: &WorkingContext,
    credentials: &Credentials,
    repo_name: &str,
    number: Option<u64>,
) -> Result<()> {
    let github = github_client(credentials)?;

    let number = match number {
        Some(number) => number,
        None => {
            let prs = within_deadline(
                ctx,
                "list pull requests",
                github.list_open_pull_requests(repo_name),
            )
            .await?;
            select_pull_request(&prs, &mut io::stdin().lock(), &mut io::stdout())?
        }
    };

    let pr = within_deadline(
        ctx,
        "get pull request",
        github.get_pull_request(repo_name, number),
    )
    .await
    .with_context(|| format!("failed to find pull request #{number}"))?;

    if pr.mergeable != Some(true) {
        return Err(ApiError::NotMergeable(number).into());
    }

    within_deadline(
        ctx,
        "merge pull request",
        github.merge_pull_request(repo_name, number),
    )
    .await?;

    info!("pull request #{number} merged successfully");
    Ok(())
}

/// Pick a pull request: the only one, or the one chosen on `input`.
fn select_pull_request(
    prs: &[PullRequest],
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<u64> {
    match prs {
        [] => bail!("no open pull requests found"),
        [pr] => {
            info!("found single pull request #{}: {}", pr.number, pr.title);
            Ok(pr.number)
        }
        _ => {
            writeln!(output, "Select a pull request to merge:")?;
            for (i, pr) in prs.iter().enumerate() {
                writeln!(output, "{}. #{}: {}", i + 1, pr.number, pr.title)?;
            }
            write!(output, "Enter number (1-{}): ", prs.len())?;
            output.flush()?;

            let mut line = String::new();
            input.read_line(&mut line)?;
            match line.trim().parse::<usize>() {
                Ok(choice) if (1..=prs.len()).contains(&choice) => Ok(prs[choice - 1].number),
                _ => bail!("invalid selection"),
            }
        }
    }
}
