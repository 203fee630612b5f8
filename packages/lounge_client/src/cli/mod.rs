//! CLI subcommands: interactive chat, repository summary, one-shot Q&A.

mod chat;

pub use chat::{ChatArgs, chat};

use anyhow::{Context, Result, bail};
use clap::Parser;

use repo_intel::{AskClient, GithubClient, RepoData, build_repo_prompt};

#[derive(Parser)]
pub struct RepoArgs {
    /// Repository as owner/repo
    pub target: String,

    /// GitHub API token (falls back to GITHUB_TOKEN)
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(Parser)]
pub struct AskArgs {
    /// Repository as owner/repo
    pub target: String,

    /// The question to ask about the repository
    pub question: String,

    /// GitHub API token (falls back to GITHUB_TOKEN)
    #[arg(long)]
    pub token: Option<String>,
}

/// Split an `owner/repo` argument, rejecting anything else early so the
/// error names the argument instead of a 404 from the API.
pub(crate) fn parse_target(target: &str) -> Result<(&str, &str)> {
    match target.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner, repo))
        }
        _ => bail!("expected owner/repo, got {target:?}"),
    }
}

pub(crate) fn github_client(token: Option<String>) -> GithubClient {
    let token = token.or_else(|| std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()));
    GithubClient::new(token)
}

pub(crate) async fn fetch_repo(
    client: &GithubClient,
    target: &str,
) -> Result<RepoData> {
    let (owner, repo) = parse_target(target)?;
    client
        .fetch_repo_data(owner, repo)
        .await
        .with_context(|| format!("failed to fetch {target}"))
}

pub async fn repo(args: RepoArgs) -> Result<()> {
    let client = github_client(args.token);
    let data = fetch_repo(&client, &args.target).await?;

    println!("{}  ★ {}  ⑂ {}", data.full_name, data.stars, data.forks);
    if !data.description.is_empty() {
        println!("{}", data.description);
    }
    println!(
        "language: {}   license: {}   open issues: {}",
        data.language.as_deref().unwrap_or("n/a"),
        data.license.as_deref().unwrap_or("n/a"),
        data.open_issues_count,
    );
    println!("{}", data.url);

    if !data.commits.is_empty() {
        println!("\nrecent commits:");
        for commit in data.commits.iter().take(5) {
            let subject = commit.message.lines().next().unwrap_or_default();
            println!("  {}  {} ({})", &commit.sha[..7.min(commit.sha.len())], subject, commit.author);
        }
    }
    if !data.pull_requests.is_empty() {
        println!("\npull requests:");
        for pr in data.pull_requests.iter().take(5) {
            println!("  #{} [{}] {}", pr.number, pr.state, pr.title);
        }
    }
    if !data.issues.is_empty() {
        println!("\nissues:");
        for issue in data.issues.iter().take(5) {
            println!("  #{} [{}] {}", issue.number, issue.state, issue.title);
        }
    }
    if !data.contributors.is_empty() {
        let names: Vec<&str> = data
            .contributors
            .iter()
            .take(8)
            .map(|c| c.login.as_str())
            .collect();
        println!("\ncontributors: {}", names.join(", "));
    }
    println!("\nfiles: {} top-level entries", data.files.len());
    Ok(())
}

pub async fn ask(user: &str, args: AskArgs) -> Result<()> {
    let client = github_client(args.token);
    let data = fetch_repo(&client, &args.target).await?;

    let ask_client = AskClient::from_env();
    let prompt = build_repo_prompt(&data, &args.question);
    println!("[{user} asks {}]: {}", data.full_name, args.question);
    match ask_client.ask(&prompt).await {
        Ok(answer) => println!("{answer}"),
        Err(e) => bail!("{e}"),
    }
    Ok(())
}
