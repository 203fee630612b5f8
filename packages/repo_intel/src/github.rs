//! GitHub REST client: paginated metadata fetch plus file-tree
//! reconstruction from the flat recursive tree listing.

use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::{Commit, Contributor, Issue, Label, PullRequest, RepoData, RepoFile};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
/// Page size for commits, issues, pull requests and contributors.
const MAX_ITEMS_PER_PAGE: u32 = 30;

#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("repository {0} not found — check the owner/repo spelling")]
    NotFound(String),
    #[error("GitHub rate limit exceeded or access forbidden — try again later")]
    RateLimited,
    #[error("GitHub returned unexpected status {0}")]
    Status(StatusCode),
    #[error("network error talking to GitHub: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
        }
    }

    /// Point the client at a different API root (tests, GHE).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        repo_label: &str,
    ) -> Result<T, GithubError> {
        let mut request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(ACCEPT, "application/vnd.github.v3+json")
            .header(USER_AGENT, "repo-lounge");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(GithubError::NotFound(repo_label.to_string())),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => Err(GithubError::RateLimited),
            status if !status.is_success() => Err(GithubError::Status(status)),
            _ => Ok(response.json().await?),
        }
    }

    /// Fetch everything the UI needs for one repository.
    pub async fn fetch_repo_data(&self, owner: &str, repo: &str) -> Result<RepoData, GithubError> {
        let owner = urlencoding::encode(owner);
        let repo = urlencoding::encode(repo);
        let label = format!("{owner}/{repo}");
        debug!(repo = %label, "Fetching repository metadata");

        let api_repo: ApiRepo = self.get_json(&format!("/repos/{owner}/{repo}"), &label).await?;

        let commits: Vec<ApiCommit> = self
            .list(&format!("/repos/{owner}/{repo}/commits"), &label, "")
            .await?;
        let issues: Vec<ApiIssue> = self
            .list(&format!("/repos/{owner}/{repo}/issues"), &label, "&state=all")
            .await?;
        let pulls: Vec<ApiPull> = self
            .list(&format!("/repos/{owner}/{repo}/pulls"), &label, "&state=all")
            .await?;
        let contributors: Vec<ApiContributor> = self
            .list(&format!("/repos/{owner}/{repo}/contributors"), &label, "")
            .await?;

        let files = match self
            .get_json::<ApiTree>(
                &format!(
                    "/repos/{owner}/{repo}/git/trees/{}?recursive=1",
                    urlencoding::encode(&api_repo.default_branch)
                ),
                &label,
            )
            .await
        {
            Ok(tree) => {
                if tree.truncated {
                    warn!(repo = %label, "Git tree listing truncated by GitHub");
                }
                build_file_tree(&tree.tree)
            }
            // An empty repository has no tree for its default branch; that
            // is not a fetch failure.
            Err(GithubError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        Ok(RepoData {
            full_name: api_repo.full_name,
            name: api_repo.name,
            owner: api_repo.owner.login,
            description: api_repo.description.unwrap_or_default(),
            stars: api_repo.stargazers_count,
            forks: api_repo.forks_count,
            open_issues_count: api_repo.open_issues_count,
            default_branch: api_repo.default_branch,
            url: api_repo.html_url,
            files,
            commits: commits.into_iter().map(Commit::from).collect(),
            issues: issues
                .into_iter()
                // The issues endpoint also returns pull requests.
                .filter(|issue| issue.pull_request.is_none())
                .map(Issue::from)
                .collect(),
            pull_requests: pulls.into_iter().map(PullRequest::from).collect(),
            contributors: contributors.into_iter().map(Contributor::from).collect(),
            language: api_repo.language,
            license: api_repo.license.and_then(|l| l.name),
            updated_at: api_repo.updated_at,
        })
    }

    /// One page of a paginated listing. Repositories can legitimately lack
    /// a listing (empty repo → 409 on commits), which maps to empty.
    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        repo_label: &str,
        extra_query: &str,
    ) -> Result<Vec<T>, GithubError> {
        match self
            .get_json(
                &format!("{path}?per_page={MAX_ITEMS_PER_PAGE}{extra_query}"),
                repo_label,
            )
            .await
        {
            Ok(items) => Ok(items),
            Err(GithubError::Status(StatusCode::CONFLICT)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// Fold GitHub's flat recursive tree listing into the nested structure the
/// UI renders. Intermediate directories are created on demand, so the
/// result is correct even if a parent entry arrives after its children.
pub fn build_file_tree(entries: &[ApiTreeEntry]) -> Vec<RepoFile> {
    let mut root: Vec<RepoFile> = Vec::new();
    for entry in entries {
        let parts: Vec<&str> = entry.path.split('/').filter(|p| !p.is_empty()).collect();
        if !parts.is_empty() {
            insert_entry(&mut root, &parts, 0, entry);
        }
    }
    root
}

fn insert_entry(nodes: &mut Vec<RepoFile>, parts: &[&str], depth: usize, entry: &ApiTreeEntry) {
    let part = parts[depth];
    let is_leaf = depth == parts.len() - 1;

    if is_leaf && entry.kind != "tree" {
        nodes.push(RepoFile {
            name: part.to_string(),
            path: entry.path.clone(),
            kind: "file".to_string(),
            children: None,
            sha: Some(entry.sha.clone()),
            size: entry.size,
        });
        return;
    }

    // Directory segment (or the leaf itself is a tree entry):
    // find-or-create, then descend.
    let pos = match nodes
        .iter()
        .position(|node| node.is_dir() && node.name == part)
    {
        Some(pos) => {
            if is_leaf {
                nodes[pos].sha = Some(entry.sha.clone());
            }
            pos
        }
        None => {
            nodes.push(RepoFile {
                name: part.to_string(),
                path: parts[..=depth].join("/"),
                kind: "dir".to_string(),
                children: Some(Vec::new()),
                sha: is_leaf.then(|| entry.sha.clone()),
                size: None,
            });
            nodes.len() - 1
        }
    };
    if !is_leaf {
        let children = nodes[pos].children.get_or_insert_with(Vec::new);
        insert_entry(children, parts, depth + 1, entry);
    }
}

// --- GitHub response shapes (internal) ---

#[derive(Debug, Deserialize)]
struct ApiRepo {
    full_name: String,
    name: String,
    owner: ApiUser,
    description: Option<String>,
    stargazers_count: u64,
    forks_count: u64,
    open_issues_count: u64,
    default_branch: String,
    html_url: String,
    language: Option<String>,
    license: Option<ApiLicense>,
    updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLicense {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCommit {
    sha: String,
    html_url: String,
    commit: ApiCommitDetail,
}

#[derive(Debug, Deserialize)]
struct ApiCommitDetail {
    message: String,
    author: Option<ApiCommitAuthor>,
}

#[derive(Debug, Deserialize)]
struct ApiCommitAuthor {
    name: Option<String>,
    date: Option<String>,
}

impl From<ApiCommit> for Commit {
    fn from(api: ApiCommit) -> Self {
        let author = api.commit.author.unwrap_or(ApiCommitAuthor {
            name: None,
            date: None,
        });
        Self {
            sha: api.sha,
            message: api.commit.message,
            author: author.name.unwrap_or_else(|| "unknown".to_string()),
            date: author.date.unwrap_or_default(),
            url: api.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    id: u64,
    number: u64,
    title: String,
    state: String,
    html_url: String,
    created_at: String,
    user: Option<ApiUser>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    /// Present when this "issue" is actually a pull request.
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
    #[serde(default)]
    color: String,
}

impl From<ApiIssue> for Issue {
    fn from(api: ApiIssue) -> Self {
        Self {
            id: api.id,
            number: api.number,
            title: api.title,
            user: api.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
            date: api.created_at,
            url: api.html_url,
            state: api.state,
            labels: api
                .labels
                .into_iter()
                .map(|l| Label {
                    name: l.name,
                    color: l.color,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiPull {
    id: u64,
    number: u64,
    title: String,
    state: String,
    html_url: String,
    created_at: String,
    user: Option<ApiUser>,
    merged_at: Option<String>,
}

impl From<ApiPull> for PullRequest {
    fn from(api: ApiPull) -> Self {
        let state = if api.merged_at.is_some() {
            "merged".to_string()
        } else {
            api.state
        };
        Self {
            id: api.id,
            number: api.number,
            title: api.title,
            user: api.user.map(|u| u.login).unwrap_or_else(|| "ghost".to_string()),
            date: api.created_at,
            url: api.html_url,
            state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiContributor {
    login: String,
    avatar_url: String,
    contributions: u64,
    html_url: String,
}

impl From<ApiContributor> for Contributor {
    fn from(api: ApiContributor) -> Self {
        Self {
            login: api.login,
            avatar_url: api.avatar_url,
            contributions: api.contributions,
            html_url: api.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiTree {
    tree: Vec<ApiTreeEntry>,
    #[serde(default)]
    truncated: bool,
}

/// One entry of a recursive git tree listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiTreeEntry {
    pub path: String,
    /// "blob", "tree" or "commit" (submodule).
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
}
