//! Repository intelligence: the upstream collaborators of the lounge.
//!
//! Three independent concerns behind typed clients: repository metadata
//! from the GitHub REST API, question answering against a Gemini-style
//! text-generation endpoint, and the local heuristics run over shared code
//! snippets. Failures are typed so the UI can tell "not found" from
//! "rate limited" from "misconfigured".

pub mod ai;
pub mod analysis;
pub mod github;
pub mod types;

pub use ai::{AskClient, AskError, build_repo_prompt};
pub use analysis::{CodeAnalysis, analyze_code};
pub use github::{GithubClient, GithubError};
pub use types::{Commit, Contributor, Issue, Label, PullRequest, RepoData, RepoFile};
