//! Question answering against a Gemini-style text-generation endpoint.
//!
//! One request, one response. The interesting part is the error taxonomy:
//! the UI treats "the service is not configured" differently from "you hit
//! the quota" and from everything else.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::types::{RepoData, RepoFile};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// File paths included in the prompt's repository context.
const PROMPT_FILE_SAMPLE: usize = 20;
/// Commit subjects included in the prompt's repository context.
const PROMPT_COMMIT_SAMPLE: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum AskError {
    #[error("AI service is not available: {0}")]
    Unavailable(String),
    #[error("AI quota or rate limit exceeded — please try again later")]
    Quota,
    #[error("AI service error: {0}")]
    Service(String),
    #[error("network error talking to the AI service: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct AskClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl AskClient {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key,
        }
    }

    /// Key from `GEMINI_API_KEY` (falling back to `API_KEY`), default model.
    pub fn from_env() -> Self {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        Self::new(api_key, DEFAULT_MODEL)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Ask one question; returns the answer text or a typed failure.
    pub async fn ask(&self, prompt: &str) -> Result<String, AskError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AskError::Unavailable(
                "no API key configured (set GEMINI_API_KEY)".to_string(),
            ));
        };

        debug!(model = %self.model, "Sending question to AI service");
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AskError::Quota);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AskError::Unavailable(
                "the configured API key was rejected".to_string(),
            ));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AskError::Service(format!("status {status}: {detail}")));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        extract_answer(parsed)
            .ok_or_else(|| AskError::Service("empty response from model".to_string()))
    }
}

/// Fold repository context around the user's question.
pub fn build_repo_prompt(repo: &RepoData, question: &str) -> String {
    let mut paths = Vec::new();
    collect_paths(&repo.files, &mut paths);
    let file_sample = paths
        .iter()
        .take(PROMPT_FILE_SAMPLE)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let commit_sample = repo
        .commits
        .iter()
        .take(PROMPT_COMMIT_SAMPLE)
        .map(|c| c.message.lines().next().unwrap_or_default().to_string())
        .collect::<Vec<_>>()
        .join("\n- ");

    format!(
        "Analyze the following repository context and answer the user's question.\n\
         Context for {}:\n\
         ---\n\
         Repository: {}\n\
         Description: {}\n\
         Main Language: {}\n\
         Open issues count: {}\n\
         File structure (sample):\n{}\n\n\
         Recent commit messages (sample):\n- {}\n\
         ---\n\
         User Question: {}\n\
         ---\n\
         Provide a concise answer based *only* on the provided repository context.",
        repo.full_name,
        repo.full_name,
        repo.description,
        repo.language.as_deref().unwrap_or("N/A"),
        repo.open_issues_count,
        file_sample,
        commit_sample,
        question,
    )
}

fn collect_paths(files: &[RepoFile], out: &mut Vec<String>) {
    for file in files {
        out.push(format!("{} ({})", file.path, file.kind));
        if let Some(children) = &file.children {
            collect_paths(children, out);
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn extract_answer(response: GenerateContentResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| {
            let text: String = content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("");
            if text.is_empty() { None } else { Some(text) }
        })
}
