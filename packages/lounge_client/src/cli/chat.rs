//! Interactive chat session
//!
//! A select loop over stdin lines, session events and status transitions.
//! This layer owns the "re-join on reconnect" effect: the session manager
//! deliberately does not re-enter rooms by itself, so the loop watches for
//! the `Connected` transition and re-issues the join for the target room.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use lounge_protocol::{ChatMessage, CodeSnippet};
use repo_intel::{AskClient, RepoData, analyze_code, build_repo_prompt};

use crate::cli::{fetch_repo, github_client, parse_target};
use lounge_client::{ConnStatus, SessionConfig, SessionEvent, SessionManager};

#[derive(Parser)]
pub struct ChatArgs {
    /// Repository lounge to join, as owner/repo
    pub target: String,

    /// GitHub API token for the /ask context fetch (falls back to GITHUB_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Skip fetching repository context at startup (/ask will be limited)
    #[arg(long)]
    pub no_context: bool,
}

pub async fn chat(server: &str, name: &str, args: ChatArgs) -> Result<()> {
    parse_target(&args.target)?;

    // Repository context for /ask, fetched once up front. Chat works
    // without it.
    let repo_context: Option<Arc<RepoData>> = if args.no_context {
        None
    } else {
        match fetch_repo(&github_client(args.token.clone()), &args.target).await {
            Ok(data) => Some(Arc::new(data)),
            Err(e) => {
                eprintln!("[lounge: no repository context — {e}]");
                None
            }
        }
    };
    let ask_client = Arc::new(AskClient::from_env());

    let session = SessionManager::new(SessionConfig::new(server, name));
    let mut events = session.events();
    let mut status_rx = session.status();
    session.connect();

    println!("[lounge: connecting to {server}]");
    println!("[lounge: /ask /reply /react /unreact /edit /snippet /analyze /quit]");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                match status {
                    ConnStatus::Connected => {
                        // The re-join effect: room state is application
                        // state, not transport state.
                        session.join_room(&args.target).await;
                    }
                    ConnStatus::Disconnected => {
                        eprintln!("[lounge: connection lost — retrying]");
                    }
                    ConnStatus::Error => {
                        eprintln!("[lounge: connection error — retrying]");
                    }
                    ConnStatus::Idle | ConnStatus::Connecting => {}
                }
            }
            event = events.recv() => match event {
                Some(event) => print_event(event),
                None => break,
            },
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                handle_line(&session, &ask_client, repo_context.as_ref(), &line).await;
            }
        }
    }

    session.shutdown();
    println!("[lounge: left {}]", args.target);
    Ok(())
}

async fn handle_line(
    session: &SessionManager,
    ask_client: &Arc<AskClient>,
    repo_context: Option<&Arc<RepoData>>,
    line: &str,
) {
    if let Some(question) = line.strip_prefix("/ask ") {
        run_ask(session, ask_client, repo_context, question).await;
    } else if let Some(rest) = line.strip_prefix("/reply ") {
        match split_two(rest) {
            Some((prefix, text)) => match resolve_message(session, prefix).await {
                Some(parent) => {
                    session.send_reply(&parent.id, text).await;
                }
                None => eprintln!("[lounge: no message matching {prefix:?}]"),
            },
            None => eprintln!("[lounge: usage — /reply <id-prefix> <text>]"),
        }
    } else if let Some(rest) = line.strip_prefix("/react ") {
        react(session, rest, true).await;
    } else if let Some(rest) = line.strip_prefix("/unreact ") {
        react(session, rest, false).await;
    } else if let Some(rest) = line.strip_prefix("/edit ") {
        match split_two(rest) {
            Some((prefix, text)) => match resolve_message(session, prefix).await {
                Some(message) => session.edit_message(&message.id, text).await,
                None => eprintln!("[lounge: no message matching {prefix:?}]"),
            },
            None => eprintln!("[lounge: usage — /edit <id-prefix> <new text>]"),
        }
    } else if let Some(rest) = line.strip_prefix("/snippet ") {
        match split_three(rest) {
            Some((prefix, language, code)) => match resolve_message(session, prefix).await {
                Some(message) => {
                    session
                        .add_code_snippet(
                            &message.id,
                            CodeSnippet {
                                language: language.to_string(),
                                code: code.to_string(),
                                filename: None,
                            },
                        )
                        .await;
                }
                None => eprintln!("[lounge: no message matching {prefix:?}]"),
            },
            None => eprintln!("[lounge: usage — /snippet <id-prefix> <language> <code>]"),
        }
    } else if let Some(rest) = line.strip_prefix("/analyze ") {
        match split_two(rest) {
            Some((language, code)) => {
                let analysis = analyze_code(code, language);
                println!("[analysis] {}", analysis.explanation);
                for issue in &analysis.issues {
                    println!("  issue: {issue}");
                }
                for improvement in &analysis.improvements {
                    println!("  improvement: {improvement}");
                }
            }
            None => eprintln!("[lounge: usage — /analyze <language> <code>]"),
        }
    } else if line.starts_with('/') {
        eprintln!("[lounge: unknown command {line:?}]");
    } else {
        session.send_message(line).await;
    }
}

/// Q&A flow: record the pending conversation, call the model, apply the
/// terminal transition, share the result with the room. Runs detached so a
/// slow model never blocks the chat loop.
async fn run_ask(
    session: &SessionManager,
    ask_client: &Arc<AskClient>,
    repo_context: Option<&Arc<RepoData>>,
    question: &str,
) {
    let Some(conversation) = session.begin_conversation(question).await else {
        eprintln!("[lounge: join a room before asking]");
        return;
    };

    let prompt = match repo_context {
        Some(repo) => build_repo_prompt(repo, question),
        None => question.to_string(),
    };
    let session = session.clone();
    let ask_client = ask_client.clone();
    tokio::spawn(async move {
        let outcome = ask_client
            .ask(&prompt)
            .await
            .map_err(|e| e.to_string());
        match session.complete_conversation(&conversation.id, outcome).await {
            Some(settled) if settled.error.is_none() => {
                session.share_conversation(&settled).await;
            }
            Some(_) | None => {}
        }
    });
}

async fn react(session: &SessionManager, rest: &str, add: bool) {
    match split_two(rest) {
        Some((prefix, reaction)) => match resolve_message(session, prefix).await {
            Some(message) => {
                if add {
                    session.add_reaction(&message.id, reaction).await;
                } else {
                    session.remove_reaction(&message.id, reaction).await;
                }
            }
            None => eprintln!("[lounge: no message matching {prefix:?}]"),
        },
        None => eprintln!("[lounge: usage — /react <id-prefix> <emoji>]"),
    }
}

/// Find the unique message whose id starts with the given prefix.
async fn resolve_message(session: &SessionManager, prefix: &str) -> Option<ChatMessage> {
    let (messages, _) = session.log_snapshot().await;
    let mut matches = messages.iter().filter(|m| m.id.starts_with(prefix));
    let found = matches.next()?.clone();
    if matches.next().is_some() {
        warn!("Ambiguous message prefix {prefix:?}");
        return None;
    }
    Some(found)
}

fn split_two(rest: &str) -> Option<(&str, &str)> {
    let (a, b) = rest.split_once(char::is_whitespace)?;
    let b = b.trim();
    (!b.is_empty()).then_some((a, b))
}

fn split_three(rest: &str) -> Option<(&str, &str, &str)> {
    let (a, bc) = rest.split_once(char::is_whitespace)?;
    let (b, c) = split_two(bc.trim_start())?;
    Some((a, b, c))
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::MessageAppended(message) => print_message(&message, false),
        SessionEvent::MessageUpdated(message) => print_message(&message, true),
        SessionEvent::ConversationUpserted(conversation) => {
            if conversation.is_loading {
                println!("[ai] {} asked: {} …", conversation.user, conversation.question);
            } else if let Some(error) = &conversation.error {
                println!("[ai] {} — error: {}", conversation.question, error);
            } else {
                println!(
                    "[ai] {}\n     {}",
                    conversation.question,
                    conversation.answer.as_deref().unwrap_or_default()
                );
            }
        }
        SessionEvent::TypingChanged {
            connection_id,
            active,
        } => {
            if active {
                eprintln!("[lounge: {} is typing…]", short_id(&connection_id));
            }
        }
        // Membership already surfaces as system messages.
        SessionEvent::MemberJoined { .. } | SessionEvent::MemberLeft { .. } => {}
    }
}

fn print_message(message: &ChatMessage, updated: bool) {
    if message.is_system_message {
        println!("[lounge: {}]", message.text);
        return;
    }
    let mut suffix = String::new();
    if message.edited {
        suffix.push_str(" (edited)");
    }
    if !message.reactions.is_empty() {
        suffix.push_str(&format!("  {}", message.reactions.join(" ")));
    }
    if message.reply_count > 0 {
        suffix.push_str(&format!("  [{} replies]", message.reply_count));
    }
    let marker = if updated { "~" } else { "" };
    println!(
        "{}{} [{}] {}: {}{}",
        marker,
        clock(message.timestamp),
        short_id(&message.id),
        if message.is_own_message {
            "you"
        } else {
            message.user.as_str()
        },
        message.text,
        suffix,
    );
    for snippet in &message.code_snippets {
        println!("    ```{}\n    {}\n    ```", snippet.language, snippet.code);
    }
}

fn short_id(id: &str) -> &str {
    &id[..6.min(id.len())]
}

fn clock(timestamp_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_millis)
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_default()
}
