use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use vlchat_core::repositories::{InMemorySessionRepository, SessionJsonRepository, SessionRepository};
use vlchat_core::services::{MediaResolver, OpenAiCompatibleClient};
use vlchat_core::{AppConfig, ChatResult, ChatSession, StreamOutcome};

mod commands;
mod render;

use commands::Command;
use render::StreamRenderer;

#[derive(Parser, Debug)]
#[command(name = "vlchat")]
#[command(version, about = "Chat with vision-language models from the terminal")]
struct Args {
    /// Config file (defaults to <config_dir>/vlchat/config.json)
    #[arg(long, env = "VLCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Session file (defaults to <config_dir>/vlchat/session.json)
    #[arg(long, env = "VLCHAT_SESSION_FILE")]
    session_file: Option<PathBuf>,

    /// Keep conversations in memory only
    #[arg(long)]
    no_persist: bool,

    /// Initial thinking mode
    #[arg(long, value_name = "BOOL")]
    thinking: Option<bool>,

    /// Probe the completion endpoint and exit
    #[arg(long)]
    check: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

type Submission = JoinHandle<ChatResult<StreamOutcome>>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the transcript on stdout stays readable
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = AppConfig::load(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    if args.check {
        return check(&config).await;
    }

    let repository: Arc<dyn SessionRepository> = if args.no_persist {
        Arc::new(InMemorySessionRepository::new())
    } else {
        let repo = match args.session_file {
            Some(path) => SessionJsonRepository::with_path(path),
            None => SessionJsonRepository::new().context("Failed to locate session file")?,
        };
        info!(path = %repo.storage_path(), "Using session file");
        Arc::new(repo)
    };

    let client = OpenAiCompatibleClient::from_config(&config);
    info!("No object storage configured; attachments are sent inline");
    let resolver = MediaResolver::from_config(&config, None);
    let session = ChatSession::new(config, client, resolver, Some(repository));

    if let Err(e) = session.restore().await {
        warn!(error = ?e, "Failed to restore session, starting empty");
    }
    if let Some(enabled) = args.thinking {
        session.set_thinking(enabled).await?;
    }

    let mut snapshots = session.subscribe();
    let renderer = tokio::spawn(async move {
        let mut renderer = StreamRenderer::new();
        while let Some(snapshot) = snapshots.recv().await {
            let out = renderer.render(&snapshot);
            if !out.is_empty() {
                print!("{out}");
                let _ = std::io::stdout().flush();
            }
        }
    });

    println!("vlchat {} | /help for commands", env!("CARGO_PKG_VERSION"));
    run(&session).await?;

    renderer.abort();
    Ok(())
}

async fn check(config: &AppConfig) -> Result<()> {
    let key = config
        .api_key
        .clone()
        .context("API_KEY is not set; nothing to check")?;
    let client = OpenAiCompatibleClient::new(config, key)?;
    let result = client.check_connectivity().await;
    match &result.outcome {
        Ok(status) => println!("{} -> HTTP {status}", result.endpoint),
        Err(e) => println!("{} -> {e}", result.endpoint),
    }
    if result.is_healthy() {
        Ok(())
    } else {
        anyhow::bail!("completion endpoint is not reachable")
    }
}

async fn wait_submission(task: &mut Option<Submission>) -> Result<ChatResult<StreamOutcome>, tokio::task::JoinError> {
    match task.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn report(result: Result<ChatResult<StreamOutcome>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(StreamOutcome::Unconfigured)) => {
            eprintln!("Set API_KEY to talk to a model.");
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => eprintln!("error: {e}"),
        Err(e) => eprintln!("error: response task failed: {e}"),
    }
}

fn conversation_key(session: &ChatSession, number: usize) -> Option<String> {
    session
        .view()
        .conversations
        .get(number - 1)
        .map(|summary| summary.key.clone())
}

/// Cancel every in-flight response, returning how many were stopped.
fn cancel_streaming(session: &ChatSession) -> Result<usize> {
    let mut cancelled = 0;
    for conv_id in session.view().streaming {
        if session.cancel(&conv_id)? {
            cancelled += 1;
        }
    }
    Ok(cancelled)
}

async fn run(session: &ChatSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut attachments: Vec<String> = Vec::new();
    let mut submission: Option<Submission> = None;

    loop {
        let line = tokio::select! {
            result = wait_submission(&mut submission) => {
                submission = None;
                report(result);
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                if cancel_streaming(session)? == 0 {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line.context("Failed to read stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        let command = match commands::parse(&line) {
            None => continue,
            Some(Ok(command)) => command,
            Some(Err(usage)) => {
                eprintln!("{usage}");
                continue;
            }
        };

        match command {
            Command::Message(text) => {
                if submission.is_some() {
                    eprintln!("A response is still streaming; /cancel it first.");
                    continue;
                }
                let files = std::mem::take(&mut attachments);
                let session = session.clone();
                submission = Some(tokio::spawn(async move {
                    session.send_message(&text, files).await
                }));
            }
            Command::Regenerate(n) => {
                if submission.is_some() {
                    eprintln!("A response is still streaming; /cancel it first.");
                    continue;
                }
                let session = session.clone();
                submission = Some(tokio::spawn(async move { session.regenerate(n - 1).await }));
            }
            Command::Cancel => {
                if cancel_streaming(session)? == 0 {
                    println!("Nothing to cancel.");
                }
            }
            Command::New => {
                session.new_chat().await?;
                attachments.clear();
                println!("New conversation. Your next message starts it.");
            }
            Command::List => print!("{}", render::format_conversations(&session.view())),
            Command::History => print!("{}", render::format_history(&session.snapshot().history)),
            Command::Select(n) => match conversation_key(session, n) {
                Some(key) => {
                    session.select_conversation(&key).await?;
                    print!("{}", render::format_history(&session.snapshot().history));
                }
                None => eprintln!("No conversation {n}."),
            },
            Command::Delete(n) => match conversation_key(session, n) {
                Some(key) => match session.delete_conversation(&key).await {
                    Ok(_) => println!("Deleted conversation {n}."),
                    Err(e) => eprintln!("error: {e}"),
                },
                None => eprintln!("No conversation {n}."),
            },
            Command::Clear => match session.clear_history().await {
                Ok(true) => println!("Conversation cleared."),
                Ok(false) => println!("No active conversation."),
                Err(e) => eprintln!("error: {e}"),
            },
            Command::Think(enabled) => {
                session.set_thinking(enabled).await?;
                println!("Thinking {}.", if enabled { "on" } else { "off" });
            }
            Command::Attach(file_ref) => {
                attachments.push(file_ref);
                println!("{} attachment(s) pending.", attachments.len());
            }
            Command::Detach => {
                attachments.clear();
                println!("Attachments dropped.");
            }
            Command::Remove(n) => match session.delete_turn(n - 1).await {
                Ok(_) => println!("Removed turn {n}."),
                Err(e) => eprintln!("error: {e}"),
            },
            Command::Edit(n, text) => match session.edit_turn_text(n - 1, &text).await {
                Ok(()) => println!("Edited turn {n}."),
                Err(e) => eprintln!("error: {e}"),
            },
            Command::Help => println!("{}", commands::HELP),
            Command::Quit => break,
        }
    }

    cancel_streaming(session)?;
    if let Some(handle) = submission {
        report(handle.await);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from(["vlchat", "--no-persist", "--thinking", "false", "-v"])
            .unwrap();
        assert!(args.no_persist);
        assert_eq!(args.thinking, Some(false));
        assert!(args.verbose);
        assert!(!args.check);
    }
}
