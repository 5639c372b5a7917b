//! Docent CLI - line-oriented chat over the session engine.
//!
//! # Event Loop
//!
//! One `tokio::select!` multiplexes three sources:
//!
//! 1. stdin lines, parsed into [`commands::Command`]s
//! 2. Ctrl-C, which stops a running answer (or exits when idle)
//! 3. stream events of the open generation, fed to the orchestrator
//!
//! After each wakeup the printer writes whatever changed to stdout. Logs go
//! to `~/.docent/logs/docent.log` so they never interleave with the transcript.

mod commands;
mod render;

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{Write, stdout};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use docent_client::{
    AuthToken, CancelOutcome, ConversationApi, HttpApi, HttpSettings, ServerEndpoint,
    StreamClient, http_client,
};
use docent_config::DocentConfig;
use docent_engine::{
    Outcome, ProgressSnapshot, RegistryLimits, SessionEvent, SessionOrchestrator, SharedRegistry,
};
use docent_types::{ConversationConfigPatch, ConversationId};

use commands::{Command, command_help};
use render::TranscriptPrinter;

fn init_tracing(config_filter: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_docent_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries the transcript; no log file means no logs.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_docent_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in docent_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn docent_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.docent/logs/docent.log
    if let Some(config_path) = DocentConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("docent.log"));
    }

    // Fallback: ./.docent/logs/docent.log
    candidates.push(PathBuf::from(".docent").join("logs").join("docent.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<()> {
    let loaded = DocentConfig::load();
    init_tracing(
        loaded
            .as_ref()
            .ok()
            .and_then(Option::as_ref)
            .and_then(DocentConfig::log_filter),
    );
    let config = loaded
        .context("failed to load configuration")?
        .unwrap_or_default();

    let base_url = config
        .base_url()
        .context("server.base_url is not set in ~/.docent/config.toml")?;
    let endpoint = ServerEndpoint::new(&base_url, config.token().map(AuthToken::new))?;
    let http = http_client(&HttpSettings {
        connect_timeout: config.connect_timeout(),
        https_only: endpoint.is_https(),
    })
    .context("failed to build HTTP client")?;

    let limits = config.registry();
    let registry = SharedRegistry::new(RegistryLimits {
        capacity: limits.capacity,
        ttl: limits.ttl(),
    });
    let mut session = SessionOrchestrator::new(
        HttpApi::new(http.clone(), endpoint.clone()),
        StreamClient::new(http, endpoint),
        registry,
        config.conversation_config(),
    );

    println!("docent - type a question, /help for commands, Ctrl-C to stop an answer");

    let mut printer = TranscriptPrinter::default();
    if let Some(id) = env::args().nth(1) {
        let id = ConversationId::new(id).context("conversation id must not be empty")?;
        session
            .open_conversation(id)
            .await
            .context("failed to open conversation")?;
        render::history(&mut stdout(), session.messages())?;
    }

    run(&mut session, &mut printer).await?;
    finish_in_background(session).await
}

enum Flow {
    Continue,
    Quit,
}

async fn run<A: ConversationApi>(
    session: &mut SessionOrchestrator<A>,
    printer: &mut TranscriptPrinter,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut events = session.events();
    let mut progress = session.subscribe_progress();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if let Flow::Quit = handle_line(session, printer, &line).await? {
                    break;
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                if session.stop().await == CancelOutcome::NotStreaming {
                    break;
                }
            }
            Some(event) = session.next_stream_event(), if session.is_streaming() => {
                session.handle_stream_event(event).await;
                session.process_stream_events().await;
            }
        }
        render_updates(session, printer, &mut events, &mut progress)?;
    }
    Ok(())
}

async fn handle_line<A: ConversationApi>(
    session: &mut SessionOrchestrator<A>,
    printer: &mut TranscriptPrinter,
    line: &str,
) -> Result<Flow> {
    let mut out = stdout();
    match Command::parse(line) {
        Command::Empty => {}
        Command::Quit => return Ok(Flow::Quit),
        Command::Send(text) => {
            if let Err(e) = session.send(text).await {
                writeln!(out, "[error] {e}")?;
            }
        }
        Command::Stop => {
            if session.stop().await == CancelOutcome::NotStreaming {
                writeln!(out, "Nothing to stop")?;
            }
        }
        Command::Regenerate { bypass_cache } => {
            if let Err(e) = session.regenerate(bypass_cache).await {
                writeln!(out, "[error] {e}")?;
            }
        }
        Command::New => {
            session.new_conversation();
            printer.reset();
            writeln!(out, "Started a new conversation")?;
        }
        Command::Open(None) => writeln!(out, "Usage: /open <conversation id>")?,
        Command::Open(Some(raw)) => match ConversationId::new(raw) {
            Ok(id) => match session.open_conversation(id).await {
                Ok(()) => {
                    printer.reset();
                    render::history(&mut out, session.messages())?;
                }
                Err(e) => writeln!(out, "[error] {e}")?,
            },
            Err(e) => writeln!(out, "[error] {e}")?,
        },
        Command::KnowledgeBases(ids) => {
            let patch = ConversationConfigPatch {
                knowledge_base_ids: Some(ids),
                ..Default::default()
            };
            report_config(session, patch)?;
        }
        Command::Documents(ids) => {
            let patch = ConversationConfigPatch {
                document_ids: Some(ids),
                ..Default::default()
            };
            report_config(session, patch)?;
        }
        Command::WebSearch(Some(enabled)) => {
            let patch = ConversationConfigPatch {
                web_search: Some(enabled),
                ..Default::default()
            };
            report_config(session, patch)?;
        }
        Command::WebSearch(None) => {
            let state = if session.config().web_search { "on" } else { "off" };
            writeln!(out, "Web search is {state}")?;
        }
        Command::History => render::history(&mut out, session.messages())?,
        Command::Help => writeln!(out, "{}", command_help())?,
        Command::Unknown(cmd) => writeln!(out, "Unknown command /{cmd}. Try /help")?,
    }
    Ok(Flow::Continue)
}

fn report_config<A: ConversationApi>(
    session: &mut SessionOrchestrator<A>,
    patch: ConversationConfigPatch,
) -> Result<()> {
    let mut out = stdout();
    match session.update_config(patch) {
        Ok(()) => {
            let config = session.config();
            writeln!(
                out,
                "knowledge bases: [{}]  documents: [{}]  web search: {}",
                config.knowledge_base_ids.join(", "),
                config.document_ids.join(", "),
                if config.web_search { "on" } else { "off" }
            )?;
        }
        Err(e) => writeln!(out, "[error] {e}")?,
    }
    Ok(())
}

fn render_updates<A: ConversationApi>(
    session: &mut SessionOrchestrator<A>,
    printer: &mut TranscriptPrinter,
    events: &mut broadcast::Receiver<SessionEvent>,
    progress: &mut watch::Receiver<Arc<ProgressSnapshot>>,
) -> Result<()> {
    let mut out = stdout().lock();

    if progress.has_changed().unwrap_or(false) {
        let snapshot = Arc::clone(&progress.borrow_and_update());
        printer.progress(&mut out, &snapshot)?;
    }
    if let Some(message) = session.pending_message() {
        printer.pending(&mut out, message)?;
    }

    loop {
        match events.try_recv() {
            Ok(event) => {
                if session.conversation_id() == Some(event.conversation_id()) {
                    printer.event(&mut out, &event)?;
                } else if let SessionEvent::Completed { conversation_id, .. } = &event {
                    writeln!(out, "[answer for {conversation_id} finished in the background]")?;
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Session events lagged");
            }
            Err(_) => break,
        }
    }

    for notice in session.take_notices() {
        render::notice(&mut out, &notice)?;
    }
    Ok(())
}

/// On exit, let a running answer finish so it is saved.
async fn finish_in_background<A: ConversationApi + 'static>(
    session: SessionOrchestrator<A>,
) -> Result<()> {
    let Some(handle) = session.detach() else {
        return Ok(());
    };
    println!("[finishing the current answer; Ctrl-C to abandon it]");

    tokio::select! {
        outcome = handle => match outcome.context("background generation panicked")? {
            Outcome::Completed(_) | Outcome::Cancelled(_) => println!("[answer saved]"),
            Outcome::Errored(error) => println!("[error] {error}"),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Background generation abandoned on exit");
        }
    }
    Ok(())
}
