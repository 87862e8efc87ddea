//! Line-oriented operator console.
//!
//! One command per line; every command gets a human-readable reply. Failures
//! are replies too, the engine keeps running.

use std::fmt::Write as _;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::engine::RelayEngine;

pub const HELP: &str = "\
Commands:
  start                      start streaming to every destination
  stop                       stop every destination
  status                     show destination state
  queue                      show queued clips
  list                       show known clips
  enqueue <key>              queue a known clip
  refresh                    re-list the catalog
  token <platform> <key>     set a stream key
  offer <key>                park a stream key, returns a ticket
  redeem <platform> <ticket> apply a parked stream key
  help                       show this message
  quit                       shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Queue,
    List,
    Enqueue(String),
    Refresh,
    Token { platform: String, token: String },
    Offer(String),
    Redeem { platform: String, ticket: String },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseCommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0}. Type 'help' for a list of commands")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Command word, without arguments that may carry stream keys.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
            Self::Queue => "queue",
            Self::List => "list",
            Self::Enqueue(_) => "enqueue",
            Self::Refresh => "refresh",
            Self::Token { .. } => "token",
            Self::Offer(_) => "offer",
            Self::Redeem { .. } => "redeem",
            Self::Help => "help",
            Self::Quit => "quit",
        }
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("start", []) => Self::Start,
            ("stop", []) => Self::Stop,
            ("status", []) => Self::Status,
            ("queue", []) => Self::Queue,
            ("list", []) => Self::List,
            ("refresh", []) => Self::Refresh,
            ("help", []) => Self::Help,
            ("quit" | "exit", []) => Self::Quit,
            ("enqueue", [key]) => Self::Enqueue((*key).to_string()),
            ("enqueue", _) => return Err(ParseCommandError::Usage("enqueue <key>")),
            ("token", [platform, token]) => Self::Token {
                platform: (*platform).to_string(),
                token: (*token).to_string(),
            },
            ("token", _) => return Err(ParseCommandError::Usage("token <platform> <key>")),
            ("offer", [token]) => Self::Offer((*token).to_string()),
            ("offer", _) => return Err(ParseCommandError::Usage("offer <key>")),
            ("redeem", [platform, ticket]) => Self::Redeem {
                platform: (*platform).to_string(),
                ticket: (*ticket).to_string(),
            },
            ("redeem", _) => return Err(ParseCommandError::Usage("redeem <platform> <ticket>")),
            (
                "start" | "stop" | "status" | "queue" | "list" | "refresh" | "help" | "quit"
                | "exit",
                _,
            ) => return Err(ParseCommandError::Usage("command takes no arguments")),
            _ => return Err(ParseCommandError::Unknown(name.to_string())),
        };
        Ok(command)
    }
}

/// Run `command` against the engine and describe the outcome.
pub async fn execute(engine: &RelayEngine, command: Command) -> String {
    match command {
        Command::Start => match engine.start_all().await {
            Ok(()) => "Stream started".to_string(),
            Err(e) => format!("Failed to start stream: {e}"),
        },
        Command::Stop => match engine.stop_all().await {
            Ok(()) => "Stream stopped".to_string(),
            Err(e) => format!("Failed to stop stream: {e}"),
        },
        Command::Status => {
            let mut out = String::new();
            for s in engine.status().await {
                let _ = writeln!(
                    out,
                    "{}: {}, stream key {}",
                    s.platform,
                    if s.running { "running" } else { "stopped" },
                    if s.has_token { "set" } else { "missing" },
                );
            }
            let pending = engine.pending_tickets().await;
            if pending > 0 {
                let _ = writeln!(out, "Pending key tickets: {pending}");
            }
            out.trim_end().to_string()
        }
        Command::Queue => {
            let queue = engine.current_queue().await;
            if queue.is_empty() {
                "Queue is empty, next clips are picked at random".to_string()
            } else {
                bullet_list("Queued clips:", &queue)
            }
        }
        Command::List => {
            let keys = engine.cached_keys().await;
            if keys.is_empty() {
                "No clips known, try 'refresh'".to_string()
            } else {
                bullet_list(&format!("Known clips ({}):", keys.len()), &keys)
            }
        }
        Command::Enqueue(key) => {
            if engine.enqueue(&key).await {
                format!("Queued {key}")
            } else {
                format!("Unknown clip: {key}")
            }
        }
        Command::Refresh => match engine.refresh_catalog().await {
            Ok(1) => "Catalog refreshed, 1 clip".to_string(),
            Ok(count) => format!("Catalog refreshed, {count} clips"),
            Err(e) => format!("Failed to refresh catalog: {e}"),
        },
        Command::Token { platform, token } => match engine.set_token(&platform, &token).await {
            Ok(platform) => format!("Stream key set for {platform}"),
            Err(e) => e.to_string(),
        },
        Command::Offer(token) => match engine.offer_token(&token).await {
            Ok(ticket) => format!("Ticket {ticket}, apply with: redeem <platform> {ticket}"),
            Err(e) => e.to_string(),
        },
        Command::Redeem { platform, ticket } => {
            match engine.redeem_token(&platform, &ticket).await {
                Ok(platform) => format!("Stream key set for {platform}"),
                Err(e) => e.to_string(),
            }
        }
        Command::Help => HELP.to_string(),
        Command::Quit => "Bye".to_string(),
    }
}

fn bullet_list(title: &str, items: &[String]) -> String {
    let mut out = title.to_string();
    for item in items {
        let _ = write!(out, "\n- {item}");
    }
    out
}

/// Why [`run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    Quit,
    InputClosed,
}

/// Read commands from `input` until `quit` or end of input.
pub async fn run<R, W>(
    engine: &RelayEngine,
    input: R,
    mut output: W,
) -> std::io::Result<ConsoleExit>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let reply = match line.parse::<Command>() {
            Ok(Command::Quit) => {
                info!("Quit requested from console");
                output.write_all(b"Bye\n").await?;
                output.flush().await?;
                return Ok(ConsoleExit::Quit);
            }
            Ok(command) => {
                debug!(command = command.name(), "Console command");
                execute(engine, command).await
            }
            Err(ParseCommandError::Empty) => continue,
            Err(e) => e.to_string(),
        };
        output.write_all(reply.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    debug!("Console input closed");
    Ok(ConsoleExit::InputClosed)
}
