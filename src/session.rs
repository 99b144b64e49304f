//! Interactive lookup session: each input line is a place name, lines
//! starting with `:` are commands.

use std::sync::Arc;

use cache_sync::{ForecastResource, Synchronizer};
use common::config::CACHE_DURATION_PRESETS;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::render::Renderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Lookup(String),
    Count(i64),
    Cache(u64),
    Help,
    Quit,
    Empty,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(Command::Lookup(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next();
    match (name, arg) {
        ("q" | "quit" | "exit", None) => Ok(Command::Quit),
        ("h" | "help", None) => Ok(Command::Help),
        ("count", Some(raw)) => raw
            .parse::<i64>()
            .map(Command::Count)
            .map_err(|_| format!("invalid count: {raw}")),
        ("cache", Some(raw)) => raw
            .parse::<u64>()
            .map(Command::Cache)
            .map_err(|_| format!("invalid cache duration: {raw}")),
        ("count" | "cache", None) => Err(format!(":{name} needs a value")),
        _ => Err(format!("unknown command: {line} (try :help)")),
    }
}

fn help_text(count: i64, cache_secs: u64) -> String {
    let presets = CACHE_DURATION_PRESETS
        .iter()
        .map(|(secs, label)| format!("{secs} ({label})"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Type a place name to look up its forecast.\n\
         :count <n>     days to request (now {count})\n\
         :cache <secs>  cache duration (now {cache_secs}s; presets: {presets})\n\
         :help          show this help\n\
         :quit          leave\n"
    )
}

/// Run one lookup, printing every state. Returns the terminal state.
pub async fn lookup(
    sync: &Arc<Synchronizer>,
    renderer: &Renderer,
    place: &str,
    count: i64,
) -> Option<ForecastResource> {
    let mut handle = sync.request(place, count);
    let mut last = None;
    while let Some(state) = handle.next().await {
        print!("{}", renderer.render(place, &state));
        let terminal = state.is_terminal();
        last = Some(state);
        if terminal {
            break;
        }
    }
    last
}

/// Read places from stdin until EOF or `:quit`.
pub async fn run(
    sync: Arc<Synchronizer>,
    renderer: Renderer,
    mut count: i64,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    stdout
        .write_all(help_text(count, sync.settings().timeout_secs()).as_bytes())
        .await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Ok(Command::Empty) => {}
            Ok(Command::Quit) => break,
            Ok(Command::Help) => {
                let text = help_text(count, sync.settings().timeout_secs());
                stdout.write_all(text.as_bytes()).await?;
            }
            Ok(Command::Count(n)) => {
                count = n;
                info!(count, "Forecast count updated");
            }
            Ok(Command::Cache(secs)) => {
                sync.settings().set_timeout_secs(secs);
                let label = sync
                    .settings()
                    .preset_label()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{secs} seconds"));
                info!(timeout_secs = secs, "Cache duration set to {}", label);
            }
            Ok(Command::Lookup(place)) => {
                lookup(&sync, &renderer, &place, count).await;
            }
            Err(msg) => {
                warn!("{}", msg);
                stdout.write_all(format!("{msg}\n").as_bytes()).await?;
            }
        }
    }
    Ok(())
}
