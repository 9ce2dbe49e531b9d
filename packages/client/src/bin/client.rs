//! Chat and watch-together client for the live-streaming relay.
//!
//! Joins a channel and sends lines from stdin as chat messages. With `--code`
//! the session runs in watch-together mode and the playback commands below
//! become available. Reconnects automatically when the connection drops.
//!
//! Commands:
//! ```not_rust
//! /nick NAME      change the display name
//! /time SECONDS   broadcast the playback position
//! /lock, /unlock  restrict time broadcasting to the host (host only)
//! /state          show the session state
//! /quit           leave
//! ```
//!
//! Run with:
//! ```not_rust
//! cargo run --bin sajiki-client -- --channel alice
//! cargo run --bin sajiki-client -- -c alice --code x7k2 --settings ~/.config/sajiki.json
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use rustyline::{DefaultEditor, error::ReadlineError};
use tokio::sync::{broadcast, mpsc};

use sajiki_client::{
    ChannelTarget, SessionClient, SessionConfig,
    domain::DEFAULT_RELAY_URL,
    formatter::MessageFormatter,
    ui::{prompt, redisplay_prompt},
};
use sajiki_shared::{
    logger::setup_logger,
    settings::{JsonFileSettingsStore, MemorySettingsStore, SettingsStore},
    time::SystemClock,
};

#[derive(Parser, Debug)]
#[command(name = "sajiki-client")]
#[command(about = "Chat and watch-together client for a live-streaming relay", long_about = None)]
struct Args {
    /// Channel to join
    #[arg(short = 'c', long)]
    channel: String,

    /// Join code; enables watch-together mode
    #[arg(short = 'k', long)]
    code: Option<String>,

    /// Relay WebSocket URL
    #[arg(short = 'u', long, default_value = DEFAULT_RELAY_URL)]
    url: String,

    /// JSON file persisting the display name (kept in memory when omitted)
    #[arg(short = 's', long)]
    settings: Option<PathBuf>,
}

/// A parsed input line
#[derive(Debug, PartialEq)]
enum Input {
    Chat(String),
    Nick(String),
    Time(f64),
    Lock(bool),
    State,
    Quit,
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let Some(command) = line.strip_prefix('/') else {
        return Input::Chat(line.to_string());
    };
    let (name, argument) = command
        .split_once(char::is_whitespace)
        .map(|(name, argument)| (name, argument.trim()))
        .unwrap_or((command, ""));

    match name {
        "nick" if !argument.is_empty() => Input::Nick(argument.to_string()),
        "time" => match argument.parse::<f64>() {
            Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Input::Time(seconds),
            _ => Input::Invalid(format!("invalid time '{}'", argument)),
        },
        "lock" => Input::Lock(true),
        "unlock" => Input::Lock(false),
        "state" => Input::State,
        "quit" | "exit" => Input::Quit,
        _ => Input::Invalid(format!("unknown command '/{}'", name)),
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    let settings: Arc<dyn SettingsStore> = match &args.settings {
        Some(path) => match JsonFileSettingsStore::open(path) {
            Ok(store) => {
                tracing::info!("Using settings file {}", store.path().display());
                Arc::new(store)
            }
            Err(e) => {
                tracing::error!("Failed to open settings {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => Arc::new(MemorySettingsStore::new()),
    };

    let config = SessionConfig {
        relay_url: args.url,
        ..SessionConfig::default()
    };
    let client = SessionClient::spawn(config, settings, Arc::new(SystemClock));

    let target = match args.code {
        Some(code) => ChannelTarget::watch_together(args.channel, code),
        None => ChannelTarget::chat(args.channel),
    };
    if let Err(e) = client.connect(target) {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }

    // Print events as they arrive
    let mut events = client.subscribe();
    let snapshot = client.watch();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(formatted) = MessageFormatter::format_event(&event) {
                        print!("{}", formatted);
                        redisplay_prompt(&snapshot.borrow().nickname);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Create channel for rustyline input
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let prompt_snapshot = client.watch();

    // Spawn a blocking thread for rustyline (synchronous readline)
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                tracing::error!("Failed to initialize readline: {}", e);
                return;
            }
        };

        loop {
            // nickname may change via /nick
            let line_prompt = prompt(&prompt_snapshot.borrow().nickname);
            match rl.readline(&line_prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            // Channel closed, exit thread
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    // Ctrl+C
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    // Ctrl+D
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    while let Some(line) = input_rx.recv().await {
        let result = match parse_input(&line) {
            Input::Chat(message) => client.send_message(message),
            Input::Nick(name) => client.set_nickname(name),
            Input::Time(seconds) => client.sync_time(seconds),
            Input::Lock(locked) => client.set_locked(locked),
            Input::State => {
                print!("{}", MessageFormatter::format_state(&client.snapshot()));
                Ok(())
            }
            Input::Quit => break,
            Input::Invalid(reason) => {
                println!("{}", reason);
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!("Client error: {}", e);
            std::process::exit(1);
        }
    }

    client.shutdown().await;
    printer.abort();
    tracing::info!("Client session ended normally");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_line_as_chat() {
        // テスト項目: スラッシュで始まらない行はチャットとして扱われる
        // given (前提条件) / when (操作):
        let input = parse_input("hello there");

        // then (期待する結果):
        assert_eq!(input, Input::Chat("hello there".to_string()));
    }

    #[test]
    fn test_parse_commands() {
        // テスト項目: 各コマンドが正しく解釈される
        // given (前提条件) / when (操作) / then (期待する結果):
        assert_eq!(parse_input("/nick  bob "), Input::Nick("bob".to_string()));
        assert_eq!(parse_input("/time 12.5"), Input::Time(12.5));
        assert_eq!(parse_input("/lock"), Input::Lock(true));
        assert_eq!(parse_input("/unlock"), Input::Lock(false));
        assert_eq!(parse_input("/state"), Input::State);
        assert_eq!(parse_input("/quit"), Input::Quit);
    }

    #[test]
    fn test_parse_rejects_invalid_commands() {
        // テスト項目: 不正な引数や未知のコマンドはエラーとして扱われる
        // given (前提条件) / when (操作) / then (期待する結果):
        assert!(matches!(parse_input("/time soon"), Input::Invalid(_)));
        assert!(matches!(parse_input("/time -3"), Input::Invalid(_)));
        assert!(matches!(parse_input("/nick"), Input::Invalid(_)));
        assert!(matches!(parse_input("/dance"), Input::Invalid(_)));
    }
}
