//! Command-line interface: argument parsing and the line-oriented chat REPL.
//!
//! Everything here is presentation. The REPL renders session-store state and
//! calls its mutation operations; no conversation or failure logic lives at
//! this layer.

use std::error::Error;
use std::io::Write;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::core::config::RuntimeConfig;
use crate::core::gateway::Gateway;
use crate::core::persistence::FileStore;
use crate::core::session::{SendOutcome, SessionStore, Thread};

#[derive(Parser)]
#[command(name = "causerie")]
#[command(about = "A multi-thread chat client for OpenAI-compatible APIs")]
#[command(
    long_about = "Causerie keeps several independent conversation threads, sends each of your \
turns to an OpenAI-compatible chat-completions endpoint, and persists the whole \
session between runs.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY    Your API key (mock mode is used when unset)\n\
  OPENAI_BASE_URL   Custom API base URL (defaults to https://api.openai.com/v1)\n\
  OPENAI_MODEL      Model to request (defaults to gpt-3.5-turbo)\n\
  OPENAI_ORG_ID     Organization id header, if your provider needs one\n\
  OPENAI_USE_MOCK   Set to 'true' to force mock mode\n\n\
Commands:\n\
  /new              Start a new chat thread\n\
  /threads          List all threads\n\
  /switch <n>       Switch to thread number <n>\n\
  /delete <n>       Delete thread number <n>\n\
  /help             Show this command list\n\
  /quit             Exit\n\
Anything else you type is sent as a chat message."
)]
pub struct Args {
    /// Model to use for chat (overrides OPENAI_MODEL)
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Force mock mode: no network calls, synthetic replies
    #[arg(long)]
    pub mock: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Send(&'a str),
    NewThread,
    ListThreads,
    SwitchThread(usize),
    DeleteThread(usize),
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_repl_command(line: &str) -> ReplCommand<'_> {
    let trimmed = line.trim();
    if !trimmed.starts_with('/') {
        return ReplCommand::Send(trimmed);
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::trim).unwrap_or_default();

    match (command, argument.parse::<usize>()) {
        ("/new", _) => ReplCommand::NewThread,
        ("/threads", _) => ReplCommand::ListThreads,
        ("/switch", Ok(index)) => ReplCommand::SwitchThread(index),
        ("/delete", Ok(index)) => ReplCommand::DeleteThread(index),
        ("/help", _) => ReplCommand::Help,
        ("/quit" | "/exit", _) => ReplCommand::Quit,
        _ => ReplCommand::Unknown(trimmed),
    }
}

pub async fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let mut config = RuntimeConfig::from_env();
    if let Some(model) = args.model {
        config.model = model;
    }
    if args.mock {
        config.use_mock = true;
    }

    eprintln!("Starting causerie");
    eprintln!("API type: {}", config.api_type);
    eprintln!("API endpoint: {}", config.base_url);
    eprintln!("Model: {}", config.model);
    if config.mock_only() {
        eprintln!("Mock mode: replies are synthesized locally, no API key used");
    }
    eprintln!("Type /help for commands, /quit to exit");

    let persistence = FileStore::in_default_location()?;
    let gateway = Gateway::new(config)?;
    let mut store = SessionStore::hydrate(Box::new(gateway), Box::new(persistence));

    render_thread(store.active_thread());

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }

        match parse_repl_command(&line) {
            ReplCommand::Send("") => {}
            ReplCommand::Send(text) => match store.send_message(text).await {
                SendOutcome::Delivered => render_latest_reply(store.active_thread()),
                SendOutcome::RejectedEmpty => {}
                SendOutcome::RejectedBusy => {
                    println!("A reply is still pending; wait for it before sending again.")
                }
                SendOutcome::NoActiveThread => {
                    println!("No active thread. Use /new to start one.")
                }
            },
            ReplCommand::NewThread => {
                store.create_thread();
                println!("Started a new chat.");
            }
            ReplCommand::ListThreads => render_thread_list(&store),
            ReplCommand::SwitchThread(index) => match thread_id_at(&store, index) {
                Some(id) => {
                    store.select_thread(id);
                    render_thread(store.active_thread());
                }
                None => println!("No thread number {index}. Use /threads to list them."),
            },
            ReplCommand::DeleteThread(index) => match thread_id_at(&store, index) {
                Some(id) => {
                    store.delete_thread(id);
                    println!("Thread deleted.");
                    render_thread(store.active_thread());
                }
                None => println!("No thread number {index}. Use /threads to list them."),
            },
            ReplCommand::Help => render_help(),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(input) => {
                println!("Unrecognized command: {input}. Type /help for the command list.")
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
}

fn thread_id_at(store: &SessionStore, index: usize) -> Option<uuid::Uuid> {
    index
        .checked_sub(1)
        .and_then(|i| store.threads().get(i))
        .map(|thread| thread.id)
}

fn render_thread_list(store: &SessionStore) {
    for (position, thread) in store.threads().iter().enumerate() {
        let marker = if Some(thread.id) == store.active_thread_id() {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {}. {} ({} messages)",
            position + 1,
            thread.title,
            thread.messages.len()
        );
    }
}

fn render_thread(thread: Option<&Thread>) {
    let Some(thread) = thread else {
        return;
    };
    println!("--- {} ---", thread.title);
    for message in &thread.messages {
        if message.is_user() {
            println!("You: {}", message.content);
        } else {
            println!("{}", message.content);
        }
        println!();
    }
}

fn render_latest_reply(thread: Option<&Thread>) {
    if let Some(reply) = thread.and_then(|t| t.messages.last()) {
        println!("{}", reply.content);
        println!();
    }
}

fn render_help() {
    println!("/new              Start a new chat thread");
    println!("/threads          List all threads");
    println!("/switch <n>       Switch to thread number <n>");
    println!("/delete <n>       Delete thread number <n>");
    println!("/help             Show this command list");
    println!("/quit             Exit");
    println!("Anything else you type is sent as a chat message.");
}
