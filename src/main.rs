//! Terminal chat client
//!
//! Keeps a persistent list of chats on disk and streams replies from an
//! OpenAI-compatible completion endpoint.

use chat_state::llm::{source_from_config, CompletionSource};
use chat_state::storage::{FileBackend, StorageAdapter, StorageService};
use chat_state::{ChatConfig, ChatController, LogFormat, Message, MessageKind};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const HELP: &str = "Commands: /new, /list, /use <n>, /delete <n>, /quit. Anything else is sent as a prompt.";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ChatConfig::from_env();

    // Logs go to stderr so they never interleave with the conversation
    let fmt_layer = match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed(),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_state=info".into()),
        )
        .with(fmt_layer)
        .init();

    tracing::info!(dir = %config.store_dir.display(), key = %config.storage_key, "Opening chat store");
    let adapter = StorageAdapter::new(Arc::new(FileBackend::new(&config.store_dir))).with_max_size(config.max_store_bytes);
    let _faults = adapter.on_fault(|fault| {
        if fault.quota_exceeded {
            eprintln!("! Storage is full; recent changes were not saved.");
        } else {
            eprintln!("! Storage error during {}: {}", fault.operation, fault.message);
        }
    });
    let service = Arc::new(StorageService::new(adapter).with_key(config.storage_key.clone()));

    let controller = ChatController::start(service, config.debounce);
    let source = source_from_config(&config.llm);

    controller.ready().await;
    println!("{HELP}");
    print_active(&controller);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt_marker()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_command(line) {
            Some(Command::Quit) => break,
            Some(Command::New) => {
                controller.create_chat(None);
                print_active(&controller);
            }
            Some(Command::List) => print_list(&controller),
            Some(Command::Use(n)) => match chat_id_at(&controller, n) {
                Some(id) => {
                    controller.activate_chat(id);
                    print_active(&controller);
                }
                None => println!("No chat #{n}"),
            },
            Some(Command::Delete(n)) => match chat_id_at(&controller, n) {
                Some(id) => {
                    controller.delete_chat(id);
                    print_list(&controller);
                }
                None => println!("No chat #{n}"),
            },
            Some(Command::Unknown) => println!("{HELP}"),
            None => send(&controller, source.as_ref(), line).await,
        }
    }

    if let Err(e) = controller.shutdown().await {
        tracing::error!(error = %e, "Final save failed");
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    New,
    List,
    Use(usize),
    Delete(usize),
    Quit,
    Unknown,
}

/// `None` means the line is a prompt
fn parse_command(line: &str) -> Option<Command> {
    let rest = line.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let index = |arg: Option<&str>| arg.and_then(|a| a.parse::<usize>().ok()).filter(|n| *n > 0);

    Some(match parts.next() {
        Some("new") => Command::New,
        Some("list") => Command::List,
        Some("quit" | "exit") => Command::Quit,
        Some("use") => index(parts.next()).map_or(Command::Unknown, Command::Use),
        Some("delete") => index(parts.next()).map_or(Command::Unknown, Command::Delete),
        _ => Command::Unknown,
    })
}

async fn send(controller: &ChatController, source: &dyn CompletionSource, text: &str) {
    let mut stdout = std::io::stdout();
    let reply = controller
        .send_prompt(source, text, |fragment| {
            let _ = write!(stdout, "{fragment}");
            let _ = stdout.flush();
        })
        .await;
    println!();

    if let Some(reply) = reply {
        tracing::debug!(chars = reply.text.len(), "Reply committed");
    }
}

fn chat_id_at(controller: &ChatController, n: usize) -> Option<String> {
    controller.state().chats.get(n - 1).map(|c| c.id.clone())
}

fn print_list(controller: &ChatController) {
    let state = controller.state();
    if state.is_empty() {
        println!("(no chats)");
        return;
    }
    for (i, chat) in state.chats.iter().enumerate() {
        let marker = if state.active_chat_id.as_deref() == Some(chat.id.as_str()) { '*' } else { ' ' };
        println!("{marker} {:>2}. {} ({} messages)", i + 1, chat.display_id, chat.messages.len());
    }
}

fn print_active(controller: &ChatController) {
    let state = controller.state();
    let Some(chat) = state.active_chat() else {
        println!("(no active chat)");
        return;
    };
    println!("== {} ==", chat.display_id);
    for message in &chat.messages {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let who = match message.kind {
        MessageKind::Prompt => "you",
        MessageKind::Response => "bot",
    };
    println!("[{}] {who}: {}", message.timestamp, message.text);
}

fn prompt_marker() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}
