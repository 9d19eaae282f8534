use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    config::{new_session_id, DEFAULT_CONFIG_FILE},
    load_settings, ChatClient, ClientEvent, HttpChatBackend, MessageSlot, NoticeLevel, SlotState,
};
use shared::domain::{ConversationId, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Terminal chat client")]
struct Args {
    /// Overrides `server_url` from the config file and environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    user_id: Option<String>,
}

const HELP: &str = "\
commands:
  /new                 start a new conversation
  /list                list conversations
  /switch <id>         open a conversation
  /delete <id>         delete a conversation
  /calendar            connect a calendar account
  /calendar-code <c>   finish calendar connection with a copied code
  /ask <n>             ask suggestion number n from the last answer
  /status              show request and calendar status
  /quit                exit
anything else is sent as a question";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(url) = args.server_url {
        settings.server_url = url;
    }
    if let Some(user_id) = args.user_id {
        settings.user_id = Some(user_id);
    }

    let user_id = settings.resolve_user_id();
    let session_id = new_session_id();
    info!(server_url = %settings.server_url, %user_id, %session_id, "starting chat client");

    let backend = HttpChatBackend::new(&settings.server_url, user_id, session_id)
        .context("failed to build HTTP backend")?;
    let client = ChatClient::new_with_dependencies(
        Arc::new(backend),
        settings.intent(),
        settings.client_options(),
    );

    let printer = tokio::spawn(print_events(client.subscribe_events()));

    if let Err(err) = client.start().await {
        warn!("could not load conversations: {err:#}");
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !run_command(&client, line).await {
            break;
        }
    }

    client.cancel_calendar_auth().await;
    printer.abort();
    Ok(())
}

/// Returns false when the user asked to quit.
async fn run_command(client: &Arc<ChatClient>, line: &str) -> bool {
    let (command, arg) = match line.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (line, ""),
    };

    let result = match command {
        "/quit" | "/exit" => return false,
        "/help" => {
            println!("{HELP}");
            Ok(())
        }
        "/new" => client.create_conversation().await.map(|_| ()),
        "/list" => client.refresh_conversations().await.map(|_| ()),
        "/switch" if !arg.is_empty() => {
            client.switch_conversation(&ConversationId::new(arg)).await
        }
        "/delete" if !arg.is_empty() => {
            client.delete_conversation(&ConversationId::new(arg)).await
        }
        "/calendar" => client.begin_calendar_auth().await.map(|_| ()),
        "/calendar-code" if !arg.is_empty() => {
            client.complete_calendar_auth(arg).await.map(|_| ())
        }
        "/ask" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => client.submit_suggestion(n - 1).await.map(|_| ()),
            _ => {
                println!("usage: /ask <suggestion number>");
                Ok(())
            }
        },
        "/status" => {
            print_status(client).await;
            Ok(())
        }
        _ if command.starts_with('/') => {
            println!("unknown or incomplete command, try /help");
            Ok(())
        }
        // rejections are reported through a notice event
        _ => {
            let _ = client.submit(line).await;
            Ok(())
        }
    };

    if let Err(err) = result {
        warn!("{command} failed: {err:#}");
    }
    true
}

async fn print_status(client: &ChatClient) {
    let state = client.pending_state().await;
    println!(
        "busy: {} | pending: {} | last question: {}",
        state.busy,
        state.pending,
        state
            .last_sequence
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into())
    );
    if let Some(mode) = client.ai_mode().await {
        println!("mode: {mode}");
    }
    match client.calendar_status().await {
        Ok(status) if status.authenticated => println!(
            "calendar: connected{}",
            status
                .user_email
                .map(|email| format!(" as {email}"))
                .unwrap_or_default()
        ),
        Ok(_) => println!("calendar: not connected (use /calendar)"),
        Err(err) => println!("calendar: status unavailable ({err})"),
    }
}

fn print_slot(slot: &MessageSlot) {
    let who = match slot.role() {
        Role::User => "you",
        Role::Bot => "bot",
    };
    match slot.state {
        SlotState::Failed => println!("[{}] {who} (error): {}", slot.id, slot.content),
        _ => println!("[{}] {who}: {}", slot.id, slot.content),
    }
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<ClientEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match event {
            ClientEvent::SlotAppended(slot) if slot.role() == Role::Bot => print_slot(&slot),
            ClientEvent::SlotAppended(_) => {}
            ClientEvent::SlotUpdated(slot) => print_slot(&slot),
            ClientEvent::TranscriptReplaced(slots) => {
                println!("--- transcript ({} messages) ---", slots.len());
                slots.iter().for_each(print_slot);
            }
            ClientEvent::ConversationsUpdated {
                conversations,
                current,
            } => {
                println!("conversations:");
                for c in &conversations {
                    let marker = if current.as_ref() == Some(&c.id) { '*' } else { ' ' };
                    let updated = c
                        .updated_at
                        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default();
                    println!(
                        " {marker} {} | {} | {} messages | {updated}",
                        c.id, c.title, c.message_count
                    );
                }
            }
            ClientEvent::AiModeChanged(Some(mode)) => println!("mode: {mode}"),
            ClientEvent::AiModeChanged(None) => {}
            ClientEvent::SuggestionsUpdated(list) if !list.is_empty() => {
                println!("suggestions:");
                for (i, s) in list.iter().enumerate() {
                    println!("  {}. {s}", i + 1);
                }
                println!("(use /ask <n> to ask one)");
            }
            ClientEvent::SuggestionsUpdated(_) => {}
            ClientEvent::PendingChanged(_) => {}
            ClientEvent::Notice(notice) => match notice.level {
                NoticeLevel::Error => eprintln!("! {}", notice.message),
                NoticeLevel::Info | NoticeLevel::Success => println!("* {}", notice.message),
            },
            ClientEvent::CalendarAuthRequired { auth_url } => {
                println!("open this link to connect your calendar:\n  {auth_url}");
                println!("waiting for authorization (or paste the code with /calendar-code)");
            }
            ClientEvent::CalendarAuthCompleted { user_email } => match user_email {
                Some(email) => println!("calendar connected as {email}"),
                None => println!("calendar connected"),
            },
        }
    }
}
