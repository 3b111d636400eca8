//! `tern chat` — a readline REPL over the turn engine.
//!
//! Each non-command line becomes a turn in the current session. The
//! answer streams to stdout; reasoning, tool markers, and source lists
//! go dimmed to stderr. Slash commands switch sessions and override
//! the transport or model between turns.

use std::io::Write;
use std::sync::Arc;

use rustyline::error::ReadlineError;

use tern_domain::config::Config;
use tern_domain::packet::PacketPayload;

use crate::bootstrap;
use crate::engine::{run_turn, TurnInput};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// REPL
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    config: Arc<Config>,
    session: Option<String>,
    mut transport: Option<String>,
    mut model: Option<String>,
) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;
    // The REPL lives long enough to want the periodic flush loop.
    bootstrap::spawn_background_tasks(&state);

    let (entry, is_new) = state.sessions.resolve_or_create(session.as_deref());
    let mut session_id = entry.session_id;

    let history_path = dirs::home_dir()
        .unwrap_or_default()
        .join(".tern")
        .join("chat_history.txt");
    if let Some(parent) = history_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    // Greetings go to stderr; stdout carries only model output.
    eprintln!("Tern chat");
    let label = if is_new { "new" } else { "resumed" };
    eprintln!("Session {session_id} ({label}). /help lists commands; Ctrl+D leaves.");
    eprintln!();

    loop {
        let line = match rl.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                eprintln!("(Ctrl+D or /exit to leave)");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", red(&format!("readline error: {e}")));
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        rl.add_history_entry(&line).ok();

        if trimmed.starts_with('/') {
            if run_command(trimmed, &state, &mut session_id, &mut transport, &mut model) {
                break;
            }
            continue;
        }

        if let Err(e) = stream_turn(&state, &session_id, &transport, &model, trimmed).await {
            eprintln!("{}", red(&format!("error: {e}")));
        }
    }

    rl.save_history(&history_path).ok();
    state.sessions.flush().ok();
    eprintln!("Goodbye!");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Slash commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// True means leave the REPL.
fn run_command(
    input: &str,
    state: &AppState,
    session_id: &mut String,
    transport: &mut Option<String>,
    model: &mut Option<String>,
) -> bool {
    let (cmd, arg) = match input.split_once(' ') {
        Some((cmd, rest)) => (cmd, Some(rest.trim()).filter(|s| !s.is_empty())),
        None => (input, None),
    };

    match cmd {
        "/exit" | "/quit" => return true,

        "/session" => match arg {
            Some(id) => {
                let (entry, is_new) = state.sessions.resolve_or_create(Some(id));
                *session_id = entry.session_id;
                let verb = if is_new { "created" } else { "resumed" };
                eprintln!("Session {verb}: {session_id}");
            }
            None => {
                eprintln!("Current session: {session_id}");
                eprintln!("Usage: /session <id>");
            }
        },

        "/transport" => match arg {
            Some(name) => {
                *transport = Some(name.to_owned());
                eprintln!("Transport set to: {name}");
            }
            None => {
                eprintln!(
                    "Current transport: {}",
                    transport.as_deref().unwrap_or("(default)")
                );
                eprintln!("Usage: /transport <id>");
            }
        },

        "/model" => match arg {
            Some(name) => {
                *model = Some(name.to_owned());
                eprintln!("Model set to: {name}");
            }
            None => {
                eprintln!("Current model: {}", model.as_deref().unwrap_or("(default)"));
                eprintln!("Usage: /model <name>");
            }
        },

        // Wipe the screen, cursor to home.
        "/clear" => eprint!("\x1B[2J\x1B[1;1H"),

        "/reset" => {
            let (entry, _) = state.sessions.resolve_or_create(None);
            *session_id = entry.session_id;
            eprintln!("Fresh session: {session_id}");
        }

        "/help" => print_help(),

        other => eprintln!("No such command: {other} (try /help)"),
    }

    false
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  /session <id>    Switch sessions (created on first use)");
    eprintln!("  /transport <id>  Pick the transport for following turns");
    eprintln!("  /model <name>    Override the model name");
    eprintln!("  /clear           Wipe the screen");
    eprintln!("  /reset           Start over in a fresh session");
    eprintln!("  /exit, /quit     Leave the chat");
    eprintln!("  /help            This list");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One turn: feed the line through [`run_turn`] and render packets as
/// they arrive.
async fn stream_turn(
    state: &AppState,
    session_id: &str,
    transport: &Option<String>,
    model: &Option<String>,
    user_message: &str,
) -> anyhow::Result<()> {
    let input = TurnInput {
        session_id: session_id.to_owned(),
        user_message: user_message.to_owned(),
        transport: transport.clone(),
        model: model.clone(),
    };
    let (_turn_id, mut rx) = run_turn(state.clone(), input);

    while let Some(packet) = rx.recv().await {
        match &packet.payload {
            PacketPayload::MessageDelta { text } => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            PacketPayload::ReasoningDelta { text } => {
                eprint!("{}", dim(text));
                std::io::stderr().flush().ok();
            }
            PacketPayload::ToolStart { tool_name, .. } => {
                eprintln!("{}", dim(&format!("[tool: {tool_name}]")));
            }
            PacketPayload::CitationInfo { citations } if !citations.is_empty() => {
                eprintln!();
                for entry in citations {
                    eprintln!(
                        "{}",
                        dim(&format!("[{}] {}", entry.number, entry.document_unique_id))
                    );
                }
            }
            // Blank separator so the next prompt does not stick to the answer.
            PacketPayload::Stop { .. } => {
                println!();
                println!();
            }
            PacketPayload::Error { message } => {
                eprintln!("{}", red(&format!("error: {message}")));
            }
            _ => {}
        }
    }

    Ok(())
}

fn dim(text: &str) -> String {
    format!("\x1B[2m{text}\x1B[0m")
}

fn red(text: &str) -> String {
    format!("\x1B[31m{text}\x1B[0m")
}
