//! `tern run` — one-shot turn from the command line.
//!
//! Feeds a single message through the engine, streams the answer to
//! stdout, and exits. stderr carries the dimmed side channel
//! (reasoning, tool markers, citations) so pipes stay clean.

use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc::Receiver;

use tern_domain::config::Config;
use tern_domain::packet::{Packet, PacketPayload};

use crate::bootstrap;
use crate::engine::{run_turn, TurnInput};

/// Entry point for `tern run "message"`.
pub async fn run(
    config: Arc<Config>,
    message: String,
    session: Option<String>,
    transport: Option<String>,
    model: Option<String>,
    json_output: bool,
) -> anyhow::Result<()> {
    let state = bootstrap::build_app_state(config).await?;
    let (entry, _is_new) = state.sessions.resolve_or_create(session.as_deref());

    let input = TurnInput {
        session_id: entry.session_id.clone(),
        user_message: message,
        transport,
        model,
    };
    let (_turn_id, mut rx) = run_turn(state.clone(), input);

    let exit_code = if json_output {
        dump_turn_json(&mut rx).await?;
        0
    } else {
        stream_turn_text(&mut rx).await
    };

    if let Err(e) = state.sessions.flush() {
        tracing::warn!(error = %e, "session flush on exit failed");
    }

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// Render packets as they arrive. Returns the process exit code: 1 when
/// the turn ended in an error packet, 0 otherwise.
async fn stream_turn_text(rx: &mut Receiver<Packet>) -> i32 {
    let mut exit_code = 0;

    while let Some(packet) = rx.recv().await {
        match &packet.payload {
            PacketPayload::MessageDelta { text } => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            PacketPayload::ReasoningDelta { text } => {
                eprint!("\x1b[2m{text}\x1b[0m");
                std::io::stderr().flush().ok();
            }
            PacketPayload::ToolStart { tool_name, .. } => {
                eprintln!("\x1b[2m[tool: {tool_name}]\x1b[0m");
            }
            PacketPayload::CitationInfo { citations } => {
                for entry in citations {
                    eprintln!(
                        "\x1b[2m[{}] {}\x1b[0m",
                        entry.number, entry.document_unique_id
                    );
                }
            }
            // Deltas carry no trailing newline of their own.
            PacketPayload::Stop { .. } => println!(),
            PacketPayload::Error { message } => {
                eprintln!("error: {message}");
                exit_code = 1;
            }
            _ => {}
        }
    }

    exit_code
}

/// Collect the whole turn and print it as one JSON array.
async fn dump_turn_json(rx: &mut Receiver<Packet>) -> anyhow::Result<()> {
    let mut packets: Vec<Packet> = Vec::new();
    while let Some(packet) = rx.recv().await {
        packets.push(packet);
    }

    let rendered = serde_json::to_string_pretty(&packets)
        .map_err(|e| anyhow::anyhow!("encoding packets: {e}"))?;
    println!("{rendered}");
    Ok(())
}
