//! Turn execution loop — the orchestrator that drives one assistant turn
//! from user message to terminal packet.
//!
//! Entry point: [`run_turn`] registers the turn for cancellation, spawns
//! the loop, and returns the packet receiver. Each round streams one model
//! response through the classifier into the emitter, then either dispatches
//! the assembled tool calls and loops, or finalizes: citation map, saved
//! turn record, `stop`.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use tern_domain::delta::FinishReason;
use tern_domain::error::Error;
use tern_domain::message::{Message, ToolDefinition, ToolInvocation};
use tern_domain::packet::{CitationEntry, CitedDocument, Packet};
use tern_domain::stream::Usage;
use tern_providers::{ChatRequest, ModelTransport};
use tern_sessions::{CitationRecord, TurnRecord};

use crate::state::AppState;

use super::assembler::{AssembledCall, CallAssembler};
use super::cancel::{CancelToken, TurnState};
use super::citations::{referenced_numbers, CitationLedger};
use super::classifier::{DeltaClassifier, DeltaEvent};
use super::dispatch::{self, DispatchOutcome};
use super::emitter::PacketEmitter;
use super::history_messages;

/// First message of every turn. Tool guidance lives in the tool
/// definitions themselves; this only pins the citation contract.
const SYSTEM_PROMPT: &str = "You are Tern, a research assistant. When tool \
results carry numbered sources, cite them inline as [n] using exactly the \
numbers provided. Never invent citation numbers.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub session_id: String,
    pub user_message: String,
    /// Transport override (a `[llm]` transport id). None = default.
    pub transport: Option<String>,
    /// Model override passed through to the transport.
    pub model: Option<String>,
}

/// Everything the round loop needs, built once before the first model call.
struct TurnContext {
    transport: Arc<dyn ModelTransport>,
    messages: Vec<Message>,
    tool_defs: Vec<ToolDefinition>,
    turn_index: u64,
}

/// Per-turn accumulators. They outlive the round loop so the error path
/// can persist whatever was gathered before the failure.
#[derive(Default)]
struct TurnBuffers {
    message: String,
    reasoning: String,
    tool_calls: Vec<ToolInvocation>,
    /// First occurrence of every cited document, across all rounds.
    documents: Vec<CitedDocument>,
    usage: Usage,
    finish: Option<FinishReason>,
    turn_index: u64,
}

impl TurnBuffers {
    fn usage(&self) -> Option<Usage> {
        if self.usage.total_tokens == 0 && self.usage.prompt_tokens == 0 {
            None
        } else {
            Some(self.usage)
        }
    }

    fn add_documents(&mut self, documents: Vec<CitedDocument>) {
        for doc in documents {
            if !self.documents.iter().any(|d| d.number == doc.number) {
                self.documents.push(doc);
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn — the core orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn: load history, stream the model, dispatch tools, loop.
///
/// Returns the turn id and the packet receiver. The caller reads packets
/// as they arrive for SSE streaming, or drains them for aggregation. The
/// turn is registered in [`super::TurnRegistry`] so
/// `POST /v1/turns/{id}/cancel` can abort it.
pub fn run_turn(state: AppState, input: TurnInput) -> (Uuid, mpsc::Receiver<Packet>) {
    let (tx, rx) = mpsc::channel::<Packet>(64);

    let turn_id = Uuid::new_v4();
    let cancel = state.turns.register(turn_id);

    let turn_span = tracing::info_span!(
        "turn",
        %turn_id,
        session_id = %input.session_id,
        "otel.kind" = "SERVER",
    );
    tokio::spawn(
        async move {
            tracing::debug!("turn started");
            let mut emitter = PacketEmitter::new(tx);
            let ledger = CitationLedger::new();
            let mut buffers = TurnBuffers::default();

            let result = run_turn_inner(
                &state,
                &input,
                &mut emitter,
                &ledger,
                &mut buffers,
                &cancel,
            )
            .await;

            match result {
                Ok(final_state) => {
                    tracing::debug!(state = %final_state, "turn finished");
                    state.turns.finish(&turn_id, final_state);
                }
                Err(e) => {
                    tracing::error!(error = %e, "turn failed");
                    emitter.error(&e.to_string()).await;
                    persist_partial(&state, &input, &buffers).await;
                    state.turns.finish(&turn_id, TurnState::Errored);
                }
            }
        }
        .instrument(turn_span),
    );

    (turn_id, rx)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn_inner — the round loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_turn_inner(
    state: &AppState,
    input: &TurnInput,
    emitter: &mut PacketEmitter,
    ledger: &CitationLedger,
    buffers: &mut TurnBuffers,
    cancel: &CancelToken,
) -> Result<TurnState, Error> {
    let TurnContext {
        transport,
        mut messages,
        tool_defs,
        turn_index,
    } = prepare_turn_context(state, input)?;
    buffers.turn_index = turn_index;

    let include_reasoning = state.config.engine.include_reasoning;
    let max_iterations = state.config.engine.max_iterations.max(1);

    for round in 0..max_iterations {
        tracing::debug!(round, "model round");

        // Cancellation gate before each model call.
        if cancel.is_cancelled() {
            tracing::info!("turn cancelled before model call");
            return Ok(TurnState::Cancelled);
        }

        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: None,
            max_tokens: None,
            model: input.model.clone(),
        };

        let llm_span = tracing::info_span!(
            "llm.call",
            "otel.kind" = "CLIENT",
            transport = transport.transport_id(),
            input_tokens = tracing::field::Empty,
            output_tokens = tracing::field::Empty,
        );
        let text_mark = buffers.message.len();
        let round_out = stream_round(
            transport.as_ref(),
            req,
            include_reasoning,
            emitter,
            buffers,
            cancel,
        )
        .instrument(llm_span)
        .await?;

        if round_out.cancelled {
            tracing::info!("turn cancelled during streaming");
            return Ok(TurnState::Cancelled);
        }

        // Merge before history so the assistant message lists exactly the
        // invocations that will produce results.
        let calls = dispatch::merge_calls(round_out.calls, &state.tools);

        if calls.is_empty() {
            finalize(state, input, emitter, ledger, buffers).await;
            return Ok(TurnState::Done);
        }

        if round + 1 == max_iterations {
            tracing::warn!(
                max_iterations,
                pending_calls = calls.len(),
                "iteration cap reached, finalizing with the partial answer"
            );
            finalize(state, input, emitter, ledger, buffers).await;
            return Ok(TurnState::Done);
        }

        let invocations: Vec<ToolInvocation> =
            calls.iter().map(|c| c.invocation.clone()).collect();
        messages.push(Message::assistant_tool_uses(
            &buffers.message[text_mark..],
            &invocations,
        ));

        let outcome = dispatch::dispatch_round(
            &state.tools,
            ledger,
            &state.config.engine,
            emitter,
            cancel,
            calls,
        )
        .await?;

        let results = match outcome {
            DispatchOutcome::Completed(results) => results,
            DispatchOutcome::Cancelled => {
                tracing::info!("turn cancelled during tool dispatch");
                return Ok(TurnState::Cancelled);
            }
        };

        for result in results {
            let message = if result.is_error {
                Message::tool_error(&result.invocation.call_id, &result.content)
            } else {
                Message::tool_result(&result.invocation.call_id, &result.content)
            };
            messages.push(message);
            buffers.add_documents(result.documents);
            buffers.tool_calls.push(result.invocation);
        }
    }

    // Unreachable: the final round either finalizes or returns above.
    Ok(TurnState::Done)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming one model round
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RoundOutput {
    calls: Vec<AssembledCall>,
    cancelled: bool,
}

/// Consume one model response stream: classify every delta, feed the
/// emitter and assembler, fold usage into the turn totals.
async fn stream_round(
    transport: &dyn ModelTransport,
    req: ChatRequest,
    include_reasoning: bool,
    emitter: &mut PacketEmitter,
    buffers: &mut TurnBuffers,
    cancel: &CancelToken,
) -> Result<RoundOutput, Error> {
    let mut stream = transport.chat_stream(req).await?;

    let mut classifier = DeltaClassifier::new();
    let mut assembler = CallAssembler::new();
    let mut round_usage: Option<Usage> = None;

    loop {
        let delta = tokio::select! {
            next = stream.next() => match next {
                Some(delta) => delta?,
                None => break,
            },
            _ = cancel.cancelled() => {
                return Ok(RoundOutput { calls: Vec::new(), cancelled: true });
            }
        };

        if let Some(usage) = delta.usage {
            round_usage = Some(usage);
        }

        for event in classifier.classify(delta) {
            apply_event(event, include_reasoning, emitter, &mut assembler, buffers).await;
        }
    }

    for event in classifier.flush() {
        apply_event(event, include_reasoning, emitter, &mut assembler, buffers).await;
    }

    if let Some(usage) = round_usage {
        let span = tracing::Span::current();
        span.record("input_tokens", usage.prompt_tokens);
        span.record("output_tokens", usage.completion_tokens);
        buffers.usage.add(&usage);
    }

    // A transport-observed cancellation counts the same as a local one.
    let cancelled = matches!(buffers.finish, Some(FinishReason::Cancelled));
    Ok(RoundOutput {
        calls: assembler.finish(),
        cancelled,
    })
}

async fn apply_event(
    event: DeltaEvent,
    include_reasoning: bool,
    emitter: &mut PacketEmitter,
    assembler: &mut CallAssembler,
    buffers: &mut TurnBuffers,
) {
    match event {
        DeltaEvent::Reasoning(text) => {
            if include_reasoning {
                emitter.reasoning_delta(&text).await;
            }
            buffers.reasoning.push_str(&text);
        }
        DeltaEvent::Message(text) => {
            emitter.message_delta(&text).await;
            buffers.message.push_str(&text);
        }
        DeltaEvent::ToolFragment(chunk) => assembler.push(chunk),
        DeltaEvent::Finish(reason) => buffers.finish = Some(reason),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Close the turn: citation map for the numbers the answer references,
/// saved record, session counters, `stop`.
///
/// A failed save is logged and does not fail the turn — the answer has
/// already been streamed, and the idempotent save key makes a replay safe.
async fn finalize(
    state: &AppState,
    input: &TurnInput,
    emitter: &mut PacketEmitter,
    ledger: &CitationLedger,
    buffers: &TurnBuffers,
) {
    let entries = citation_entries(ledger, &buffers.message);
    if !entries.is_empty() {
        emitter.citation_info(entries).await;
    }

    let record = build_record(input, buffers, None);
    if let Err(e) = state
        .turn_log
        .save_turn_async(&input.session_id, &record)
        .await
    {
        tracing::warn!(error = %e, "turn save failed");
    }
    state
        .sessions
        .record_turn(&input.session_id, &input.user_message, buffers.usage().as_ref());

    emitter.stop(buffers.finish.unwrap_or(FinishReason::Stop)).await;
}

/// Best-effort persistence for a turn that died mid-flight. The error
/// packet has already been queued; failures here are only logged.
async fn persist_partial(state: &AppState, input: &TurnInput, buffers: &TurnBuffers) {
    if buffers.message.is_empty() && buffers.tool_calls.is_empty() {
        return;
    }
    let record = build_record(input, buffers, Some("error"));
    if let Err(e) = state
        .turn_log
        .save_turn_async(&input.session_id, &record)
        .await
    {
        tracing::warn!(error = %e, "partial turn save failed");
    }
    state
        .sessions
        .record_turn(&input.session_id, &input.user_message, buffers.usage().as_ref());
}

/// Citation pairs for every number the visible text references. Numbers
/// with no ledger entry (the model made them up) are dropped.
fn citation_entries(ledger: &CitationLedger, text: &str) -> Vec<CitationEntry> {
    let referenced = referenced_numbers(text);
    if referenced.is_empty() {
        return Vec::new();
    }
    let by_number: HashMap<u32, String> = ledger
        .entries()
        .into_iter()
        .map(|(id, number)| (number, id))
        .collect();
    referenced
        .into_iter()
        .filter_map(|number| {
            by_number.get(&number).map(|id| CitationEntry {
                number,
                document_unique_id: id.clone(),
            })
        })
        .collect()
}

fn build_record(
    input: &TurnInput,
    buffers: &TurnBuffers,
    finish_override: Option<&str>,
) -> TurnRecord {
    let citations = buffers
        .documents
        .iter()
        .map(|d| CitationRecord {
            number: d.number,
            document: d.document.clone(),
        })
        .collect();
    let finish_reason = match finish_override {
        Some(reason) => reason.to_string(),
        None => buffers.finish.unwrap_or(FinishReason::Stop).to_string(),
    };
    TurnRecord {
        turn_index: buffers.turn_index,
        created_at: chrono::Utc::now(),
        user_message: input.user_message.clone(),
        assistant_message: buffers.message.clone(),
        reasoning: (!buffers.reasoning.is_empty()).then(|| buffers.reasoning.clone()),
        tool_calls: buffers.tool_calls.clone(),
        citations,
        finish_reason,
        usage: buffers.usage(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 1 — turn context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the transport, rebuild history, assemble the prompt.
fn prepare_turn_context(state: &AppState, input: &TurnInput) -> Result<TurnContext, Error> {
    let transport = state.transports.resolve(input.transport.as_deref())?;

    let history = match state
        .turn_log
        .load_history(&input.session_id, state.config.sessions.max_history_turns)
    {
        Ok(records) => history_messages(&records),
        Err(e) => {
            tracing::warn!(error = %e, "history load failed, starting fresh");
            Vec::new()
        }
    };
    let turn_index = state.turn_log.next_turn_index(&input.session_id).unwrap_or(0);

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(history);
    messages.push(Message::user(&input.user_message));

    Ok(TurnContext {
        transport,
        messages,
        tool_defs: state.tools.definitions(),
        turn_index,
    })
}
