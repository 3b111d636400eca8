//! Tool dispatcher: merge, execute, reconcile.
//!
//! One dispatch round takes the invocations a model round requested and:
//!
//! 1. **merges** — calls to the same mergeable tool collapse into a single
//!    invocation whose `queries` list concatenates all sub-queries, keyed
//!    by the first call id;
//! 2. **resolves context** — each invocation gets a reserved starting
//!    citation number and a shared snapshot of assignments so far;
//! 3. **executes** — invocations run concurrently, bounded by
//!    `engine.tool_parallelism`, each under its own timeout and `tool.call`
//!    span.  Latency is max(tool latencies), not the sum;
//! 4. **reconciles** — back on the joining task, in invocation order, each
//!    returned document resolves to its citation number through the ledger
//!    (reuse, fulfil the reservation, or mint) and the tool's packets are
//!    emitted.
//!
//! A failing or timed-out invocation becomes an error result fed back to
//! the model; it never unwinds the round.  Only a citation-ledger
//! violation aborts the dispatch.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::Instrument;

use tern_domain::config::EngineConfig;
use tern_domain::document::DocumentRef;
use tern_domain::error::Result;
use tern_domain::message::ToolInvocation;
use tern_domain::packet::CitedDocument;
use tern_tools::{extract_queries, ToolContext, ToolRegistry};

use super::assembler::AssembledCall;
use super::cancel::CancelToken;
use super::citations::CitationLedger;
use super::emitter::PacketEmitter;

/// One invocation's outcome after execution and reconciliation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub invocation: ToolInvocation,
    /// Prose fed back to the model (tool summary or error text).
    pub content: String,
    pub is_error: bool,
    /// Documents with their authoritative citation numbers.
    pub documents: Vec<CitedDocument>,
}

/// How a dispatch round ended.
pub enum DispatchOutcome {
    Completed(Vec<InvocationResult>),
    Cancelled,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collapse same-tool mergeable invocations into one.
///
/// The merged invocation keeps the first call's id and slot; its arguments
/// are rebuilt as `{"queries": [...]}` from every member's query list.
/// Calls whose arguments failed to parse are never merged — they must
/// surface their own error.
pub(crate) fn merge_calls(
    calls: Vec<AssembledCall>,
    tools: &ToolRegistry,
) -> Vec<AssembledCall> {
    let mut out: Vec<AssembledCall> = Vec::new();
    let mut merged_at: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for call in calls {
        let mergeable = call.parse_error.is_none()
            && tools
                .get(&call.invocation.tool_name)
                .is_some_and(|t| t.mergeable());

        if mergeable {
            if let Some(&idx) = merged_at.get(&call.invocation.tool_name) {
                let target = &mut out[idx];
                let mut queries = extract_queries(&target.invocation.arguments);
                queries.extend(extract_queries(&call.invocation.arguments));
                target.invocation.arguments = json!({ "queries": queries });
                tracing::debug!(
                    tool = %target.invocation.tool_name,
                    absorbed_call = %call.invocation.call_id,
                    "merged duplicate tool call"
                );
                continue;
            }
            merged_at.insert(call.invocation.tool_name.clone(), out.len());
        }
        out.push(call);
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execute + reconcile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one round of tool invocations.
pub(crate) async fn dispatch_round(
    tools: &ToolRegistry,
    ledger: &CitationLedger,
    engine: &EngineConfig,
    emitter: &mut PacketEmitter,
    cancel: &CancelToken,
    calls: Vec<AssembledCall>,
) -> Result<DispatchOutcome> {
    let calls = merge_calls(calls, tools);

    if cancel.is_cancelled() {
        return Ok(DispatchOutcome::Cancelled);
    }

    // Context resolution happens in invocation order so reservations are
    // allocated the way the final numbering will read.
    let cited = Arc::new(ledger.snapshot());
    let contexts: Vec<(u32, ToolContext)> = calls
        .iter()
        .map(|_| {
            let reserved = ledger.reserve_next();
            (
                reserved,
                ToolContext {
                    citation_start: reserved,
                    cited: cited.clone(),
                },
            )
        })
        .collect();

    let semaphore = Arc::new(Semaphore::new(engine.tool_parallelism.max(1)));
    let timeout = Duration::from_secs(engine.tool_timeout_secs);

    let futures: Vec<_> = calls
        .iter()
        .zip(&contexts)
        .map(|(call, (_, ctx))| {
            let semaphore = semaphore.clone();
            let tool = tools.get(&call.invocation.tool_name);
            let invocation = &call.invocation;
            let parse_error = call.parse_error.clone();
            let ctx = ctx.clone();
            let timeout_secs = engine.tool_timeout_secs;
            let worker = async move {
                if let Some(message) = parse_error {
                    return (message, true, Vec::new());
                }
                let Some(tool) = tool else {
                    return (
                        format!("unknown tool `{}`", invocation.tool_name),
                        true,
                        Vec::new(),
                    );
                };
                let Ok(_permit) = semaphore.acquire().await else {
                    return ("tool dispatch pool closed".to_string(), true, Vec::new());
                };
                match tokio::time::timeout(timeout, tool.run(invocation.arguments.clone(), &ctx))
                    .await
                {
                    Ok(Ok(output)) => (output.summary, false, output.documents),
                    Ok(Err(e)) => {
                        tracing::warn!(tool = %invocation.tool_name, error = %e, "tool failed");
                        (format!("tool error: {e}"), true, Vec::new())
                    }
                    Err(_) => {
                        tracing::warn!(
                            tool = %invocation.tool_name,
                            timeout_secs,
                            "tool timed out"
                        );
                        (
                            format!(
                                "tool `{}` timed out after {}s",
                                invocation.tool_name, timeout_secs
                            ),
                            true,
                            Vec::new(),
                        )
                    }
                }
            };
            worker.instrument(tracing::info_span!(
                "tool.call",
                tool_name = %call.invocation.tool_name,
                call_id = %call.invocation.call_id,
            ))
        })
        .collect();

    // Results come back in original order via join_all, which keeps packet
    // sequencing deterministic.  Dropping the join on cancellation drops
    // every worker future with it — no dangling executions.
    let joined = tokio::select! {
        results = join_all(futures) => results,
        _ = cancel.cancelled() => return Ok(DispatchOutcome::Cancelled),
    };

    let mut results = Vec::with_capacity(calls.len());
    for ((call, (reserved, _)), (content, is_error, documents)) in
        calls.into_iter().zip(contexts).zip(joined)
    {
        let cited_docs = reconcile(ledger, reserved, documents)?;

        emitter
            .tool_start(&call.invocation.call_id, &call.invocation.tool_name)
            .await;
        emitter.tool_delta(&content).await;
        emitter.tool_documents(cited_docs.clone()).await;
        emitter.end_section().await;

        results.push(InvocationResult {
            invocation: call.invocation,
            content,
            is_error,
            documents: cited_docs,
        });
    }

    Ok(DispatchOutcome::Completed(results))
}

/// Resolve one invocation's documents to citation numbers.
///
/// Reuse wins; otherwise the invocation's reserved number goes to its first
/// new document and later ones mint fresh.  An untouched reservation is
/// handed back (or left as a gap when the counter has moved on).
fn reconcile(
    ledger: &CitationLedger,
    reserved: u32,
    documents: Vec<DocumentRef>,
) -> Result<Vec<CitedDocument>> {
    let mut reservation = Some(reserved);
    let mut cited_docs: Vec<CitedDocument> = Vec::new();

    for doc in documents {
        let number = match ledger.lookup(&doc.unique_id) {
            Some(n) => n,
            None => match reservation.take() {
                Some(r) => ledger.insert_exact(&doc.unique_id, r)?,
                None => ledger.assign(&doc.unique_id),
            },
        };
        // The same document twice in one output keeps its first entry.
        if cited_docs.iter().any(|d| d.number == number) {
            continue;
        }
        cited_docs.push(CitedDocument {
            number,
            document: doc,
        });
    }

    if let Some(r) = reservation {
        ledger.release(r);
    }
    Ok(cited_docs)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;
    use tern_domain::message::ToolDefinition;
    use tern_domain::packet::{Packet, PacketPayload};
    use tern_tools::{Tool, ToolOutput};
    use tokio::sync::mpsc;

    struct StubTool {
        name: &'static str,
        mergeable: bool,
        summary: String,
        docs: Vec<DocumentRef>,
        seen: Mutex<Vec<Value>>,
    }

    impl StubTool {
        fn new(name: &'static str, mergeable: bool) -> Self {
            Self {
                name,
                mergeable,
                summary: format!("{name} ok"),
                docs: Vec::new(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn with_docs(mut self, docs: Vec<DocumentRef>) -> Self {
            self.docs = docs;
            self
        }
    }

    #[async_trait::async_trait]
    impl Tool for StubTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.to_string(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            }
        }

        fn mergeable(&self) -> bool {
            self.mergeable
        }

        async fn run(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            self.seen.lock().push(arguments);
            Ok(ToolOutput {
                summary: self.summary.clone(),
                documents: self.docs.clone(),
            })
        }
    }

    struct NeverTool;

    #[async_trait::async_trait]
    impl Tool for NeverTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "never".to_string(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn run(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            std::future::pending().await
        }
    }

    fn assembled(call_id: &str, tool: &str, arguments: Value) -> AssembledCall {
        AssembledCall {
            invocation: ToolInvocation {
                call_id: call_id.to_string(),
                tool_name: tool.to_string(),
                arguments,
                slot: 0,
            },
            parse_error: None,
        }
    }

    fn doc(id: &str) -> DocumentRef {
        DocumentRef {
            unique_id: id.to_string(),
            title: id.to_string(),
            url: None,
            excerpt: String::new(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn merge_concatenates_query_lists() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StubTool::new("doc_search", true)));

        let calls = vec![
            assembled("call_1", "doc_search", json!({"queries": ["a", "b"]})),
            assembled("call_2", "doc_search", json!({"queries": ["c"]})),
        ];
        let merged = merge_calls(calls, &tools);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].invocation.call_id, "call_1");
        assert_eq!(
            merged[0].invocation.arguments,
            json!({"queries": ["a", "b", "c"]})
        );
    }

    #[test]
    fn merge_accepts_singular_query_shape() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StubTool::new("doc_search", true)));

        let calls = vec![
            assembled("call_1", "doc_search", json!({"query": "a"})),
            assembled("call_2", "doc_search", json!({"query": "b"})),
        ];
        let merged = merge_calls(calls, &tools);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].invocation.arguments, json!({"queries": ["a", "b"]}));
    }

    #[test]
    fn merge_leaves_non_mergeable_tools_alone() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StubTool::new("fetch", false)));

        let calls = vec![
            assembled("call_1", "fetch", json!({"url": "a"})),
            assembled("call_2", "fetch", json!({"url": "b"})),
        ];
        assert_eq!(merge_calls(calls, &tools).len(), 2);
    }

    #[test]
    fn merge_skips_parse_errors() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(StubTool::new("doc_search", true)));

        let mut broken = assembled("call_2", "doc_search", json!({}));
        broken.parse_error = Some("malformed".into());
        let calls = vec![
            assembled("call_1", "doc_search", json!({"queries": ["a"]})),
            broken,
        ];
        let merged = merge_calls(calls, &tools);
        assert_eq!(merged.len(), 2);
        assert!(merged[1].parse_error.is_some());
    }

    fn collect_ready(rx: &mut mpsc::Receiver<Packet>) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn dispatch_numbers_documents_in_invocation_order() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(
            StubTool::new("doc_search", true).with_docs(vec![doc("A"), doc("B")]),
        ));
        tools.register(Arc::new(
            StubTool::new("fetch", false).with_docs(vec![doc("A")]),
        ));

        let ledger = CitationLedger::new();
        let engine = EngineConfig::default();
        let (tx, mut rx) = mpsc::channel(64);
        let mut emitter = PacketEmitter::new(tx);
        let cancel = CancelToken::new();

        let calls = vec![
            assembled("call_1", "doc_search", json!({"queries": ["rust"]})),
            assembled("call_2", "fetch", json!({"url": "A"})),
        ];
        let outcome = dispatch_round(&tools, &ledger, &engine, &mut emitter, &cancel, calls)
            .await
            .unwrap();

        let DispatchOutcome::Completed(results) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(results.len(), 2);

        // Search's documents take 1 and 2; the fetch of A reuses 1.
        let search_numbers: Vec<u32> = results[0].documents.iter().map(|d| d.number).collect();
        assert_eq!(search_numbers, vec![1, 2]);
        let fetch_numbers: Vec<u32> = results[1].documents.iter().map(|d| d.number).collect();
        assert_eq!(fetch_numbers, vec![1]);
        // Fetch's reservation was handed back, so only two numbers exist.
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.assign("C"), 3);

        // One framed tool section per invocation, in invocation order.
        drop(emitter);
        let packets = collect_ready(&mut rx);
        let starts: Vec<&str> = packets
            .iter()
            .filter_map(|p| match &p.payload {
                PacketPayload::ToolStart { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec!["call_1", "call_2"]);
        let ends = packets
            .iter()
            .filter(|p| matches!(p.payload, PacketPayload::SectionEnd))
            .count();
        assert_eq!(ends, 2);
    }

    #[tokio::test]
    async fn failed_invocation_is_isolated() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(
            StubTool::new("doc_search", true).with_docs(vec![doc("A")]),
        ));
        // "missing" is never registered.

        let ledger = CitationLedger::new();
        let engine = EngineConfig::default();
        let (tx, _rx) = mpsc::channel(64);
        let mut emitter = PacketEmitter::new(tx);
        let cancel = CancelToken::new();

        let calls = vec![
            assembled("call_1", "missing", json!({})),
            assembled("call_2", "doc_search", json!({"queries": ["x"]})),
        ];
        let outcome = dispatch_round(&tools, &ledger, &engine, &mut emitter, &cancel, calls)
            .await
            .unwrap();

        let DispatchOutcome::Completed(results) = outcome else {
            panic!("expected completion");
        };
        assert!(results[0].is_error);
        assert!(results[0].content.contains("unknown tool"));
        assert!(results[0].documents.is_empty());
        // The healthy invocation keeps its own reservation (2); the failed
        // one's number 1 stays a gap because 2 was already handed out.
        assert!(!results[1].is_error);
        assert_eq!(results[1].documents[0].number, 2);
    }

    #[tokio::test]
    async fn parse_error_becomes_tool_error_result() {
        let mut tools = ToolRegistry::new();
        let recorder = Arc::new(StubTool::new("doc_search", true));
        tools.register(recorder.clone());

        let ledger = CitationLedger::new();
        let engine = EngineConfig::default();
        let (tx, _rx) = mpsc::channel(64);
        let mut emitter = PacketEmitter::new(tx);
        let cancel = CancelToken::new();

        let mut broken = assembled("call_1", "doc_search", json!({}));
        broken.parse_error = Some("malformed tool arguments: expected value".into());

        let outcome = dispatch_round(&tools, &ledger, &engine, &mut emitter, &cancel, vec![broken])
            .await
            .unwrap();
        let DispatchOutcome::Completed(results) = outcome else {
            panic!("expected completion");
        };
        assert!(results[0].is_error);
        assert!(results[0].content.contains("malformed"));
        // The tool itself never ran.
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(NeverTool));

        let ledger = CitationLedger::new();
        let engine = EngineConfig {
            tool_timeout_secs: 1,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(64);
        let mut emitter = PacketEmitter::new(tx);
        let cancel = CancelToken::new();

        let calls = vec![assembled("call_1", "never", json!({}))];
        let outcome = dispatch_round(&tools, &ledger, &engine, &mut emitter, &cancel, calls)
            .await
            .unwrap();
        let DispatchOutcome::Completed(results) = outcome else {
            panic!("expected completion");
        };
        assert!(results[0].is_error);
        assert!(results[0].content.contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_mid_dispatch_drops_workers() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(
            StubTool::new("quick", false).with_docs(vec![doc("A")]),
        ));
        tools.register(Arc::new(NeverTool));

        let ledger = CitationLedger::new();
        let engine = EngineConfig::default();
        let (tx, mut rx) = mpsc::channel(64);
        let mut emitter = PacketEmitter::new(tx);
        let cancel = CancelToken::new();

        // One invocation finishes immediately; the other two never do.
        let calls = vec![
            assembled("call_1", "quick", json!({})),
            assembled("call_2", "never", json!({})),
            assembled("call_3", "never", json!({})),
        ];
        let canceller = cancel.clone();
        let (outcome, _) = tokio::join!(
            dispatch_round(&tools, &ledger, &engine, &mut emitter, &cancel, calls),
            async move {
                tokio::task::yield_now().await;
                canceller.cancel();
            }
        );

        assert!(matches!(outcome.unwrap(), DispatchOutcome::Cancelled));
        // The round was abandoned wholesale: not even the finished
        // invocation's packets went out.
        drop(emitter);
        assert!(collect_ready(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct GaugeTool {
            active: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        #[async_trait::async_trait]
        impl Tool for GaugeTool {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "gauge".to_string(),
                    description: String::new(),
                    parameters: json!({"type": "object"}),
                }
            }

            async fn run(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(ToolOutput::text("done"))
            }
        }

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(GaugeTool {
            active: active.clone(),
            peak: peak.clone(),
        }));

        let ledger = CitationLedger::new();
        let engine = EngineConfig {
            tool_parallelism: 1,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::channel(64);
        let mut emitter = PacketEmitter::new(tx);
        let cancel = CancelToken::new();

        let calls = (0..4)
            .map(|i| assembled(&format!("call_{i}"), "gauge", json!({})))
            .collect();
        let outcome = dispatch_round(&tools, &ledger, &engine, &mut emitter, &cancel, calls)
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Completed(_)));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
