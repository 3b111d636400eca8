//! Turn-scoped citation ledger.
//!
//! One ledger per turn maps document unique ids to citation numbers.
//! Numbers are 1-based, handed out in first-seen order, and never revoked:
//! once a document is assigned `[3]`, every later mention of it — same
//! round or a later one — resolves to `[3]` again.
//!
//! Tools never finalize numbers.  The dispatcher reserves a starting number
//! per invocation before execution (informational, so a search tool can
//! render its summary with the numbers its documents will most likely get)
//! and resolves the authoritative mapping on the joining task afterwards,
//! one invocation at a time.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;
use tern_domain::error::{Error, Result};

/// Matches `[n]` citation markers in visible answer text.
fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation marker pattern"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CitationLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Ledger {
    /// document unique id → citation number.
    numbers: HashMap<String, u32>,
    /// Unique ids in first-seen order.
    order: Vec<String>,
    /// Next number `reserve_next` / a fresh `assign` hands out.  Starts at 1.
    next: u32,
}

/// Shared, turn-scoped citation state.
pub struct CitationLedger {
    inner: Mutex<Ledger>,
}

impl Default for CitationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CitationLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Ledger {
                numbers: HashMap::new(),
                order: Vec::new(),
                next: 1,
            }),
        }
    }

    /// Hand out the next unused number and advance the counter.
    ///
    /// The caller holds a *reservation*: the number is not bound to any
    /// document until [`CitationLedger::insert_exact`] fulfils it, and an
    /// unused reservation can be handed back via [`CitationLedger::release`].
    pub fn reserve_next(&self) -> u32 {
        let mut ledger = self.inner.lock();
        let n = ledger.next;
        ledger.next += 1;
        n
    }

    /// Number already assigned to a document, if any.
    pub fn lookup(&self, unique_id: &str) -> Option<u32> {
        self.inner.lock().numbers.get(unique_id).copied()
    }

    /// Resolve a document to its citation number, minting a fresh one on
    /// first sight.  Idempotent: the same unique id always yields the same
    /// number for the lifetime of the turn.
    pub fn assign(&self, unique_id: &str) -> u32 {
        let mut ledger = self.inner.lock();
        if let Some(n) = ledger.numbers.get(unique_id) {
            return *n;
        }
        let n = ledger.next;
        ledger.next += 1;
        ledger.numbers.insert(unique_id.to_string(), n);
        ledger.order.push(unique_id.to_string());
        n
    }

    /// Bind a document to a specific (reserved) number.
    ///
    /// Errors when the id already holds a *different* number — two numbers
    /// for one document would corrupt every `[n]` marker already streamed,
    /// so this fails the dispatch loudly instead of papering over it.
    pub fn insert_exact(&self, unique_id: &str, number: u32) -> Result<u32> {
        let mut ledger = self.inner.lock();
        if let Some(existing) = ledger.numbers.get(unique_id) {
            if *existing != number {
                return Err(Error::Citation(format!(
                    "document `{unique_id}` already cited as [{existing}], refusing [{number}]"
                )));
            }
            return Ok(*existing);
        }
        ledger.numbers.insert(unique_id.to_string(), number);
        ledger.order.push(unique_id.to_string());
        Ok(number)
    }

    /// Hand an unused reservation back.  Only possible while it is still
    /// the newest number handed out; otherwise it stays a gap for the rest
    /// of the turn (never re-issued).
    pub fn release(&self, reservation: u32) -> bool {
        let mut ledger = self.inner.lock();
        if ledger.next == reservation + 1 {
            ledger.next = reservation;
            true
        } else {
            false
        }
    }

    /// Immutable copy of the current assignments, shared with every tool
    /// invocation of a dispatch round.
    pub fn snapshot(&self) -> HashMap<String, u32> {
        self.inner.lock().numbers.clone()
    }

    /// `(unique_id, number)` pairs in first-seen order.
    pub fn entries(&self) -> Vec<(String, u32)> {
        let ledger = self.inner.lock();
        ledger
            .order
            .iter()
            .filter_map(|id| ledger.numbers.get(id).map(|n| (id.clone(), *n)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().numbers.is_empty()
    }
}

/// Citation numbers whose `[n]` marker appears in `text`, sorted ascending
/// and de-duplicated.
pub fn referenced_numbers(text: &str) -> Vec<u32> {
    let mut numbers: Vec<u32> = marker_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().parse::<u32>().ok())
        .collect();
    numbers.sort_unstable();
    numbers.dedup();
    numbers
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
