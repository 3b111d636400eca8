//! Per-turn cancellation tokens and terminal-state tracking.
//!
//! Each running turn gets a `CancelToken`. Calling `cancel()` on it signals
//! the engine to stop the turn cleanly at its next suspension point (model
//! call, stream read, tool await).
//!
//! The [`TurnRegistry`] keys tokens by turn id and remembers how each turn
//! ended, so the cancel endpoint can distinguish "unknown turn" from
//! "already finished".

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// Finished turns kept around for state queries before eviction.
const RETAINED_TURNS: usize = 256;

/// Cancellation token checked (and awaited) by the engine loop. Clones
/// observe the same flag.
#[derive(Clone, Default)]
pub struct CancelToken(tokio_util::sync::CancellationToken);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip the token.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolve once cancellation has been requested.  Select-able against
    /// stream reads and tool joins, so a cancel lands even while the turn
    /// is blocked on a slow transport or tool.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle state of a turn as seen by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Running,
    Done,
    Cancelled,
    Errored,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnState::Running)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TurnState::Running => "running",
            TurnState::Done => "done",
            TurnState::Cancelled => "cancelled",
            TurnState::Errored => "errored",
        })
    }
}

/// What a cancel request against the registry resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The turn was running and its token has been flipped.
    Requested,
    /// The turn already reached a terminal state.
    AlreadyFinished(TurnState),
    /// No turn with that id was ever registered (or it has been evicted).
    Unknown,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct TurnSlot {
    token: CancelToken,
    state: TurnState,
}

/// Tracks every turn's cancel token and terminal state.
///
/// Terminal entries are retained (bounded by [`RETAINED_TURNS`]) so that a
/// cancel arriving after the turn finished gets a truthful answer instead
/// of a 404.
#[derive(Default)]
pub struct TurnRegistry {
    turns: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    slots: HashMap<Uuid, TurnSlot>,
    finished: VecDeque<Uuid>,
}

impl TurnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a turn.
    pub fn register(&self, turn_id: Uuid) -> CancelToken {
        let token = CancelToken::new();
        let slot = TurnSlot {
            token: token.clone(),
            state: TurnState::Running,
        };
        self.turns.lock().slots.insert(turn_id, slot);
        token
    }

    /// Request cancellation of a turn.
    pub fn cancel(&self, turn_id: &Uuid) -> CancelOutcome {
        let reg = self.turns.lock();
        match reg.slots.get(turn_id) {
            Some(slot) if slot.state == TurnState::Running => {
                slot.token.cancel();
                CancelOutcome::Requested
            }
            Some(slot) => CancelOutcome::AlreadyFinished(slot.state),
            None => CancelOutcome::Unknown,
        }
    }

    /// Record a turn's terminal state (called exactly once per turn by the
    /// engine).  Evicts the oldest finished entries past the retention cap.
    pub fn finish(&self, turn_id: &Uuid, state: TurnState) {
        let mut reg = self.turns.lock();
        match reg.slots.get_mut(turn_id) {
            Some(slot) if slot.state == TurnState::Running => slot.state = state,
            _ => return,
        }
        reg.finished.push_back(*turn_id);
        while reg.finished.len() > RETAINED_TURNS {
            if let Some(old) = reg.finished.pop_front() {
                reg.slots.remove(&old);
            }
        }
    }

    /// Current state of a turn, if known.
    pub fn state(&self, turn_id: &Uuid) -> Option<TurnState> {
        self.turns.lock().slots.get(turn_id).map(|s| s.state)
    }

    /// Whether a turn is registered and still running.
    pub fn is_running(&self, turn_id: &Uuid) -> bool {
        self.state(turn_id) == Some(TurnState::Running)
    }

    /// Number of currently running turns.
    pub fn running_count(&self) -> usize {
        self.turns
            .lock()
            .slots
            .values()
            .filter(|s| s.state == TurnState::Running)
            .count()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
