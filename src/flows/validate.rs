use super::state::TransitionDef;
use super::types::State;
use std::collections::{HashSet, VecDeque};

/// Structural problem in a transition table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transition table: {message}")]
pub struct TableError {
    pub message: String,
}

impl TableError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Check a transition table before the engine serves traffic.
///
/// Errors: a `(state, action)` key listed twice, or a state other than `START`
/// with no inbound transition. Unreachable states (no path from `START`) and
/// self-loops are only logged.
pub fn check_transition_table(table: &[TransitionDef]) -> Result<(), Vec<TableError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for t in table {
        if !seen.insert((t.from, t.on)) {
            errors.push(TableError::new(format!(
                "duplicate transition {} --{}-->",
                t.from, t.on
            )));
        }
        if t.from == t.target {
            tracing::info!("transition {} --{}--> loops onto itself", t.from, t.on);
        }
    }

    for state in State::ALL {
        if state == State::Start {
            continue;
        }
        let has_inbound = table.iter().any(|t| t.target == state && t.from != state);
        if !has_inbound {
            errors.push(TableError::new(format!(
                "state {state} has no inbound transition"
            )));
        }
    }

    let reachable = find_reachable_states(table, State::Start);
    for state in State::ALL {
        if !reachable.contains(&state) {
            tracing::warn!("state {state} is unreachable from {}", State::Start);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// BFS over the table from `start`.
pub fn find_reachable_states(table: &[TransitionDef], start: State) -> HashSet<State> {
    let mut reachable = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        if !reachable.insert(current) {
            continue;
        }
        for t in table.iter().filter(|t| t.from == current) {
            queue.push_back(t.target);
        }
    }

    reachable
}
