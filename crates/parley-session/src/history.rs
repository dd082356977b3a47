use parley_core::types::{FeedbackEntry, Turn, TurnRole};

use crate::error::{Result, SessionError};

/// Append-only conversation log.
///
/// The only removal permitted is popping a trailing provisional user turn
/// while its assistant reply is still being generated, and the full clear
/// performed by an explicit reset.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Roll back a provisional user turn. Only removes the tail entry and
    /// only when it is a user turn.
    pub fn pop_user_provisional(&mut self) -> Option<Turn> {
        if self.turns.last().map(Turn::is_user).unwrap_or(false) {
            self.turns.pop()
        } else {
            None
        }
    }

    /// Number of user turns in the log.
    pub fn user_turn_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_user()).count()
    }

    /// Text of the most recent interviewer turn, if any.
    pub fn last_interviewer_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(Turn::text)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Ordered per-turn feedback log.
///
/// Entries are kept sorted by the user-turn index they reference; merging
/// the same index twice replaces the entry, so re-delivery is harmless.
#[derive(Debug, Default)]
pub struct FeedbackLog {
    entries: Vec<FeedbackEntry>,
}

impl FeedbackLog {
    pub fn new(entries: Vec<FeedbackEntry>) -> Self {
        let mut log = Self { entries };
        log.entries.sort_by_key(|e| e.turn_index);
        log
    }

    pub fn entries(&self) -> &[FeedbackEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge a feedback entry at its index position.
    ///
    /// `user_turn_count` is the number of committed user turns; an index at
    /// or past it is an invariant violation and fails loudly.
    pub fn merge(&mut self, entry: FeedbackEntry, user_turn_count: usize) -> Result<()> {
        if entry.turn_index >= user_turn_count {
            return Err(SessionError::MergeViolation {
                reason: format!(
                    "feedback for user turn {} but only {} user turns exist",
                    entry.turn_index, user_turn_count
                ),
            });
        }
        match self.entries.binary_search_by_key(&entry.turn_index, |e| e.turn_index) {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
