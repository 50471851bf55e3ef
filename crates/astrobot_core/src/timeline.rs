//! crates/astrobot_core/src/timeline.rs
//!
//! The ordered, mutable message list — the single source of truth the client
//! renders. Insertion order is render order. The list is append-only except
//! for two mutation patterns: replace-by-id (a placeholder resolving) and
//! remove-by-id (a declined prompt).

use crate::domain::{Card, DailyRasiState, Message, MessageId, Role};

/// The session's chat timeline.
#[derive(Debug, Default)]
pub struct Timeline {
    messages: Vec<Message>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message.
    ///
    /// Pushing a message with the reserved `typing` id first evicts any
    /// existing one, keeping the at-most-one-typing invariant regardless
    /// of caller discipline.
    pub fn push(&mut self, msg: Message) {
        if msg.id == MessageId::Typing {
            self.messages.retain(|m| m.id != MessageId::Typing);
        }
        self.messages.push(msg);
    }

    /// Replaces the message with `id` in place, preserving its position.
    /// Returns false when no such message exists (a stale mutation, which
    /// the caller must treat as a no-op).
    pub fn replace(&mut self, id: &MessageId, replacement: Message) -> bool {
        match self.messages.iter_mut().find(|m| &m.id == id) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Removes exactly the message with `id`. Returns whether it existed.
    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| &m.id != id);
        self.messages.len() != before
    }

    /// Rewrites the embedded daily-rasi state of the card message with `id`.
    /// Returns the updated message, or `None` if the message is gone or is
    /// not a daily-rasi card.
    pub fn set_daily_state(&mut self, id: &MessageId, state: DailyRasiState) -> Option<&Message> {
        let msg = self.messages.iter_mut().find(|m| &m.id == id)?;
        match msg.card {
            Some(Card::DailyRasi(_)) => {
                msg.card = Some(Card::DailyRasi(state));
                Some(msg)
            }
            _ => None,
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether any user-authored message has been appended yet. The trial
    /// timer keys off the first one.
    pub fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }

    /// Number of in-flight placeholders currently shown.
    pub fn pending_count(&self) -> usize {
        self.messages.iter().filter(|m| m.typing).count()
    }
}
