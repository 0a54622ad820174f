/// Ordered, de-duplicated message sequence of one conversation.
///
/// Live events that arrive before the history load finishes are parked in
/// `pending` and replayed, in receive order, on top of the loaded base.
use crate::messenger_types::Message;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<String>,
    pending: VecDeque<Message>,
    loaded: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a history load. Visible messages stay until the
    /// load replaces them.
    pub fn begin_load(&mut self) {
        self.loaded = false;
        self.pending.clear();
    }

    /// Install the loaded history and flush parked live events.
    /// Returns the flushed events that were actually added.
    pub fn complete_load(&mut self, rows: Vec<Message>) -> Vec<Message> {
        self.messages.clear();
        self.ids.clear();
        for row in rows {
            self.insert(row);
        }
        self.loaded = true;

        let mut added = Vec::new();
        while let Some(message) = self.pending.pop_front() {
            if self.insert(message.clone()).is_some() {
                added.push(message);
            }
        }
        added
    }

    /// Offer one live event. Returns its index if it entered the sequence,
    /// `None` if it was parked or already known.
    pub fn push_live(&mut self, message: Message) -> Option<usize> {
        if !self.loaded {
            self.pending.push_back(message);
            return None;
        }
        self.insert(message)
    }

    /// Place `message` after every entry with `created_at <= message.created_at`.
    /// In-order arrivals append; equal timestamps keep arrival order.
    fn insert(&mut self, message: Message) -> Option<usize> {
        if !self.ids.insert(message.id.clone()) {
            return None;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        Some(at)
    }

    /// Mark everything `sender -> receiver` as read. Returns how many flipped.
    pub fn mark_read_from(&mut self, sender_id: &str, receiver_id: &str) -> usize {
        let mut flipped = 0;
        for m in self
            .messages
            .iter_mut()
            .filter(|m| m.sender_id == sender_id && m.receiver_id == receiver_id && !m.read_status)
        {
            m.mark_read();
            flipped += 1;
        }
        flipped
    }

    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
