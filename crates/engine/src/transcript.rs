//! Bounded conversation history.

use tw_domain::tool::{Message, Role};
use tw_domain::trace::TraceEvent;

/// Ordered, bounded message buffer fed back to the model every round.
///
/// Oldest messages are dropped once `max_messages` is exceeded. A `tool`
/// message is never left at the front: its originating call would be gone,
/// which backends reject.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    max_messages: usize,
}

impl Transcript {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages: max_messages.max(1),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.truncate();
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.truncate();
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

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    fn truncate(&mut self) {
        let mut drop = self.messages.len().saturating_sub(self.max_messages);
        drop += self.messages[drop..]
            .iter()
            .take_while(|m| m.role == Role::Tool)
            .count();
        if drop == 0 {
            return;
        }
        self.messages.drain(..drop);
        TraceEvent::TranscriptTruncated {
            dropped: drop,
            retained: self.messages.len(),
        }
        .emit();
    }
}
