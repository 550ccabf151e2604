//! Fragment-to-Part aggregation.
//!
//! A round's generation arrives as a sequence of small [`Fragment`]s. The
//! [`ChunkAggregator`] folds consecutive same-tag fragments into one open
//! [`Part`] and closes it when the tag changes, so observers see a small
//! number of growing Parts instead of a flood of fragments.
//!
//! Two feeds are published on every change:
//! - a `watch` channel carrying the full Part list (latest snapshot wins),
//! - a `broadcast` channel carrying [`PartEvent`] lifecycle notifications.

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tw_domain::tool::{Message, ToolCall, ToolResult};

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fragments and Parts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentTag {
    Text,
    ToolCall,
    ToolResult,
}

/// One atomic piece of a streamed round.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(String),
    /// Partial (or complete) tool-call fields, appended to the open Part.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: String,
    },
    ToolResult(ToolResult),
}

impl Fragment {
    pub fn tag(&self) -> FragmentTag {
        match self {
            Fragment::Text(_) => FragmentTag::Text,
            Fragment::ToolCall { .. } => FragmentTag::ToolCall,
            Fragment::ToolResult(_) => FragmentTag::ToolResult,
        }
    }

    /// A fragment carrying a whole assembled call.
    pub fn tool_call(call: &ToolCall) -> Self {
        Fragment::ToolCall {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartKind {
    Text {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: String,
    },
    ToolResult(ToolResult),
}

/// An aggregated, possibly still-growing unit of a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Part {
    pub kind: PartKind,
    pub is_complete: bool,
    /// The round that produced this Part.
    pub group_id: u32,
}

impl Part {
    pub fn tag(&self) -> FragmentTag {
        match self.kind {
            PartKind::Text { .. } => FragmentTag::Text,
            PartKind::ToolCall { .. } => FragmentTag::ToolCall,
            PartKind::ToolResult(_) => FragmentTag::ToolResult,
        }
    }

    fn from_fragment(fragment: Fragment, group_id: u32) -> Self {
        let (kind, is_complete) = match fragment {
            Fragment::Text(text) => (PartKind::Text { text }, false),
            Fragment::ToolCall {
                call_id,
                tool_name,
                arguments,
            } => (
                PartKind::ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                },
                false,
            ),
            // Results never grow.
            Fragment::ToolResult(result) => (PartKind::ToolResult(result), true),
        };
        Self {
            kind,
            is_complete,
            group_id,
        }
    }

    /// Append a same-tag fragment. Returns false when the tags differ.
    fn merge(&mut self, fragment: Fragment) -> bool {
        match (&mut self.kind, fragment) {
            (PartKind::Text { text }, Fragment::Text(more)) => {
                text.push_str(&more);
                true
            }
            (
                PartKind::ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                },
                Fragment::ToolCall {
                    call_id: id_more,
                    tool_name: name_more,
                    arguments: args_more,
                },
            ) => {
                call_id.push_str(&id_more);
                tool_name.push_str(&name_more);
                arguments.push_str(&args_more);
                true
            }
            _ => false,
        }
    }

    /// The transcript message for this Part, `None` for empty text.
    pub fn to_message(&self) -> Option<Message> {
        match &self.kind {
            PartKind::Text { text } if text.is_empty() => None,
            PartKind::Text { text } => Some(Message::assistant(text.clone())),
            PartKind::ToolCall {
                call_id,
                tool_name,
                arguments,
            } => Some(Message::assistant_tool_call(&ToolCall::new(
                call_id.clone(),
                tool_name.clone(),
                arguments.clone(),
            ))),
            PartKind::ToolResult(result) => Some(Message::tool_result(
                result.call_id.clone(),
                result.content(),
                result.is_error(),
            )),
        }
    }
}

/// Lifecycle notification published on every aggregator mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PartEvent {
    Added { index: usize, part: Part },
    Updated { index: usize, part: Part },
    Completed { index: usize },
    Reset,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChunkAggregator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Folds fragments into Parts. At most one Part is open at any time and it
/// is always the last one.
pub struct ChunkAggregator {
    parts: Vec<Part>,
    group_id: u32,
    parts_tx: watch::Sender<Vec<Part>>,
    events_tx: broadcast::Sender<PartEvent>,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        let (parts_tx, _) = watch::channel(Vec::new());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            parts: Vec::new(),
            group_id: 0,
            parts_tx,
            events_tx,
        }
    }

    /// Tag Parts created from now on with `group_id`.
    pub fn set_group(&mut self, group_id: u32) {
        self.group_id = group_id;
    }

    pub fn add_fragment(&mut self, fragment: Fragment) {
        let tag = fragment.tag();

        if tag != FragmentTag::ToolResult {
            if let Some(last) = self.parts.last_mut() {
                if !last.is_complete && last.tag() == tag {
                    if last.merge(fragment) {
                        let index = self.parts.len() - 1;
                        let part = self.parts[index].clone();
                        self.emit(PartEvent::Updated { index, part });
                        self.publish();
                    }
                    return;
                }
            }
        }

        self.close_open();
        let part = Part::from_fragment(fragment, self.group_id);
        self.parts.push(part.clone());
        self.emit(PartEvent::Added {
            index: self.parts.len() - 1,
            part,
        });
        self.publish();
    }

    /// Force-close the open Part, if any. Safe to call repeatedly.
    pub fn complete(&mut self) {
        if self.close_open() {
            self.publish();
        }
    }

    pub fn reset(&mut self) {
        self.parts.clear();
        self.emit(PartEvent::Reset);
        self.publish();
    }

    pub fn parts(&self) -> Vec<Part> {
        self.parts.clone()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn subscribe_parts(&self) -> watch::Receiver<Vec<Part>> {
        self.parts_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PartEvent> {
        self.events_tx.subscribe()
    }

    /// Materialize every Part into transcript messages, in Part order.
    pub fn to_messages(&self) -> Vec<Message> {
        self.parts.iter().filter_map(Part::to_message).collect()
    }

    /// Materialize only the Parts of one round.
    pub fn messages_for_group(&self, group_id: u32) -> Vec<Message> {
        self.parts
            .iter()
            .filter(|p| p.group_id == group_id)
            .filter_map(Part::to_message)
            .collect()
    }

    fn close_open(&mut self) -> bool {
        match self.parts.last_mut() {
            Some(last) if !last.is_complete => {
                last.is_complete = true;
                let index = self.parts.len() - 1;
                self.emit(PartEvent::Completed { index });
                true
            }
            _ => false,
        }
    }

    fn emit(&self, event: PartEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        self.parts_tx.send_replace(self.parts.clone());
    }
}

impl Default for ChunkAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tw_domain::tool::{ContentPart, MessageContent, Role};

    fn drain(rx: &mut broadcast::Receiver<PartEvent>) -> Vec<PartEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn text(s: &str) -> Fragment {
        Fragment::Text(s.into())
    }

    #[test]
    fn same_tag_fragments_merge_into_one_part() {
        let mut agg = ChunkAggregator::new();
        agg.add_fragment(text("Hel"));
        agg.add_fragment(text("lo"));
        agg.complete();

        let parts = agg.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].kind, PartKind::Text { text: "Hello".into() });
        assert!(parts[0].is_complete);
    }

    #[test]
    fn tag_switch_closes_previous_part() {
        let mut agg = ChunkAggregator::new();
        let mut rx = agg.subscribe_events();

        agg.add_fragment(text("thinking"));
        agg.add_fragment(Fragment::ToolCall {
            call_id: "c1".into(),
            tool_name: "add".into(),
            arguments: "{}".into(),
        });
        agg.add_fragment(text("done"));

        let events = drain(&mut rx);
        let completed: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                PartEvent::Completed { index } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![0, 1]);
        assert_eq!(agg.len(), 3);
        // Only the last Part is open.
        let open: Vec<bool> = agg.parts().iter().map(|p| p.is_complete).collect();
        assert_eq!(open, vec![true, true, false]);
    }

    #[test]
    fn tool_results_are_atomic() {
        let mut agg = ChunkAggregator::new();
        let call = ToolCall::new("c1", "add", "{}");
        let result = ToolResult::success(&call, json!({}), json!(3));
        agg.add_fragment(Fragment::ToolResult(result.clone()));
        agg.add_fragment(Fragment::ToolResult(result));

        let parts = agg.parts();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.is_complete));
    }

    #[test]
    fn tool_call_fields_concatenate() {
        let mut agg = ChunkAggregator::new();
        agg.add_fragment(Fragment::ToolCall {
            call_id: "c".into(),
            tool_name: "ad".into(),
            arguments: "{\"x\":".into(),
        });
        agg.add_fragment(Fragment::ToolCall {
            call_id: "1".into(),
            tool_name: "d".into(),
            arguments: "1}".into(),
        });
        assert_eq!(
            agg.parts()[0].kind,
            PartKind::ToolCall {
                call_id: "c1".into(),
                tool_name: "add".into(),
                arguments: "{\"x\":1}".into(),
            }
        );
    }

    #[test]
    fn complete_is_idempotent() {
        let mut agg = ChunkAggregator::new();
        let mut rx = agg.subscribe_events();
        agg.add_fragment(text("a"));
        agg.complete();
        agg.complete();
        let completed = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, PartEvent::Completed { .. }))
            .count();
        assert_eq!(completed, 1);

        // A new fragment after completion starts a fresh Part.
        agg.add_fragment(text("b"));
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn reset_clears_and_notifies() {
        let mut agg = ChunkAggregator::new();
        let mut rx = agg.subscribe_events();
        let parts_rx = agg.subscribe_parts();
        agg.add_fragment(text("a"));
        agg.reset();
        assert!(agg.is_empty());
        assert!(parts_rx.borrow().is_empty());
        assert_eq!(drain(&mut rx).last(), Some(&PartEvent::Reset));
    }

    #[test]
    fn watch_feed_tracks_latest_snapshot() {
        let mut agg = ChunkAggregator::new();
        let mut parts_rx = agg.subscribe_parts();
        agg.add_fragment(text("Hel"));
        agg.add_fragment(text("lo"));
        assert!(parts_rx.has_changed().unwrap());
        let snapshot = parts_rx.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind, PartKind::Text { text: "Hello".into() });
    }

    #[test]
    fn materialization_is_idempotent_and_ordered() {
        let mut agg = ChunkAggregator::new();
        let call = ToolCall::new("c1", "add", r#"{"x":1}"#);
        agg.set_group(0);
        agg.add_fragment(text("Let me add."));
        agg.add_fragment(Fragment::tool_call(&call));
        agg.add_fragment(Fragment::ToolResult(ToolResult::success(
            &call,
            json!({"x": 1}),
            json!(3),
        )));
        agg.set_group(1);
        agg.add_fragment(text("The answer is 3."));
        agg.complete();

        let first = agg.to_messages();
        assert_eq!(first, agg.to_messages());
        let roles: Vec<Role> = first.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::Assistant, Role::Assistant, Role::Tool, Role::Assistant]
        );
        match &first[2].content {
            MessageContent::Parts(parts) => assert_eq!(
                parts[0],
                ContentPart::ToolResult {
                    tool_use_id: "c1".into(),
                    content: "3".into(),
                    is_error: false,
                }
            ),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(agg.messages_for_group(0).len(), 3);
        assert_eq!(agg.messages_for_group(1), vec![Message::assistant("The answer is 3.")]);
    }

    #[test]
    fn empty_text_parts_are_not_materialized() {
        let mut agg = ChunkAggregator::new();
        agg.add_fragment(text(""));
        agg.complete();
        assert_eq!(agg.len(), 1);
        assert!(agg.to_messages().is_empty());
    }
}
