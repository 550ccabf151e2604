//! Tool-call assembly from index-keyed streaming deltas.
//!
//! Backends stream a tool call as many small pieces: the id, the name and
//! the JSON argument text each arrive split across chunks, and calls at
//! different stream indexes may interleave. [`ToolCallAssembler`] keeps one
//! accumulator per index and hands out a [`ToolCall`] as soon as that call
//! has an id, a name and a closed argument document.

use std::collections::BTreeMap;

use tw_domain::stream::ToolCallDelta;
use tw_domain::tool::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Incremental JSON scanner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// The document is still open.
    NeedsMore,
    /// The top-level object or array just closed.
    Complete,
    /// Mismatched brackets or trailing content after the document closed.
    Invalid,
}

/// Tracks bracket nesting of a JSON document fed in pieces.
///
/// Brackets and quotes inside string literals (including escaped quotes)
/// are ignored. Only container documents (`{...}` or `[...]`) are tracked;
/// a scalar top-level value leaves the scanner in `NeedsMore`, so the caller
/// has to decide on it with a real parse.
#[derive(Debug, Clone)]
pub struct JsonScanner {
    stack: Vec<u8>,
    in_string: bool,
    escaped: bool,
    started: bool,
    scalar: bool,
    state: ScanState,
}

impl Default for JsonScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonScanner {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            in_string: false,
            escaped: false,
            started: false,
            scalar: false,
            state: ScanState::NeedsMore,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// True when the document did not start with `{` or `[`.
    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    pub fn feed(&mut self, chunk: &str) -> ScanState {
        for b in chunk.bytes() {
            if self.state == ScanState::Invalid || self.scalar {
                break;
            }
            self.step(b);
        }
        self.state
    }

    fn step(&mut self, b: u8) {
        if self.state == ScanState::Complete {
            if !b.is_ascii_whitespace() {
                self.state = ScanState::Invalid;
            }
            return;
        }

        if !self.started {
            match b {
                b if b.is_ascii_whitespace() => {}
                b'{' | b'[' => {
                    self.started = true;
                    self.stack.push(b);
                }
                _ => {
                    self.started = true;
                    self.scalar = true;
                }
            }
            return;
        }

        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if b == b'\\' {
                self.escaped = true;
            } else if b == b'"' {
                self.in_string = false;
            }
            return;
        }

        match b {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.stack.push(b),
            b'}' | b']' => {
                let opener = if b == b'}' { b'{' } else { b'[' };
                if self.stack.pop() != Some(opener) {
                    self.state = ScanState::Invalid;
                } else if self.stack.is_empty() {
                    self.state = ScanState::Complete;
                }
            }
            _ => {}
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCallAssembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    scanner: JsonScanner,
}

impl PendingCall {
    fn arguments_closed(&self) -> bool {
        match self.scanner.state() {
            ScanState::Complete | ScanState::Invalid => true,
            // An open container can never parse; only scalars need the check.
            // A bare scalar closes at its first parseable prefix, so "1" then
            // "2" yields 1. Function arguments are always objects in practice.
            ScanState::NeedsMore => {
                self.scanner.is_scalar()
                    && serde_json::from_str::<serde_json::Value>(&self.arguments).is_ok()
            }
        }
    }

    fn is_ready(&self) -> bool {
        !self.id.is_empty() && !self.name.is_empty() && self.arguments_closed()
    }

    fn into_call(self) -> ToolCall {
        ToolCall {
            call_id: self.id,
            tool_name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Reassembles tool calls from deltas keyed by stream index.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    pending: BTreeMap<usize, PendingCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta into the accumulator for `index`. Returns the call
    /// once it is complete; the index is then free for a new call.
    pub fn process_delta(&mut self, index: usize, delta: &ToolCallDelta) -> Option<ToolCall> {
        let entry = self.pending.entry(index).or_default();
        entry.id.push_str(&delta.id);
        entry.name.push_str(&delta.name);
        if !delta.arguments.is_empty() {
            entry.arguments.push_str(&delta.arguments);
            entry.scanner.feed(&delta.arguments);
        }

        if !entry.is_ready() {
            return None;
        }
        let malformed = entry.scanner.state() == ScanState::Invalid;
        let call = self.pending.remove(&index)?.into_call();
        if malformed {
            tracing::debug!(
                call_id = %call.call_id,
                tool = %call.tool_name,
                "tool arguments closed malformed"
            );
        }
        Some(call)
    }

    /// Drain calls that never closed, in index order. Used when the stream
    /// ends; accumulators without an id or name are dropped.
    pub fn flush(&mut self) -> Vec<ToolCall> {
        let pending = std::mem::take(&mut self.pending);
        let mut calls = Vec::with_capacity(pending.len());
        for (index, mut p) in pending {
            if p.id.is_empty() || p.name.is_empty() {
                tracing::warn!(
                    index,
                    id = %p.id,
                    name = %p.name,
                    "dropping incomplete tool call at end of stream"
                );
                continue;
            }
            if p.arguments.trim().is_empty() {
                p.arguments = "{}".into();
            }
            calls.push(p.into_call());
        }
        calls
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Number of calls still being assembled.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
