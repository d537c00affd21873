//! Reassembles tool calls whose arguments arrive fragmented across a stream.
//!
//! Fragments are keyed by call id. A fragment with an empty id belongs to the
//! most recently seen id. A call is complete once its argument buffer parses
//! as JSON; completion is never revoked.
//!
//! A finish signal (`finish_reason = "tool_calls"`) can arrive before the last
//! argument bytes. Callers must check [`ToolCallAccumulator::has_pending_tool_calls`]
//! and keep reading, then call [`ToolCallAccumulator::finalize_stream`] once the
//! reader ends.

use crate::arguments::is_valid_json;
use anyllm_client::{ToolCall, ToolCallFragment};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct StreamingToolCall {
    id: String,
    kind: String,
    function_name: String,
    arguments: String,
    complete: bool,
    last_update: DateTime<Utc>,
    /// Arrival order of the first fragment.
    seq: u64,
}

impl StreamingToolCall {
    fn to_tool_call(&self) -> ToolCall {
        let mut call = ToolCall::new(&self.id, &self.function_name, &self.arguments);
        if !self.kind.is_empty() {
            call.kind = self.kind.clone();
        }
        call
    }
}

#[derive(Debug, Default)]
struct State {
    calls: HashMap<String, StreamingToolCall>,
    last_id: Option<String>,
    next_seq: u64,
}

impl State {
    fn completed(&self) -> Vec<ToolCall> {
        self.sorted(|c| c.complete)
            .into_iter()
            .map(StreamingToolCall::to_tool_call)
            .collect()
    }

    fn sorted(&self, keep: impl Fn(&StreamingToolCall) -> bool) -> Vec<&StreamingToolCall> {
        let mut calls: Vec<_> = self.calls.values().filter(|c| keep(c)).collect();
        calls.sort_by_key(|c| c.seq);
        calls
    }
}

/// Diagnostic snapshot of one pending call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToolCallInfo {
    pub function_name: String,
    pub kind: String,
    pub arguments_len: usize,
    pub arguments: String,
    pub is_valid_json: bool,
    pub last_update: DateTime<Utc>,
}

impl fmt::Display for PendingToolCallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Function: {} | Type: {} | Args Length: {} | Last Update: {} | Args Content: {} | Is Valid JSON: {}",
            self.function_name,
            self.kind,
            self.arguments_len,
            self.last_update.format("%H:%M:%S%.3f"),
            self.arguments,
            self.is_valid_json
        )
    }
}

/// Per-stream tool-call state. Share it across tasks behind an `Arc`.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    state: RwLock<State>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a batch of fragments under one write lock.
    pub fn process_delta(&self, fragments: &[ToolCallFragment]) {
        let mut state = self.write();
        let now = Utc::now();
        for frag in fragments {
            let id = if frag.id.is_empty() {
                match &state.last_id {
                    Some(id) => id.clone(),
                    None => {
                        tracing::warn!(
                            arguments_len = frag.function.arguments.len(),
                            "dropping id-less tool call fragment before any id was seen"
                        );
                        continue;
                    }
                }
            } else {
                state.last_id = Some(frag.id.clone());
                frag.id.clone()
            };

            let seq = state.next_seq;
            let call = state.calls.entry(id.clone()).or_insert_with(|| {
                tracing::debug!(tool_call_id = %id, function = %frag.function.name, "tool call started");
                StreamingToolCall {
                    id,
                    kind: String::new(),
                    function_name: String::new(),
                    arguments: String::new(),
                    complete: false,
                    last_update: now,
                    seq,
                }
            });
            let created = call.seq == seq;

            if !frag.kind.is_empty() {
                call.kind = frag.kind.clone();
            }
            if !frag.function.name.is_empty() {
                call.function_name = frag.function.name.clone();
            }
            call.arguments.push_str(&frag.function.arguments);
            call.last_update = now;
            if !call.complete && is_valid_json(&call.arguments) {
                call.complete = true;
                tracing::debug!(tool_call_id = %call.id, function = %call.function_name, "tool call complete");
            }

            if created {
                state.next_seq += 1;
            }
        }
    }

    /// Completed calls in arrival order.
    pub fn completed_tool_calls(&self) -> Vec<ToolCall> {
        self.read().completed()
    }

    /// id -> buffered argument text for every incomplete call.
    pub fn pending_tool_calls(&self) -> HashMap<String, String> {
        self.read()
            .calls
            .values()
            .filter(|c| !c.complete)
            .map(|c| (c.id.clone(), c.arguments.clone()))
            .collect()
    }

    pub fn pending_tool_calls_debug_info(&self) -> HashMap<String, PendingToolCallInfo> {
        self.read()
            .calls
            .values()
            .filter(|c| !c.complete)
            .map(|c| {
                let info = PendingToolCallInfo {
                    function_name: c.function_name.clone(),
                    kind: c.kind.clone(),
                    arguments_len: c.arguments.len(),
                    arguments: c.arguments.clone(),
                    is_valid_json: is_valid_json(&c.arguments),
                    last_update: c.last_update,
                };
                (c.id.clone(), info)
            })
            .collect()
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        self.read().calls.values().any(|c| !c.complete)
    }

    pub fn pending_count(&self) -> usize {
        self.read().calls.values().filter(|c| !c.complete).count()
    }

    pub fn completed_count(&self) -> usize {
        self.read().calls.values().filter(|c| c.complete).count()
    }

    pub fn total_count(&self) -> usize {
        self.read().calls.len()
    }

    /// Removes completed calls. Pending ones and the last-seen id are kept.
    ///
    /// A later id-less fragment still routes to the last-seen id, so even an
    /// empty trailing fragment re-creates a cleared call as an empty pending
    /// record and [`has_pending_tool_calls`](Self::has_pending_tool_calls)
    /// reports it. Clear only once the stream has ended, or use a fresh
    /// accumulator per stream.
    pub fn clear_completed(&self) {
        self.write().calls.retain(|_, c| !c.complete);
    }

    /// Completed calls, removed in the same critical section.
    pub fn drain_completed(&self) -> Vec<ToolCall> {
        let mut state = self.write();
        let drained = state.completed();
        state.calls.retain(|_, c| !c.complete);
        drained
    }

    /// End-of-stream pass: promotes pending buffers that now parse and returns
    /// every completed call. Buffers that still do not parse stay pending.
    pub fn finalize_stream(&self) -> Vec<ToolCall> {
        let mut state = self.write();
        for call in state.calls.values_mut().filter(|c| !c.complete) {
            if is_valid_json(&call.arguments) {
                call.complete = true;
            } else {
                tracing::warn!(
                    tool_call_id = %call.id,
                    function = %call.function_name,
                    arguments_len = call.arguments.len(),
                    "tool call still incomplete at end of stream"
                );
            }
        }
        state.completed()
    }

    /// Marks `id` complete whatever its buffer holds. The returned call's
    /// arguments may not be valid JSON.
    pub fn force_complete_tool_call(&self, id: &str) -> Option<ToolCall> {
        let mut state = self.write();
        let call = state.calls.get_mut(id)?;
        call.complete = true;
        call.last_update = Utc::now();
        tracing::warn!(tool_call_id = %id, valid = is_valid_json(&call.arguments), "tool call force-completed");
        Some(call.to_tool_call())
    }

    /// Ids of pending calls with no fragment for longer than `older_than`.
    pub fn stale_tool_calls(&self, older_than: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - older_than;
        self.read()
            .sorted(|c| !c.complete && c.last_update < cutoff)
            .into_iter()
            .map(|c| c.id.clone())
            .collect()
    }
}
