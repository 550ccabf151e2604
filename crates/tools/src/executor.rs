//! Tool execution wrapper.
//!
//! [`ToolExecutor::execute`] never fails: every outcome, including unknown
//! tools, malformed arguments and handler panics, becomes a [`ToolResult`]
//! that is fed back to the model.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::Instrument;
use tw_domain::error::Error;
use tw_domain::tool::{ToolCall, ToolResult};
use tw_domain::trace::TraceEvent;

use crate::registry::ToolRegistry;

#[derive(Debug, Clone, Copy, Default)]
pub struct ToolExecutor;

impl ToolExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute one assembled call against `registry`.
    pub async fn execute(&self, call: &ToolCall, registry: &ToolRegistry) -> ToolResult {
        let span = tracing::info_span!(
            "tool.call",
            call_id = %call.call_id,
            tool = %call.tool_name,
        );
        let start = Instant::now();
        let result = run_call(call, registry).instrument(span).await;

        TraceEvent::ToolExecuted {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            is_error: result.is_error(),
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();
        result
    }
}

async fn run_call(call: &ToolCall, registry: &ToolRegistry) -> ToolResult {
    let Some(tool) = registry.get(&call.tool_name) else {
        tracing::warn!(tool = %call.tool_name, "model requested an unregistered tool");
        return ToolResult::error(
            call,
            call.arguments_value(),
            format!("tool not found: {}", call.tool_name),
        );
    };

    let args = match call.parse_arguments() {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(error = %e, "tool arguments are not valid JSON");
            return ToolResult::error(
                call,
                Value::Null,
                format!("invalid arguments for {}: {e}", call.tool_name),
            );
        }
    };

    match AssertUnwindSafe(tool.handler.call(args.clone()))
        .catch_unwind()
        .await
    {
        Ok(Ok(value)) => ToolResult::success(call, args, value),
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "tool handler returned an error");
            let message = match e {
                Error::Tool { message, .. } => message,
                other => other.to_string(),
            };
            ToolResult::error(call, args, message)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "tool handler panicked");
            ToolResult::error(call, args, format!("tool panicked: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
