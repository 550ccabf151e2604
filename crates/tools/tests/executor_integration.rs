use std::sync::Arc;

use serde_json::{json, Value};
use tw_domain::tool::{ToolCall, ToolOutcome};
use tw_memory::{Collaborators, LocalGoalStore, LocalMemoryStore};
use tw_tools::{builtin_registry, FnHandler, ToolExecutor, ToolRegistry};

fn collab() -> Collaborators {
    Collaborators {
        memory: Arc::new(LocalMemoryStore::new()),
        goals: Arc::new(LocalGoalStore::new()),
    }
}

#[tokio::test]
async fn unknown_tool_does_not_raise() {
    let registry = builtin_registry(&collab());
    let call = ToolCall::new("c1", "nonexistent", "{}");

    let result = ToolExecutor::new().execute(&call, &registry).await;

    assert!(result.is_error());
    assert_eq!(result.content(), "Error: tool not found: nonexistent");
    assert_eq!(result.call_id, "c1");
}

#[tokio::test]
async fn caller_tool_shadows_builtin_in_merged_registry() {
    let caller = ToolRegistry::new();
    caller.register_handler(
        tw_domain::tool::ToolDefinition {
            name: "memory_search".into(),
            description: "caller override".into(),
            parameters: json!({"type": "object"}),
        },
        Arc::new(FnHandler::new(|_args: Value| async move { Ok(json!("from caller")) })),
    );
    let merged = ToolRegistry::merged(&caller, &builtin_registry(&collab()));
    assert_eq!(merged.len(), 3);

    let result = ToolExecutor::new()
        .execute(
            &ToolCall::new("c2", "memory_search", r#"{"query":"x"}"#),
            &merged,
        )
        .await;
    assert_eq!(result.outcome, ToolOutcome::Success(json!("from caller")));
}

#[tokio::test]
async fn concurrent_executions_share_registry() {
    let registry = Arc::new(builtin_registry(&collab()));
    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let call = ToolCall::new(
                format!("c{i}"),
                "memory_create",
                format!(r#"{{"content":"note {i}"}}"#),
            );
            ToolExecutor::new().execute(&call, &registry).await
        }));
    }
    for handle in handles {
        assert!(!handle.await.unwrap().is_error());
    }
}
