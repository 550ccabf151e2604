//! Tool registry.
//!
//! An explicit, passed-in catalogue of callable tools. Registration happens
//! before conversations start; afterwards the registry is read concurrently
//! by every in-flight call.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tw_domain::error::Result;
use tw_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The callable side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-parsed JSON arguments.
    async fn call(&self, args: Value) -> Result<Value>;

    /// When true, a round that invoked this tool ends the conversation
    /// instead of asking the model to continue.
    fn stops_conversation(&self) -> bool {
        false
    }
}

/// Adapter so plain async closures can be registered as tools.
pub struct FnHandler<F>(F);

impl<F, Fut> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value>> + Send,
{
    async fn call(&self, args: Value) -> Result<Value> {
        (self.0)(args).await
    }
}

/// A registered tool: its model-facing definition plus its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn new(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            definition,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered set of tools, unique by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<Arc<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name is replaced in place.
    pub fn register(&self, tool: RegisteredTool) {
        let mut tools = self.tools.write();
        let tool = Arc::new(tool);
        match tools.iter().position(|t| t.name() == tool.name()) {
            Some(i) => {
                tracing::debug!(tool = %tool.name(), "replacing registered tool");
                tools[i] = tool;
            }
            None => tools.push(tool),
        }
    }

    /// Convenience: register a definition with its handler.
    pub fn register_handler(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        self.register(RegisteredTool::new(definition, handler));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.read().iter().find(|t| t.name() == name).cloned()
    }

    /// All tools in registration order.
    pub fn list(&self) -> Vec<Arc<RegisteredTool>> {
        self.tools.read().clone()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .iter()
            .map(|t| t.definition.clone())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .iter()
            .map(|t| t.name().to_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Build a call-scoped registry from two sources. When both define a
    /// name, the entry from `first` is kept and the later one dropped.
    pub fn merged(first: &ToolRegistry, second: &ToolRegistry) -> ToolRegistry {
        let mut tools: Vec<Arc<RegisteredTool>> = Vec::new();
        for tool in first.list().into_iter().chain(second.list()) {
            if tools.iter().any(|t| t.name() == tool.name()) {
                tracing::debug!(tool = %tool.name(), "duplicate tool name dropped");
                continue;
            }
            tools.push(tool);
        }
        ToolRegistry {
            tools: RwLock::new(tools),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
