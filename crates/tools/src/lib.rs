//! Tool registry, execution wrapper and built-in tools for Threadweave.
//!
//! - [`ToolRegistry`]: explicit, shareable catalogue of [`RegisteredTool`]s
//! - [`ToolExecutor`]: runs one assembled call and always yields a `ToolResult`
//! - [`builtin`]: `memory_search`, `memory_create`, `goals_list`

pub mod builtin;
pub mod executor;
pub mod registry;

pub use builtin::{builtin_registry, register_builtin_tools};
pub use executor::ToolExecutor;
pub use registry::{FnHandler, RegisteredTool, ToolHandler, ToolRegistry};
