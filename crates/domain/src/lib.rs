//! `tw-domain`: shared types for every Threadweave crate.
//!
//! Messages, tool descriptors, stream events, configuration, the shared
//! error type, and structured trace events live here so that providers,
//! tools, memory, and the engine agree on one vocabulary.

pub mod config;
pub mod error;
pub mod stream;
pub mod tool;
pub mod trace;
