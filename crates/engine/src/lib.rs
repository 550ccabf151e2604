//! Streaming conversation engine.
//!
//! - [`aggregator`] folds streamed fragments into observable Parts.
//! - [`assembler`] rebuilds tool calls from indexed argument deltas.
//! - [`transcript`] keeps the bounded history sent back to the model.
//! - [`orchestrator`] runs the multi-round generate/execute loop.

pub mod aggregator;
pub mod assembler;
pub mod deadline;
pub mod orchestrator;
pub mod transcript;

pub use aggregator::{ChunkAggregator, Fragment, FragmentTag, Part, PartEvent, PartKind};
pub use assembler::{JsonScanner, ScanState, ToolCallAssembler};
pub use deadline::{with_deadline, Deadlines};
pub use orchestrator::{
    ConversationOrchestrator, RoundState, RunHooks, RunOptions, RunOutput, RunPhase, StopReason,
};
pub use transcript::Transcript;
