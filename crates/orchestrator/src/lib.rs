//! `ag-orchestrator` — streaming tool orchestration.
//!
//! A turn flows through: model call (streamed when supported) → plan
//! assembly with de-duplication → per-step execution with payload
//! persistence, bounded retry, binary redaction, and overflow wrapping →
//! turn finalization → chain continuations.

pub mod chains;
pub mod executor;
pub mod orchestrator;
pub mod overflow;
pub mod planner;
pub mod redact;
pub mod scheduler;
pub mod template;
pub mod traces;

pub use chains::ChainEvaluator;
pub use executor::{Executor, StepResult, DEFAULT_RETRY_BUDGET, DEFAULT_TOOL_TIMEOUT};
pub use orchestrator::{AgentFinder, Orchestrator, TurnInput, TurnOutcome, TurnRunner};
pub use scheduler::StepScheduler;
pub use traces::{TraceKind, TraceRecord, TraceStore};
