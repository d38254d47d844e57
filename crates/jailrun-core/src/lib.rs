//! Sandboxed one-shot execution of untrusted Python scripts.
//!
//! This crate turns caller-supplied source text into a single classified
//! outcome. Every request gets its own scratch directory and its own child
//! process tree; nothing is shared between requests apart from the immutable
//! configuration and the cached interpreter path.
//!
//! # Architecture Overview
//!
//! - **Script materialization**: request-scoped scratch storage holding the
//!   user script and the rendered harness ([`script`])
//! - **Sandbox invocation**: nsjail or local process runner with a wall-clock
//!   bound that kills the whole process group on expiry ([`sandbox`])
//! - **Execution harness**: the Python adapter that runs inside the sandbox and
//!   emits one completion line ([`harness`])
//! - **Result extraction**: the tagged line scanner that separates program
//!   output from the completion signal and classifies failures ([`extractor`])
//! - **Orchestration**: [`executor::PythonExecutor`] ties the stages together

pub mod config;
pub mod core_types;
pub mod errors;
pub mod executor;
pub mod extractor;
pub mod harness;
pub mod sandbox;
pub mod script;

pub use config::*;
pub use core_types::{ErrorType, ExecutionOutcome, ExecutionRequest, HarnessFailureKind, OutcomeError};
pub use errors::{JailError, SandboxError};
pub use executor::{CodeExecutor, PythonExecutor};
pub use harness::SignalProtocol;
pub use sandbox::{LocalSandbox, NsjailSandbox, Sandbox, SandboxCommand, SandboxOutput};
