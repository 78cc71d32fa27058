//! Control core for a multi-agent coding orchestrator.
//!
//! The crate decides, it does not execute: which agents may spawn, whether an
//! agent's loop should continue, when a rate-limited upstream may be retried,
//! and in which waves a composition of sub-skills can run. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (loop analysis, rate-limit state
//!   machine, composition validation and planning, permission checks).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (state documents, event log, config
//!   file, prompt rendering, blocking waits).
//!
//! Orchestration modules ([`looping`], [`parallel`]) combine core logic with
//! I/O. All state lives in one [`io::state_store::StateManager`] per project
//! root; it assumes a single writer process.

pub mod core;
pub mod error;
pub mod io;
pub mod logging;
pub mod looping;
pub mod parallel;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use error::OrchestratorError;
