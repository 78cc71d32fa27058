//! Side-effecting helpers: state documents, event log, config file, prompts,
//! and the blocking rate-limit wait.

pub mod atomic;
pub mod config;
pub mod event_log;
pub mod paths;
pub mod prompt;
pub mod rate_wait;
pub mod state_store;
