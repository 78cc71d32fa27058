//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests. Time
//! enters only through an injected [`rate_limit::Clock`].

pub mod composition;
pub mod config;
pub mod fingerprint;
pub mod loop_manager;
pub mod patterns;
pub mod permissions;
pub mod planner;
pub mod rate_limit;
pub mod types;
