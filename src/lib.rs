//! filegate: streaming LLM chat sessions with human-approved file writes.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod chat;
pub mod config;
pub mod gateway;
pub mod llm;
pub mod logs;
pub mod metrics;
pub mod tools;
