//! Relay between a hosted assistant (Assistants v2) and a KPI backend.
//!
//! A knowledge file is pushed into a vector store, an assistant is
//! registered with a `compute_kpi_by_machine_id` tool, and
//! [`conversation::Conversation`] polls runs and answers their tool calls
//! from the backend.

pub mod assistant;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod tools;

pub use client::{BackendClient, OpenAIClient};
pub use conversation::{Conversation, RunOutcome};
pub use error::{Error, Result};
