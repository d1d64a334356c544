use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub mod backend;
pub mod client;
pub mod types;

pub use backend::{BackendClient, KpiQuery};
pub use client::OpenAIClient;
pub use types::{Message, Run, RunStatus, Thread, ToolCall, ToolOutput};

/// Thread and run operations the conversation driver needs from the
/// assistant service.
#[async_trait]
pub trait AssistantApi: Send + Sync {
    async fn create_thread(&self) -> Result<Thread>;

    async fn create_message(&self, thread_id: &str, content: &str) -> Result<Message>;

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run>;

    /// Stop a run so the thread accepts new messages.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    /// Most recent message on the thread.
    async fn latest_message(&self, thread_id: &str) -> Result<Option<Message>>;
}

/// Source of KPI values answered back to tool calls.
#[async_trait]
pub trait KpiBackend: Send + Sync {
    async fn compute_kpi(&self, query: &KpiQuery) -> Result<Value>;
}
