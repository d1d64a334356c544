use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::types::{
    Assistant, FileBatch, FileObject, Message, MessageList, Run, Thread, ToolOutput, VectorStore,
};
use super::AssistantApi;
use crate::error::{Error, Result};

const ASSISTANTS_BETA: &str = "assistants=v2";

/// Client for the hosted assistant service (files, vector stores,
/// assistants, threads and runs).
pub struct OpenAIClient {
    api_key: String,
    base_url: String,
    client: Client,
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl OpenAIClient {
    pub fn with_base_url(api_key: String, base_url: &str) -> Self {
        Self::from_parts(api_key, base_url, Client::new())
    }

    /// Same as [`OpenAIClient::with_base_url`] with a per-request timeout.
    pub fn with_timeout(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::from_parts(api_key, base_url, client))
    }

    fn from_parts(api_key: String, base_url: &str, client: Client) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", ASSISTANTS_BETA)
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(Error::Api { status, body });
        }
        Ok(response.json::<T>().await?)
    }

    async fn post_request<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let builder = self.authorized(self.client.post(self.url(path))).json(&body);
        Self::send(builder).await
    }

    async fn get_request<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let builder = self.authorized(self.client.get(self.url(path)));
        Self::send(builder).await
    }

    pub async fn upload_document(&self, file_path: &Path) -> Result<String> {
        let file_name = file_path
            .file_name()
            .ok_or_else(|| Error::InvalidPath(file_path.display().to_string()))?
            .to_string_lossy()
            .to_string();

        let file_content = tokio::fs::read(file_path).await?;

        let form = multipart::Form::new().text("purpose", "assistants").part(
            "file",
            multipart::Part::bytes(file_content)
                .file_name(file_name)
                .mime_str("application/octet-stream")?,
        );

        let builder = self
            .client
            .post(self.url("files"))
            .bearer_auth(&self.api_key)
            .multipart(form);
        let file: FileObject = Self::send(builder).await?;

        debug!(name: "openai.file.uploaded", file_id = %file.id, "File uploaded");
        Ok(file.id)
    }

    pub async fn create_vector_store(&self, name: &str) -> Result<VectorStore> {
        self.post_request("vector_stores", json!({ "name": name }))
            .await
    }

    pub async fn create_file_batch(
        &self,
        vector_store_id: &str,
        file_ids: &[String],
    ) -> Result<FileBatch> {
        self.post_request(
            &format!("vector_stores/{vector_store_id}/file_batches"),
            json!({ "file_ids": file_ids }),
        )
        .await
    }

    pub async fn retrieve_file_batch(
        &self,
        vector_store_id: &str,
        batch_id: &str,
    ) -> Result<FileBatch> {
        self.get_request(&format!(
            "vector_stores/{vector_store_id}/file_batches/{batch_id}"
        ))
        .await
    }

    /// Create an assistant from a full request body (name, instructions,
    /// model, tools).
    pub async fn create_assistant(&self, body: Value) -> Result<Assistant> {
        self.post_request("assistants", body).await
    }

    /// Point the assistant's `file_search` tool at the given vector stores.
    pub async fn link_vector_stores(
        &self,
        assistant_id: &str,
        vector_store_ids: &[String],
    ) -> Result<Assistant> {
        self.post_request(
            &format!("assistants/{assistant_id}"),
            json!({
                "tool_resources": {
                    "file_search": { "vector_store_ids": vector_store_ids }
                }
            }),
        )
        .await
    }
}

#[async_trait]
impl AssistantApi for OpenAIClient {
    async fn create_thread(&self) -> Result<Thread> {
        self.post_request("threads", json!({})).await
    }

    async fn create_message(&self, thread_id: &str, content: &str) -> Result<Message> {
        self.post_request(
            &format!("threads/{thread_id}/messages"),
            json!({ "role": "user", "content": content }),
        )
        .await
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        self.post_request(
            &format!("threads/{thread_id}/runs"),
            json!({ "assistant_id": assistant_id }),
        )
        .await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.get_request(&format!("threads/{thread_id}/runs/{run_id}"))
            .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run> {
        self.post_request(
            &format!("threads/{thread_id}/runs/{run_id}/submit_tool_outputs"),
            json!({ "tool_outputs": outputs }),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.post_request(&format!("threads/{thread_id}/runs/{run_id}/cancel"), json!({}))
            .await
    }

    async fn latest_message(&self, thread_id: &str) -> Result<Option<Message>> {
        let list: MessageList = self
            .get_request(&format!("threads/{thread_id}/messages?order=desc&limit=1"))
            .await?;
        Ok(list.data.into_iter().next())
    }
}
