//! Drives a thread through runs, answering tool calls until each run ends.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::client::{AssistantApi, KpiBackend, RunStatus, ToolOutput};
use crate::config::PollSettings;
use crate::error::{Error, Result};
use crate::tools::answer_tool_call;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed {
        reply: String,
    },
    /// The run ended without a reply. `last_message` is whatever the thread
    /// currently ends with, usually the user's own question.
    Failed {
        status: RunStatus,
        last_message: Option<String>,
        error: Option<String>,
    },
    TimedOut {
        run_id: String,
        waited: Duration,
    },
}

/// One thread on the assistant service, with the backend used to answer
/// its tool calls.
pub struct Conversation<'a, A: ?Sized, B: ?Sized> {
    api: &'a A,
    backend: &'a B,
    assistant_id: String,
    thread_id: String,
    poll: PollSettings,
}

impl<'a, A, B> Conversation<'a, A, B>
where
    A: AssistantApi + ?Sized,
    B: KpiBackend + ?Sized,
{
    /// Create a new thread for `assistant_id`.
    pub async fn start(
        api: &'a A,
        backend: &'a B,
        assistant_id: &str,
        poll: PollSettings,
    ) -> Result<Self> {
        let thread = api.create_thread().await?;
        info!(name: "conversation.started", thread_id = %thread.id, "Thread created");
        Ok(Self {
            api,
            backend,
            assistant_id: assistant_id.to_string(),
            thread_id: thread.id,
            poll,
        })
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Post `query` and run the assistant on the thread until the run ends.
    pub async fn ask(&self, query: &str) -> Result<RunOutcome> {
        self.api.create_message(&self.thread_id, query).await?;
        let run = self
            .api
            .create_run(&self.thread_id, &self.assistant_id)
            .await?;
        let run_id = run.id;

        let started = Instant::now();
        let mut submitted: HashSet<String> = HashSet::new();

        loop {
            let run = self.api.retrieve_run(&self.thread_id, &run_id).await?;
            debug!(name: "run.status", run_id = %run_id, status = %run.status);

            match run.status {
                RunStatus::Completed => {
                    let reply = self
                        .latest_text()
                        .await?
                        .ok_or_else(|| Error::NoReply {
                            thread_id: self.thread_id.clone(),
                        })?;
                    return Ok(RunOutcome::Completed { reply });
                }
                status if status.is_terminal() => {
                    let code = run.last_error.as_ref().and_then(|e| e.code.as_deref());
                    warn!(name: "run.ended", run_id = %run_id, %status, ?code, "Run did not complete");
                    let last_message = self.latest_text().await.ok().flatten();
                    return Ok(RunOutcome::Failed {
                        status,
                        last_message,
                        error: run.last_error.map(|e| e.message),
                    });
                }
                RunStatus::RequiresAction => {
                    let mut outputs: Vec<ToolOutput> = Vec::new();
                    for call in run.pending_tool_calls() {
                        if submitted.contains(&call.id) {
                            debug!(name: "run.tool_call.duplicate", call_id = %call.id);
                            continue;
                        }
                        outputs.push(answer_tool_call(self.backend, call).await?);
                    }

                    if !outputs.is_empty() {
                        debug!(
                            name: "run.submit",
                            run_id = %run_id,
                            count = outputs.len(),
                            "Submitting tool outputs"
                        );
                        submitted.extend(outputs.iter().map(|o| o.tool_call_id.clone()));
                        self.api
                            .submit_tool_outputs(&self.thread_id, &run_id, outputs)
                            .await?;
                    }
                }
                _ => {}
            }

            let waited = started.elapsed();
            if waited >= self.poll.max_wait {
                warn!(name: "run.timeout", run_id = %run_id, ?waited, "Gave up waiting for run");
                // An active run blocks new messages on the thread.
                if let Err(error) = self.api.cancel_run(&self.thread_id, &run_id).await {
                    warn!(name: "run.cancel_failed", run_id = %run_id, %error, "Could not cancel run");
                }
                return Ok(RunOutcome::TimedOut { run_id, waited });
            }
            sleep(self.poll.interval).await;
        }
    }

    async fn latest_text(&self) -> Result<Option<String>> {
        let message = self.api.latest_message(&self.thread_id).await?;
        if let Some(message) = &message {
            debug!(name: "thread.latest_message", thread_id = %self.thread_id, role = %message.role);
        }
        Ok(message.and_then(|m| m.text().map(ToString::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::{FunctionCall, Message, Run, Thread, ToolCall};
    use crate::client::KpiQuery;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Assistant service replaying a fixed sequence of runs.
    struct ScriptedApi {
        runs: Mutex<VecDeque<Run>>,
        submissions: Mutex<Vec<Vec<ToolOutput>>>,
        messages: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn new(runs: Vec<Run>) -> Self {
            Self {
                runs: Mutex::new(runs.into()),
                submissions: Mutex::new(Vec::new()),
                messages: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            }
        }

        fn submissions(&self) -> Vec<Vec<ToolOutput>> {
            self.submissions.lock().unwrap().clone()
        }
    }

    fn text_message(text: &str) -> Message {
        serde_json::from_value(json!({
            "id": "msg",
            "role": "assistant",
            "content": [{"type": "text", "text": {"value": text, "annotations": []}}]
        }))
        .unwrap()
    }

    #[async_trait]
    impl AssistantApi for ScriptedApi {
        async fn create_thread(&self) -> Result<Thread> {
            Ok(Thread {
                id: "thread_1".to_string(),
            })
        }

        async fn create_message(&self, _thread_id: &str, content: &str) -> Result<Message> {
            self.messages.lock().unwrap().push(content.to_string());
            Ok(text_message(content))
        }

        async fn create_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<Run> {
            Ok(run("queued", None))
        }

        async fn retrieve_run(&self, _thread_id: &str, _run_id: &str) -> Result<Run> {
            let mut runs = self.runs.lock().unwrap();
            // The last scripted state repeats forever.
            if runs.len() > 1 {
                Ok(runs.pop_front().unwrap())
            } else {
                Ok(runs.front().cloned().unwrap())
            }
        }

        async fn submit_tool_outputs(
            &self,
            _thread_id: &str,
            _run_id: &str,
            outputs: Vec<ToolOutput>,
        ) -> Result<Run> {
            self.submissions.lock().unwrap().push(outputs);
            Ok(run("queued", None))
        }

        async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
            self.cancelled.lock().unwrap().push(run_id.to_string());
            Ok(run("cancelling", None))
        }

        async fn latest_message(&self, _thread_id: &str) -> Result<Option<Message>> {
            let messages = self.messages.lock().unwrap();
            Ok(messages.last().map(|m| text_message(m)))
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        queries: Mutex<Vec<KpiQuery>>,
    }

    #[async_trait]
    impl KpiBackend for CountingBackend {
        async fn compute_kpi(&self, query: &KpiQuery) -> Result<Value> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(json!({"machine": query.machine_id, "value": 42.0}))
        }
    }

    fn run(status: &str, calls: Option<Vec<ToolCall>>) -> Run {
        let mut value = json!({"id": "run_1", "thread_id": "thread_1", "status": status});
        if let Some(calls) = calls {
            value["required_action"] = json!({
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {"tool_calls": calls}
            });
        }
        serde_json::from_value(value).unwrap()
    }

    fn kpi_call(id: &str, machine_id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: "compute_kpi_by_machine_id".to_string(),
                arguments: json!({
                    "machine_id": machine_id,
                    "kpi_id": "energy_efficiency",
                    "start_date": "2024-09-01 00:00:00",
                    "end_date": "2024-09-30 00:00:00",
                    "granularity_op": "avg"
                })
                .to_string(),
            },
        }
    }

    fn fast_poll() -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(1),
            max_wait: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn tool_call_is_answered_once_before_completion() {
        let api = ScriptedApi::new(vec![
            run("in_progress", None),
            run("requires_action", Some(vec![kpi_call("call_1", "ast-1")])),
            run("completed", None),
        ]);
        let backend = CountingBackend::default();

        let conversation = Conversation::start(&api, &backend, "asst_1", fast_poll())
            .await
            .unwrap();
        let outcome = conversation.ask("Compare machine A").await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        let queries = backend.queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].machine_id, "ast-1");
        assert_eq!(queries[0].kpi_id, "energy_efficiency");

        let submissions = api.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].len(), 1);
        assert_eq!(submissions[0][0].tool_call_id, "call_1");
        assert_eq!(
            serde_json::from_str::<Value>(&submissions[0][0].output).unwrap(),
            json!({"machine": "ast-1", "value": 42.0})
        );
    }

    #[tokio::test]
    async fn failed_run_never_calls_backend() {
        let api = ScriptedApi::new(vec![run("failed", None)]);
        let backend = CountingBackend::default();

        let conversation = Conversation::start(&api, &backend, "asst_1", fast_poll())
            .await
            .unwrap();
        let outcome = conversation.ask("Which machine is best?").await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                status: RunStatus::Failed,
                last_message: Some("Which machine is best?".to_string()),
                error: None,
            }
        );
        assert!(backend.queries.lock().unwrap().is_empty());
        assert!(api.submissions().is_empty());
        assert!(api.cancelled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn simultaneous_calls_are_submitted_together() {
        let api = ScriptedApi::new(vec![
            run(
                "requires_action",
                Some(vec![kpi_call("call_1", "ast-1"), kpi_call("call_2", "ast-2")]),
            ),
            run("completed", None),
        ]);
        let backend = CountingBackend::default();

        let conversation = Conversation::start(&api, &backend, "asst_1", fast_poll())
            .await
            .unwrap();
        conversation.ask("Compare A and B").await.unwrap();

        let submissions = api.submissions();
        assert_eq!(submissions.len(), 1);
        let ids: Vec<&str> = submissions[0]
            .iter()
            .map(|o| o.tool_call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
    }

    #[tokio::test]
    async fn repeated_call_ids_are_not_resubmitted() {
        let pending = vec![kpi_call("call_1", "ast-1")];
        let api = ScriptedApi::new(vec![
            run("requires_action", Some(pending.clone())),
            run("requires_action", Some(pending)),
            run("completed", None),
        ]);
        let backend = CountingBackend::default();

        let conversation = Conversation::start(&api, &backend, "asst_1", fast_poll())
            .await
            .unwrap();
        conversation.ask("Compare A").await.unwrap();

        assert_eq!(backend.queries.lock().unwrap().len(), 1);
        assert_eq!(api.submissions().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_answered_with_error() {
        let mut unknown = kpi_call("call_x", "ast-1");
        unknown.function.name = "shutdown_machine".to_string();
        let api = ScriptedApi::new(vec![
            run("requires_action", Some(vec![unknown])),
            run("completed", None),
        ]);
        let backend = CountingBackend::default();

        let conversation = Conversation::start(&api, &backend, "asst_1", fast_poll())
            .await
            .unwrap();
        conversation.ask("Shut it down").await.unwrap();

        let submissions = api.submissions();
        assert_eq!(submissions.len(), 1);
        assert!(submissions[0][0].output.contains("unknown tool"));
        assert!(backend.queries.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_run_times_out() {
        let api = ScriptedApi::new(vec![run("in_progress", None)]);
        let backend = CountingBackend::default();
        let poll = PollSettings {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(10),
        };

        let conversation = Conversation::start(&api, &backend, "asst_1", poll)
            .await
            .unwrap();
        let outcome = conversation.ask("Anyone there?").await.unwrap();

        match outcome {
            RunOutcome::TimedOut { run_id, waited } => {
                assert_eq!(run_id, "run_1");
                assert!(waited >= Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(*api.cancelled.lock().unwrap(), vec!["run_1".to_string()]);
    }

    #[tokio::test]
    async fn malformed_arguments_abort_the_ask() {
        let mut broken = kpi_call("call_1", "ast-1");
        broken.function.arguments = "{not json".to_string();
        let api = ScriptedApi::new(vec![
            run("requires_action", Some(vec![broken])),
            run("completed", None),
        ]);
        let backend = CountingBackend::default();

        let conversation = Conversation::start(&api, &backend, "asst_1", fast_poll())
            .await
            .unwrap();
        let err = conversation.ask("Compare A").await.unwrap_err();

        assert!(matches!(err, Error::Json(_)));
        assert!(api.submissions().is_empty());
    }
}
