//! HTTP client for LangGraph-style thread/run servers.
//!
//! One [`RunClient::submit_message`] call creates a thread, appends the user
//! message, starts a run and polls `runs/wait` until the server hands back a
//! `messages` array or the [`PollPolicy`] runs out.

use std::future::Future;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result, Step};
use crate::message::{
    completed_messages, join_replies, Assistant, AssistantList, AssistantRef, Message,
};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// How long and how often to poll a run before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Incomplete polls allowed before timing out. `None` polls forever.
    pub max_attempts: Option<u32>,
    /// Wall-clock limit for the whole submit, measured from its start.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: Some(300),
            deadline: None,
        }
    }
}

impl PollPolicy {
    /// Polls every `interval` with no limit at all.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            deadline: None,
        }
    }

    fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    fn time_left(&self, elapsed: Duration) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_sub(elapsed))
    }
}

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub token: String,
    pub assistant_id: String,
    pub request_timeout: Duration,
    pub poll: PollPolicy,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("assistant_id", &self.assistant_id)
            .field("request_timeout", &self.request_timeout)
            .field("poll", &self.poll)
            .finish()
    }
}

/// Where a submit currently is. `Completed`, `Failed` and `TimedOut` are terminal.
#[derive(Debug)]
pub enum RunState {
    Created { thread_id: String },
    MessageAppended { thread_id: String },
    Running { thread_id: String, run_id: String },
    Polling { thread_id: String, run_id: String, attempts: u32 },
    Completed { reply: String },
    Failed(Error),
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        thread_id: Option<String>,
        run_id: Option<String>,
    },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed { .. } | RunState::Failed(_) | RunState::TimedOut { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RunState::Created { .. } => "created",
            RunState::MessageAppended { .. } => "message_appended",
            RunState::Running { .. } => "running",
            RunState::Polling { .. } => "polling",
            RunState::Completed { .. } => "completed",
            RunState::Failed(_) => "failed",
            RunState::TimedOut { .. } => "timed_out",
        }
    }

    /// Converts a terminal state into the caller-facing result.
    fn into_result(self) -> Option<Result<String>> {
        match self {
            RunState::Completed { reply } => Some(Ok(reply)),
            RunState::Failed(err) => Some(Err(err)),
            RunState::TimedOut {
                attempts,
                elapsed,
                thread_id,
                run_id,
            } => Some(Err(Error::Timeout {
                attempts,
                elapsed,
                thread_id,
                run_id,
            })),
            _ => None,
        }
    }
}

/// Per-call inputs the state machine needs while driving one submit.
struct Submit<'a> {
    message: &'a str,
    started: Instant,
}

impl Submit<'_> {
    fn timed_out(&self, attempts: u32, thread_id: Option<String>, run_id: Option<String>) -> RunState {
        RunState::TimedOut {
            attempts,
            elapsed: self.started.elapsed(),
            thread_id,
            run_id,
        }
    }
}

/// Result of a single `runs/wait` request.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Completed(String),
}

#[derive(Clone)]
pub struct RunClient {
    http: Client,
    base_url: Url,
    token: String,
    assistant_id: String,
    poll: PollPolicy,
}

impl std::fmt::Debug for RunClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunClient")
            .field("base_url", &self.base_url.as_str())
            .field("assistant_id", &self.assistant_id)
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl RunClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid base URL '{}': {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("'{}' cannot be used as a base URL", config.base_url)));
        }
        if config.token.trim().is_empty() {
            return Err(Error::Config("bearer token is empty".to_string()));
        }
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(format!("runchat/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        debug!(base_url = %base_url, assistant_id = %config.assistant_id, "created RunClient");

        Ok(Self {
            http,
            base_url,
            token: config.token,
            assistant_id: config.assistant_id,
            poll: config.poll,
        })
    }

    pub fn assistant_id(&self) -> &str {
        &self.assistant_id
    }

    fn require_assistant(&self) -> Result<()> {
        if self.assistant_id.trim().is_empty() {
            return Err(Error::Config("no assistant id configured".to_string()));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Same client, pointed at another assistant.
    pub fn with_assistant(&self, assistant_id: impl Into<String>) -> Result<Self> {
        let assistant_id = assistant_id.into();
        if assistant_id.trim().is_empty() {
            return Err(Error::Config("assistant id is empty".to_string()));
        }
        Ok(Self {
            assistant_id,
            ..self.clone()
        })
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Sends `message` on a fresh thread and returns the newline-joined reply.
    pub async fn submit_message(&self, message: &str) -> Result<String> {
        if message.trim().is_empty() {
            return Err(Error::InvalidInput("message is empty".to_string()));
        }
        self.require_assistant()?;

        let submit = Submit {
            message,
            started: Instant::now(),
        };
        let created = self.within_deadline(&submit, self.create_thread()).await;
        let mut state = match created {
            Some(Ok(thread_id)) => RunState::Created { thread_id },
            Some(Err(err)) => RunState::Failed(err),
            None => submit.timed_out(0, None, None),
        };

        while !state.is_terminal() {
            let from = state.name();
            state = self.advance(state, &submit).await;
            debug!(from, to = state.name(), "run state transition");
        }

        match &state {
            RunState::Completed { .. } => info!(elapsed = ?submit.started.elapsed(), "run completed"),
            RunState::TimedOut { attempts, elapsed, .. } => {
                warn!(attempts, ?elapsed, "gave up waiting for run")
            }
            RunState::Failed(err) => warn!(error = %err, "run failed"),
            _ => {}
        }

        state
            .into_result()
            .unwrap_or_else(|| Err(Error::protocol(Step::Poll, "run stopped in a non-terminal state")))
    }

    /// Performs one transition. Terminal states are returned unchanged.
    async fn advance(&self, state: RunState, submit: &Submit<'_>) -> RunState {
        match state {
            RunState::Created { thread_id } => {
                let appended = self
                    .within_deadline(submit, self.append_message(&thread_id, submit.message))
                    .await;
                match appended {
                    Some(Ok(())) => RunState::MessageAppended { thread_id },
                    Some(Err(err)) => RunState::Failed(err),
                    None => submit.timed_out(0, Some(thread_id), None),
                }
            }
            RunState::MessageAppended { thread_id } => {
                let started = self.within_deadline(submit, self.start_run(&thread_id)).await;
                match started {
                    Some(Ok(run_id)) => RunState::Running { thread_id, run_id },
                    Some(Err(err)) => RunState::Failed(err),
                    None => submit.timed_out(0, Some(thread_id), None),
                }
            }
            RunState::Running { thread_id, run_id } => RunState::Polling {
                thread_id,
                run_id,
                attempts: 0,
            },
            RunState::Polling {
                thread_id,
                run_id,
                attempts,
            } => self.poll_step(thread_id, run_id, attempts, submit).await,
            terminal => terminal,
        }
    }

    async fn poll_step(&self, thread_id: String, run_id: String, attempts: u32, submit: &Submit<'_>) -> RunState {
        if self.poll.time_left(submit.started.elapsed()) == Some(Duration::ZERO) {
            return submit.timed_out(attempts, Some(thread_id), Some(run_id));
        }

        let attempts = attempts + 1;
        debug!(%thread_id, %run_id, attempt = attempts, "polling run");
        let outcome = self.within_deadline(submit, self.poll_once(&thread_id)).await;
        match outcome {
            Some(Ok(PollOutcome::Completed(reply))) => return RunState::Completed { reply },
            Some(Ok(PollOutcome::Pending)) => {}
            Some(Err(err)) => return RunState::Failed(err.in_run(&thread_id, &run_id)),
            None => return submit.timed_out(attempts, Some(thread_id), Some(run_id)),
        }

        if self.poll.attempts_exhausted(attempts) {
            return submit.timed_out(attempts, Some(thread_id), Some(run_id));
        }

        let pause = match self.poll.time_left(submit.started.elapsed()) {
            Some(left) => self.poll.interval.min(left),
            None => self.poll.interval,
        };
        tokio::time::sleep(pause).await;

        RunState::Polling {
            thread_id,
            run_id,
            attempts,
        }
    }

    /// Runs `step` with whatever is left of the deadline. `None` means it ran out.
    async fn within_deadline<T>(
        &self,
        submit: &Submit<'_>,
        step: impl Future<Output = Result<T>>,
    ) -> Option<Result<T>> {
        match self.poll.time_left(submit.started.elapsed()) {
            None => Some(step.await),
            Some(left) if left.is_zero() => None,
            Some(left) => tokio::time::timeout(left, step).await.ok(),
        }
    }

    /// `POST /threads`, returning the new `thread_id`.
    pub async fn create_thread(&self) -> Result<String> {
        let body = self
            .request_json(Step::CreateThread, Method::POST, &["threads"], Some(&json!({})))
            .await?;
        string_field(&body, "thread_id").ok_or_else(|| Error::missing_field(Step::CreateThread, "thread_id"))
    }

    /// `POST /threads/{thread_id}/history` with a user-role message.
    pub async fn append_message(&self, thread_id: &str, message: &str) -> Result<()> {
        let payload = Message::user(message);
        self.request(
            Step::AppendMessage,
            Method::POST,
            &["threads", thread_id, "history"],
            Some(&payload),
        )
        .await?;
        Ok(())
    }

    /// `POST /threads/{thread_id}/runs`, returning the new `run_id`.
    pub async fn start_run(&self, thread_id: &str) -> Result<String> {
        self.require_assistant()?;
        let body = self
            .request_json(
                Step::StartRun,
                Method::POST,
                &["threads", thread_id, "runs"],
                Some(&self.assistant_ref()),
            )
            .await?;
        string_field(&body, "run_id").ok_or_else(|| {
            Error::protocol(
                Step::StartRun,
                format!("response for thread {thread_id} has no string field `run_id`"),
            )
        })
    }

    /// One `POST /threads/{thread_id}/runs/wait`.
    pub async fn poll_once(&self, thread_id: &str) -> Result<PollOutcome> {
        self.require_assistant()?;
        let body = self
            .request_json(
                Step::Poll,
                Method::POST,
                &["threads", thread_id, "runs", "wait"],
                Some(&self.assistant_ref()),
            )
            .await?;

        match completed_messages(&body) {
            None => Ok(PollOutcome::Pending),
            Some(Ok(messages)) => Ok(PollOutcome::Completed(join_replies(&messages))),
            Some(Err(e)) => Err(Error::protocol(
                Step::Poll,
                format!("malformed messages array: {e}"),
            )),
        }
    }

    /// Polls an already started run until it completes or the policy runs out.
    pub async fn wait_for_reply(&self, thread_id: &str, run_id: &str) -> Result<String> {
        self.require_assistant()?;
        let submit = Submit {
            message: "",
            started: Instant::now(),
        };
        let mut state = RunState::Running {
            thread_id: thread_id.to_string(),
            run_id: run_id.to_string(),
        };
        while !state.is_terminal() {
            state = self.advance(state, &submit).await;
        }
        state
            .into_result()
            .unwrap_or_else(|| Err(Error::protocol(Step::Poll, "run stopped in a non-terminal state")))
    }

    /// `GET /health`.
    pub async fn health_check(&self) -> Result<()> {
        self.request::<()>(Step::Health, Method::GET, &["health"], None).await?;
        info!("server health check passed");
        Ok(())
    }

    /// `POST /assistants/search`.
    pub async fn search_assistants(&self) -> Result<Vec<Assistant>> {
        let body = self
            .request_json(
                Step::SearchAssistants,
                Method::POST,
                &["assistants", "search"],
                Some(&json!({})),
            )
            .await?;
        let list: AssistantList = serde_json::from_value(body).map_err(|e| {
            Error::protocol(Step::SearchAssistants, format!("unexpected response shape: {e}"))
        })?;
        Ok(list.into_vec())
    }

    fn assistant_ref(&self) -> AssistantRef<'_> {
        AssistantRef {
            assistant_id: &self.assistant_id,
        }
    }

    fn url(&self, step: Step, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::protocol(step, "base URL cannot take path segments"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        step: Step,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<String> {
        let url = self.url(step, segments)?;
        debug!(%step, %method, %url, "sending request");

        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| Error::Network { step, source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| Error::Network { step, source })?;

        if !status.is_success() {
            return Err(Error::protocol(
                step,
                format!("server returned {}: {}", status, truncate(&text, MAX_ERROR_BODY_CHARS)),
            ));
        }
        Ok(text)
    }

    async fn request_json<B: Serialize + ?Sized>(
        &self,
        step: Step,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<Value> {
        let text = self.request(step, method, segments, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            Error::protocol(
                step,
                format!("invalid JSON in response ({e}): {}", truncate(&text, MAX_ERROR_BODY_CHARS)),
            )
        })
    }
}

fn string_field(body: &Value, field: &str) -> Option<String> {
    body.get(field).and_then(Value::as_str).map(str::to_string)
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig {
            base_url: "http://localhost:2024".to_string(),
            token: "token".to_string(),
            assistant_id: "agent".to_string(),
            request_timeout: Duration::from_secs(5),
            poll: PollPolicy::default(),
        }
    }

    #[test]
    fn rejects_bad_configuration() {
        let err = RunClient::new(ClientConfig { token: " ".into(), ..config() }).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = RunClient::new(ClientConfig { base_url: "not a url".into(), ..config() }).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn runs_need_an_assistant() {
        let client = RunClient::new(ClientConfig { assistant_id: "".into(), ..config() }).unwrap();
        let err = client.submit_message("hi").await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(client.with_assistant("  ").is_err());
        assert_eq!(client.with_assistant("other").unwrap().assistant_id(), "other");
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_any_request() {
        let client = RunClient::new(config()).unwrap();
        let err = client.submit_message(" \n").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn builds_urls_under_base_path() {
        let client = RunClient::new(ClientConfig {
            base_url: "http://localhost:2024/api/".to_string(),
            ..config()
        })
        .unwrap();
        let url = client.url(Step::Poll, &["threads", "t 1", "runs", "wait"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:2024/api/threads/t%201/runs/wait");
    }

    #[test]
    fn debug_output_hides_token() {
        let rendered = format!("{:?}", config());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("\"token\""));
    }

    #[test]
    fn policy_limits() {
        let policy = PollPolicy {
            interval: Duration::from_millis(10),
            max_attempts: Some(2),
            deadline: Some(Duration::from_secs(1)),
        };
        assert!(!policy.attempts_exhausted(1));
        assert!(policy.attempts_exhausted(2));
        assert_eq!(policy.time_left(Duration::from_secs(3)), Some(Duration::ZERO));
        assert_eq!(PollPolicy::unbounded(Duration::from_secs(1)).time_left(Duration::from_secs(9)), None);
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::Completed { reply: String::new() }.is_terminal());
        let timed_out = |attempts| RunState::TimedOut {
            attempts,
            elapsed: Duration::ZERO,
            thread_id: Some("t".into()),
            run_id: None,
        };
        assert!(timed_out(1).is_terminal());
        assert!(!RunState::Running { thread_id: "t".into(), run_id: "r".into() }.is_terminal());
        assert!(matches!(
            timed_out(4).into_result(),
            Some(Err(Error::Timeout { attempts: 4, thread_id: Some(_), run_id: None, .. }))
        ));
    }

    #[tokio::test]
    async fn spent_deadline_times_out_before_polling() {
        let client = RunClient::new(ClientConfig {
            // nothing listens here; the machine must not send a request
            base_url: "http://127.0.0.1:9".to_string(),
            poll: PollPolicy {
                interval: Duration::from_millis(10),
                max_attempts: None,
                deadline: Some(Duration::ZERO),
            },
            ..config()
        })
        .unwrap();
        let submit = Submit {
            message: "hi",
            started: Instant::now(),
        };
        let state = RunState::Polling {
            thread_id: "t1".into(),
            run_id: "r1".into(),
            attempts: 0,
        };

        match client.advance(state, &submit).await {
            RunState::TimedOut {
                attempts,
                thread_id,
                run_id,
                ..
            } => {
                assert_eq!(attempts, 0);
                assert_eq!(thread_id.as_deref(), Some("t1"));
                assert_eq!(run_id.as_deref(), Some("r1"));
            }
            other => panic!("expected timed_out, got {}", other.name()),
        }
    }

    #[test]
    fn truncates_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("ok", 5), "ok");
    }
}
