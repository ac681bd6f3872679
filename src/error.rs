use std::fmt;
use std::time::Duration;

/// The request a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateThread,
    AppendMessage,
    StartRun,
    Poll,
    Health,
    SearchAssistants,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CreateThread => "create thread",
            Step::AppendMessage => "append message",
            Step::StartRun => "start run",
            Step::Poll => "poll run",
            Step::Health => "health check",
            Step::SearchAssistants => "search assistants",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{step}: failed to reach the server: {source}")]
    Network {
        step: Step,
        #[source]
        source: reqwest::Error,
    },

    #[error("{step}: {detail}")]
    Protocol { step: Step, detail: String },

    #[error(
        "run did not complete{} after {attempts} poll(s) in {elapsed:?}",
        run_label(.thread_id, .run_id)
    )]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        thread_id: Option<String>,
        run_id: Option<String>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn run_label(thread_id: &Option<String>, run_id: &Option<String>) -> String {
    match (thread_id, run_id) {
        (Some(thread), Some(run)) => format!(" (thread {thread}, run {run})"),
        (Some(thread), None) => format!(" (thread {thread})"),
        _ => String::new(),
    }
}

impl Error {
    pub(crate) fn protocol(step: Step, detail: impl Into<String>) -> Self {
        Error::Protocol {
            step,
            detail: detail.into(),
        }
    }

    pub(crate) fn missing_field(step: Step, field: &str) -> Self {
        Error::protocol(step, format!("response has no string field `{field}`"))
    }

    /// Prefixes protocol details with the thread and run they happened on.
    pub(crate) fn in_run(self, thread_id: &str, run_id: &str) -> Self {
        match self {
            Error::Protocol { step, detail } => Error::Protocol {
                step,
                detail: format!("thread {thread_id}, run {run_id}: {detail}"),
            },
            other => other,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
