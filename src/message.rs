use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message appended to a thread's history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One entry of the `messages` array returned by a completed run.
///
/// Servers usually send `content` as a string, but some graphs emit content
/// blocks, so the raw value is kept and rendered by [`ReplyMessage::text`].
#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ReplyMessage {
    #[serde(default)]
    pub content: Value,
}

impl ReplyMessage {
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Joins reply contents with newlines, in the order the server sent them.
pub fn join_replies(messages: &[ReplyMessage]) -> String {
    messages
        .iter()
        .map(ReplyMessage::text)
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Serialize, Debug)]
pub(crate) struct AssistantRef<'a> {
    pub assistant_id: &'a str,
}

#[derive(Deserialize, Clone, Debug, Default, PartialEq)]
pub struct AssistantMetadata {
    #[serde(default)]
    pub name: Option<String>,
}

/// An assistant as listed by `POST /assistants/search`.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct Assistant {
    pub assistant_id: String,
    #[serde(default)]
    pub metadata: Option<AssistantMetadata>,
}

impl Assistant {
    pub fn name(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.name.as_deref())
            .unwrap_or("Unnamed")
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum AssistantList {
    Bare(Vec<Assistant>),
    Wrapped { assistants: Vec<Assistant> },
}

impl AssistantList {
    pub fn into_vec(self) -> Vec<Assistant> {
        match self {
            AssistantList::Bare(list) => list,
            AssistantList::Wrapped { assistants } => assistants,
        }
    }
}

/// Pulls the `messages` array out of a wait response, if the run is done.
///
/// A missing field, `null`, or any non-array value means "not yet".
pub fn completed_messages(body: &Value) -> Option<Result<Vec<ReplyMessage>, serde_json::Error>> {
    match body.get("messages") {
        Some(messages @ Value::Array(_)) => Some(serde_json::from_value(messages.clone())),
        _ => None,
    }
}
