use serde::Deserialize;
use serde_json::Value;

use super::backend::{RemoteMessage, RemoteRole};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireRole {
    User,
    #[serde(alias = "bot")]
    Assistant,
}

// Older backends persisted `{type, question|answer}` rows, newer ones `{role, content}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    RoleContent {
        role: WireRole,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        image: Option<String>,
    },
    Legacy(LegacyMessage),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum LegacyMessage {
    User {
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        image: Option<String>,
    },
    #[serde(alias = "assistant")]
    Bot {
        #[serde(default)]
        answer: Option<String>,
    },
}

impl From<WireMessage> for RemoteMessage {
    fn from(message: WireMessage) -> Self {
        match message {
            WireMessage::RoleContent {
                role,
                content,
                image,
            } => Self {
                role: match role {
                    WireRole::User => RemoteRole::User,
                    WireRole::Assistant => RemoteRole::Assistant,
                },
                content: content.unwrap_or_default(),
                image: non_empty(image),
            },
            WireMessage::Legacy(LegacyMessage::User { question, image }) => Self {
                role: RemoteRole::User,
                content: question.unwrap_or_default(),
                image: non_empty(image),
            },
            WireMessage::Legacy(LegacyMessage::Bot { answer }) => Self {
                role: RemoteRole::Assistant,
                content: answer.unwrap_or_default(),
                image: None,
            },
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

pub(crate) fn decode_history(payload: &str) -> Result<Vec<RemoteMessage>, serde_json::Error> {
    let messages = serde_json::from_str::<Vec<WireMessage>>(payload)?;
    Ok(messages.into_iter().map(RemoteMessage::from).collect())
}

/// Pulls a readable message out of an error body.
///
/// Understands `{"detail": "..."}`, validation lists `{"detail": [{"msg": ...}]}`,
/// and the `error`/`message` keys some proxies emit.
pub(crate) fn error_detail(payload: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(payload).ok()?;
    let object = value.as_object()?;

    ["detail", "error", "message"]
        .iter()
        .filter_map(|key| object.get(*key))
        .find_map(detail_text)
}

fn detail_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.trim().to_string()),
                Value::Object(fields) => fields
                    .get("msg")
                    .or_else(|| fields.get("message"))
                    .and_then(Value::as_str)
                    .map(|text| text.trim().to_string()),
                _ => None,
            })
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Object(fields) => return fields.get("message").and_then(detail_text),
        Value::Null => return None,
        other => other.to_string(),
    };

    (!text.is_empty()).then_some(text)
}
