//! Inbound robot message: parsed from a DingTalk chatbot callback event.

use serde::Deserialize;

/// Message type of an inbound event. Only text is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Other,
}

/// Chat the message came from (`conversationType` "1" or "2").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationType {
    OneToOne,
    Group,
}

/// Event fields kept for correlating replies and log lines.
#[derive(Debug, Clone)]
pub struct Correlation {
    pub message_id: Option<String>,
    pub conversation_type: ConversationType,
    pub robot_code: Option<String>,
    pub session_webhook: Option<String>,
    /// Sender's DingTalk-wide id (`senderId`), as opposed to the org staff id.
    pub sender_dingtalk_id: Option<String>,
}

/// A robot message, immutable once parsed.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub kind: MessageKind,
    pub raw_text: String,
    /// Org staff id (`senderStaffId`).
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub conversation_id: String,
    pub correlation: Correlation,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed chatbot event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("chatbot event has no conversationId")]
    MissingConversation,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatbotEvent {
    #[serde(default, rename = "msgtype")]
    msg_type: Option<String>,
    #[serde(default)]
    text: Option<ChatbotText>,
    #[serde(default)]
    sender_staff_id: Option<String>,
    #[serde(default)]
    sender_nick: Option<String>,
    #[serde(default)]
    sender_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    conversation_type: Option<String>,
    #[serde(default)]
    msg_id: Option<String>,
    #[serde(default)]
    robot_code: Option<String>,
    #[serde(default)]
    session_webhook: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatbotText {
    #[serde(default)]
    content: String,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl InboundMessage {
    /// Parse a chatbot callback event (`msgtype`, `text.content`, `senderStaffId`, `conversationId`, ...).
    pub fn from_event(data: &serde_json::Value) -> Result<Self, ParseError> {
        let event = ChatbotEvent::deserialize(data)?;
        let conversation_id =
            non_empty(event.conversation_id).ok_or(ParseError::MissingConversation)?;
        let kind = match event.msg_type.as_deref() {
            Some("text") => MessageKind::Text,
            _ => MessageKind::Other,
        };
        let conversation_type = match event.conversation_type.as_deref() {
            Some("1") => ConversationType::OneToOne,
            _ => ConversationType::Group,
        };
        Ok(Self {
            kind,
            raw_text: event.text.map(|t| t.content).unwrap_or_default(),
            sender_id: non_empty(event.sender_staff_id),
            sender_name: non_empty(event.sender_nick),
            conversation_id,
            correlation: Correlation {
                message_id: event.msg_id,
                conversation_type,
                robot_code: event.robot_code,
                session_webhook: event.session_webhook,
                sender_dingtalk_id: event.sender_id,
            },
        })
    }

    /// The question to answer: trimmed text with a leading `@mention ` removed. None when nothing is left.
    pub fn user_text(&self) -> Option<String> {
        let mut text = self.raw_text.trim();
        if text.starts_with('@') {
            if let Some(i) = text.find(' ') {
                text = text[i..].trim();
            }
        }
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

/// Best-effort conversation id from an event that failed to parse, so an apology can still be sent.
pub fn conversation_id_hint(data: &serde_json::Value) -> Option<&str> {
    data.get("conversationId")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
