//! Outbound delivery: how replies reach a conversation.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::channels::inbound::{ConversationType, InboundMessage};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("delivery api error: {0}")]
    Api(String),
}

/// Where a card is placed: the group itself, or the robot's one-to-one chat with the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardTarget {
    pub conversation_id: String,
    pub conversation_type: ConversationType,
    pub sender_id: Option<String>,
}

impl CardTarget {
    pub fn for_message(msg: &InboundMessage) -> Self {
        Self {
            conversation_id: msg.conversation_id.clone(),
            conversation_type: msg.correlation.conversation_type,
            sender_id: msg.sender_id.clone(),
        }
    }
}

/// One full-replacement update of a card's content variable.
#[derive(Debug, Clone, Copy)]
pub struct CardUpdate<'a> {
    pub card_instance_id: &'a str,
    pub content_key: &'a str,
    /// Cumulative text so far, never a delta.
    pub content: &'a str,
    pub finished: bool,
    pub failed: bool,
}

/// Sends messages and cards into a conversation. Every call carries a fresh access token.
#[async_trait]
pub trait ConversationOutbound: Send + Sync {
    /// Plain text message.
    async fn send_text(&self, token: &str, conversation_id: &str, text: &str)
        -> Result<(), DeliveryError>;

    /// Markdown message with a title.
    async fn send_markdown(
        &self,
        token: &str,
        conversation_id: &str,
        title: &str,
        content: &str,
    ) -> Result<(), DeliveryError>;

    /// Create a card from a template and deliver it; returns the card instance id.
    async fn create_card(
        &self,
        token: &str,
        target: &CardTarget,
        template_id: &str,
        initial: &BTreeMap<String, String>,
    ) -> Result<String, DeliveryError>;

    /// Replace the displayed content of a card.
    async fn update_card(&self, token: &str, update: CardUpdate<'_>) -> Result<(), DeliveryError>;
}
