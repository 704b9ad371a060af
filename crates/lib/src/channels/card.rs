//! Card session: one progressively updated AI card per reply.

use std::collections::BTreeMap;

use crate::channels::outbound::{CardTarget, CardUpdate, ConversationOutbound, DeliveryError};

/// A live card owned by a single dispatch unit. Every update sends the cumulative text;
/// [`finish`](Self::finish) consumes the session, so nothing can be sent after the final update.
#[derive(Debug)]
pub struct CardSession {
    card_instance_id: String,
    content_key: String,
    accumulated_text: String,
}

impl CardSession {
    /// Create and deliver an empty card.
    pub async fn open(
        outbound: &dyn ConversationOutbound,
        token: &str,
        target: &CardTarget,
        template_id: &str,
        content_key: &str,
    ) -> Result<Self, DeliveryError> {
        let initial = BTreeMap::from([(content_key.to_string(), String::new())]);
        let card_instance_id = outbound
            .create_card(token, target, template_id, &initial)
            .await?;
        Ok(Self {
            card_instance_id,
            content_key: content_key.to_string(),
            accumulated_text: String::new(),
        })
    }

    pub fn card_instance_id(&self) -> &str {
        &self.card_instance_id
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// Append `text` and show everything received so far.
    pub async fn push(
        &mut self,
        outbound: &dyn ConversationOutbound,
        token: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        self.accumulated_text.push_str(text);
        outbound
            .update_card(token, self.update(false, false))
            .await
    }

    /// Final update: marks the card finished (and failed when the reply is an error notice).
    pub async fn finish(
        self,
        outbound: &dyn ConversationOutbound,
        token: &str,
        failed: bool,
    ) -> Result<(), DeliveryError> {
        outbound.update_card(token, self.update(true, failed)).await
    }

    fn update(&self, finished: bool, failed: bool) -> CardUpdate<'_> {
        CardUpdate {
            card_instance_id: &self.card_instance_id,
            content_key: &self.content_key,
            content: &self.accumulated_text,
            finished,
            failed,
        }
    }
}
