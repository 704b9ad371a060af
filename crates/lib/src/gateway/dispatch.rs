//! Dispatch loop: acknowledge each robot event at once and answer it in its own task.
//!
//! Per event: `Received -> Acknowledged -> Processing -> Delivered | Failed`. Non-text messages are
//! answered inline with a fixed notice. Text messages are handed to a spawned dispatch unit; its
//! errors are logged and turned into an apology, and a watcher task logs panics. Nothing a unit
//! does can change the ack or affect other units.

use futures_util::future::join_all;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::channels::{
    conversation_id_hint, mention, preview, CardSession, CardTarget, ConversationOutbound,
    DeliveryError, InboundMessage, MessageKind, ReplyFormat, TokenCache, TokenError,
};
use crate::gateway::protocol::Ack;
use crate::llm::{GenerationClient, GenerationRequest};

/// Reply to non-text messages.
pub const TEXT_ONLY_NOTICE: &str = "对不起，我目前只支持文字消息~";
/// Apology sent when a dispatch unit fails.
pub const APOLOGY: &str = "抱歉，我暂时无法回复您的问题，请稍后再试。";

/// How replies are presented.
#[derive(Debug, Clone)]
pub enum DeliveryMode {
    /// One markdown message once the whole reply is known.
    Markdown,
    /// An AI card updated after every segment.
    Card {
        template_id: String,
        content_key: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no access token: {0}")]
    Auth(#[from] TokenError),
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
}

struct DispatchContext {
    tokens: Arc<TokenCache>,
    generation: GenerationClient,
    outbound: Arc<dyn ConversationOutbound>,
    format: ReplyFormat,
    mode: DeliveryMode,
}

/// Entry point for inbound events. Cloning shares the in-flight task list.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<DispatchContext>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Dispatcher {
    pub fn new(
        tokens: Arc<TokenCache>,
        generation: GenerationClient,
        outbound: Arc<dyn ConversationOutbound>,
        format: ReplyFormat,
        mode: DeliveryMode,
    ) -> Self {
        Self {
            ctx: Arc::new(DispatchContext {
                tokens,
                generation,
                outbound,
                format,
                mode,
            }),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handle one chatbot event. Always returns an OK ack; text messages are answered after return.
    pub async fn handle(&self, data: &serde_json::Value) -> Ack {
        let msg = match InboundMessage::from_event(data) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("dispatch: dropping event: {}", e);
                if let Some(conversation_id) = conversation_id_hint(data) {
                    self.ctx.apologize(conversation_id, None).await;
                }
                return Ack::ok();
            }
        };

        if msg.kind != MessageKind::Text {
            log::info!(
                "dispatch: non-text message in {}, replying with text-only notice",
                msg.conversation_id
            );
            self.ctx.reply_text_only(&msg).await;
            return Ack::ok();
        }

        let Some(text) = msg.user_text() else {
            log::warn!(
                "dispatch: empty message from {:?} in {}",
                msg.sender_id,
                msg.conversation_id
            );
            return Ack::ok();
        };

        log::info!(
            "dispatch: message from {}({}): {}",
            msg.sender_name.as_deref().unwrap_or("-"),
            msg.sender_id.as_deref().unwrap_or("-"),
            preview(&text)
        );
        self.spawn_unit(msg, text);
        Ack::ok()
    }

    fn spawn_unit(&self, msg: InboundMessage, text: String) {
        let label = format!(
            "conversation={}, user={:?}, input={}",
            msg.conversation_id,
            msg.sender_id,
            preview(&text)
        );
        let ctx = self.ctx.clone();
        let unit = tokio::spawn(async move { ctx.run_unit(msg, text).await });
        let watcher = tokio::spawn(async move {
            if let Err(e) = unit.await {
                log::error!("dispatch unit aborted ({}): {}", label, e);
            }
        });
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(watcher);
    }

    /// Number of dispatch units not yet finished.
    pub fn in_flight(&self) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait up to `grace` for in-flight units. Returns false when some were still running.
    pub async fn drain(&self, grace: Duration) -> bool {
        let handles = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *in_flight)
        };
        let pending = handles.iter().filter(|h| !h.is_finished()).count();
        if pending == 0 {
            return true;
        }
        log::info!("waiting up to {:?} for {} in-flight replies", grace, pending);
        match tokio::time::timeout(grace, join_all(handles)).await {
            Ok(_) => {
                log::info!("in-flight replies finished");
                true
            }
            Err(_) => {
                log::warn!("shutdown grace period elapsed with replies still running");
                false
            }
        }
    }
}

impl DispatchContext {
    async fn run_unit(&self, msg: InboundMessage, text: String) {
        let request = GenerationRequest::new(
            text.as_str(),
            msg.sender_id.clone(),
            Some(msg.conversation_id.clone()),
        );
        let result = match &self.mode {
            DeliveryMode::Markdown => self.deliver_markdown(&msg, request).await,
            DeliveryMode::Card {
                template_id,
                content_key,
            } => self.deliver_card(&msg, request, template_id, content_key).await,
        };
        match result {
            Ok(()) => log::info!(
                "dispatch: reply delivered to {} for {:?}",
                msg.conversation_id,
                msg.sender_id
            ),
            Err(e) => {
                log::error!(
                    "dispatch unit failed (conversation={}, user={:?}, input={}): {}",
                    msg.conversation_id,
                    msg.sender_id,
                    preview(&text),
                    e
                );
                self.apologize(&msg.conversation_id, msg.sender_name.as_deref())
                    .await;
            }
        }
    }

    /// Collect the whole reply, then send one markdown message (or the notice as plain text).
    async fn deliver_markdown(
        &self,
        msg: &InboundMessage,
        request: GenerationRequest,
    ) -> Result<(), DispatchError> {
        let mut stream = self.generation.stream(request);
        let mut reply = String::new();
        let mut failed = false;
        while let Some(segment) = stream.next().await {
            reply.push_str(&segment.text);
            failed = segment.is_failed;
        }

        let token = self.tokens.get_token().await?;
        let name = msg.sender_name.as_deref();
        if failed {
            self.outbound
                .send_text(&token, &msg.conversation_id, &mention(name, &reply))
                .await?;
        } else {
            let (title, content) = self.format.markdown(&reply, name);
            self.outbound
                .send_markdown(&token, &msg.conversation_id, &title, &content)
                .await?;
        }
        Ok(())
    }

    /// Open a card, push every segment in order, then finish it exactly once.
    async fn deliver_card(
        &self,
        msg: &InboundMessage,
        request: GenerationRequest,
        template_id: &str,
        content_key: &str,
    ) -> Result<(), DispatchError> {
        let outbound = self.outbound.as_ref();
        let token = self.tokens.get_token().await?;
        let target = CardTarget::for_message(msg);
        let mut session =
            CardSession::open(outbound, &token, &target, template_id, content_key).await?;
        log::debug!(
            "card {} opened in {}",
            session.card_instance_id(),
            msg.conversation_id
        );

        let mut stream = self.generation.stream(request);
        let mut failed = false;
        while let Some(segment) = stream.next().await {
            failed = segment.is_failed;
            let token = self.tokens.get_token().await?;
            session.push(outbound, &token, &segment.text).await?;
        }

        let token = self.tokens.get_token().await?;
        session.finish(outbound, &token, failed).await?;
        Ok(())
    }

    /// Synchronous reply for non-text messages.
    async fn reply_text_only(&self, msg: &InboundMessage) {
        let token = match self.tokens.get_token().await {
            Ok(t) => t,
            Err(e) => {
                log::error!("cannot send text-only notice to {}: {}", msg.conversation_id, e);
                return;
            }
        };
        if let Err(e) = self
            .outbound
            .send_text(&token, &msg.conversation_id, TEXT_ONLY_NOTICE)
            .await
        {
            log::error!("text-only notice to {} failed: {}", msg.conversation_id, e);
        }
    }

    /// Best-effort apology; silent when no token is available.
    async fn apologize(&self, conversation_id: &str, user_display_name: Option<&str>) {
        let token = match self.tokens.get_token().await {
            Ok(t) => t,
            Err(e) => {
                log::error!("cannot send apology to {}: {}", conversation_id, e);
                return;
            }
        };
        let text = mention(user_display_name, APOLOGY);
        if let Err(e) = self.outbound.send_text(&token, conversation_id, &text).await {
            log::error!("apology to {} failed: {}", conversation_id, e);
        }
    }
}
