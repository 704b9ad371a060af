//! DingTalk channel.
//!
//! Inbound robot events are parsed into [`InboundMessage`]; replies go out through
//! [`ConversationOutbound`] (implemented by [`DingTalkClient`]) using tokens from [`TokenCache`].

mod card;
mod dingtalk;
mod format;
mod inbound;
mod outbound;
mod token;

pub use card::CardSession;
pub use dingtalk::DingTalkClient;
pub use format::{mention, preview, truncate_chars, ReplyFormat, DEFAULT_MAX_MARKDOWN_CHARS};
pub use inbound::{
    conversation_id_hint, ConversationType, Correlation, InboundMessage, MessageKind, ParseError,
};
pub use outbound::{CardTarget, CardUpdate, ConversationOutbound, DeliveryError};
pub use token::{
    Credential, DingTalkTokenExchange, IssuedToken, TokenCache, TokenError, TokenExchange,
    TOKEN_SAFETY_MARGIN,
};
