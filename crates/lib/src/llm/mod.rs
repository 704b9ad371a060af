//! AI reply generation: webhook backend and pseudo-streaming segmentation.

mod stream;
mod webhook;

pub use stream::{
    split_sentences, DeliverySegment, GenerationClient, ReplyStream, EMPTY_NOTICE, ERROR_NOTICE,
    TIMEOUT_NOTICE,
};
pub use webhook::{
    extract_reply, GenerationBackend, GenerationError, GenerationRequest, WebhookClient,
    DEFAULT_TIMEOUT,
};
