//! Pseudo-streaming over a single generation call.
//!
//! The backend answers once; the answer is cut at sentence terminators and replayed as a lazy,
//! finite stream of [`DeliverySegment`]s so cards can update progressively. A backend that really
//! streams can later produce the same segments without changing the delivery side.

use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;

use crate::channels::preview;
use crate::llm::webhook::{GenerationBackend, GenerationError, GenerationRequest};

/// Shown when the backend misses the deadline.
pub const TIMEOUT_NOTICE: &str = "AI思考时间较长，请稍后再试。";
/// Shown when the backend call fails (HTTP error or network failure).
pub const ERROR_NOTICE: &str = "AI服务异常，请稍后再试。";
/// Shown when the backend answered without usable text.
pub const EMPTY_NOTICE: &str = "AI回复为空，请稍后重试。";

const SENTENCE_TERMINATORS: [char; 4] = ['。', '！', '？', '\n'];

/// One unit of outbound content, applied strictly in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySegment {
    pub text: String,
    pub is_final: bool,
    pub is_failed: bool,
}

impl DeliverySegment {
    fn notice(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: true,
            is_failed: true,
        }
    }
}

/// Lazy segment stream; consumed once.
pub type ReplyStream = BoxStream<'static, DeliverySegment>;

/// Split after each terminator, keeping it; an unterminated remainder is the last piece.
/// Pieces concatenate back to `text`. A long sentence stays one piece.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if SENTENCE_TERMINATORS.contains(&c) {
            let end = i + c.len_utf8();
            pieces.push(&text[start..end]);
            start = end;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Generation backend with a deadline.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    timeout: Duration,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// One backend call bounded by the deadline; a missed deadline is [`GenerationError::Timeout`].
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<Option<String>, GenerationError> {
        match tokio::time::timeout(self.timeout, self.backend.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        }
    }

    /// Segments of the reply. Nothing is requested until the stream is first polled.
    pub fn stream(&self, request: GenerationRequest) -> ReplyStream {
        let client = self.clone();
        stream::once(async move { client.segments(&request).await })
            .flat_map(stream::iter)
            .boxed()
    }

    async fn segments(&self, request: &GenerationRequest) -> Vec<DeliverySegment> {
        let context = format!(
            "user_message={}, user_id={:?}, conversation_id={:?}",
            preview(&request.user_text),
            request.user_id,
            request.conversation_id
        );
        let text = match self.generate(request).await {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => {
                log::warn!("generation returned no reply text, {}", context);
                return vec![DeliverySegment::notice(EMPTY_NOTICE)];
            }
            Err(GenerationError::Timeout(after)) => {
                log::error!("generation timed out after {:?}, {}", after, context);
                return vec![DeliverySegment::notice(TIMEOUT_NOTICE)];
            }
            Err(e) => {
                log::error!("generation failed: {}, {}", e, context);
                return vec![DeliverySegment::notice(ERROR_NOTICE)];
            }
        };
        let pieces = split_sentences(&text);
        let last = pieces.len().saturating_sub(1);
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, piece)| DeliverySegment {
                text: piece.to_string(),
                is_final: i == last,
                is_failed: false,
            })
            .collect()
    }
}
