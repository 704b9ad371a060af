//! Reply formatting for DingTalk markdown messages.

use crate::config::BotConfig;

/// DingTalk markdown content limit, in characters.
pub const DEFAULT_MAX_MARKDOWN_CHARS: usize = 2000;

const TRUNCATION_MARKER: &str = "...";

/// Title and length settings for markdown replies.
#[derive(Debug, Clone)]
pub struct ReplyFormat {
    pub bot_name: String,
    pub max_chars: usize,
}

impl Default for ReplyFormat {
    fn default() -> Self {
        Self::from(&BotConfig::default())
    }
}

impl From<&BotConfig> for ReplyFormat {
    fn from(bot: &BotConfig) -> Self {
        Self {
            bot_name: bot.name.clone(),
            max_chars: bot.max_message_length,
        }
    }
}

impl ReplyFormat {
    /// `(title, content)` for a markdown reply. The title names the bot and, when known, the user;
    /// content is trimmed and cut to `max_chars` characters ending in `...`.
    pub fn markdown(&self, ai_text: &str, user_display_name: Option<&str>) -> (String, String) {
        let mut title = format!("🤖 {} 回复", self.bot_name);
        if let Some(name) = user_display_name.filter(|n| !n.is_empty()) {
            title.push_str(" @");
            title.push_str(name);
        }
        (title, truncate_chars(ai_text.trim(), self.max_chars))
    }
}

/// Cut `text` to at most `max_chars` characters, replacing the tail with `...` when cut.
/// Limits below the marker length get a shortened marker.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker_len = TRUNCATION_MARKER.len().min(max_chars);
    let mut out: String = text.chars().take(max_chars - marker_len).collect();
    out.push_str(&TRUNCATION_MARKER[..marker_len]);
    out
}

/// Short form of user input for log lines.
pub fn preview(text: &str) -> String {
    truncate_chars(text, 50)
}

/// Prefix `text` with `@name ` when the name is known.
pub fn mention(user_display_name: Option<&str>, text: &str) -> String {
    match user_display_name.filter(|n| !n.is_empty()) {
        Some(name) => format!("@{} {}", name, text),
        None => text.to_string(),
    }
}
