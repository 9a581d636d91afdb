pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// Telegram caps messages at 4096 characters; stay under it with some margin.
pub const MESSAGE_LIMIT: usize = 4000;

/// A text message received from the chat platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Chat the reply goes back to
    pub chat_id: i64,
    /// Platform-specific sender ID
    pub user_id: u64,
    /// Display name of the sender
    pub user_name: String,
    /// The message text
    pub text: String,
}

/// A button shown under a message. Pressing it sends `data` back to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub label: String,
    pub data: String,
}

/// Handle to a message the relay has posted, so it can be edited later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i32,
}

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<SentMessage>;

    /// Send a message with one button per action.
    async fn send_with_actions(
        &self,
        chat_id: i64,
        text: &str,
        actions: &[Action],
    ) -> Result<SentMessage>;

    /// Replace the full text of a message posted earlier.
    async fn edit_text(&self, message: &SentMessage, text: &str) -> Result<()>;

    async fn send_typing(&self, chat_id: i64) -> Result<()>;
}

/// Split long messages to fit the platform limit, preferring newline and space boundaries.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = chunk_end(text, start, max_len);
        chunks.push(text[start..end].to_string());
        start = end;
    }

    chunks
}

/// End of the chunk that starts at `start` and holds at most `max_len` bytes:
/// just past the last newline, else the last space, else the last character
/// that fits.
pub fn chunk_end(text: &str, start: usize, max_len: usize) -> usize {
    let end = floor_char_boundary(text, start.saturating_add(max_len));
    if end >= text.len() {
        return text.len();
    }
    if end <= start {
        // `max_len` is narrower than the next character; take it whole.
        return text[start..]
            .char_indices()
            .nth(1)
            .map_or(text.len(), |(idx, _)| start + idx);
    }

    let window = &text[start..end];
    window
        .rfind('\n')
        .or_else(|| window.rfind(' '))
        .map(|pos| start + pos + 1)
        .unwrap_or(end)
}

/// Largest index `<= index` that lies on a UTF-8 character boundary.
pub fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut end = index;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_is_single_chunk() {
        assert_eq!(split_message("hello", 4000), vec!["hello"]);
    }

    #[test]
    fn test_split_prefers_whitespace() {
        let text = "word ".repeat(2000);
        let chunks = split_message(&text, 4000);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.len() <= 4000);
            assert!(chunk.ends_with(' '));
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_prefers_newline_over_space() {
        let text = format!("{}\n{}", "a b".repeat(5), "c".repeat(20));
        let chunks = split_message(&text, 20);
        assert_eq!(chunks[0], format!("{}\n", "a b".repeat(5)));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_split_never_cuts_multibyte_characters() {
        let text = "é".repeat(3000);
        let chunks = split_message(&text, 4000);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() <= 4000));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_end() {
        let text = "one two\nthree four";
        assert_eq!(chunk_end(text, 0, 12), 8);
        assert_eq!(chunk_end(text, 8, 8), 14);
        assert_eq!(chunk_end(text, 8, 100), text.len());
        assert_eq!(chunk_end("abcdef", 0, 4), 4);
        assert_eq!(chunk_end("éa", 0, 1), 2);
    }

    #[test]
    fn test_floor_char_boundary() {
        let text = "aé";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 3), 3);
        assert_eq!(floor_char_boundary(text, 10), 3);
    }
}
