use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::lesson::{self, LessonFormat};
use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::platform::{
    chunk_end, split_message, ChatSink, IncomingMessage, SentMessage, MESSAGE_LIMIT,
};

pub const WELCOME_MESSAGE: &str = "Hi! I'm a bot powered by Google Gemini. \
Send me a message and I'll answer it.\n\n\
Commands:\n\
/start - Show this welcome message\n\
/help - How to use the bot\n\
/learn <topic> - Get a short lesson on a topic";

pub const HELP_MESSAGE: &str = "Send me any text message and I'll pass it to Gemini \
and reply with its answer. Each message is answered on its own; I don't remember \
earlier messages.\n\n\
Use /learn followed by a topic for a lesson, then the buttons under it for \
examples, a quiz or a summary.\n\n\
Commands:\n\
/start - Show the welcome message\n\
/help - Show this help\n\
/learn <topic> - Get a short lesson on a topic";

pub const LEARN_USAGE: &str =
    "Please specify a topic to learn about.\nExample: /learn quantum computing";

pub const FAILURE_NOTICE: &str =
    "Sorry, I couldn't get a reply right now. Please try again in a moment.";

/// Characters of inbound text kept in log lines.
const LOG_PREVIEW_CHARS: usize = 64;

/// Telegram clears a chat action after about five seconds.
const TYPING_INTERVAL: Duration = Duration::from_secs(4);

/// How a single inbound message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to relay (empty text).
    Ignored,
    Replied,
    /// The user got the failure notice.
    Failed,
}

/// Forwards chat messages to the text generator and delivers the replies.
/// Holds no per-chat state; every message is handled on its own.
pub struct Relay {
    generator: Arc<dyn TextGenerator>,
    sink: Arc<dyn ChatSink>,
    instructions: Option<String>,
    stream_replies: bool,
    edit_interval: Duration,
    typing_interval: Duration,
}

impl Relay {
    pub fn new(generator: Arc<dyn TextGenerator>, sink: Arc<dyn ChatSink>) -> Self {
        Self {
            generator,
            sink,
            instructions: None,
            stream_replies: true,
            edit_interval: Duration::from_secs(1),
            typing_interval: TYPING_INTERVAL,
        }
    }

    pub fn with_config(self, config: &RelayConfig) -> Self {
        self.with_instructions(config.system_prompt.clone())
            .with_streaming(config.stream_replies)
            .with_edit_interval(config.stream_edit_interval)
    }

    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.stream_replies = enabled;
        self
    }

    pub fn with_edit_interval(mut self, interval: Duration) -> Self {
        self.edit_interval = interval;
        self
    }

    /// How often the typing indicator is repeated while a reply is pending.
    pub fn with_typing_interval(mut self, interval: Duration) -> Self {
        self.typing_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Relay one text message. Never fails: upstream errors end in a failure notice.
    pub async fn handle_text(&self, incoming: &IncomingMessage) -> Outcome {
        let chat_id = incoming.chat_id;
        let text = incoming.text.trim();
        if text.is_empty() {
            debug!("Ignoring empty message in chat {}", chat_id);
            return Outcome::Ignored;
        }

        info!(
            "Message from {} ({}) in chat {}: {}",
            incoming.user_name,
            incoming.user_id,
            chat_id,
            preview(text)
        );

        let _typing = self.start_typing(chat_id).await;

        let request = GenerationRequest::new(text, self.instructions.clone());
        let result = if self.stream_replies {
            self.relay_stream(chat_id, &request).await
        } else {
            self.relay_once(chat_id, &request).await
        };
        self.conclude(chat_id, result).await
    }

    /// Reply to `/start`.
    pub async fn handle_start(&self, chat_id: i64) {
        info!("Welcome requested in chat {}", chat_id);
        self.deliver(chat_id, WELCOME_MESSAGE).await;
    }

    /// Reply to `/help`.
    pub async fn handle_help(&self, chat_id: i64) {
        info!("Help requested in chat {}", chat_id);
        self.deliver(chat_id, HELP_MESSAGE).await;
    }

    /// Reply to `/learn <topic>`. A missing topic gets the usage hint instead.
    pub async fn handle_learn(&self, chat_id: i64, topic: &str) -> Outcome {
        let topic = topic.trim();
        if topic.is_empty() {
            self.deliver(chat_id, LEARN_USAGE).await;
            return Outcome::Ignored;
        }
        self.handle_lesson(chat_id, LessonFormat::Explanation, topic).await
    }

    /// Generate one piece of lesson content and post it with the follow-up buttons.
    pub async fn handle_lesson(&self, chat_id: i64, format: LessonFormat, topic: &str) -> Outcome {
        info!(
            format = format.key(),
            "Lesson requested in chat {}: {}",
            chat_id,
            preview(topic)
        );

        let _typing = self.start_typing(chat_id).await;

        let request = GenerationRequest::new(format.prompt(topic), self.instructions.clone());
        let result = self.relay_lesson(chat_id, format, topic, &request).await;
        self.conclude(chat_id, result).await
    }

    async fn conclude(&self, chat_id: i64, result: Result<(), GenerationError>) -> Outcome {
        match result {
            Ok(()) => Outcome::Replied,
            Err(e) => {
                error!(kind = e.kind(), "Error processing message in chat {}: {}", chat_id, e);
                self.deliver(chat_id, FAILURE_NOTICE).await;
                Outcome::Failed
            }
        }
    }

    /// Show "typing…" now and keep repeating it until the guard is dropped.
    async fn start_typing(&self, chat_id: i64) -> TypingIndicator {
        self.sink.send_typing(chat_id).await.ok();

        let sink = Arc::clone(&self.sink);
        let period = self.typing_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                if sink.send_typing(chat_id).await.is_err() {
                    break;
                }
            }
        });
        TypingIndicator { handle }
    }

    async fn relay_once(
        &self,
        chat_id: i64,
        request: &GenerationRequest,
    ) -> Result<(), GenerationError> {
        let response = self.generator.generate(request).await?;
        if response.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        for chunk in split_message(&response, MESSAGE_LIMIT) {
            self.deliver(chat_id, &chunk).await;
        }
        Ok(())
    }

    async fn relay_stream(
        &self,
        chat_id: i64,
        request: &GenerationRequest,
    ) -> Result<(), GenerationError> {
        let mut fragments = self.generator.generate_stream(request).await?;
        let mut forwarder = StreamForwarder::new(self.sink.as_ref(), chat_id, self.edit_interval);

        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => forwarder.push(&text).await,
                Err(e) => {
                    // Partial output stays; the caller appends the notice after it.
                    forwarder.finish().await;
                    return Err(e);
                }
            }
        }
        forwarder.finish().await;

        if !forwarder.has_text {
            return Err(GenerationError::EmptyResponse);
        }
        debug!("Streamed {} bytes to chat {}", forwarder.received, chat_id);
        Ok(())
    }

    async fn relay_lesson(
        &self,
        chat_id: i64,
        format: LessonFormat,
        topic: &str,
        request: &GenerationRequest,
    ) -> Result<(), GenerationError> {
        let content = self.generator.generate(request).await?;
        let content = content.trim();
        if content.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        let body = format!("{}\n\n{}", format.heading(topic), content);
        let chunks = split_message(&body, MESSAGE_LIMIT);
        let Some((last, leading)) = chunks.split_last() else {
            return Ok(());
        };
        for chunk in leading {
            self.deliver(chat_id, chunk).await;
        }

        // Buttons go under the final part so they follow the whole lesson.
        let actions = lesson::follow_up_actions(topic);
        match self.sink.send_with_actions(chat_id, last, &actions).await {
            Ok(_) => debug!("Delivered lesson with {} buttons to chat {}", actions.len(), chat_id),
            Err(e) => error!("Failed to deliver lesson to chat {}: {:#}", chat_id, e),
        }
        Ok(())
    }

    async fn deliver(&self, chat_id: i64, text: &str) {
        match self.sink.send_text(chat_id, text).await {
            Ok(_) => debug!("Delivered {} chars to chat {}", text.chars().count(), chat_id),
            Err(e) => error!("Failed to deliver message to chat {}: {:#}", chat_id, e),
        }
    }
}

/// Repeats the typing action in the background; stops when dropped.
struct TypingIndicator {
    handle: JoinHandle<()>,
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Shows a streamed reply by editing one message as fragments arrive, moving on
/// to a fresh message whenever the platform limit would be exceeded.
struct StreamForwarder<'a> {
    sink: &'a dyn ChatSink,
    chat_id: i64,
    interval: Duration,
    current: Option<SentMessage>,
    /// Full text of the current message, including what is not shown yet.
    text: String,
    /// Length of the prefix of `text` the posted message shows.
    shown: usize,
    last_flush: Option<Instant>,
    received: usize,
    /// Whether any fragment carried more than whitespace.
    has_text: bool,
}

impl<'a> StreamForwarder<'a> {
    fn new(sink: &'a dyn ChatSink, chat_id: i64, interval: Duration) -> Self {
        Self {
            sink,
            chat_id,
            interval,
            current: None,
            text: String::new(),
            shown: 0,
            last_flush: None,
            received: 0,
            has_text: false,
        }
    }

    async fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        self.received += fragment.len();
        self.has_text |= !fragment.trim().is_empty();

        self.text.push_str(fragment);
        while self.text.len() > MESSAGE_LIMIT {
            self.rollover().await;
        }

        let due = match self.last_flush {
            Some(at) => at.elapsed() >= self.interval,
            None => true,
        };
        if self.current.is_none() || due {
            self.flush().await;
        }
    }

    async fn finish(&mut self) {
        self.flush().await;
    }

    /// Close the current message at a line or word break and carry the rest
    /// into the next one.
    async fn rollover(&mut self) {
        let cut = chunk_end(&self.text, 0, MESSAGE_LIMIT).max(self.shown);
        let rest = self.text.split_off(cut);
        self.flush().await;

        let mut next = match self.current {
            // After a failed edit the unseen tail opens the next message.
            Some(_) => self.text.split_off(self.shown),
            // Never posted; the failed send is already logged.
            None => String::new(),
        };
        next.push_str(&rest);

        self.text = next;
        self.current = None;
        self.shown = 0;
    }

    async fn flush(&mut self) {
        if self.shown == self.text.len() {
            return;
        }

        match self.current {
            Some(message) => match self.sink.edit_text(&message, &self.text).await {
                Ok(()) => self.shown = self.text.len(),
                Err(e) => warn!(
                    "Failed to update streamed reply in chat {}: {:#}",
                    self.chat_id, e
                ),
            },
            // Telegram refuses blank messages; leading whitespace waits for real text.
            None if self.text.trim().is_empty() => return,
            None => match self.sink.send_text(self.chat_id, &self.text).await {
                Ok(sent) => {
                    self.current = Some(sent);
                    self.shown = self.text.len();
                }
                Err(e) => warn!(
                    "Failed to start streamed reply in chat {}: {:#}",
                    self.chat_id, e
                ),
            },
        }
        self.last_flush = Some(Instant::now());
    }
}

fn preview(text: &str) -> String {
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
