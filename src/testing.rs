//! Fakes shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::{stream, StreamExt};

use crate::llm::{FragmentStream, GenerationError, GenerationRequest, TextGenerator};
use crate::platform::{Action, ChatSink, IncomingMessage, SentMessage};

pub enum Script {
    Reply(String),
    Fragments(Vec<Result<String, GenerationError>>),
    Fail(GenerationError),
}

pub fn fragments(parts: &[&str]) -> Script {
    Script::Fragments(parts.iter().map(|p| Ok(p.to_string())).collect())
}

/// Plays back one scripted answer, then fails every later call.
pub struct FakeGenerator {
    script: Mutex<Option<Script>>,
    delay: Duration,
    calls: AtomicUsize,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
    pub fn new(script: Script) -> Arc<Self> {
        Self::delayed(script, Duration::ZERO)
    }

    /// Waits `delay` before answering.
    pub fn delayed(script: Script, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn take(&self, request: &GenerationRequest) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script
            .lock()
            .unwrap()
            .take()
            .unwrap_or(Script::Fail(GenerationError::EmptyResponse))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match self.take(request).await {
            Script::Reply(text) => Ok(text),
            Script::Fragments(parts) => Ok(parts.into_iter().filter_map(|p| p.ok()).collect()),
            Script::Fail(e) => Err(e),
        }
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        match self.take(request).await {
            Script::Reply(text) => Ok(stream::iter(vec![Ok(text)]).boxed()),
            Script::Fragments(parts) => Ok(stream::iter(parts).boxed()),
            Script::Fail(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Send(String),
    SendWithActions(String, Vec<Action>),
    Edit(i32, String),
}

/// Records deliveries and keeps the latest text of every posted message.
/// Blank text is refused the way the Bot API refuses it.
#[derive(Default)]
pub struct RecordingSink {
    pub(crate) messages: Mutex<Vec<String>>,
    pub(crate) log: Mutex<Vec<Delivery>>,
    pub typing: AtomicUsize,
    pub failing_edits: AtomicUsize,
    pub fail_sends: bool,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn log(&self) -> Vec<Delivery> {
        self.log.lock().unwrap().clone()
    }

    pub fn typing(&self) -> usize {
        self.typing.load(Ordering::SeqCst)
    }

    pub fn count(&self, text: &str) -> usize {
        self.messages().iter().filter(|m| *m == text).count()
    }

    fn post(&self, chat_id: i64, text: &str) -> Result<SentMessage> {
        if self.fail_sends {
            bail!("network unreachable");
        }
        if text.trim().is_empty() {
            bail!("Bad Request: message text is empty");
        }
        let mut messages = self.messages.lock().unwrap();
        messages.push(text.to_string());
        Ok(SentMessage {
            chat_id,
            message_id: (messages.len() - 1) as i32,
        })
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<SentMessage> {
        self.log.lock().unwrap().push(Delivery::Send(text.to_string()));
        self.post(chat_id, text)
    }

    async fn send_with_actions(
        &self,
        chat_id: i64,
        text: &str,
        actions: &[Action],
    ) -> Result<SentMessage> {
        self.log
            .lock()
            .unwrap()
            .push(Delivery::SendWithActions(text.to_string(), actions.to_vec()));
        self.post(chat_id, text)
    }

    async fn edit_text(&self, message: &SentMessage, text: &str) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(Delivery::Edit(message.message_id, text.to_string()));
        if self
            .failing_edits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            bail!("edit rejected");
        }
        if text.trim().is_empty() {
            bail!("Bad Request: message text is empty");
        }
        self.messages.lock().unwrap()[message.message_id as usize] = text.to_string();
        Ok(())
    }

    async fn send_typing(&self, _chat_id: i64) -> Result<()> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn incoming(text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_id: 42,
        user_id: 7,
        user_name: "tester".to_string(),
        text: text.to_string(),
    }
}
