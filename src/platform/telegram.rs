use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, MessageId,
};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::lesson;
use crate::platform::{Action, ChatSink, IncomingMessage, SentMessage};
use crate::relay::{Outcome, Relay};

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "explain how to use the bot")]
    Help,
    #[command(description = "get a lesson on a topic, e.g. /learn quantum computing")]
    Learn(String),
}

/// `ChatSink` backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatSink for TelegramSink {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<SentMessage> {
        let sent = self
            .bot
            .send_message(ChatId(chat_id), text)
            .await
            .context("sendMessage failed")?;
        Ok(SentMessage {
            chat_id,
            message_id: sent.id.0,
        })
    }

    async fn send_with_actions(
        &self,
        chat_id: i64,
        text: &str,
        actions: &[Action],
    ) -> Result<SentMessage> {
        let keyboard = InlineKeyboardMarkup::new(actions.iter().map(|action| {
            vec![InlineKeyboardButton::callback(
                action.label.clone(),
                action.data.clone(),
            )]
        }));
        let sent = self
            .bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(keyboard)
            .await
            .context("sendMessage failed")?;
        Ok(SentMessage {
            chat_id,
            message_id: sent.id.0,
        })
    }

    async fn edit_text(&self, message: &SentMessage, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(ChatId(message.chat_id), MessageId(message.message_id), text)
            .await
            .context("editMessageText failed")?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .context("sendChatAction failed")?;
        Ok(())
    }
}

/// Run the Telegram bot until ctrl-c
pub async fn run(bot: Bot, relay: Arc<Relay>) -> Result<()> {
    // Fails fast on a token Telegram does not accept.
    let me = bot
        .get_me()
        .await
        .context("Telegram rejected the bot token")?;
    info!("Authorized as @{}", me.username());

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register bot commands: {}", e);
    }

    info!("Starting Telegram platform...");

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(dptree::endpoint(handle_message)),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Telegram platform stopped");
    Ok(())
}

async fn handle_command(msg: Message, cmd: Command, relay: Arc<Relay>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    match cmd {
        Command::Start => relay.handle_start(chat_id).await,
        Command::Help => relay.handle_help(chat_id).await,
        Command::Learn(topic) => {
            relay.handle_learn(chat_id, &topic).await;
        }
    }
    Ok(())
}

async fn handle_message(msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    relay_text(&relay, to_incoming(&msg)).await;
    Ok(())
}

/// Lesson buttons: answer the query, then post the requested format.
async fn handle_callback(bot: Bot, query: CallbackQuery, relay: Arc<Relay>) -> ResponseResult<()> {
    if let Err(e) = bot.answer_callback_query(query.id.clone()).await {
        warn!("Failed to answer callback query: {}", e);
    }

    let Some(chat_id) = query.message.as_ref().map(|m| m.chat().id.0) else {
        return Ok(());
    };
    match query.data.as_deref().and_then(lesson::parse_action) {
        Some((format, topic)) => {
            relay.handle_lesson(chat_id, format, &topic).await;
        }
        None => debug!("Ignoring unknown callback data in chat {}: {:?}", chat_id, query.data),
    }
    Ok(())
}

/// Pass plain text on to the relay. Non-text updates and commands the bot does
/// not know stop here.
async fn relay_text(relay: &Relay, incoming: Option<IncomingMessage>) -> Option<Outcome> {
    let incoming = incoming?;
    if incoming.text.starts_with('/') {
        debug!("Ignoring unknown command in chat {}: {}", incoming.chat_id, incoming.text);
        return None;
    }
    Some(relay.handle_text(&incoming).await)
}

/// Text messages with a known sender; everything else is dropped.
fn to_incoming(msg: &Message) -> Option<IncomingMessage> {
    let user = msg.from.as_ref()?;
    let text = msg.text()?;
    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        user_id: user.id.0,
        user_name: user.first_name.clone(),
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{incoming, FakeGenerator, RecordingSink, Script};

    fn message(extra: serde_json::Value) -> Message {
        let mut json = serde_json::json!({
            "message_id": 10,
            "date": 1700000000,
            "chat": { "id": 42, "first_name": "Ada", "type": "private" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ada" }
        });
        if let (Some(base), Some(extra)) = (json.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(json).unwrap()
    }

    fn relay() -> (Relay, Arc<FakeGenerator>, Arc<RecordingSink>) {
        let generator = FakeGenerator::new(Script::Reply("answer".to_string()));
        let sink = Arc::new(RecordingSink::default());
        let relay = Relay::new(generator.clone(), sink.clone());
        (relay, generator, sink)
    }

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(Command::parse("/start", "relaybot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/help", "relaybot").unwrap(), Command::Help);
        assert_eq!(Command::parse("/help@relaybot", "relaybot").unwrap(), Command::Help);
        assert_eq!(
            Command::parse("/learn quantum computing", "relaybot").unwrap(),
            Command::Learn("quantum computing".to_string())
        );
    }

    #[test]
    fn test_unknown_commands_do_not_parse() {
        assert!(Command::parse("/clear", "relaybot").is_err());
        assert!(Command::parse("hello", "relaybot").is_err());
        assert!(Command::parse("/start@otherbot", "relaybot").is_err());
    }

    #[test]
    fn test_registered_command_list() {
        let names: Vec<String> = Command::bot_commands().into_iter().map(|c| c.command).collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].ends_with("start"));
        assert!(names[1].ends_with("help"));
        assert!(names[2].ends_with("learn"));
    }

    #[test]
    fn test_text_message_becomes_incoming() {
        let incoming = to_incoming(&message(serde_json::json!({ "text": "hi there" }))).unwrap();
        assert_eq!(incoming.chat_id, 42);
        assert_eq!(incoming.user_id, 7);
        assert_eq!(incoming.user_name, "Ada");
        assert_eq!(incoming.text, "hi there");
    }

    #[test]
    fn test_non_text_message_is_dropped() {
        let location = message(serde_json::json!({
            "location": { "latitude": 52.52, "longitude": 13.40 }
        }));
        assert!(to_incoming(&location).is_none());
    }

    #[tokio::test]
    async fn test_unknown_commands_never_reach_the_model() {
        let (relay, generator, sink) = relay();

        for text in ["/clear", "/start@otherbot", "/learn@otherbot rust"] {
            assert_eq!(relay_text(&relay, Some(incoming(text))).await, None);
        }
        assert_eq!(relay_text(&relay, None).await, None);

        assert_eq!(generator.calls(), 0);
        assert!(sink.log().is_empty());
    }

    #[tokio::test]
    async fn test_plain_text_is_relayed() {
        let (relay, generator, sink) = relay();

        assert_eq!(
            relay_text(&relay, Some(incoming("what is a monad?"))).await,
            Some(Outcome::Replied)
        );
        assert_eq!(generator.calls(), 1);
        assert_eq!(sink.messages(), vec!["answer".to_string()]);
    }
}
