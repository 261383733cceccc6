//! Telegram integration
//!
//! [`TelegramMessenger`] implements [`Messenger`] on top of a teloxide `Bot`,
//! and [`run`] drives long polling through an explicit dptree dispatcher:
//! commands first, then plain messages, plus inline button callbacks.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, HandlerExt, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup, InputFile, MessageEntityKind,
        MessageId, MessageKind, ReplyParameters, ThreadId, Update, User,
    },
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tracing::{debug, info, warn};

use crate::commands::Command;
use crate::config::Config;
use crate::contact::Contact;
use crate::context::RelayContext;
use crate::messenger::{
    Button, ButtonKind, CallbackEvent, CallbackOrigin, ChatTarget, InboundMessage, Keyboard, MediaKind,
    MediaRef, MessageRef, Messenger, SendError,
};

// ============ Messenger ============

/// Blue, one of the six colors the Bot API accepts for new topics
const TOPIC_ICON_COLOR: u32 = 0x6FB9F0;

/// [`Messenger`] backed by the Bot API
#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Sort a Bot API failure into the buckets the relay cares about
fn classify(err: RequestError) -> SendError {
    let text = err.to_string();
    if text.contains("PRIVACY_RESTRICTED") {
        return SendError::PrivacyRestricted(text);
    }
    match err {
        RequestError::Api(ApiError::BotBlocked)
        | RequestError::Api(ApiError::ChatNotFound)
        | RequestError::Api(ApiError::UserDeactivated) => SendError::Unavailable(text),
        _ => SendError::Transport(text),
    }
}

fn sent_ref(msg: &Message) -> MessageRef {
    MessageRef {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
    }
}

fn to_markup(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| row.iter().filter_map(to_button).collect())
        .filter(|row: &Vec<InlineKeyboardButton>| !row.is_empty())
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn to_button(button: &Button) -> Option<InlineKeyboardButton> {
    match &button.kind {
        ButtonKind::Callback(data) => Some(InlineKeyboardButton::callback(button.text.clone(), data.clone())),
        ButtonKind::Url(url) => match reqwest::Url::parse(url) {
            Ok(url) => Some(InlineKeyboardButton::url(button.text.clone(), url)),
            Err(e) => {
                warn!("Dropping button {:?} with invalid url {:?}: {}", button.text, url, e);
                None
            }
        },
    }
}

/// Buttons we cannot represent (login, web app, ...) are left out
fn from_markup(markup: &InlineKeyboardMarkup) -> Keyboard {
    let rows = markup
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|button| match &button.kind {
                    InlineKeyboardButtonKind::CallbackData(data) => Some(Button::callback(&button.text, data.clone())),
                    InlineKeyboardButtonKind::Url(url) => Some(Button::link(&button.text, url.to_string())),
                    _ => None,
                })
                .collect()
        })
        .collect();
    Keyboard::new(rows)
}

/// Apply the common target/caption/keyboard options to a send request
macro_rules! send_with {
    ($request:expr, $target:expr, $caption:expr, $keyboard:expr) => {{
        let mut request = $request;
        if let Some(thread_id) = $target.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread_id)));
        }
        if let Some(reply_to) = $target.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }
        if let Some(caption) = $caption {
            request = request.caption(caption);
        }
        if let Some(keyboard) = $keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        request.await.map(|sent| sent_ref(&sent)).map_err(classify)
    }};
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(
        &self,
        target: ChatTarget,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        let mut request = self.bot.send_message(ChatId(target.chat_id), text);
        if let Some(thread_id) = target.thread_id {
            request = request.message_thread_id(ThreadId(MessageId(thread_id)));
        }
        if let Some(reply_to) = target.reply_to {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to)));
        }
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        request.await.map(|sent| sent_ref(&sent)).map_err(classify)
    }

    async fn send_media(
        &self,
        target: ChatTarget,
        media: &MediaRef,
        caption: Option<&str>,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        let chat = ChatId(target.chat_id);
        let file = InputFile::file_id(media.file_id.clone());
        match media.kind {
            MediaKind::Image => send_with!(self.bot.send_photo(chat, file), target, caption, keyboard),
            MediaKind::Document => send_with!(self.bot.send_document(chat, file), target, caption, keyboard),
            MediaKind::Video => send_with!(self.bot.send_video(chat, file), target, caption, keyboard),
            MediaKind::Audio => send_with!(self.bot.send_audio(chat, file), target, caption, keyboard),
            MediaKind::Voice => send_with!(self.bot.send_voice(chat, file), target, caption, keyboard),
        }
    }

    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), SendError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(message.chat_id), MessageId(message.message_id), text);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(to_markup(keyboard));
        }
        request.await.map(|_| ()).map_err(classify)
    }

    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> Result<(), SendError> {
        self.bot
            .edit_message_reply_markup(ChatId(message.chat_id), MessageId(message.message_id))
            .reply_markup(to_markup(keyboard))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError> {
        self.bot
            .delete_message(ChatId(message.chat_id), MessageId(message.message_id))
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn create_topic(&self, chat_id: i64, title: &str) -> Result<i32, SendError> {
        let topic = self
            .bot
            .create_forum_topic(ChatId(chat_id), title, TOPIC_ICON_COLOR, "")
            .await
            .map_err(classify)?;
        Ok(topic.thread_id.0 .0)
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), SendError> {
        let mut request = self.bot.answer_callback_query(callback_id.to_string());
        if let Some(text) = text {
            request = request.text(text);
        }
        request.show_alert(alert).await.map(|_| ()).map_err(classify)
    }
}

// ============ Inbound conversion ============

fn contact_from_user(user: &User) -> Contact {
    let mut contact = Contact::new(user.id.0 as i64).with_name(&user.first_name, user.last_name.as_deref());
    if let Some(username) = &user.username {
        contact = contact.with_username(username);
    }
    contact
}

fn media_of(msg: &Message) -> Option<MediaRef> {
    if let Some(sizes) = msg.photo() {
        // Sizes come smallest first
        return sizes
            .last()
            .map(|photo| MediaRef::new(MediaKind::Image, photo.file.id.to_string()));
    }
    if let Some(doc) = msg.document() {
        return Some(MediaRef::new(MediaKind::Document, doc.file.id.to_string()));
    }
    if let Some(video) = msg.video() {
        return Some(MediaRef::new(MediaKind::Video, video.file.id.to_string()));
    }
    if let Some(audio) = msg.audio() {
        return Some(MediaRef::new(MediaKind::Audio, audio.file.id.to_string()));
    }
    msg.voice()
        .map(|voice| MediaRef::new(MediaKind::Voice, voice.file.id.to_string()))
}

/// Whether the message text starts with a bot command entity
fn starts_with_command(msg: &Message) -> bool {
    msg.entities().is_some_and(|entities| {
        entities
            .iter()
            .any(|entity| entity.offset == 0 && matches!(entity.kind, MessageEntityKind::BotCommand))
    })
}

fn inbound_message(msg: &Message) -> InboundMessage {
    let reply_to = msg.reply_to_message();
    InboundMessage {
        message_id: msg.id.0,
        chat_id: msg.chat.id.0,
        is_private: msg.chat.is_private(),
        sender: msg.from.as_ref().map(contact_from_user),
        thread_id: msg.thread_id.map(|thread| thread.0 .0),
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        media: media_of(msg),
        reply_to_text: reply_to.and_then(|r| r.text().or(r.caption())).map(str::to_string),
        is_reply: reply_to.is_some(),
        is_service: !matches!(msg.kind, MessageKind::Common(_)),
        is_command: starts_with_command(msg),
    }
}

fn callback_event(query: &CallbackQuery) -> CallbackEvent {
    let origin = query.regular_message().map(|msg| CallbackOrigin {
        message: sent_ref(msg),
        text: msg.text().or(msg.caption()).map(str::to_string),
        keyboard: msg.reply_markup().map(from_markup),
    });

    CallbackEvent {
        id: query.id.clone(),
        from: query.from.id.0 as i64,
        data: query.data.clone().unwrap_or_default(),
        origin,
    }
}

// ============ Dispatcher ============

/// Build the bot client, routing through the configured proxy if any
fn build_bot(config: &Config) -> Result<Bot> {
    let Some(proxy) = &config.proxy else {
        return Ok(Bot::new(&config.bot_token));
    };

    let client = teloxide::net::default_reqwest_settings()
        .proxy(reqwest::Proxy::all(proxy.as_str()).with_context(|| format!("Invalid proxy URL {:?}", proxy))?)
        .build()
        .context("Failed to build proxied HTTP client")?;
    info!("Using proxy {}", proxy);
    Ok(Bot::with_client(&config.bot_token, client))
}

/// Run the relay until interrupted
pub async fn run(config: Config) -> Result<()> {
    info!("===========================================");
    info!("  Relaybot - Starting...");
    info!("===========================================");
    info!("Mode: {}", config.mode.label());
    info!("Operator: {}", config.operator_id);
    info!("Data directory: {:?}", config.data_dir);
    if !config.block_keywords.is_empty() {
        info!("Keyword filter: {} entries", config.block_keywords.len());
    }

    let bot = build_bot(&config)?;

    // Verify bot token by calling getMe
    info!("Verifying bot token...");
    match bot.get_me().await {
        Ok(me) => info!(
            "Bot authenticated: @{} (ID: {})",
            me.username.as_deref().unwrap_or("unknown"),
            me.id
        ),
        Err(e) => anyhow::bail!("Bot authentication failed: {}", e),
    }

    // Polling does not work while a webhook is set
    if let Err(e) = bot.delete_webhook().await {
        warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register command menu: {}", e);
    }

    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone()));
    let context = Arc::new(RelayContext::build(&config, messenger).context("Failed to open data files")?);

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(dptree::entry().filter_command::<Command>().endpoint(command_handler))
                .branch(dptree::endpoint(message_handler)),
        )
        .branch(Update::filter_callback_query().endpoint(callback_handler));

    info!("Starting dispatcher with long polling...");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![Arc::clone(&context)])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Error in update handler"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    let abandoned = context.relay.acks().cancel_all();
    if abandoned > 0 {
        info!("Abandoned {} pending acknowledgement deletions", abandoned);
    }
    warn!("Dispatcher stopped");
    Ok(())
}

async fn command_handler(msg: Message, command: Command, ctx: Arc<RelayContext>) -> ResponseResult<()> {
    ctx.commands.handle(command, &inbound_message(&msg)).await;
    Ok(())
}

async fn message_handler(msg: Message, ctx: Arc<RelayContext>) -> ResponseResult<()> {
    let inbound = inbound_message(&msg);
    let outcome = ctx.relay.handle_message(&inbound).await;
    debug!(
        "Message {} in chat {} from {:?}: {:?}",
        inbound.message_id,
        inbound.chat_id,
        inbound.sender_id(),
        outcome
    );
    Ok(())
}

async fn callback_handler(query: CallbackQuery, ctx: Arc<RelayContext>) -> ResponseResult<()> {
    let event = callback_event(&query);
    if let Some(state) = ctx.admin.handle_callback(&event).await {
        debug!("Admin panel now {:?}", state);
    }
    Ok(())
}
