//! Messaging platform seam
//!
//! Everything the relay needs from the chat platform goes through the
//! [`Messenger`] trait: sending text and media (optionally into a forum
//! topic, optionally with an inline keyboard), editing and deleting messages,
//! creating forum topics and answering button presses. The Telegram adapter
//! lives in [`crate::telegram`]; tests use an in-memory recorder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contact::Contact;

/// Error types for outbound platform calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The platform refused a button that references a user whose privacy
    /// settings forbid it
    #[error("Privacy restricted: {0}")]
    PrivacyRestricted(String),

    /// The recipient blocked the bot or the chat is gone
    #[error("Recipient unavailable: {0}")]
    Unavailable(String),

    #[error("Send failed: {0}")]
    Transport(String),
}

impl SendError {
    pub fn is_privacy_restricted(&self) -> bool {
        matches!(self, SendError::PrivacyRestricted(_))
    }
}

/// Where a message goes: a chat, optionally a forum topic inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatTarget {
    pub chat_id: i64,
    pub thread_id: Option<i32>,
    /// Send as a reply to this message
    pub reply_to: Option<i32>,
}

impl ChatTarget {
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            thread_id: None,
            reply_to: None,
        }
    }

    pub fn topic(chat_id: i64, thread_id: i32) -> Self {
        Self {
            chat_id,
            thread_id: Some(thread_id),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: i32) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// A message that exists on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

// ============ Keyboards ============

/// What pressing a button does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonKind {
    /// Sends the payload back as a callback query
    Callback(String),
    /// Opens a link
    Url(String),
}

/// Inline keyboard button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub kind: ButtonKind,
}

impl Button {
    pub fn callback(text: &str, data: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            kind: ButtonKind::Callback(data.into()),
        }
    }

    pub fn link(text: &str, url: impl Into<String>) -> Self {
        Self {
            text: text.to_string(),
            kind: ButtonKind::Url(url.into()),
        }
    }

    /// Profile link for a contact
    pub fn contact_link(contact: &Contact) -> Self {
        Self::link(&contact.display_name(), format!("tg://user?id={}", contact.id))
    }

    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            ButtonKind::Callback(data) => Some(data),
            ButtonKind::Url(_) => None,
        }
    }

    /// Buttons that mention a specific user and can trip privacy checks
    pub fn references_user(&self) -> bool {
        matches!(&self.kind, ButtonKind::Url(url) if url.starts_with("tg://user"))
    }
}

/// Rows of inline buttons attached under a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }

    pub fn single(button: Button) -> Self {
        Self::new(vec![vec![button]])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    /// Whether any button would be rejected for privacy reasons
    pub fn references_user(&self) -> bool {
        self.buttons().any(Button::references_user)
    }

    /// Same keyboard minus user-referencing buttons; empty rows are dropped
    pub fn without_user_references(&self) -> Keyboard {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter(|b| !b.references_user())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|row| !row.is_empty())
            .collect();
        Keyboard { rows }
    }

    /// Swap every button whose callback payload equals `data` for `replacement`,
    /// keeping all other buttons where they are. Returns whether anything changed.
    pub fn replace_callback(&mut self, data: &str, replacement: &Button) -> bool {
        let mut replaced = false;
        for button in self.rows.iter_mut().flatten() {
            if button.callback_data() == Some(data) {
                *button = replacement.clone();
                replaced = true;
            }
        }
        replaced
    }
}

// ============ Media ============

/// The five media payloads the relay forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Document,
    Video,
    Audio,
    Voice,
}

impl MediaKind {
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice note",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A media file already on the platform, referenced by its file id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
}

impl MediaRef {
    pub fn new(kind: MediaKind, file_id: impl Into<String>) -> Self {
        Self {
            kind,
            file_id: file_id.into(),
        }
    }
}

// ============ Inbound events ============

/// Chat message received from the platform
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    pub message_id: i32,
    pub chat_id: i64,
    /// Private one-to-one chat with the bot
    pub is_private: bool,
    pub sender: Option<Contact>,
    /// Forum topic the message was posted in
    pub thread_id: Option<i32>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media: Option<MediaRef>,
    /// Text or caption of the message this one replies to
    pub reply_to_text: Option<String>,
    /// Whether the message replies to anything at all
    pub is_reply: bool,
    /// Platform service notice (topic created, member joined, ...)
    pub is_service: bool,
    /// Text opens with a bot command such as `/start`
    pub is_command: bool,
}

impl InboundMessage {
    /// Text, else caption, else empty
    pub fn content(&self) -> &str {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .unwrap_or("")
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.sender.as_ref().map(|s| s.id)
    }
}

/// Message a button was pressed on
#[derive(Debug, Clone)]
pub struct CallbackOrigin {
    pub message: MessageRef,
    /// Text or caption of that message
    pub text: Option<String>,
    pub keyboard: Option<Keyboard>,
}

/// Inline button press
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub id: String,
    pub from: i64,
    pub data: String,
    pub origin: Option<CallbackOrigin>,
}

// ============ Trait ============

/// Outbound capabilities of the messaging platform
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message
    async fn send_text(
        &self,
        target: ChatTarget,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError>;

    /// Send a media file by reference
    async fn send_media(
        &self,
        target: ChatTarget,
        media: &MediaRef,
        caption: Option<&str>,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError>;

    /// Replace the text (and keyboard) of a message
    async fn edit_text(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), SendError>;

    /// Replace only the keyboard of a message
    async fn edit_keyboard(&self, message: MessageRef, keyboard: &Keyboard) -> Result<(), SendError>;

    /// Delete a message
    async fn delete_message(&self, message: MessageRef) -> Result<(), SendError>;

    /// Create a forum topic and return its thread id
    async fn create_topic(&self, chat_id: i64, title: &str) -> Result<i32, SendError>;

    /// Acknowledge a button press, optionally with a toast or alert
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), SendError>;
}
