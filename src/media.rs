//! Media multiplexing and privacy fallback
//!
//! Outbound payloads are either text or one of five media kinds. Each goes
//! out through a single platform call with an optional keyboard. When the
//! platform rejects the keyboard because a profile-link button points at a
//! user with restrictive privacy settings, the send is retried exactly once
//! with those buttons stripped (the block button survives).

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::messenger::{ChatTarget, InboundMessage, Keyboard, MediaRef, MessageRef, Messenger, SendError};

/// Something to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media {
        media: MediaRef,
        caption: Option<String>,
    },
}

impl Payload {
    /// Payload carried by an inbound message, with media taking precedence.
    /// `None` when the message holds neither text nor a supported media kind.
    /// Whitespace-only text counts as no text; anything else is kept verbatim.
    pub fn from_message(msg: &InboundMessage) -> Option<Self> {
        let text = msg.content();
        let has_text = !text.trim().is_empty();
        match &msg.media {
            Some(media) => Some(Payload::Media {
                media: media.clone(),
                caption: has_text.then(|| text.to_string()),
            }),
            None if has_text => Some(Payload::Text(text.to_string())),
            None => None,
        }
    }

    /// Human readable list of content kinds, e.g. "image and text"
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        match self {
            Payload::Text(_) => parts.push("text"),
            Payload::Media { media, caption } => {
                parts.push(media.kind.label());
                if caption.is_some() {
                    parts.push("text");
                }
            }
        }
        parts.join(" and ")
    }
}

/// Sends payloads through a [`Messenger`], applying the one-shot privacy fallback
#[derive(Clone)]
pub struct MediaForwarder {
    messenger: Arc<dyn Messenger>,
}

impl MediaForwarder {
    pub fn new(messenger: Arc<dyn Messenger>) -> Self {
        Self { messenger }
    }

    async fn send_once(
        &self,
        target: ChatTarget,
        payload: &Payload,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        match payload {
            Payload::Text(text) => self.messenger.send_text(target, text, keyboard).await,
            Payload::Media { media, caption } => {
                self.messenger
                    .send_media(target, media, caption.as_deref(), keyboard)
                    .await
            }
        }
    }

    /// Deliver `payload` to `target`. Media goes through [`Self::forward`].
    pub async fn deliver(
        &self,
        target: ChatTarget,
        payload: &Payload,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        match payload {
            Payload::Media { media, caption } => self.forward(media, caption.as_deref(), target, keyboard).await,
            Payload::Text(_) => self.send_with_fallback(target, payload, keyboard).await,
        }
    }

    /// Forward one media file with an optional caption and keyboard
    pub async fn forward(
        &self,
        media: &MediaRef,
        caption: Option<&str>,
        target: ChatTarget,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        let payload = Payload::Media {
            media: media.clone(),
            caption: caption.map(str::to_string),
        };
        let sent = self.send_with_fallback(target, &payload, keyboard).await;
        match &sent {
            Ok(message) => debug!("Forwarded {} to chat {} as {}", media.kind, target.chat_id, message.message_id),
            Err(e) => error!("Failed to forward {} to chat {}: {}", media.kind, target.chat_id, e),
        }
        sent
    }

    /// A privacy-restricted rejection triggers one retry with user-referencing
    /// buttons removed. Any failure of that retry is final.
    async fn send_with_fallback(
        &self,
        target: ChatTarget,
        payload: &Payload,
        keyboard: Option<&Keyboard>,
    ) -> Result<MessageRef, SendError> {
        match self.send_once(target, payload, keyboard).await {
            Err(e) if e.is_privacy_restricted() && keyboard.is_some_and(Keyboard::references_user) => {
                warn!(
                    "Chat {}: keyboard rejected ({}), retrying without profile link",
                    target.chat_id, e
                );
                let stripped = keyboard.map(Keyboard::without_user_references);
                let stripped = stripped.as_ref().filter(|k| !k.is_empty());

                let retried = self.send_once(target, payload, stripped).await;
                if let Err(e) = &retried {
                    error!("Chat {}: fallback send failed: {}", target.chat_id, e);
                }
                retried
            }
            other => other,
        }
    }
}
