//! Relay core
//!
//! Routes every inbound chat message. Contacts' messages go to the operator
//! wrapped in a metadata envelope; the operator's replies are correlated back
//! to a contact (through the quoted envelope in direct mode, through the forum
//! topic in topic mode) and delivered without any bot framing.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::admin;
use crate::blocklist::Blocklist;
use crate::config::{Config, RelayMode};
use crate::contact::Contact;
use crate::envelope::{self, MAX_CAPTION_CHARS, MAX_TEXT_CHARS};
use crate::media::{MediaForwarder, Payload};
use crate::messenger::{Button, ChatTarget, InboundMessage, Keyboard, MessageRef, Messenger};
use crate::timers::DeletionScheduler;
use crate::topics::TopicRouter;

/// Why an inbound contact message was not relayed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Blocked,
    Keyword,
    Command,
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Contact message delivered to the operator
    Relayed { contact_id: i64, message: MessageRef },
    /// Contact message silently discarded
    Dropped(DropReason),
    /// Operator reply delivered to a contact
    Delivered { contact_id: i64 },
    /// Operator reply could not be tied to a contact
    Unresolved,
    /// Operator reply carried nothing deliverable
    Rejected,
    /// Delivery failed at the platform
    Failed,
    /// Not ours to handle
    Ignored,
}

/// Where contact messages are delivered
enum Destination {
    Direct,
    Topics(Arc<TopicRouter>),
}

pub struct Relay {
    operator_id: i64,
    keywords: Vec<String>,
    destination: Destination,
    messenger: Arc<dyn Messenger>,
    blocklist: Arc<Blocklist>,
    forwarder: MediaForwarder,
    acks: DeletionScheduler,
}

impl Relay {
    /// Build a relay; `topics` is required for topic mode and ignored otherwise
    pub fn new(
        config: &Config,
        messenger: Arc<dyn Messenger>,
        blocklist: Arc<Blocklist>,
        topics: Option<Arc<TopicRouter>>,
    ) -> Self {
        let destination = match (config.mode, topics) {
            (RelayMode::Topic { .. }, Some(router)) => Destination::Topics(router),
            (RelayMode::Topic { group_chat_id }, None) => {
                warn!("Topic mode without a topic router for {}, relaying directly", group_chat_id);
                Destination::Direct
            }
            (RelayMode::Direct, _) => Destination::Direct,
        };

        Self {
            operator_id: config.operator_id,
            keywords: config.block_keywords.iter().map(|k| k.to_lowercase()).collect(),
            destination,
            forwarder: MediaForwarder::new(Arc::clone(&messenger)),
            acks: DeletionScheduler::new(Arc::clone(&messenger), config.ack_delay),
            messenger,
            blocklist,
        }
    }

    pub fn acks(&self) -> &DeletionScheduler {
        &self.acks
    }

    /// Route one inbound message
    pub async fn handle_message(&self, msg: &InboundMessage) -> Outcome {
        if msg.is_service {
            return Outcome::Ignored;
        }
        let Some(sender) = msg.sender.as_ref() else {
            return Outcome::Ignored;
        };

        if let Destination::Topics(router) = &self.destination {
            if msg.chat_id == router.group_chat_id() {
                return self.operator_topic_reply(router, msg).await;
            }
        }

        if sender.id == self.operator_id {
            return if msg.is_private {
                self.operator_direct_reply(msg).await
            } else {
                Outcome::Ignored
            };
        }

        if !msg.is_private {
            return Outcome::Ignored;
        }
        self.relay_inbound(msg, sender).await
    }

    fn matches_keyword(&self, content: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let content = content.to_lowercase();
        self.keywords.iter().any(|k| content.contains(k.as_str()))
    }

    // ============ Contact → operator ============

    async fn relay_inbound(&self, msg: &InboundMessage, sender: &Contact) -> Outcome {
        if self.blocklist.is_blocked(sender.id) {
            debug!("Dropping message from blocked contact {}", sender.id);
            return Outcome::Dropped(DropReason::Blocked);
        }

        if msg.is_command {
            return Outcome::Dropped(DropReason::Command);
        }
        if self.matches_keyword(msg.content()) {
            info!("Dropping message from contact {}: blocked keyword", sender.id);
            return Outcome::Dropped(DropReason::Keyword);
        }

        let Some(payload) = Payload::from_message(msg) else {
            debug!("Unsupported message type from contact {}", sender.id);
            return Outcome::Ignored;
        };
        let payload = envelope_payload(payload, sender);

        let (target, keyboard) = match &self.destination {
            Destination::Direct => (
                ChatTarget::chat(self.operator_id),
                Keyboard::new(vec![
                    vec![Button::contact_link(sender)],
                    vec![admin::block_button(sender.id)],
                ]),
            ),
            Destination::Topics(router) => {
                match router.ensure_subchannel(self.messenger.as_ref(), sender).await {
                    Some(thread_id) => (
                        ChatTarget::topic(router.group_chat_id(), thread_id),
                        Keyboard::single(admin::block_button(sender.id)),
                    ),
                    None => {
                        self.reply(msg, "⚠️ Could not open a conversation right now. Please try again later.")
                            .await;
                        return Outcome::Failed;
                    }
                }
            }
        };

        match self.forwarder.deliver(target, &payload, Some(&keyboard)).await {
            Ok(message) => {
                info!("Relayed {} from contact {}", payload.describe(), sender.id);
                self.acknowledge(msg, &payload).await;
                Outcome::Relayed {
                    contact_id: sender.id,
                    message,
                }
            }
            Err(e) => {
                error!("Failed to relay message from contact {}: {}", sender.id, e);
                self.reply(msg, "⚠️ Your message could not be delivered. Please try again later.")
                    .await;
                Outcome::Failed
            }
        }
    }

    /// Short-lived confirmation for the contact
    async fn acknowledge(&self, msg: &InboundMessage, payload: &Payload) {
        let secs = self.acks.delay().as_secs();
        let text = match payload {
            Payload::Media { media, .. } => {
                format!("✅ {} received! (disappears in {}s)", capitalize(media.kind.label()), secs)
            }
            Payload::Text(_) => format!("✅ Message received! (disappears in {}s)", secs),
        };

        let target = ChatTarget::chat(msg.chat_id).replying_to(msg.message_id);
        match self.messenger.send_text(target, &text, None).await {
            Ok(sent) => self.acks.schedule(sent),
            Err(e) => warn!("Failed to acknowledge contact message in chat {}: {}", msg.chat_id, e),
        }
    }

    // ============ Operator → contact ============

    async fn operator_direct_reply(&self, msg: &InboundMessage) -> Outcome {
        if msg.is_command {
            return Outcome::Ignored;
        }

        if !msg.is_reply {
            debug!("Operator message {} is not a reply", msg.message_id);
            self.reply(
                msg,
                "ℹ️ To answer a contact, reply to one of their relayed messages.",
            )
            .await;
            return Outcome::Unresolved;
        }

        let quoted = msg.reply_to_text.as_deref().unwrap_or("");
        let Some(contact_id) = envelope::extract_contact_id(quoted) else {
            debug!("Operator message {} quotes no contact id", msg.message_id);
            self.reply(
                msg,
                "✗ Could not tell who this reply is for. Reply to a message that carries contact details.",
            )
            .await;
            return Outcome::Unresolved;
        };

        let name = envelope::extract_display_name(quoted);
        self.deliver_to_contact(msg, contact_id, name).await
    }

    async fn operator_topic_reply(&self, router: &TopicRouter, msg: &InboundMessage) -> Outcome {
        // Messages outside any topic are group chatter
        let Some(thread_id) = msg.thread_id else {
            return Outcome::Ignored;
        };
        if msg.is_command {
            return Outcome::Ignored;
        }
        let Some(contact_id) = router.resolve_contact_for_subchannel(thread_id) else {
            debug!("Topic {} is not mapped to a contact", thread_id);
            return Outcome::Ignored;
        };

        let name = router
            .contact_name(contact_id)
            .or_else(|| self.blocklist.get(contact_id).map(|entry| entry.label()));
        self.deliver_to_contact(msg, contact_id, name).await
    }

    async fn deliver_to_contact(&self, msg: &InboundMessage, contact_id: i64, name: Option<String>) -> Outcome {
        let Some(payload) = Payload::from_message(msg) else {
            self.reply(
                msg,
                "ℹ️ Only text, images, documents, video, audio and voice notes can be sent.",
            )
            .await;
            return Outcome::Rejected;
        };

        let name = name.unwrap_or_else(|| format!("Contact {}", contact_id));
        match self.forwarder.deliver(ChatTarget::chat(contact_id), &payload, None).await {
            Ok(_) => {
                info!("Delivered {} reply to contact {}", payload.describe(), contact_id);
                self.reply(msg, &format!("✓ {} reply sent to «{}»", capitalize(&payload.describe()), name))
                    .await;
                Outcome::Delivered { contact_id }
            }
            Err(e) => {
                warn!("Failed to deliver reply to contact {}: {}", contact_id, e);
                self.reply(
                    msg,
                    &format!(
                        "✗ Delivery to contact {} failed. They may have blocked the bot.",
                        contact_id
                    ),
                )
                .await;
                Outcome::Failed
            }
        }
    }

    /// Answer in the chat (and topic) `msg` came from, quoting it
    async fn reply(&self, msg: &InboundMessage, text: &str) {
        let target = ChatTarget {
            chat_id: msg.chat_id,
            thread_id: msg.thread_id,
            reply_to: Some(msg.message_id),
        };
        if let Err(e) = self.messenger.send_text(target, text, None).await {
            warn!("Failed to reply in chat {}: {}", msg.chat_id, e);
        }
    }
}

/// Attach the metadata envelope, synthesizing a caption for bare media
fn envelope_payload(payload: Payload, sender: &Contact) -> Payload {
    match payload {
        Payload::Text(text) => Payload::Text(envelope::wrap_within(&text, sender, MAX_TEXT_CHARS)),
        Payload::Media { media, caption } => {
            let caption = caption.unwrap_or_else(|| format!("Received {} from contact", media.kind.label()));
            Payload::Media {
                caption: Some(envelope::wrap_within(&caption, sender, MAX_CAPTION_CHARS)),
                media,
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::{MediaKind, MediaRef, SendError};
    use crate::store::{BlocklistStore, TopicMapStore};
    use crate::test_support::{Call, RecordingMessenger};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const OPERATOR: i64 = 1000;
    const GROUP: i64 = -100_500;

    struct Fixture {
        _dir: TempDir,
        messenger: Arc<RecordingMessenger>,
        blocklist: Arc<Blocklist>,
        relay: Relay,
    }

    fn config(mode: RelayMode, dir: &Path) -> Config {
        Config {
            bot_token: "t".into(),
            operator_id: OPERATOR,
            mode,
            proxy: None,
            block_keywords: vec!["Casino".into()],
            data_dir: dir.to_path_buf(),
            ack_delay: Duration::from_secs(10),
        }
    }

    fn fixture(mode: RelayMode) -> Fixture {
        let dir = tempdir().unwrap();
        let messenger = RecordingMessenger::new();
        let blocklist = Arc::new(Blocklist::new(BlocklistStore::in_dir(dir.path())));
        let topics = match mode {
            RelayMode::Topic { group_chat_id } => Some(Arc::new(TopicRouter::open(
                group_chat_id,
                TopicMapStore::in_dir(dir.path()),
            ))),
            RelayMode::Direct => None,
        };
        let relay = Relay::new(&config(mode, dir.path()), messenger.clone(), Arc::clone(&blocklist), topics);
        Fixture {
            _dir: dir,
            messenger,
            blocklist,
            relay,
        }
    }

    fn alice() -> Contact {
        Contact::new(4821).with_name("Alice", None)
    }

    fn from_contact(contact: Contact, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: 10,
            chat_id: contact.id,
            is_private: true,
            sender: Some(contact),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn operator_reply(quoted: Option<&str>, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: 20,
            chat_id: OPERATOR,
            is_private: true,
            sender: Some(Contact::new(OPERATOR)),
            text: Some(text.to_string()),
            reply_to_text: quoted.map(str::to_string),
            is_reply: quoted.is_some(),
            ..Default::default()
        }
    }

    fn sent_text(call: &Call) -> &str {
        match call {
            Call::Text { text, .. } => text,
            other => panic!("expected text send, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_direct_relay_wraps_and_acknowledges() {
        let f = fixture(RelayMode::Direct);
        let outcome = f.relay.handle_message(&from_contact(alice(), "hello")).await;
        assert!(matches!(outcome, Outcome::Relayed { contact_id: 4821, .. }));

        let to_operator = f.messenger.sends_to(OPERATOR);
        assert_eq!(to_operator.len(), 1);
        match &to_operator[0] {
            Call::Text { text, keyboard, .. } => {
                assert!(text.starts_with("hello\n\n"));
                assert!(text.contains("contact_id: 4821"));
                assert!(text.contains("name: Alice"));
                let keyboard = keyboard.as_ref().unwrap();
                assert!(keyboard.references_user());
                assert!(keyboard.buttons().any(|b| b.callback_data() == Some("block_user:4821")));
            }
            other => panic!("unexpected {:?}", other),
        }

        let to_contact = f.messenger.sends_to(4821);
        assert_eq!(to_contact.len(), 1);
        assert!(sent_text(&to_contact[0]).starts_with("✅ Message received!"));
        assert_eq!(f.relay.acks().pending(), 1);
    }

    #[tokio::test]
    async fn test_blocked_contact_is_dropped_silently() {
        let f = fixture(RelayMode::Direct);
        f.blocklist.add(4821, "Alice");
        let outcome = f.relay.handle_message(&from_contact(alice(), "hello")).await;
        assert_eq!(outcome, Outcome::Dropped(DropReason::Blocked));
        assert!(f.messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_filter_is_case_insensitive() {
        let f = fixture(RelayMode::Direct);
        let outcome = f
            .relay
            .handle_message(&from_contact(alice(), "Best CASINO deals"))
            .await;
        assert_eq!(outcome, Outcome::Dropped(DropReason::Keyword));
        assert!(f.messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_contact_commands_are_not_relayed() {
        let f = fixture(RelayMode::Direct);
        let command = InboundMessage {
            is_command: true,
            ..from_contact(alice(), "/whatever")
        };
        assert_eq!(f.relay.handle_message(&command).await, Outcome::Dropped(DropReason::Command));
        assert!(f.messenger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_slash_text_that_is_not_a_command_is_relayed() {
        let f = fixture(RelayMode::Direct);
        let doc = InboundMessage {
            text: None,
            caption: Some("/home/me/error.log attached".into()),
            media: Some(MediaRef::new(MediaKind::Document, "d1")),
            ..from_contact(alice(), "")
        };
        assert!(matches!(f.relay.handle_message(&doc).await, Outcome::Relayed { .. }));

        let path = from_contact(alice(), "/etc/hosts looks wrong");
        assert!(matches!(f.relay.handle_message(&path).await, Outcome::Relayed { .. }));

        let to_operator = f.messenger.sends_to(OPERATOR);
        assert_eq!(to_operator.len(), 2);
        match &to_operator[0] {
            Call::Media { caption, .. } => {
                assert!(caption.as_deref().unwrap().starts_with("/home/me/error.log attached\n\n"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bare_media_gets_synthesized_caption() {
        let f = fixture(RelayMode::Direct);
        let msg = InboundMessage {
            text: None,
            media: Some(MediaRef::new(MediaKind::Voice, "v1")),
            ..from_contact(alice(), "")
        };
        f.relay.handle_message(&msg).await;

        match &f.messenger.sends_to(OPERATOR)[0] {
            Call::Media { media, caption, .. } => {
                assert_eq!(media.kind, MediaKind::Voice);
                let caption = caption.as_deref().unwrap();
                assert!(caption.starts_with("Received voice note from contact"));
                assert_eq!(envelope::extract_contact_id(caption), Some(4821));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(sent_text(&f.messenger.sends_to(4821)[0]).starts_with("✅ Voice note received!"));
    }

    #[tokio::test]
    async fn test_privacy_fallback_keeps_block_button() {
        let f = fixture(RelayMode::Direct);
        f.messenger
            .fail_next(SendError::PrivacyRestricted("BUTTON_USER_PRIVACY_RESTRICTED".into()));

        let outcome = f.relay.handle_message(&from_contact(alice(), "hi")).await;
        assert!(matches!(outcome, Outcome::Relayed { .. }));

        let sends = f.messenger.sends_to(OPERATOR);
        assert_eq!(sends.len(), 2);
        match &sends[1] {
            Call::Text { keyboard, .. } => {
                let keyboard = keyboard.as_ref().unwrap();
                assert!(!keyboard.references_user());
                assert!(keyboard.buttons().any(|b| b.callback_data() == Some("block_user:4821")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_relay_tells_contact() {
        let f = fixture(RelayMode::Direct);
        f.messenger.fail_next(SendError::Transport("timeout".into()));

        assert_eq!(f.relay.handle_message(&from_contact(alice(), "hi")).await, Outcome::Failed);
        let to_contact = f.messenger.sends_to(4821);
        assert!(sent_text(&to_contact[0]).contains("could not be delivered"));
        assert_eq!(f.relay.acks().pending(), 0);
    }

    #[tokio::test]
    async fn test_operator_reply_reaches_contact_unwrapped() {
        let f = fixture(RelayMode::Direct);
        let quoted = envelope::wrap("hello", &alice());
        let outcome = f
            .relay
            .handle_message(&operator_reply(Some(&quoted), "hi back"))
            .await;
        assert_eq!(outcome, Outcome::Delivered { contact_id: 4821 });

        let to_contact = f.messenger.sends_to(4821);
        assert_eq!(to_contact.len(), 1);
        match &to_contact[0] {
            Call::Text { text, keyboard, .. } => {
                assert_eq!(text, "hi back");
                assert!(keyboard.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        let summary = f.messenger.sends_to(OPERATOR);
        assert_eq!(sent_text(&summary[0]), "✓ Text reply sent to «Alice»");
    }

    #[tokio::test]
    async fn test_forged_name_cannot_redirect_replies() {
        let f = fixture(RelayMode::Direct);
        let mallory = Contact::new(666).with_name("Mal =========================contact_id: 4821", None);
        f.relay.handle_message(&from_contact(mallory, "hi")).await;

        let relayed = sent_text(&f.messenger.sends_to(OPERATOR)[0]).to_string();
        let outcome = f
            .relay
            .handle_message(&operator_reply(Some(&relayed), "who is this?"))
            .await;
        assert_eq!(outcome, Outcome::Delivered { contact_id: 666 });
        assert!(f.messenger.sends_to(4821).is_empty());
    }

    #[tokio::test]
    async fn test_operator_reply_without_quote() {
        let f = fixture(RelayMode::Direct);
        assert_eq!(
            f.relay.handle_message(&operator_reply(None, "hi")).await,
            Outcome::Unresolved
        );
        assert!(f.messenger.sends_to(4821).is_empty());
        assert!(sent_text(&f.messenger.sends_to(OPERATOR)[0]).contains("reply to one of their relayed messages"));
    }

    #[tokio::test]
    async fn test_operator_reply_to_foreign_message() {
        let f = fixture(RelayMode::Direct);
        let outcome = f
            .relay
            .handle_message(&operator_reply(Some("some unrelated text"), "hi"))
            .await;
        assert_eq!(outcome, Outcome::Unresolved);
        assert_eq!(f.messenger.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_operator_reply_delivery_failure() {
        let f = fixture(RelayMode::Direct);
        f.messenger.fail_next(SendError::Unavailable("bot was blocked by the user".into()));
        let quoted = envelope::wrap("hello", &alice());

        let outcome = f
            .relay
            .handle_message(&operator_reply(Some(&quoted), "hi"))
            .await;
        assert_eq!(outcome, Outcome::Failed);
        assert!(sent_text(&f.messenger.sends_to(OPERATOR)[0]).contains("4821"));
    }

    #[tokio::test]
    async fn test_operator_sticker_is_rejected() {
        let f = fixture(RelayMode::Direct);
        let quoted = envelope::wrap("hello", &alice());
        let msg = InboundMessage {
            text: None,
            ..operator_reply(Some(&quoted), "")
        };
        assert_eq!(f.relay.handle_message(&msg).await, Outcome::Rejected);
        assert!(f.messenger.sends_to(4821).is_empty());
    }

    #[tokio::test]
    async fn test_topic_mode_roundtrip() {
        let f = fixture(RelayMode::Topic { group_chat_id: GROUP });
        let outcome = f.relay.handle_message(&from_contact(alice(), "hello")).await;
        assert!(matches!(outcome, Outcome::Relayed { contact_id: 4821, .. }));

        let to_group = f.messenger.sends_to(GROUP);
        assert_eq!(to_group[0].sent_to().unwrap().thread_id, Some(5));
        match &to_group[0] {
            Call::Text { keyboard, .. } => assert!(!keyboard.as_ref().unwrap().references_user()),
            other => panic!("unexpected {:?}", other),
        }

        // Operator answers inside the topic
        let reply = InboundMessage {
            message_id: 30,
            chat_id: GROUP,
            thread_id: Some(5),
            sender: Some(Contact::new(OPERATOR)),
            text: Some("hi back".into()),
            ..Default::default()
        };
        assert_eq!(f.relay.handle_message(&reply).await, Outcome::Delivered { contact_id: 4821 });
        let summary = f.messenger.sends_to(GROUP);
        assert_eq!(sent_text(summary.last().unwrap()), "✓ Text reply sent to «Alice»");
        let to_contact: Vec<_> = f
            .messenger
            .sends_to(4821)
            .into_iter()
            .filter(|c| matches!(c, Call::Text { text, .. } if text == "hi back"))
            .collect();
        assert_eq!(to_contact.len(), 1);

        // Unmapped topic and General are ignored
        let stray = InboundMessage {
            thread_id: Some(77),
            ..reply.clone()
        };
        assert_eq!(f.relay.handle_message(&stray).await, Outcome::Ignored);
        let general = InboundMessage {
            thread_id: None,
            ..reply
        };
        assert_eq!(f.relay.handle_message(&general).await, Outcome::Ignored);
    }

    #[tokio::test]
    async fn test_topic_creation_failure_tells_contact() {
        let f = fixture(RelayMode::Topic { group_chat_id: GROUP });
        f.messenger.fail_next(SendError::Transport("not enough rights".into()));

        assert_eq!(f.relay.handle_message(&from_contact(alice(), "hello")).await, Outcome::Failed);
        assert!(f.messenger.sends_to(GROUP).is_empty());
        assert!(sent_text(&f.messenger.sends_to(4821)[0]).contains("try again later"));
    }

    #[tokio::test]
    async fn test_service_messages_are_ignored() {
        let f = fixture(RelayMode::Topic { group_chat_id: GROUP });
        let notice = InboundMessage {
            chat_id: GROUP,
            thread_id: Some(5),
            sender: Some(Contact::new(OPERATOR)),
            is_service: true,
            ..Default::default()
        };
        assert_eq!(f.relay.handle_message(&notice).await, Outcome::Ignored);
        assert!(f.messenger.calls().is_empty());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("image and text"), "Image and text");
        assert_eq!(capitalize(""), "");
    }
}
