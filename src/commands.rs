//! Slash commands
//!
//! `/start` is open to everyone; the rest only answer the operator and are
//! silently ignored for anybody else.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use teloxide::utils::command::BotCommands;
use tracing::{info, warn};

use crate::admin::{self, AdminPanel, CallbackAction};
use crate::blocklist::Blocklist;
use crate::config::RelayMode;
use crate::contact::Contact;
use crate::envelope;
use crate::messenger::{Button, ChatTarget, InboundMessage, Keyboard, Messenger};
use crate::topics::TopicRouter;

pub const HELP_TEXT: &str = "Available commands:\n\
    /start - start the bot\n\
    /help - show this help\n\
    /status - show relay status\n\
    /block_list - manage blocked contacts\n\n\
    Replying:\n\
    • Direct mode: reply to a relayed message to answer its sender\n\
    • Topic mode: write inside the contact's topic\n\
    • Text, images, documents, video, audio and voice notes are supported";

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "snake_case", description = "Available commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "show help")]
    Help,
    #[command(description = "show relay status")]
    Status,
    #[command(description = "manage blocked contacts")]
    BlockList,
}

pub struct Commands {
    operator_id: i64,
    mode: RelayMode,
    messenger: Arc<dyn Messenger>,
    blocklist: Arc<Blocklist>,
    admin: Arc<AdminPanel>,
    topics: Option<Arc<TopicRouter>>,
    started_at: DateTime<Utc>,
}

impl Commands {
    pub fn new(
        operator_id: i64,
        mode: RelayMode,
        messenger: Arc<dyn Messenger>,
        blocklist: Arc<Blocklist>,
        admin: Arc<AdminPanel>,
        topics: Option<Arc<TopicRouter>>,
    ) -> Self {
        Self {
            operator_id,
            mode,
            messenger,
            blocklist,
            admin,
            topics,
            started_at: Utc::now(),
        }
    }

    /// Run `command` sent in `msg`
    pub async fn handle(&self, command: Command, msg: &InboundMessage) {
        let Some(sender) = msg.sender.as_ref() else {
            return;
        };
        let is_operator = sender.id == self.operator_id;
        info!("Command {:?} from {}", command, sender.id);

        match command {
            Command::Start => self.start(msg, sender, is_operator).await,
            _ if !is_operator => {}
            Command::Help => self.reply(msg, HELP_TEXT, None).await,
            Command::Status => {
                let status = self.status_text(sender);
                self.reply(msg, &status, None).await;
            }
            Command::BlockList => {
                self.admin.send_list(reply_target(msg), 0).await;
            }
        }
    }

    async fn start(&self, msg: &InboundMessage, sender: &Contact, is_operator: bool) {
        let handle = sender.handle().unwrap_or_else(|| "not set".to_string());
        let welcome = format!(
            "👋 Welcome!\n\n\
             Your id: {}\n\
             Username: {}\n\n\
             Send a message here and it will reach the operator.",
            sender.id, handle
        );

        if is_operator {
            let keyboard = Keyboard::single(Button::callback(
                "📖 Show help",
                CallbackAction::ShowHelp.encode(),
            ));
            self.reply(msg, &welcome, Some(&keyboard)).await;
            return;
        }

        self.reply(msg, &welcome, None).await;

        if self.blocklist.is_blocked(sender.id) {
            return;
        }
        // Carries the envelope so the operator can answer it directly
        let notice = envelope::wrap("👤 New contact started the bot", sender);
        let keyboard = Keyboard::single(admin::block_button(sender.id));
        if let Err(e) = self
            .messenger
            .send_text(ChatTarget::chat(self.operator_id), &notice, Some(&keyboard))
            .await
        {
            warn!("Failed to notify operator about contact {}: {}", sender.id, e);
        }
    }

    fn status_text(&self, sender: &Contact) -> String {
        let mut status = format!(
            "Relay status: running ✓\n\
             Mode: {}\n\
             Your id: {}\n\
             Operator id: {}\n\
             Blocked contacts: {}",
            self.mode.label(),
            sender.id,
            self.operator_id,
            self.blocklist.len()
        );
        if let Some(topics) = &self.topics {
            status.push_str(&format!(
                "\nAdmin group: {}\nOpen topics: {}",
                topics.group_chat_id(),
                topics.len()
            ));
        }
        status.push_str(&format!(
            "\nUp since: {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        status
    }

    async fn reply(&self, msg: &InboundMessage, text: &str, keyboard: Option<&Keyboard>) {
        if let Err(e) = self.messenger.send_text(reply_target(msg), text, keyboard).await {
            warn!("Failed to answer command in chat {}: {}", msg.chat_id, e);
        }
    }
}

fn reply_target(msg: &InboundMessage) -> ChatTarget {
    ChatTarget {
        chat_id: msg.chat_id,
        thread_id: msg.thread_id,
        reply_to: Some(msg.message_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BlocklistStore;
    use crate::test_support::{Call, RecordingMessenger};
    use tempfile::{tempdir, TempDir};

    const OPERATOR: i64 = 1000;

    fn setup() -> (TempDir, Arc<RecordingMessenger>, Arc<Blocklist>, Commands) {
        let dir = tempdir().unwrap();
        let messenger = RecordingMessenger::new();
        let blocklist = Arc::new(Blocklist::new(BlocklistStore::in_dir(dir.path())));
        let admin = Arc::new(AdminPanel::new(OPERATOR, messenger.clone(), Arc::clone(&blocklist)));
        let commands = Commands::new(
            OPERATOR,
            RelayMode::Direct,
            messenger.clone(),
            Arc::clone(&blocklist),
            admin,
            None,
        );
        (dir, messenger, blocklist, commands)
    }

    fn message_from(contact: Contact, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: 1,
            chat_id: contact.id,
            is_private: true,
            sender: Some(contact),
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("/start", "relaybot").unwrap(), Command::Start);
        assert_eq!(Command::parse("/block_list", "relaybot").unwrap(), Command::BlockList);
        assert_eq!(Command::parse("/status@relaybot", "relaybot").unwrap(), Command::Status);
        assert!(Command::parse("/unknown", "relaybot").is_err());
    }

    #[tokio::test]
    async fn test_start_notifies_operator() {
        let (_dir, messenger, _blocklist, commands) = setup();
        let contact = Contact::new(55).with_name("Dana", None);
        commands.handle(Command::Start, &message_from(contact, "/start")).await;

        assert!(matches!(&messenger.sends_to(55)[0], Call::Text { text, .. } if text.contains("Your id: 55")));
        match &messenger.sends_to(OPERATOR)[0] {
            Call::Text { text, .. } => assert_eq!(envelope::extract_contact_id(text), Some(55)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_from_blocked_contact_is_not_announced() {
        let (_dir, messenger, blocklist, commands) = setup();
        blocklist.add(55, "");
        commands.handle(Command::Start, &message_from(Contact::new(55), "/start")).await;
        assert_eq!(messenger.sends_to(55).len(), 1);
        assert!(messenger.sends_to(OPERATOR).is_empty());
    }

    #[tokio::test]
    async fn test_operator_start_offers_help() {
        let (_dir, messenger, _blocklist, commands) = setup();
        commands.handle(Command::Start, &message_from(Contact::new(OPERATOR), "/start")).await;

        let sends = messenger.sends_to(OPERATOR);
        assert_eq!(sends.len(), 1);
        match &sends[0] {
            Call::Text { keyboard, .. } => {
                let keyboard = keyboard.as_ref().unwrap();
                assert_eq!(keyboard.rows[0][0].callback_data(), Some("show_help"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_operator_only_commands() {
        let (_dir, messenger, _blocklist, commands) = setup();
        for command in [Command::Help, Command::Status, Command::BlockList] {
            commands.handle(command, &message_from(Contact::new(55), "/x")).await;
        }
        assert!(messenger.calls().is_empty());

        commands.handle(Command::Status, &message_from(Contact::new(OPERATOR), "/status")).await;
        match &messenger.calls()[0] {
            Call::Text { text, .. } => {
                assert!(text.contains("Mode: direct"));
                assert!(text.contains("Blocked contacts: 0"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_block_list_command_opens_panel() {
        let (_dir, messenger, blocklist, commands) = setup();
        blocklist.add(7, "Gus");
        commands
            .handle(Command::BlockList, &message_from(Contact::new(OPERATOR), "/block_list"))
            .await;

        match &messenger.calls()[0] {
            Call::Text { text, keyboard, .. } => {
                assert!(text.contains("1 blocked"));
                assert_eq!(keyboard.as_ref().unwrap().rows[0][0].text, "Gus");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
