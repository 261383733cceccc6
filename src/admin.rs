//! Admin callback state machine
//!
//! The blocklist UI is a message whose inline keyboard drives it. Every
//! button carries its whole state in the callback payload, so nothing is kept
//! server side between presses:
//!
//! ```text
//! block_user:<id>                  block from a relayed message
//! already_blocked                  disabled "blocked" marker
//! block_list:page:<n>              list page n
//! block_list:user:<id>:page:<n>    detail view, returns to page n
//! unblock_user:<id>:page:<n>       unblock, then back to page n
//! close_block_list                 delete the panel
//! show_help                        send the help text
//! ```

use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::blocklist::{Blocklist, BlocklistPage};
use crate::commands::HELP_TEXT;
use crate::envelope;
use crate::messenger::{Button, CallbackEvent, CallbackOrigin, ChatTarget, Keyboard, Messenger};
use crate::store::BlockedContact;

// ============ Callback payloads ============

/// Decoded button payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    BlockUser(i64),
    AlreadyBlocked,
    ListPage(i64),
    UserDetail { contact_id: i64, page: i64 },
    Unblock { contact_id: i64, page: i64 },
    CloseList,
    ShowHelp,
}

impl CallbackAction {
    /// Encode action as callback data string
    pub fn encode(&self) -> String {
        match self {
            Self::BlockUser(id) => format!("block_user:{}", id),
            Self::AlreadyBlocked => "already_blocked".to_string(),
            Self::ListPage(page) => format!("block_list:page:{}", page),
            Self::UserDetail { contact_id, page } => {
                format!("block_list:user:{}:page:{}", contact_id, page)
            }
            Self::Unblock { contact_id, page } => {
                format!("unblock_user:{}:page:{}", contact_id, page)
            }
            Self::CloseList => "close_block_list".to_string(),
            Self::ShowHelp => "show_help".to_string(),
        }
    }

    /// Decode callback data string to action
    pub fn decode(data: &str) -> Option<Self> {
        let parts: Vec<&str> = data.split(':').collect();
        match parts.as_slice() {
            ["block_user", id] => id.parse().ok().map(Self::BlockUser),
            ["already_blocked"] => Some(Self::AlreadyBlocked),
            ["block_list", "page", page] => page.parse().ok().map(Self::ListPage),
            ["block_list", "user", id, "page", page] => Some(Self::UserDetail {
                contact_id: id.parse().ok()?,
                page: page.parse().ok()?,
            }),
            ["unblock_user", id, "page", page] => Some(Self::Unblock {
                contact_id: id.parse().ok()?,
                page: page.parse().ok()?,
            }),
            ["close_block_list"] => Some(Self::CloseList),
            ["show_help"] => Some(Self::ShowHelp),
            _ => None,
        }
    }
}

/// Block button attached to relayed messages
pub fn block_button(contact_id: i64) -> Button {
    Button::callback("🚫 Block contact", CallbackAction::BlockUser(contact_id).encode())
}

/// Disabled marker that replaces a pressed block button
pub fn blocked_marker() -> Button {
    Button::callback("✅ Blocked", CallbackAction::AlreadyBlocked.encode())
}

fn close_button() -> Button {
    Button::callback("❌ Close", CallbackAction::CloseList.encode())
}

// ============ Views ============

/// Text plus keyboard of one panel screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

/// Which screen the panel shows after a press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    ListPage(usize),
    UserDetail { contact_id: i64, return_page: usize },
    Closed,
}

pub fn list_view(page: &BlocklistPage) -> View {
    if page.total == 0 {
        return View {
            text: "📋 Blocked contacts\n\n\
                   Nobody is blocked right now.\n\n\
                   • Press «🚫 Block contact» under a relayed message to block someone\n\
                   • Use /block_list to open this panel again"
                .to_string(),
            keyboard: Some(Keyboard::single(close_button())),
        };
    }

    let text = format!(
        "📋 Blocked contacts\n\n\
         {} blocked (page {}/{})\n\n\
         • Press a contact to see details\n\
         • Unblock from the detail screen\n\
         • Press «🚫 Block contact» under a relayed message to block someone",
        page.total,
        page.page + 1,
        page.total_pages
    );

    let current = page.page as i64;
    let mut rows: Vec<Vec<Button>> = page
        .items
        .iter()
        .map(|entry| {
            vec![Button::callback(
                &entry.label(),
                CallbackAction::UserDetail {
                    contact_id: entry.contact_id,
                    page: current,
                }
                .encode(),
            )]
        })
        .collect();

    if page.total_pages > 1 {
        let mut nav = Vec::new();
        if page.page > 0 {
            nav.push(Button::callback("⬅️ Previous", CallbackAction::ListPage(current - 1).encode()));
        }
        if page.page + 1 < page.total_pages {
            nav.push(Button::callback("Next ➡️", CallbackAction::ListPage(current + 1).encode()));
        }
        rows.push(nav);
    }

    rows.push(vec![close_button()]);

    View {
        text,
        keyboard: Some(Keyboard::new(rows)),
    }
}

pub fn detail_view(entry: &BlockedContact, return_page: usize) -> View {
    let page = return_page as i64;
    let name = if entry.name.is_empty() { "not set" } else { entry.name.as_str() };

    View {
        text: format!(
            "Blocked contact\n\n\
             ID: {}\n\
             Name: {}\n\n\
             Press «✅ Unblock» to lift the block",
            entry.contact_id, name
        ),
        keyboard: Some(Keyboard::new(vec![
            vec![
                Button::callback("⬅️ Back", CallbackAction::ListPage(page).encode()),
                Button::callback(
                    "✅ Unblock",
                    CallbackAction::Unblock {
                        contact_id: entry.contact_id,
                        page,
                    }
                    .encode(),
                ),
            ],
            vec![close_button()],
        ])),
    }
}

// ============ Panel ============

/// Handles button presses against the blocklist
pub struct AdminPanel {
    operator_id: i64,
    messenger: Arc<dyn Messenger>,
    blocklist: Arc<Blocklist>,
}

impl AdminPanel {
    pub fn new(operator_id: i64, messenger: Arc<dyn Messenger>, blocklist: Arc<Blocklist>) -> Self {
        Self {
            operator_id,
            messenger,
            blocklist,
        }
    }

    /// Send a fresh list panel (page 0 for the /block_list command)
    pub async fn send_list(&self, target: ChatTarget, page: i64) -> AdminState {
        let page = self.blocklist.list(page);
        let view = list_view(&page);
        if let Err(e) = self
            .messenger
            .send_text(target, &view.text, view.keyboard.as_ref())
            .await
        {
            error!("Failed to send blocklist panel: {}", e);
        }
        AdminState::ListPage(page.page)
    }

    /// Process one button press. Returns the new panel state, or `None` when
    /// the panel did not change.
    pub async fn handle_callback(&self, event: &CallbackEvent) -> Option<AdminState> {
        if event.from != self.operator_id {
            warn!("Callback {:?} from non-operator {}", event.data, event.from);
            self.answer(event, Some("This action is reserved for the operator"), true).await;
            return None;
        }

        let Some(action) = CallbackAction::decode(&event.data) else {
            debug!("Ignoring unknown callback payload {:?}", event.data);
            self.answer(event, None, false).await;
            return None;
        };

        let origin = event.origin.as_ref();
        match action {
            CallbackAction::AlreadyBlocked => {
                self.answer(event, Some("This contact is already blocked"), true).await;
                None
            }

            CallbackAction::BlockUser(contact_id) => {
                self.block(event, contact_id).await;
                None
            }

            CallbackAction::ListPage(page) => {
                self.answer(event, None, false).await;
                let page = self.blocklist.list(page);
                self.render(origin, list_view(&page)).await;
                Some(AdminState::ListPage(page.page))
            }

            CallbackAction::UserDetail { contact_id, page } => {
                let Some(entry) = self.blocklist.get(contact_id) else {
                    self.answer(event, Some("This contact is not in the blocklist"), true).await;
                    return None;
                };
                self.answer(event, None, false).await;
                let return_page = self.blocklist.list(page).page;
                self.render(origin, detail_view(&entry, return_page)).await;
                Some(AdminState::UserDetail {
                    contact_id,
                    return_page,
                })
            }

            CallbackAction::Unblock { contact_id, page } => {
                if !self.blocklist.remove(contact_id) {
                    self.answer(event, Some("✗ Unblock failed"), true).await;
                    return None;
                }
                self.answer(event, Some("✓ Contact unblocked"), true).await;
                let page = self.blocklist.list(page);
                self.render(origin, list_view(&page)).await;
                Some(AdminState::ListPage(page.page))
            }

            CallbackAction::CloseList => {
                let deleted = match origin {
                    Some(origin) => self.messenger.delete_message(origin.message).await,
                    None => Ok(()),
                };
                match deleted {
                    Ok(()) => {
                        self.answer(event, None, false).await;
                        Some(AdminState::Closed)
                    }
                    Err(e) => {
                        error!("Failed to delete blocklist panel: {}", e);
                        self.answer(event, Some("Could not delete this message"), true).await;
                        None
                    }
                }
            }

            CallbackAction::ShowHelp => {
                self.answer(event, None, false).await;
                let chat_id = origin.map(|o| o.message.chat_id).unwrap_or(self.operator_id);
                if let Err(e) = self
                    .messenger
                    .send_text(ChatTarget::chat(chat_id), HELP_TEXT, None)
                    .await
                {
                    error!("Failed to send help: {}", e);
                }
                None
            }
        }
    }

    async fn block(&self, event: &CallbackEvent, contact_id: i64) {
        if self.blocklist.is_blocked(contact_id) {
            self.answer(event, Some("This contact is already blocked"), true).await;
            return;
        }

        let origin = event.origin.as_ref();
        let name = origin
            .and_then(|o| o.text.as_deref())
            .and_then(envelope::extract_display_name)
            .unwrap_or_default();

        if !self.blocklist.add(contact_id, &name) {
            self.answer(event, Some("✗ Block failed, please try again"), true).await;
            return;
        }
        self.answer(event, Some("✓ Contact blocked"), true).await;

        // Swap only the pressed button on the relayed message
        let Some(CallbackOrigin {
            message,
            keyboard: Some(keyboard),
            ..
        }) = origin
        else {
            return;
        };
        let mut keyboard = keyboard.clone();
        if keyboard.replace_callback(&event.data, &blocked_marker()) {
            if let Err(e) = self.messenger.edit_keyboard(*message, &keyboard).await {
                error!("Failed to mark block button as done: {}", e);
            }
        }
    }

    /// Edit the panel in place, or post a new one if editing is not possible
    async fn render(&self, origin: Option<&CallbackOrigin>, view: View) {
        let fallback_chat = match origin {
            Some(origin) => {
                match self
                    .messenger
                    .edit_text(origin.message, &view.text, view.keyboard.as_ref())
                    .await
                {
                    Ok(()) => return,
                    Err(e) => {
                        debug!("Panel edit failed ({}), sending a new message", e);
                        origin.message.chat_id
                    }
                }
            }
            None => self.operator_id,
        };

        if let Err(e) = self
            .messenger
            .send_text(ChatTarget::chat(fallback_chat), &view.text, view.keyboard.as_ref())
            .await
        {
            error!("Failed to render blocklist panel: {}", e);
        }
    }

    async fn answer(&self, event: &CallbackEvent, text: Option<&str>, alert: bool) {
        if let Err(e) = self.messenger.answer_callback(&event.id, text, alert).await {
            warn!("Failed to answer callback {}: {}", event.id, e);
        }
    }
}
