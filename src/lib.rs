//! Relaybot
//!
//! Two-way Telegram relay between anonymous contacts and a single operator.
//!
//! # Features
//!
//! - **Direct mode**: contact messages land in the operator's private chat,
//!   replies are routed through the quoted metadata envelope
//! - **Topic mode**: one forum topic per contact in an admin group
//! - **Blocklist**: persisted, paginated, managed from inline buttons
//! - **Keyword filter**: case-insensitive substring drop list
//! - **Media**: images, documents, video, audio and voice notes in both directions
//!
//! # Architecture
//!
//! ```text
//! Contact ──► Telegram ──► Relay ──► Operator chat / admin group topic
//!                            │
//!                            ├── Blocklist (blocklist.json)
//!                            ├── Topics (group_topics.json)
//!                            ├── Envelope (contact metadata)
//!                            ├── Media (privacy fallback)
//!                            └── Timers (ephemeral acks)
//! ```

pub mod admin;
pub mod blocklist;
pub mod commands;
pub mod config;
pub mod contact;
pub mod context;
pub mod envelope;
pub mod media;
pub mod messenger;
pub mod relay;
pub mod store;
pub mod telegram;
pub mod timers;
pub mod topics;

#[cfg(test)]
mod test_support;

pub use admin::{AdminPanel, AdminState, CallbackAction};
pub use blocklist::{Blocklist, BlocklistPage, ITEMS_PER_PAGE};
pub use commands::{Command, Commands};
pub use config::{Config, ConfigError, RelayMode};
pub use contact::Contact;
pub use context::RelayContext;
pub use media::{MediaForwarder, Payload};
pub use messenger::{
    Button, CallbackEvent, ChatTarget, InboundMessage, Keyboard, MediaKind, MediaRef, MessageRef, Messenger,
    SendError,
};
pub use relay::{DropReason, Outcome, Relay};
pub use store::{BlockedContact, BlocklistStore, StoreError, TopicMap, TopicMapStore};
pub use timers::DeletionScheduler;
pub use topics::TopicRouter;
