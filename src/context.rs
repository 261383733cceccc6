//! Shared handler state
//!
//! One [`RelayContext`] is built at startup and handed to every update
//! handler. It owns the persistent stores and wires them to the relay,
//! the admin panel and the command handlers.

use std::sync::Arc;
use tracing::info;

use crate::admin::AdminPanel;
use crate::blocklist::Blocklist;
use crate::commands::Commands;
use crate::config::{Config, RelayMode};
use crate::messenger::Messenger;
use crate::relay::Relay;
use crate::store::{BlocklistStore, StoreError, TopicMapStore};
use crate::topics::TopicRouter;

pub struct RelayContext {
    pub blocklist: Arc<Blocklist>,
    pub relay: Relay,
    pub admin: Arc<AdminPanel>,
    pub commands: Commands,
}

impl RelayContext {
    /// Open the stores under `config.data_dir` and wire every component
    pub fn build(config: &Config, messenger: Arc<dyn Messenger>) -> Result<Self, StoreError> {
        let blocklist_store = BlocklistStore::in_dir(&config.data_dir);
        blocklist_store.ensure_exists()?;
        let blocklist = Arc::new(Blocklist::new(blocklist_store));
        info!("Blocklist loaded: {} contacts", blocklist.len());

        let topics = match config.mode {
            RelayMode::Topic { group_chat_id } => Some(Arc::new(TopicRouter::open(
                group_chat_id,
                TopicMapStore::in_dir(&config.data_dir),
            ))),
            RelayMode::Direct => None,
        };

        let admin = Arc::new(AdminPanel::new(
            config.operator_id,
            Arc::clone(&messenger),
            Arc::clone(&blocklist),
        ));
        let relay = Relay::new(
            config,
            Arc::clone(&messenger),
            Arc::clone(&blocklist),
            topics.clone(),
        );
        let commands = Commands::new(
            config.operator_id,
            config.mode,
            messenger,
            Arc::clone(&blocklist),
            Arc::clone(&admin),
            topics,
        );

        Ok(Self {
            blocklist,
            relay,
            admin,
            commands,
        })
    }
}
