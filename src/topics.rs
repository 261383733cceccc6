//! Topic-mode correlation
//!
//! Each contact gets one forum topic in the admin group. Operator messages
//! posted in a topic are routed back to the contact that owns it.
//!
//! Lookups go through a plain mutex that is never held across a network
//! call. Topic creation is serialized per contact only, so concurrent first
//! messages from one contact still create one topic while everyone else's
//! traffic keeps flowing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::contact::Contact;
use crate::messenger::Messenger;
use crate::store::{TopicMap, TopicMapStore};

/// Longest topic title we send
pub const MAX_TITLE_CHARS: usize = 50;

/// Contact ↔ forum topic resolver for one admin group
pub struct TopicRouter {
    group_chat_id: i64,
    store: TopicMapStore,
    map: Mutex<TopicMap>,
    creating: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl TopicRouter {
    /// Load the persisted map for `group_chat_id`
    pub fn open(group_chat_id: i64, store: TopicMapStore) -> Self {
        let map = store.load();
        info!("Topic map loaded: {} contacts ({:?})", map.len(), store.path());
        Self {
            group_chat_id,
            store,
            map: Mutex::new(map),
            creating: Mutex::new(HashMap::new()),
        }
    }

    pub fn group_chat_id(&self) -> i64 {
        self.group_chat_id
    }

    /// Contact owning `thread_id`, or `None` for topics this bot did not create
    pub fn resolve_contact_for_subchannel(&self, thread_id: i32) -> Option<i64> {
        self.map.lock().contact_for(thread_id)
    }

    /// Display name last seen for a mapped contact
    pub fn contact_name(&self, contact_id: i64) -> Option<String> {
        self.map.lock().name_for(contact_id).map(str::to_string)
    }

    /// Existing topic for `contact`, or a freshly created one.
    ///
    /// Returns `None` when the platform refuses to create the topic; nothing
    /// is recorded in that case.
    pub async fn ensure_subchannel(&self, messenger: &dyn Messenger, contact: &Contact) -> Option<i32> {
        if let Some(thread_id) = self.lookup(contact) {
            return Some(thread_id);
        }

        let guard = Arc::clone(self.creating.lock().entry(contact.id).or_default());
        let _creating = guard.lock().await;
        let created = self.create(messenger, contact).await;

        // Waiters still hold a clone; the last one out clears the entry
        let mut creating = self.creating.lock();
        if Arc::strong_count(&guard) == 2 {
            creating.remove(&contact.id);
        }
        created
    }

    /// Mapped topic for `contact`, refreshing its remembered name
    fn lookup(&self, contact: &Contact) -> Option<i32> {
        let mut map = self.map.lock();
        let thread_id = map.topic_for(contact.id)?;
        if map.set_name(contact.id, &contact.display_name()) {
            self.persist(&map);
        }
        Some(thread_id)
    }

    async fn create(&self, messenger: &dyn Messenger, contact: &Contact) -> Option<i32> {
        // Someone else may have finished creating it while we waited
        if let Some(thread_id) = self.lookup(contact) {
            return Some(thread_id);
        }

        let title = topic_title(contact);
        let thread_id = match messenger.create_topic(self.group_chat_id, &title).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to create topic for contact {}: {}", contact.id, e);
                return None;
            }
        };

        let mut map = self.map.lock();
        if !map.insert(contact.id, thread_id) {
            // Platform handed out a thread id we already map to someone else
            error!(
                "Topic {} for contact {} collides with an existing mapping",
                thread_id, contact.id
            );
            return None;
        }
        map.set_name(contact.id, &contact.display_name());

        // The topic exists on the platform now; keep using it even if the
        // write fails so this session does not open duplicates.
        self.persist(&map);

        info!("Opened topic {} for contact {} ({})", thread_id, contact.id, title);
        Some(thread_id)
    }

    fn persist(&self, map: &TopicMap) {
        if let Err(e) = self.store.save(map) {
            warn!("Failed to persist topic map {:?}: {}", self.store.path(), e);
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }
}

fn topic_title(contact: &Contact) -> String {
    contact.display_name().chars().take(MAX_TITLE_CHARS).collect()
}
