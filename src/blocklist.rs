//! Blocklist Manager
//!
//! Membership checks, idempotent add, remove and paginated listing on top of
//! [`BlocklistStore`]. The store and its read cache sit behind one mutex, so
//! every read-modify-write cycle is serialized and the cache only changes
//! after the file write succeeded.

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::store::{BlockedContact, BlocklistStore};

/// Entries shown per list page
pub const ITEMS_PER_PAGE: usize = 8;

/// One rendered page of the blocklist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistPage {
    pub items: Vec<BlockedContact>,
    /// Clamped page index
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
}

struct Inner {
    store: BlocklistStore,
    /// `None` until first access or after invalidation
    cache: Option<Vec<BlockedContact>>,
}

impl Inner {
    fn entries(&mut self) -> &Vec<BlockedContact> {
        let store = &self.store;
        self.cache.get_or_insert_with(|| store.load())
    }

    fn commit(&mut self, entries: Vec<BlockedContact>) -> bool {
        match self.store.save(&entries) {
            Ok(written) => {
                self.cache = Some(written);
                true
            }
            Err(e) => {
                error!("Failed to save blocklist {:?}: {}", self.store.path(), e);
                false
            }
        }
    }
}

/// Persistent set of contacts whose messages are dropped
pub struct Blocklist {
    inner: Mutex<Inner>,
}

impl Blocklist {
    pub fn new(store: BlocklistStore) -> Self {
        Self {
            inner: Mutex::new(Inner { store, cache: None }),
        }
    }

    pub fn is_blocked(&self, contact_id: i64) -> bool {
        self.inner
            .lock()
            .entries()
            .iter()
            .any(|e| e.contact_id == contact_id)
    }

    pub fn get(&self, contact_id: i64) -> Option<BlockedContact> {
        self.inner
            .lock()
            .entries()
            .iter()
            .find(|e| e.contact_id == contact_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block a contact.
    ///
    /// Returns `false` without touching disk when the contact is already
    /// blocked and `name` is empty or unchanged. A different non-empty name
    /// refreshes the stored one.
    pub fn add(&self, contact_id: i64, name: &str) -> bool {
        let name = name.trim();
        let mut inner = self.inner.lock();
        let mut entries = inner.entries().clone();

        match entries.iter_mut().find(|e| e.contact_id == contact_id) {
            Some(existing) if !name.is_empty() && existing.name != name => {
                existing.name = name.to_string();
            }
            Some(_) => {
                warn!("Contact {} is already blocked", contact_id);
                return false;
            }
            None => entries.push(BlockedContact::new(contact_id, name)),
        }

        let saved = inner.commit(entries);
        if saved {
            info!("Blocked contact {} ({})", contact_id, if name.is_empty() { "-" } else { name });
        }
        saved
    }

    /// Unblock a contact. `false` if it was not blocked or the write failed.
    pub fn remove(&self, contact_id: i64) -> bool {
        let mut inner = self.inner.lock();
        let entries = inner.entries();
        let before = entries.len();
        let remaining: Vec<BlockedContact> = entries
            .iter()
            .filter(|e| e.contact_id != contact_id)
            .cloned()
            .collect();

        if remaining.len() == before {
            warn!("Contact {} is not in the blocklist", contact_id);
            return false;
        }

        let saved = inner.commit(remaining);
        if saved {
            info!("Unblocked contact {}", contact_id);
        }
        saved
    }

    /// Page `page` of the list in ascending id order. Out of range pages clamp.
    pub fn list(&self, page: i64) -> BlocklistPage {
        let mut inner = self.inner.lock();
        let entries = inner.entries();
        let total = entries.len();
        let total_pages = total.div_ceil(ITEMS_PER_PAGE);
        let page = clamp_page(page, total_pages);

        let items = entries
            .iter()
            .skip(page * ITEMS_PER_PAGE)
            .take(ITEMS_PER_PAGE)
            .cloned()
            .collect();

        BlocklistPage {
            items,
            page,
            total_pages,
            total,
        }
    }

    /// Drop the cache; next access rereads the file
    pub fn reload(&self) {
        self.inner.lock().cache = None;
    }
}

fn clamp_page(page: i64, total_pages: usize) -> usize {
    let last = total_pages.saturating_sub(1) as i64;
    page.clamp(0, last.max(0)) as usize
}
