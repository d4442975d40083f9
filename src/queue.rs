//! Durable action queue
//!
//! Actions are grouped into page buckets; consecutive actions on the same URL
//! share a bucket. Every append is written through to storage immediately
//! because the page can be torn down at any moment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CollectorError;
use crate::host::Storage;
use crate::schema::{SchemaOrigin, StoredQueue};
use crate::types::{Action, PageBucket};

/// Storage key for the open session's queue
pub const QUEUE_KEY: &str = "pt_eq";

/// Storage key for the cached scroll decile
pub const SCROLL_CACHE_KEY: &str = "pt_sdkey";

/// Ordered page buckets of the open session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionQueue {
    pages: Vec<PageBucket>,
}

/// One entry of the flat action log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedAction {
    pub action: Action,
    pub url: String,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted queue. A missing key yields `None`; a blob that
    /// fails schema checks is removed and also yields `None`.
    pub fn load(storage: &mut dyn Storage) -> Result<Option<Self>, CollectorError> {
        let Some(raw) = storage.get_item(QUEUE_KEY)? else {
            return Ok(None);
        };

        match StoredQueue::from_json_with_origin(&raw) {
            Ok((stored, origin)) => {
                if origin == SchemaOrigin::MigratedUnversioned {
                    debug!("Migrated unversioned stored queue");
                }
                if stored.pages.is_empty() {
                    storage.remove_item(QUEUE_KEY)?;
                    return Ok(None);
                }
                Ok(Some(Self {
                    pages: stored.pages,
                }))
            }
            Err(err) => {
                warn!(error = %err, "Discarding unreadable stored queue");
                storage.remove_item(QUEUE_KEY)?;
                Ok(None)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Number of recorded actions across all buckets
    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.actions.len()).sum()
    }

    pub fn pages(&self) -> &[PageBucket] {
        &self.pages
    }

    pub fn last_url(&self) -> Option<&str> {
        self.pages.last().map(|p| p.url.as_str())
    }

    pub fn last_action(&self) -> Option<&Action> {
        self.pages.last().and_then(|p| p.actions.last())
    }

    pub fn last_action_at(&self) -> Option<DateTime<Utc>> {
        self.last_action().map(|a| a.timestamp)
    }

    /// Append in memory, coalescing into the last bucket when the URL matches
    pub fn push(&mut self, url: &str, action: Action) {
        match self.pages.last_mut() {
            Some(last) if last.url == url => last.actions.push(action),
            _ => self.pages.push(PageBucket {
                url: url.to_string(),
                actions: vec![action],
            }),
        }
    }

    /// Append and write through to storage.
    ///
    /// The in-memory queue keeps the action even when the write fails.
    pub fn record(
        &mut self,
        storage: &mut dyn Storage,
        url: &str,
        action: Action,
    ) -> Result<(), CollectorError> {
        self.push(url, action);
        self.persist(storage)
    }

    pub fn persist(&self, storage: &mut dyn Storage) -> Result<(), CollectorError> {
        let json = StoredQueue::new(self.pages.clone()).to_json()?;
        storage.set_item(QUEUE_KEY, &json)?;
        Ok(())
    }

    /// Remove every bucket and hand them to the caller
    pub fn take(&mut self) -> Vec<PageBucket> {
        std::mem::take(&mut self.pages)
    }

    /// Drop the persisted queue, keeping the scroll cache
    pub fn remove_stored(storage: &mut dyn Storage) -> Result<(), CollectorError> {
        storage.remove_item(QUEUE_KEY)?;
        Ok(())
    }

    /// Drop the persisted queue and scroll cache
    pub fn clear_storage(storage: &mut dyn Storage) -> Result<(), CollectorError> {
        Self::remove_stored(storage)?;
        storage.remove_item(SCROLL_CACHE_KEY)?;
        Ok(())
    }

    /// Cached scroll decile (0-10); 0 when absent or unreadable
    pub fn cached_scroll_decile(storage: &dyn Storage) -> u8 {
        storage
            .get_item(SCROLL_CACHE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.trim().parse::<u8>().ok())
            .map(|d| d.min(10))
            .unwrap_or(0)
    }

    /// Store `decile` if it exceeds the cached value. Returns whether it wrote.
    pub fn cache_scroll_decile(
        storage: &mut dyn Storage,
        decile: u8,
    ) -> Result<bool, CollectorError> {
        if decile <= Self::cached_scroll_decile(storage) {
            return Ok(false);
        }
        storage.set_item(SCROLL_CACHE_KEY, &decile.min(10).to_string())?;
        Ok(true)
    }
}

/// Flatten page buckets into `{action, url}` entries, preserving order
pub fn flatten(pages: &[PageBucket]) -> Vec<LoggedAction> {
    pages
        .iter()
        .flat_map(|page| {
            page.actions.iter().map(move |action| LoggedAction {
                action: action.clone(),
                url: page.url.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::sim::MemoryStorage;
    use crate::types::{ActionInfo, ActionType};
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn action(kind: ActionType, seconds: i64) -> Action {
        Action::new(kind, at(seconds), &ActionInfo::None)
    }

    #[test]
    fn test_same_url_coalesces() {
        let mut queue = ActionQueue::new();
        queue.push("https://a.test/", action(ActionType::EnterPage, 0));
        queue.push("https://a.test/", action(ActionType::Click, 1));

        assert_eq!(queue.pages().len(), 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_changed_url_starts_bucket() {
        let mut queue = ActionQueue::new();
        queue.push("https://a.test/", action(ActionType::EnterPage, 0));
        queue.push("https://a.test/b", action(ActionType::EnterPage, 1));
        queue.push("https://a.test/", action(ActionType::EnterPage, 2));

        let urls: Vec<&str> = queue.pages().iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/", "https://a.test/b", "https://a.test/"]);
        assert_eq!(queue.last_url(), Some("https://a.test/"));
        assert_eq!(queue.last_action_at(), Some(at(2)));
    }

    #[test]
    fn test_record_writes_through() {
        let mut storage = MemoryStorage::default();
        let mut queue = ActionQueue::new();
        queue
            .record(&mut storage, "https://a.test/", action(ActionType::EnterPage, 0))
            .unwrap();

        let raw = storage.get_item(QUEUE_KEY).unwrap().unwrap();
        assert!(raw.contains("\"version\":1"));

        let reloaded = ActionQueue::load(&mut storage).unwrap().unwrap();
        assert_eq!(reloaded, queue);
    }

    #[test]
    fn test_load_discards_rejected_blob() {
        let mut storage = MemoryStorage::default();
        storage
            .set_item(QUEUE_KEY, r#"{"version": 99, "pages": []}"#)
            .unwrap();

        assert!(ActionQueue::load(&mut storage).unwrap().is_none());
        assert!(storage.get_item(QUEUE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_write_failure_keeps_memory_copy() {
        let mut storage = MemoryStorage::default();
        storage.fail_writes(StorageError::QuotaExceeded(QUEUE_KEY.to_string()));

        let mut queue = ActionQueue::new();
        let result = queue.record(&mut storage, "https://a.test/", action(ActionType::EnterPage, 0));

        assert!(matches!(result, Err(CollectorError::Storage(_))));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_empties_queue() {
        let mut queue = ActionQueue::new();
        queue.push("https://a.test/", action(ActionType::EnterPage, 0));
        queue.push("https://a.test/b", action(ActionType::Click, 1));

        let pages = queue.take();
        assert_eq!(pages.len(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_flatten_preserves_order() {
        let mut queue = ActionQueue::new();
        queue.push("https://a.test/", action(ActionType::EnterPage, 0));
        queue.push("https://a.test/b", action(ActionType::Click, 1));
        queue.push("https://a.test/b", action(ActionType::ExitPage, 2));

        let log = flatten(queue.pages());
        let kinds: Vec<ActionType> = log.iter().map(|e| e.action.action_type).collect();
        assert_eq!(
            kinds,
            vec![ActionType::EnterPage, ActionType::Click, ActionType::ExitPage]
        );
        assert_eq!(log[1].url, "https://a.test/b");
    }

    #[test]
    fn test_scroll_cache_only_grows() {
        let mut storage = MemoryStorage::default();
        assert_eq!(ActionQueue::cached_scroll_decile(&storage), 0);

        assert!(ActionQueue::cache_scroll_decile(&mut storage, 4).unwrap());
        assert!(!ActionQueue::cache_scroll_decile(&mut storage, 3).unwrap());
        assert_eq!(ActionQueue::cached_scroll_decile(&storage), 4);

        ActionQueue::clear_storage(&mut storage).unwrap();
        assert_eq!(ActionQueue::cached_scroll_decile(&storage), 0);
    }
}
