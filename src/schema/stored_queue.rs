//! pagetrail.queue.v1 schema definition

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CollectorError;
use crate::types::PageBucket;

/// Current stored queue version
pub const STORED_QUEUE_VERSION: u32 = 1;

/// Durable representation of the action queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredQueue {
    pub version: u32,
    pub pages: Vec<PageBucket>,
}

/// How a stored blob was interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaOrigin {
    /// Already at the current version
    Current,
    /// Unversioned bare array, upgraded on read
    MigratedUnversioned,
}

impl StoredQueue {
    pub fn new(pages: Vec<PageBucket>) -> Self {
        Self {
            version: STORED_QUEUE_VERSION,
            pages,
        }
    }

    pub fn to_json(&self) -> Result<String, CollectorError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored blob, migrating or rejecting as needed
    pub fn from_json(raw: &str) -> Result<Self, CollectorError> {
        Self::from_json_with_origin(raw).map(|(queue, _)| queue)
    }

    pub fn from_json_with_origin(raw: &str) -> Result<(Self, SchemaOrigin), CollectorError> {
        let value: Value = serde_json::from_str(raw)?;

        let (pages, origin) = if value.is_array() {
            let pages: Vec<PageBucket> = serde_json::from_value(value)?;
            (pages, SchemaOrigin::MigratedUnversioned)
        } else if value.is_object() {
            let version = value
                .get("version")
                .and_then(Value::as_u64)
                .ok_or_else(|| CollectorError::Schema("missing version tag".to_string()))?;
            if version != u64::from(STORED_QUEUE_VERSION) {
                return Err(CollectorError::UnsupportedVersion(
                    u32::try_from(version).unwrap_or(u32::MAX),
                ));
            }
            let stored: StoredQueue = serde_json::from_value(value)?;
            (stored.pages, SchemaOrigin::Current)
        } else {
            return Err(CollectorError::Schema(
                "expected an object or an array".to_string(),
            ));
        };

        Ok((Self::new(normalize_pages(pages)), origin))
    }

    pub fn action_count(&self) -> usize {
        self.pages.iter().map(|p| p.actions.len()).sum()
    }

    pub fn summary(&self, origin: SchemaOrigin) -> QueueSummary {
        let mut instants = self
            .pages
            .iter()
            .flat_map(|p| p.actions.iter().map(|a| a.timestamp));
        let first = instants.next();
        let last = instants.last().or(first);

        QueueSummary {
            version: self.version,
            origin,
            pages: self.pages.len(),
            actions: self.action_count(),
            urls: self.pages.iter().map(|p| p.url.clone()).collect(),
            first_action_at: first,
            last_action_at: last,
        }
    }
}

/// Human-facing description of a stored queue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub version: u32,
    pub origin: SchemaOrigin,
    pub pages: usize,
    pub actions: usize,
    pub urls: Vec<String>,
    pub first_action_at: Option<DateTime<Utc>>,
    pub last_action_at: Option<DateTime<Utc>>,
}

// Drop empty buckets and merge neighbours that share a URL
fn normalize_pages(pages: Vec<PageBucket>) -> Vec<PageBucket> {
    let mut normalized: Vec<PageBucket> = Vec::with_capacity(pages.len());
    for page in pages.into_iter().filter(|p| !p.actions.is_empty()) {
        match normalized.last_mut() {
            Some(last) if last.url == page.url => last.actions.extend(page.actions),
            _ => normalized.push(page),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionType;

    const UNVERSIONED: &str = r#"[
        {"url": "https://shop.test/", "actions": [
            {"actionType": "enter-page", "actionDate": "2024-01-15T14:00:00.000Z"},
            {"actionType": "onclick", "actionDate": "2024-01-15T14:00:05.000Z", "actionElement": "a#buy"}
        ]},
        {"url": "https://shop.test/cart", "actions": [
            {"actionType": "scroll-depth", "actionDate": "2024-01-15T14:01:00.000Z", "actionNumber": 40}
        ]}
    ]"#;

    #[test]
    fn test_unversioned_array_is_migrated() {
        let (queue, origin) = StoredQueue::from_json_with_origin(UNVERSIONED).unwrap();
        assert_eq!(origin, SchemaOrigin::MigratedUnversioned);
        assert_eq!(queue.version, STORED_QUEUE_VERSION);
        assert_eq!(queue.pages.len(), 2);
        assert_eq!(queue.pages[0].actions[1].action_type, ActionType::Click);
        assert_eq!(queue.pages[1].actions[0].number, Some(40));
    }

    #[test]
    fn test_current_version_round_trip() {
        let queue = StoredQueue::from_json(UNVERSIONED).unwrap();
        let json = queue.to_json().unwrap();
        assert!(json.contains("\"version\":1"));

        let (reparsed, origin) = StoredQueue::from_json_with_origin(&json).unwrap();
        assert_eq!(origin, SchemaOrigin::Current);
        assert_eq!(reparsed, queue);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let err = StoredQueue::from_json(r#"{"version": 7, "pages": []}"#).unwrap_err();
        assert!(matches!(err, CollectorError::UnsupportedVersion(7)));
    }

    #[test]
    fn test_missing_version_is_rejected() {
        let err = StoredQueue::from_json(r#"{"pages": []}"#).unwrap_err();
        assert!(matches!(err, CollectorError::Schema(_)));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(StoredQueue::from_json("not json").is_err());
        assert!(StoredQueue::from_json("42").is_err());
    }

    #[test]
    fn test_adjacent_duplicate_buckets_are_merged() {
        let raw = r#"[
            {"url": "https://a.test/", "actions": [{"actionType": "enter-page", "actionDate": "2024-01-15T14:00:00.000Z"}]},
            {"url": "https://a.test/", "actions": [{"actionType": "exit-page", "actionDate": "2024-01-15T14:00:01.000Z"}]},
            {"url": "https://a.test/x", "actions": []}
        ]"#;
        let queue = StoredQueue::from_json(raw).unwrap();
        assert_eq!(queue.pages.len(), 1);
        assert_eq!(queue.pages[0].actions.len(), 2);
    }

    #[test]
    fn test_summary() {
        let (queue, origin) = StoredQueue::from_json_with_origin(UNVERSIONED).unwrap();
        let summary = queue.summary(origin);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.actions, 3);
        assert_eq!(
            summary.last_action_at.unwrap().to_rfc3339(),
            "2024-01-15T14:01:00+00:00"
        );
    }
}
