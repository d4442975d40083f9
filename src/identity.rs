//! Visitor identity
//!
//! A random v4 identifier kept in a root-scoped cookie for a year. It is
//! stable across sessions of the same browser profile.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::host::{CookieAttributes, CookieJar, SameSite};

/// Cookie holding the visitor identifier
pub const IDENTITY_COOKIE: &str = "pt_uuid";

/// Retention of the identity cookie, in days
pub const IDENTITY_RETENTION_DAYS: i64 = 365;

/// Issues and persists the visitor identifier
pub struct IdentityStore;

impl IdentityStore {
    /// Existing identifier, if one was issued before
    pub fn get(cookies: &dyn CookieJar) -> Option<String> {
        cookies
            .get_cookie(IDENTITY_COOKIE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Return the stored identifier, issuing and persisting a new one if absent.
    ///
    /// A failed cookie write still returns the generated identifier so the
    /// current page can report it.
    pub fn get_or_create(cookies: &mut dyn CookieJar, now: DateTime<Utc>) -> String {
        if let Some(existing) = Self::get(cookies) {
            return existing;
        }

        let id = Uuid::new_v4().to_string();
        let attributes = CookieAttributes {
            expires: now + Duration::days(IDENTITY_RETENTION_DAYS),
            path: "/".to_string(),
            same_site: SameSite::Lax,
        };

        match cookies.set_cookie(IDENTITY_COOKIE, &id, &attributes) {
            Ok(()) => debug!(visitor_id = %id, "Issued visitor identifier"),
            Err(err) => warn!(error = %err, "Failed to persist visitor identifier"),
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::sim::MemoryCookies;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_issues_v4_identifier_with_retention() {
        let mut cookies = MemoryCookies::default();
        let id = IdentityStore::get_or_create(&mut cookies, now());

        let parsed = Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 4);

        let (value, attributes) = cookies.entry(IDENTITY_COOKIE).unwrap();
        assert_eq!(value, id);
        assert_eq!(attributes.path, "/");
        assert_eq!(attributes.same_site, SameSite::Lax);
        assert_eq!(attributes.expires, now() + Duration::days(365));
    }

    #[test]
    fn test_identifier_is_stable() {
        let mut cookies = MemoryCookies::default();
        let first = IdentityStore::get_or_create(&mut cookies, now());
        let second = IdentityStore::get_or_create(&mut cookies, now() + Duration::days(3));
        assert_eq!(first, second);
    }

    #[test]
    fn test_failed_write_still_returns_identifier() {
        let mut cookies = MemoryCookies::default();
        cookies.fail_writes(StorageError::Unavailable("cookies disabled".to_string()));

        let id = IdentityStore::get_or_create(&mut cookies, now());
        assert!(!id.is_empty());
        assert!(IdentityStore::get(&cookies).is_none());
    }
}
