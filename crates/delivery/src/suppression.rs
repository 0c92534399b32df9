//! Do-not-contact suppression — scoped block-list with expiry support.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which message class a suppression entry (or query) applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionScope {
    Email,
    Push,
    /// Applies to every message class.
    All,
}

/// Reason why an address was added to the suppression list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    #[default]
    Unsubscribed,
    Bounced,
    Complained,
    Regulatory,
    AdminAction,
}

/// A single suppression record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: Uuid,
    pub address: String,
    pub scope: SuppressionScope,
    pub reason: SuppressionReason,
    pub created_at: DateTime<Utc>,
    /// If set, the entry automatically expires at this time.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// Narrow contract the engine consumes before sending.
pub trait SuppressionChecker: Send + Sync {
    fn is_suppressed(&self, address: &str, scope: SuppressionScope) -> bool;
}

/// Thread-safe suppression list backed by `DashMap`.
pub struct SuppressionList {
    entries: DashMap<String, Vec<SuppressionEntry>>,
}

impl SuppressionList {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a suppression entry for `address`. `ttl_days` is an optional
    /// time-to-live; the entry auto-expires after that period.
    pub fn add(
        &self,
        address: &str,
        scope: SuppressionScope,
        reason: SuppressionReason,
        created_by: &str,
        ttl_days: Option<u32>,
    ) -> SuppressionEntry {
        let now = Utc::now();
        let entry = SuppressionEntry {
            id: Uuid::new_v4(),
            address: address.to_string(),
            scope,
            reason,
            created_at: now,
            expires_at: ttl_days.map(|d| now + Duration::days(i64::from(d))),
            created_by: created_by.to_string(),
        };

        self.entries
            .entry(address.to_string())
            .or_default()
            .push(entry.clone());

        tracing::info!(address, reason = ?entry.reason, "suppression entry added");
        entry
    }

    /// Remove suppression entries for `address`. With `scope: None` every
    /// entry for the address is removed; otherwise only entries of that
    /// exact scope. Returns the number of entries removed.
    pub fn remove(&self, address: &str, scope: Option<SuppressionScope>) -> usize {
        let mut removed = 0usize;

        if let Some(mut list) = self.entries.get_mut(address) {
            let before = list.len();
            match scope {
                None => {
                    removed = before;
                    list.clear();
                }
                Some(s) => {
                    list.retain(|e| e.scope != s);
                    removed = before - list.len();
                }
            }
        }

        // Clean up empty key.
        if let Some(list) = self.entries.get(address) {
            if list.is_empty() {
                drop(list);
                self.entries.remove(address);
            }
        }

        if removed > 0 {
            tracing::info!(address, removed, "suppression entries removed");
        }
        removed
    }

    /// Purge all expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = 0usize;
        let mut keys_to_remove = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let before = entry.value().len();
            entry
                .value_mut()
                .retain(|e| e.expires_at.map(|exp| exp > now).unwrap_or(true));
            purged += before - entry.value().len();
            if entry.value().is_empty() {
                keys_to_remove.push(entry.key().clone());
            }
        }

        for key in keys_to_remove {
            self.entries.remove(&key);
        }

        if purged > 0 {
            tracing::info!(purged, "expired suppression entries purged");
        }
        purged
    }

    /// All entries (including expired) for a given address.
    pub fn get_entries(&self, address: &str) -> Vec<SuppressionEntry> {
        self.entries
            .get(address)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Total number of entries across all addresses.
    pub fn count(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    fn scope_matches(entry: SuppressionScope, query: SuppressionScope) -> bool {
        entry == SuppressionScope::All || query == SuppressionScope::All || entry == query
    }
}

impl SuppressionChecker for SuppressionList {
    /// An `All` entry suppresses every scope; a scoped entry suppresses
    /// its own scope. Expired entries are ignored.
    fn is_suppressed(&self, address: &str, scope: SuppressionScope) -> bool {
        let now = Utc::now();

        let list = match self.entries.get(address) {
            Some(l) => l,
            None => return false,
        };

        list.iter().any(|entry| {
            if let Some(exp) = entry.expires_at {
                if exp <= now {
                    return false;
                }
            }
            Self::scope_matches(entry.scope, scope)
        })
    }
}

impl Default for SuppressionList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_entry_suppresses_all_scopes() {
        let list = SuppressionList::new();
        list.add(
            "user@example.com",
            SuppressionScope::All,
            SuppressionReason::Unsubscribed,
            "test",
            None,
        );

        assert!(list.is_suppressed("user@example.com", SuppressionScope::Email));
        assert!(list.is_suppressed("user@example.com", SuppressionScope::Push));
        assert!(list.is_suppressed("user@example.com", SuppressionScope::All));
        assert!(!list.is_suppressed("other@example.com", SuppressionScope::Email));
    }

    #[test]
    fn test_scoped_entry_only_matches_its_scope() {
        let list = SuppressionList::new();
        list.add(
            "user@example.com",
            SuppressionScope::Email,
            SuppressionReason::Bounced,
            "test",
            None,
        );

        assert!(list.is_suppressed("user@example.com", SuppressionScope::Email));
        assert!(!list.is_suppressed("user@example.com", SuppressionScope::Push));
        // An All-scope query matches any entry.
        assert!(list.is_suppressed("user@example.com", SuppressionScope::All));
    }

    #[test]
    fn test_expiry_respected() {
        let list = SuppressionList::new();
        let entry = SuppressionEntry {
            id: Uuid::new_v4(),
            address: "expired@example.com".to_string(),
            scope: SuppressionScope::All,
            reason: SuppressionReason::AdminAction,
            created_at: Utc::now() - Duration::days(10),
            expires_at: Some(Utc::now() - Duration::days(1)),
            created_by: "test".to_string(),
        };
        list.entries
            .entry("expired@example.com".to_string())
            .or_default()
            .push(entry);

        assert!(!list.is_suppressed("expired@example.com", SuppressionScope::Email));
    }

    #[test]
    fn test_remove_all_and_by_scope() {
        let list = SuppressionList::new();
        list.add(
            "u@x.com",
            SuppressionScope::All,
            SuppressionReason::Bounced,
            "t",
            None,
        );
        list.add(
            "u@x.com",
            SuppressionScope::Email,
            SuppressionReason::Complained,
            "t",
            None,
        );
        assert_eq!(list.count(), 2);

        let removed = list.remove("u@x.com", Some(SuppressionScope::Email));
        assert_eq!(removed, 1);
        assert!(list.is_suppressed("u@x.com", SuppressionScope::Email));

        let removed = list.remove("u@x.com", None);
        assert_eq!(removed, 1);
        assert_eq!(list.count(), 0);
        assert!(!list.is_suppressed("u@x.com", SuppressionScope::Email));
    }

    #[test]
    fn test_purge_expired() {
        let list = SuppressionList::new();
        list.add(
            "keep@x.com",
            SuppressionScope::All,
            SuppressionReason::Bounced,
            "t",
            None,
        );
        let expired = SuppressionEntry {
            id: Uuid::new_v4(),
            address: "gone@x.com".to_string(),
            scope: SuppressionScope::All,
            reason: SuppressionReason::AdminAction,
            created_at: Utc::now() - Duration::days(100),
            expires_at: Some(Utc::now() - Duration::seconds(1)),
            created_by: "test".to_string(),
        };
        list.entries
            .entry("gone@x.com".to_string())
            .or_default()
            .push(expired);

        assert_eq!(list.count(), 2);
        assert_eq!(list.purge_expired(), 1);
        assert_eq!(list.count(), 1);
        assert!(list.is_suppressed("keep@x.com", SuppressionScope::Email));
    }

    #[test]
    fn test_get_entries() {
        let list = SuppressionList::new();
        list.add(
            "u@x.com",
            SuppressionScope::All,
            SuppressionReason::Bounced,
            "t",
            None,
        );
        assert_eq!(list.get_entries("u@x.com").len(), 1);
        assert!(list.get_entries("none@x.com").is_empty());
    }
}
