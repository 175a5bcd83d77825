use crate::models::{AuditRecord, BlacklistEntry};
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

const ENTRY_PREFIX: &str = "blacklist:entry:";
const HISTORY_KEY: &str = "blacklist:history";

/// Durable, expirable identifier blacklist (email or IP) with an append-only
/// audit log.
///
/// Entries are stored without a Redis TTL: an entry past its `expires_at` is
/// logically absent on reads but stays in the store until an explicit
/// `cleanup()`, so operators can still see what expired and why.
#[derive(Clone)]
pub struct BlacklistStore {
    store: Arc<dyn Store>,
}

impl BlacklistStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn entry_key(identifier: &str) -> String {
        format!("{}{}", ENTRY_PREFIX, identifier)
    }

    /// Upsert a blacklist entry and append an "add" audit record.
    /// `expiration_days = None` means permanent.
    pub async fn add(
        &self,
        identifier: &str,
        reason: &str,
        added_by: &str,
        expiration_days: Option<i64>,
    ) -> Result<BlacklistEntry> {
        let now = Utc::now().timestamp();
        let entry = BlacklistEntry {
            identifier: identifier.to_string(),
            reason: reason.to_string(),
            added_at: now,
            added_by: added_by.to_string(),
            expires_at: expiration_days.map(|days| now + days * 86_400),
        };

        let json = serde_json::to_string(&entry)?;
        self.store
            .set(&Self::entry_key(identifier), &json)
            .await
            .context("Failed to store blacklist entry")?;

        self.append_audit("add", identifier, reason, added_by).await?;

        Ok(entry)
    }

    /// Remove an entry if it exists. A missing identifier is a no-op: no
    /// delete, no audit record, just a stderr notice. Returns whether an
    /// entry was actually removed.
    pub async fn remove(&self, identifier: &str, removed_by: &str) -> Result<bool> {
        let key = Self::entry_key(identifier);
        let existing = self
            .store
            .get(&key)
            .await
            .context("Failed to read blacklist entry")?;

        if existing.is_none() {
            eprintln!("Blacklist entry not found for {}", identifier);
            return Ok(false);
        }

        self.store
            .del(&key)
            .await
            .context("Failed to delete blacklist entry")?;

        self.append_audit("remove", identifier, "manual removal", removed_by)
            .await?;

        Ok(true)
    }

    /// Read-path check used by the IP gate and risk scorer. Logically
    /// expired entries count as absent.
    pub async fn is_blacklisted(&self, identifier: &str) -> Result<bool> {
        match self.get(identifier).await? {
            Some(entry) => Ok(!entry.is_expired(Utc::now().timestamp())),
            None => Ok(false),
        }
    }

    /// Fetch one entry, expired or not
    pub async fn get(&self, identifier: &str) -> Result<Option<BlacklistEntry>> {
        let raw = self
            .store
            .get(&Self::entry_key(identifier))
            .await
            .context("Failed to read blacklist entry")?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Enumerate every stored entry, including logically expired ones
    pub async fn list(&self) -> Result<Vec<BlacklistEntry>> {
        let keys = self
            .store
            .keys(&format!("{}*", ENTRY_PREFIX))
            .await
            .context("Failed to enumerate blacklist keys")?;

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(json) = self
                .store
                .get(&key)
                .await
                .context("Failed to read blacklist entry")?
            {
                match serde_json::from_str::<BlacklistEntry>(&json) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => eprintln!("Skipping unparseable blacklist entry {}: {}", key, e),
                }
            }
        }

        entries.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        Ok(entries)
    }

    /// Read the audit log, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<AuditRecord>> {
        let raw = self
            .store
            .lrange(HISTORY_KEY, 0, limit as isize - 1)
            .await
            .context("Failed to read blacklist history")?;

        let mut records = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str::<AuditRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => eprintln!("Skipping unparseable audit record: {}", e),
            }
        }
        Ok(records)
    }

    /// Physically delete every entry whose `expires_at` is strictly in the
    /// past, auditing each removal. Returns the count removed, which can be
    /// zero.
    pub async fn cleanup(&self) -> Result<usize> {
        let now = Utc::now().timestamp();
        let mut removed = 0;

        for entry in self.list().await? {
            if entry.is_expired(now) {
                self.store
                    .del(&Self::entry_key(&entry.identifier))
                    .await
                    .context("Failed to delete expired entry")?;
                self.append_audit("remove", &entry.identifier, "expired", "cleanup")
                    .await?;
                removed += 1;
            }
        }

        println!("Cleaned up {} expired blacklist entries", removed);
        Ok(removed)
    }

    async fn append_audit(
        &self,
        action: &str,
        identifier: &str,
        reason: &str,
        actor: &str,
    ) -> Result<()> {
        let record = AuditRecord {
            action: action.to_string(),
            identifier: identifier.to_string(),
            reason: reason.to_string(),
            actor: actor.to_string(),
            at: Utc::now().timestamp(),
        };
        let json = serde_json::to_string(&record)?;
        self.store
            .lpush(HISTORY_KEY, &json)
            .await
            .context("Failed to append blacklist audit record")?;
        Ok(())
    }
}
