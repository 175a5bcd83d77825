use crate::models::{
    Decision, GateError, ReviewDecision, ReviewQueueEntry, RiskAssessment, TransactionContext,
};
use crate::security::BlacklistStore;
use crate::store::Store;
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

const QUEUE_KEY: &str = "review:queue";
const HISTORY_KEY: &str = "review:history";
const DEFAULT_REJECT_REASON: &str = "Rejected in manual review";

/// Durable queue of risk-flagged transactions awaiting human adjudication.
///
/// Entries carry a store-generated id and are removed by an exact-value
/// `LREM`, so a decision lands on the entry the reviewer actually saw even
/// when the queue has shifted underneath them; an entry is processed by at
/// most one decision.
#[derive(Clone)]
pub struct ReviewQueue {
    store: Arc<dyn Store>,
    blacklist: BlacklistStore,
}

impl ReviewQueue {
    pub fn new(store: Arc<dyn Store>, blacklist: BlacklistStore) -> Self {
        Self { store, blacklist }
    }

    /// Queue a high-risk transaction for review. The request itself is still
    /// allowed; only the review outcome can blacklist the identity.
    pub async fn enqueue(
        &self,
        transaction: TransactionContext,
        assessment: RiskAssessment,
    ) -> Result<ReviewQueueEntry> {
        let entry = ReviewQueueEntry {
            id: uuid::Uuid::new_v4().to_string(),
            transaction,
            assessment,
            queued_at: Utc::now().timestamp(),
            status: "pending_review".to_string(),
        };

        let json = serde_json::to_string(&entry)?;
        self.store
            .lpush(QUEUE_KEY, &json)
            .await
            .context("Failed to enqueue review entry")?;

        metrics::counter!("risk_review_queued_total", 1);
        Ok(entry)
    }

    /// Read up to `limit` most recent entries
    pub async fn list(&self, limit: usize) -> Result<Vec<ReviewQueueEntry>> {
        let raw = self
            .store
            .lrange(QUEUE_KEY, 0, limit as isize - 1)
            .await
            .context("Failed to read review queue")?;

        let mut entries = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str::<ReviewQueueEntry>(&json) {
                Ok(entry) => entries.push(entry),
                Err(e) => eprintln!("Skipping unparseable review entry: {}", e),
            }
        }
        Ok(entries)
    }

    /// Adjudicate one entry by id. An unknown id leaves the queue untouched.
    /// Rejecting blacklists both the transaction's email and IP with the
    /// reviewer's notes as the reason.
    pub async fn review(
        &self,
        entry_id: &str,
        decision: Decision,
        reviewed_by: &str,
        notes: Option<String>,
    ) -> Result<ReviewDecision, GateError> {
        // Full snapshot: the queue is operator-scale, not request-scale
        let raw = self
            .store
            .lrange(QUEUE_KEY, 0, -1)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to read review queue")))?;

        let found = raw.iter().find_map(|json| {
            serde_json::from_str::<ReviewQueueEntry>(json)
                .ok()
                .filter(|entry| entry.id == entry_id)
                .map(|entry| (json.clone(), entry))
        });

        let (raw_entry, entry) = match found {
            Some(hit) => hit,
            None => {
                return Err(GateError::Validation("Review entry not found".to_string()));
            }
        };

        // Exact-value removal; count 1 guarantees at most one decision even
        // if two reviewers race on the same id
        let removed = self
            .store
            .lrem(QUEUE_KEY, 1, &raw_entry)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to remove review entry")))?;
        if removed == 0 {
            return Err(GateError::Validation("Review entry not found".to_string()));
        }

        let review = ReviewDecision {
            entry: entry.clone(),
            decision,
            reviewed_by: reviewed_by.to_string(),
            reviewed_at: Utc::now().timestamp(),
            notes: notes.clone(),
        };

        let json = serde_json::to_string(&review)
            .map_err(|e| GateError::Internal(anyhow::Error::new(e).context("Failed to serialize decision")))?;
        self.store
            .lpush(HISTORY_KEY, &json)
            .await
            .map_err(|e| GateError::Internal(e.context("Failed to append decision")))?;

        if decision == Decision::Reject {
            let reason = notes.as_deref().unwrap_or(DEFAULT_REJECT_REASON);
            self.blacklist
                .add(&entry.transaction.email, reason, reviewed_by, None)
                .await
                .map_err(GateError::Internal)?;
            if let Some(ip) = entry.transaction.ip.as_deref() {
                self.blacklist
                    .add(ip, reason, reviewed_by, None)
                    .await
                    .map_err(GateError::Internal)?;
            }
        }

        Ok(review)
    }

    /// Read the decision audit log, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<ReviewDecision>> {
        let raw = self
            .store
            .lrange(HISTORY_KEY, 0, limit as isize - 1)
            .await
            .context("Failed to read review history")?;

        let mut decisions = Vec::with_capacity(raw.len());
        for json in raw {
            match serde_json::from_str::<ReviewDecision>(&json) {
                Ok(decision) => decisions.push(decision),
                Err(e) => eprintln!("Skipping unparseable review decision: {}", e),
            }
        }
        Ok(decisions)
    }

    /// Drop entries older than `max_age_days`; reports the count removed,
    /// including zero
    pub async fn cleanup(&self, max_age_days: i64) -> Result<usize> {
        let cutoff = Utc::now().timestamp() - max_age_days * 86_400;

        let raw = self
            .store
            .lrange(QUEUE_KEY, 0, -1)
            .await
            .context("Failed to read review queue")?;

        let mut removed = 0;
        for json in raw {
            let too_old = serde_json::from_str::<ReviewQueueEntry>(&json)
                .map(|entry| entry.queued_at < cutoff)
                // Unparseable entries can never be reviewed; sweep them too
                .unwrap_or(true);

            if too_old && self
                .store
                .lrem(QUEUE_KEY, 1, &json)
                .await
                .context("Failed to remove stale entry")?
                > 0
            {
                removed += 1;
            }
        }

        println!("Cleaned up {} old entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskAssessment, RiskLevel, TransactionContext};
    use crate::store::memory::MemoryStore;

    fn queue() -> ReviewQueue {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        ReviewQueue::new(store.clone(), BlacklistStore::new(store))
    }

    fn flagged_tx() -> (TransactionContext, RiskAssessment) {
        let tx = TransactionContext {
            booking_id: "b1".to_string(),
            tour_id: "t1".to_string(),
            amount: 12_000.0,
            email: "a@b.com".to_string(),
            ip: Some("1.2.3.4".to_string()),
            user_agent: None,
            correlation_id: "c1".to_string(),
            timestamp: 1_700_000_000,
        };
        let assessment = RiskAssessment {
            score: 55,
            level: RiskLevel::High,
            factors: vec!["Unusual amount".to_string()],
        };
        (tx, assessment)
    }

    #[tokio::test]
    async fn test_enqueue_then_list() {
        let queue = queue();
        let (tx, assessment) = flagged_tx();
        let entry = queue.enqueue(tx, assessment).await.unwrap();

        let listed = queue.list(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, entry.id);
        assert_eq!(listed[0].status, "pending_review");
    }

    #[tokio::test]
    async fn test_unknown_id_leaves_queue_untouched() {
        let queue = queue();
        let (tx, assessment) = flagged_tx();
        queue.enqueue(tx, assessment).await.unwrap();

        match queue
            .review("no-such-id", Decision::Approve, "admin", None)
            .await
        {
            Err(GateError::Validation(msg)) => assert_eq!(msg, "Review entry not found"),
            other => panic!("expected validation error, got {:?}", other),
        }
        assert_eq!(queue.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reject_blacklists_email_and_ip() {
        let queue = queue();
        let (tx, assessment) = flagged_tx();
        let entry = queue.enqueue(tx, assessment).await.unwrap();

        let review = queue
            .review(
                &entry.id,
                Decision::Reject,
                "admin",
                Some("confirmed fraud".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(review.decision, Decision::Reject);

        // Entry is consumed and the decision lands in history
        assert!(queue.list(10).await.unwrap().is_empty());
        let history = queue.history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].entry.id, entry.id);

        // Both identities are blacklisted with the reviewer's notes
        let email_entry = queue.blacklist.get("a@b.com").await.unwrap().unwrap();
        assert_eq!(email_entry.reason, "confirmed fraud");
        let ip_entry = queue.blacklist.get("1.2.3.4").await.unwrap().unwrap();
        assert_eq!(ip_entry.reason, "confirmed fraud");

        // A second decision on the same id finds nothing
        assert!(queue
            .review(&entry.id, Decision::Approve, "admin", None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_approve_does_not_blacklist() {
        let queue = queue();
        let (tx, assessment) = flagged_tx();
        let entry = queue.enqueue(tx, assessment).await.unwrap();

        queue
            .review(&entry.id, Decision::Approve, "admin", None)
            .await
            .unwrap();

        assert!(queue.blacklist.get("a@b.com").await.unwrap().is_none());
        assert!(queue.blacklist.get("1.2.3.4").await.unwrap().is_none());
    }
}
