//! Change-request tracking and outcome feedback.
//!
//! When the orchestrator opens a review request it records the request id
//! and the error signatures it covers. Later, closure events from the
//! external tracker arrive here: merged → success, closed → failure, fed
//! back into the learning store for every associated signature.
//!
//! Idempotency: the status row is advanced `open → merged|closed` by one
//! conditional UPDATE. A second event for the same request matches zero rows
//! and records nothing.

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::learning::{FixOutcome, LearningStore, PatternTransition};
use crate::storage::with_timeout;

// ─── Types ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Open,
    Merged,
    Closed,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::Merged => "merged",
            RequestStatus::Closed => "closed",
        }
    }
}

/// One tracked review request.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChangeRequestRow {
    pub id: String,
    pub title: String,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
    /// Filled in by background fault isolation, when it completes.
    pub culprit_revision: Option<String>,
}

/// A signature carried on a review request, with the confidence it was
/// classified at.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TaggedSignature {
    pub signature: String,
    pub category: String,
    pub confidence: f64,
}

/// What a closure event amounted to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "disposition")]
pub enum FeedbackDisposition {
    /// Not one of ours — ignored.
    NotTracked,
    /// Already resolved — duplicate event, nothing recorded.
    AlreadyResolved,
    /// First closure: outcomes recorded for every associated signature.
    Recorded {
        outcomes: usize,
        transitions: Vec<(String, PatternTransition)>,
    },
}

// ─── ChangeRequestStore ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ChangeRequestStore {
    pool: SqlitePool,
}

impl ChangeRequestStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS change_requests (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL,
                resolved_at TEXT,
                culprit_revision TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .context("failed to create change_requests table")?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS change_request_signatures (
                request_id TEXT NOT NULL,
                signature TEXT NOT NULL,
                category TEXT NOT NULL,
                confidence REAL NOT NULL,
                PRIMARY KEY (request_id, signature)
            )
            ",
        )
        .execute(&self.pool)
        .await
        .context("failed to create change_request_signatures table")?;

        Ok(())
    }

    /// Record a newly opened request and its associated signatures.
    pub async fn track(
        &self,
        id: &str,
        title: &str,
        signatures: &[TaggedSignature],
    ) -> Result<()> {
        with_timeout(async {
            let now = Utc::now().to_rfc3339();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT INTO change_requests (id, title, status, created_at) VALUES (?, ?, 'open', ?)",
            )
            .bind(id)
            .bind(title)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            for sig in signatures {
                sqlx::query(
                    "INSERT OR IGNORE INTO change_request_signatures
                     (request_id, signature, category, confidence) VALUES (?, ?, ?, ?)",
                )
                .bind(id)
                .bind(&sig.signature)
                .bind(&sig.category)
                .bind(sig.confidence)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            info!(request = id, signatures = signatures.len(), "change request tracked");
            Ok(())
        })
        .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ChangeRequestRow>> {
        with_timeout(async {
            let row = sqlx::query_as(
                "SELECT id, title, status, created_at, resolved_at, culprit_revision
                 FROM change_requests WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await
    }

    pub async fn signatures(&self, id: &str) -> Result<Vec<TaggedSignature>> {
        with_timeout(async {
            let rows = sqlx::query_as(
                "SELECT signature, category, confidence
                 FROM change_request_signatures WHERE request_id = ? ORDER BY signature",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    pub async fn open_requests(&self) -> Result<Vec<ChangeRequestRow>> {
        with_timeout(async {
            let rows = sqlx::query_as(
                "SELECT id, title, status, created_at, resolved_at, culprit_revision
                 FROM change_requests WHERE status = 'open' ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }

    /// Atomically advance `open → merged|closed`. Returns `false` when the
    /// request was not open (duplicate event).
    pub async fn resolve_if_open(&self, id: &str, merged: bool) -> Result<bool> {
        with_timeout(async {
            let status = if merged {
                RequestStatus::Merged
            } else {
                RequestStatus::Closed
            };
            let result = sqlx::query(
                "UPDATE change_requests SET status = ?, resolved_at = ?
                 WHERE id = ? AND status = 'open'",
            )
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Attach the isolated culprit revision found by background bisection.
    pub async fn attach_culprit(&self, id: &str, revision: &str) -> Result<()> {
        with_timeout(async {
            sqlx::query("UPDATE change_requests SET culprit_revision = ? WHERE id = ?")
                .bind(revision)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }
}

// ─── OutcomeFeedbackProcessor ─────────────────────────────────────────────────

/// Consumes change-request lifecycle events and closes the learning loop.
///
/// May run in a separate periodic/event-triggered context from build jobs —
/// the store's transaction discipline covers the concurrency.
pub struct OutcomeFeedbackProcessor {
    store: ChangeRequestStore,
    learning: LearningStore,
}

impl OutcomeFeedbackProcessor {
    pub fn new(store: ChangeRequestStore, learning: LearningStore) -> Self {
        Self { store, learning }
    }

    /// Process a merged/closed event for request `id`.
    pub async fn on_change_request_closed(
        &self,
        id: &str,
        merged: bool,
    ) -> Result<FeedbackDisposition> {
        let Some(request) = self.store.get(id).await? else {
            info!(request = id, "closure event for untracked request — ignoring");
            return Ok(FeedbackDisposition::NotTracked);
        };

        if !self.store.resolve_if_open(id, merged).await? {
            info!(
                request = id,
                status = %request.status,
                "duplicate closure event — already resolved"
            );
            return Ok(FeedbackDisposition::AlreadyResolved);
        }

        let outcome = FixOutcome::from_merged(merged);
        let signatures = self.store.signatures(id).await?;
        let mut transitions = Vec::new();

        for sig in &signatures {
            match self
                .learning
                .record_outcome(&sig.signature, &sig.category, outcome)
                .await
            {
                Ok(Some(t)) => transitions.push((sig.signature.clone(), t)),
                Ok(None) => {}
                Err(e) => {
                    // Logged, not fatal: the remaining signatures still count.
                    warn!(signature = %sig.signature, err = %e, "failed to record outcome");
                }
            }
        }

        info!(
            request = id,
            merged,
            outcomes = signatures.len(),
            transitions = transitions.len(),
            "change request outcome recorded"
        );

        Ok(FeedbackDisposition::Recorded {
            outcomes: signatures.len(),
            transitions,
        })
    }
}
