// SPDX-License-Identifier: MIT
//! Persistent pattern-learning store.
//!
//! Tracks per-signature fix outcomes and owns the promotion/demotion state
//! machine. Every signature starts low-confidence; promotion to
//! high-confidence requires a run of consecutive successes, demotion happens
//! on consecutive failures or a failure majority. Patterns cycle between the
//! two states indefinitely — there is no terminal state.
//!
//! # State machine
//!
//! ```text
//! LowConfidence ──(promote_threshold consecutive successes)──► Promoted
//!       ▲                                                         │
//!       └──(demote_threshold consecutive failures, or a ──────────┘
//!           failure majority after min_attempts)
//! ```
//!
//! All mutation goes through [`LearningStore::record_outcome`], which runs a
//! single SQLite transaction — the exclusive-acquisition scope that keeps
//! concurrent recorders from interleaving. Readers take snapshot reads
//! without the write lock; slightly stale confidence is an accepted race.

use anyhow::{Context as _, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::LearningConfig;
use crate::storage::with_timeout;

// ─── Types ────────────────────────────────────────────────────────────────────

/// Outcome of one attempted automated fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Success,
    Failure,
}

impl FixOutcome {
    pub fn from_merged(merged: bool) -> Self {
        if merged {
            FixOutcome::Success
        } else {
            FixOutcome::Failure
        }
    }
}

/// State transition produced by a `record_outcome` call, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTransition {
    Promoted,
    Demoted,
}

impl PatternTransition {
    fn as_str(self) -> &'static str {
        match self {
            PatternTransition::Promoted => "promoted",
            PatternTransition::Demoted => "demoted",
        }
    }
}

/// One tracked error pattern. Created on first sighting, never deleted.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Pattern {
    pub signature: String,
    pub category: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub consecutive_successes: i64,
    pub consecutive_failures: i64,
    pub promoted: bool,
    pub promoted_at: Option<String>,
    pub last_update: String,
}

impl Pattern {
    pub fn attempts(&self) -> i64 {
        self.success_count + self.failure_count
    }

    pub fn success_rate(&self) -> f64 {
        self.success_count as f64 / self.attempts().max(1) as f64
    }
}

/// Append-only changelog row for promotion/demotion transitions.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PatternEvent {
    pub id: i64,
    pub signature: String,
    pub action: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub at: String,
}

/// Aggregate view over the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub total_patterns: i64,
    pub promoted_count: i64,
    pub total_attempts: i64,
    pub total_successes: i64,
    pub overall_success_rate: f64,
    pub last_updated: Option<String>,
}

// ─── Snapshot ─────────────────────────────────────────────────────────────────

/// Per-signature summary used by the classifier's pure confidence lookup.
#[derive(Debug, Clone, Copy)]
pub struct PatternSummary {
    pub success_count: i64,
    pub failure_count: i64,
    pub promoted: bool,
}

/// Point-in-time read of the pattern table. Built once per recovery run —
/// classification never holds the database lock.
#[derive(Debug, Clone, Default)]
pub struct LearningSnapshot {
    patterns: HashMap<String, PatternSummary>,
}

impl LearningSnapshot {
    pub fn summary(&self, signature: &str) -> Option<&PatternSummary> {
        self.patterns.get(signature)
    }

    pub fn insert(&mut self, signature: String, summary: PatternSummary) {
        self.patterns.insert(signature, summary);
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ─── LearningStore ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LearningStore {
    pool: SqlitePool,
    cfg: LearningConfig,
}

impl LearningStore {
    pub fn new(pool: SqlitePool, cfg: LearningConfig) -> Self {
        Self { pool, cfg }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS patterns (
                signature TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                consecutive_successes INTEGER NOT NULL DEFAULT 0,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                promoted INTEGER NOT NULL DEFAULT 0,
                promoted_at TEXT,
                last_update TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .context("failed to create patterns table")?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS pattern_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                signature TEXT NOT NULL,
                action TEXT NOT NULL,
                success_count INTEGER NOT NULL,
                failure_count INTEGER NOT NULL,
                at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .context("failed to create pattern_events table")?;

        Ok(())
    }

    /// Record one fix outcome for `signature`, then evaluate promotion and
    /// demotion in that order. Returns the transition, if one fired.
    ///
    /// The whole read-modify-write runs in one transaction so two concurrent
    /// recorders (a build job and the feedback processor) never interleave.
    pub async fn record_outcome(
        &self,
        signature: &str,
        category: &str,
        outcome: FixOutcome,
    ) -> Result<Option<PatternTransition>> {
        with_timeout(async {
            let now = Utc::now().to_rfc3339();
            let mut tx = self.pool.begin().await?;

            sqlx::query(
                "INSERT OR IGNORE INTO patterns (signature, category, last_update) VALUES (?, ?, ?)",
            )
            .bind(signature)
            .bind(category)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let mut pattern: Pattern = sqlx::query_as(
                "SELECT signature, category, success_count, failure_count,
                        consecutive_successes, consecutive_failures,
                        promoted, promoted_at, last_update
                 FROM patterns WHERE signature = ?",
            )
            .bind(signature)
            .fetch_one(&mut *tx)
            .await?;

            // A success resets the consecutive-failure run and vice versa.
            match outcome {
                FixOutcome::Success => {
                    pattern.success_count += 1;
                    pattern.consecutive_successes += 1;
                    pattern.consecutive_failures = 0;
                }
                FixOutcome::Failure => {
                    pattern.failure_count += 1;
                    pattern.consecutive_failures += 1;
                    pattern.consecutive_successes = 0;
                }
            }

            // Promotion first; the reset rule above means both can never be
            // satisfied by the same update.
            let transition = if !pattern.promoted
                && pattern.consecutive_successes >= self.cfg.promote_threshold as i64
            {
                pattern.promoted = true;
                pattern.promoted_at = Some(now.clone());
                Some(PatternTransition::Promoted)
            } else if pattern.promoted && self.demotion_due(&pattern) {
                // Demotion clears the flag and the failure run, never the
                // historical counts.
                pattern.promoted = false;
                pattern.consecutive_failures = 0;
                Some(PatternTransition::Demoted)
            } else {
                None
            };

            sqlx::query(
                "UPDATE patterns
                 SET success_count = ?, failure_count = ?,
                     consecutive_successes = ?, consecutive_failures = ?,
                     promoted = ?, promoted_at = ?, last_update = ?
                 WHERE signature = ?",
            )
            .bind(pattern.success_count)
            .bind(pattern.failure_count)
            .bind(pattern.consecutive_successes)
            .bind(pattern.consecutive_failures)
            .bind(pattern.promoted)
            .bind(&pattern.promoted_at)
            .bind(&now)
            .bind(signature)
            .execute(&mut *tx)
            .await?;

            if let Some(t) = transition {
                sqlx::query(
                    "INSERT INTO pattern_events (signature, action, success_count, failure_count, at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(signature)
                .bind(t.as_str())
                .bind(pattern.success_count)
                .bind(pattern.failure_count)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            match transition {
                Some(PatternTransition::Promoted) => {
                    info!(signature, "pattern promoted to high confidence")
                }
                Some(PatternTransition::Demoted) => {
                    warn!(signature, "pattern demoted to low confidence")
                }
                None => {}
            }

            Ok(transition)
        })
        .await
    }

    fn demotion_due(&self, p: &Pattern) -> bool {
        p.consecutive_failures >= self.cfg.demote_threshold as i64
            || (p.failure_count > p.success_count && p.attempts() >= self.cfg.min_attempts as i64)
    }

    pub async fn get_pattern(&self, signature: &str) -> Result<Option<Pattern>> {
        with_timeout(async {
            let row = sqlx::query_as(
                "SELECT signature, category, success_count, failure_count,
                        consecutive_successes, consecutive_failures,
                        promoted, promoted_at, last_update
                 FROM patterns WHERE signature = ?",
            )
            .bind(signature)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        })
        .await
    }

    /// Whether the promotion criterion currently holds for `signature`.
    pub async fn check_promotion(&self, signature: &str) -> Result<bool> {
        let Some(p) = self.get_pattern(signature).await? else {
            return Ok(false);
        };
        Ok(!p.promoted && p.consecutive_successes >= self.cfg.promote_threshold as i64)
    }

    /// Whether the demotion criterion currently holds for `signature`.
    pub async fn check_demotion(&self, signature: &str) -> Result<bool> {
        let Some(p) = self.get_pattern(signature).await? else {
            return Ok(false);
        };
        Ok(p.promoted && self.demotion_due(&p))
    }

    /// Snapshot read of every pattern — no write lock taken.
    pub async fn snapshot(&self) -> Result<LearningSnapshot> {
        with_timeout(async {
            let rows: Vec<(String, i64, i64, bool)> = sqlx::query_as(
                "SELECT signature, success_count, failure_count, promoted FROM patterns",
            )
            .fetch_all(&self.pool)
            .await?;

            let mut snapshot = LearningSnapshot::default();
            for (signature, success_count, failure_count, promoted) in rows {
                snapshot.insert(
                    signature,
                    PatternSummary {
                        success_count,
                        failure_count,
                        promoted,
                    },
                );
            }
            Ok(snapshot)
        })
        .await
    }

    /// Aggregate statistics over the whole store.
    pub async fn stats(&self) -> Result<LearningStats> {
        with_timeout(async {
            let (total_patterns, promoted_count, total_attempts, total_successes, last_updated): (
                i64,
                i64,
                i64,
                i64,
                Option<String>,
            ) = sqlx::query_as(
                "SELECT COUNT(*),
                        COALESCE(SUM(promoted), 0),
                        COALESCE(SUM(success_count + failure_count), 0),
                        COALESCE(SUM(success_count), 0),
                        MAX(last_update)
                 FROM patterns",
            )
            .fetch_one(&self.pool)
            .await?;

            Ok(LearningStats {
                total_patterns,
                promoted_count,
                total_attempts,
                total_successes,
                overall_success_rate: total_successes as f64 / total_attempts.max(1) as f64,
                last_updated,
            })
        })
        .await
    }

    /// Transition changelog for one signature, oldest first.
    pub async fn events(&self, signature: &str) -> Result<Vec<PatternEvent>> {
        with_timeout(async {
            let rows = sqlx::query_as(
                "SELECT id, signature, action, success_count, failure_count, at
                 FROM pattern_events WHERE signature = ? ORDER BY id",
            )
            .bind(signature)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        })
        .await
    }
}
