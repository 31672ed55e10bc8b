//! Fault isolation — binary search for the revision that broke the build.
//!
//! Given a known-good and a known-bad revision, repeatedly probes the
//! midpoint of the interval and narrows to the half containing the
//! good→bad transition. Probe results are cached per revision within a run,
//! so the closing parent/culprit verification usually costs no extra builds.
//! A hard iteration cap bounds worst-case wall-clock cost; hitting it is a
//! normal `Inconclusive` outcome.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::probe::BuildProbe;
use crate::repo::{DiffSummary, RepoAdapter, Revision};

// ─── Types ────────────────────────────────────────────────────────────────────

/// One `(revision tested, result)` step of the narrowing trail.
#[derive(Debug, Clone, Serialize)]
pub struct TrailEntry {
    pub revision: String,
    pub clean: bool,
}

/// Everything the caller needs to present the culprit downstream.
#[derive(Debug, Clone, Serialize)]
pub struct IsolationReport {
    pub culprit: Revision,
    /// Flakiness guard: parent re-probed clean and culprit re-probed dirty.
    pub verified: bool,
    pub diff: DiffSummary,
    pub trail: Vec<TrailEntry>,
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum IsolationOutcome {
    Isolated(IsolationReport),
    /// Interval empty or iteration cap exhausted.
    Inconclusive {
        iterations: u32,
        trail: Vec<TrailEntry>,
    },
}

// ─── FaultIsolator ────────────────────────────────────────────────────────────

pub struct FaultIsolator {
    repo: Arc<RepoAdapter>,
    probe: Arc<dyn BuildProbe>,
}

impl FaultIsolator {
    pub fn new(repo: Arc<RepoAdapter>, probe: Arc<dyn BuildProbe>) -> Self {
        Self { repo, probe }
    }

    /// Binary-search the interval `(known_good, known_bad]` for the revision
    /// that introduced the failure.
    ///
    /// Invariant per iteration: the interval strictly shrinks, so the search
    /// ends in at most ⌈log2(interval)⌉ probes or at `max_iterations`.
    pub async fn isolate_fault(
        &self,
        known_good: &str,
        known_bad: &str,
        max_iterations: u32,
    ) -> Result<IsolationOutcome> {
        let candidates = self.repo.revisions_between(known_good, known_bad).await?;
        if candidates.is_empty() {
            warn!(known_good, known_bad, "empty revision interval — nothing to bisect");
            return Ok(IsolationOutcome::Inconclusive {
                iterations: 0,
                trail: vec![],
            });
        }

        info!(
            interval = candidates.len(),
            good = %&known_good[..known_good.len().min(7)],
            bad = %&known_bad[..known_bad.len().min(7)],
            "bisecting for faulty revision"
        );

        let mut cache: HashMap<String, bool> = HashMap::new();
        let mut trail: Vec<TrailEntry> = Vec::new();
        let mut lo = 0usize;
        let mut hi = candidates.len() - 1;
        let mut iterations = 0u32;

        while lo < hi {
            if iterations >= max_iterations {
                warn!(iterations, "bisection iteration cap exhausted");
                return Ok(IsolationOutcome::Inconclusive { iterations, trail });
            }
            iterations += 1;

            let mid = lo + (hi - lo) / 2;
            let clean = self
                .probe_revision(&candidates[mid], &mut cache, &mut trail)
                .await?;
            if clean {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let culprit = candidates[lo].clone();

        // Flakiness guard: the parent must build, the culprit must not.
        // Cache hits make this free when both ends were probed above.
        let parent_clean = match lo.checked_sub(1).map(|i| candidates[i].clone()) {
            Some(parent) => {
                self.probe_revision(&parent, &mut cache, &mut trail)
                    .await?
            }
            None => {
                // Culprit is the first candidate — its parent is the
                // known-good bound itself.
                match self.repo.parent_of(&culprit.id).await? {
                    Some(parent) => {
                        self.probe_revision(&parent, &mut cache, &mut trail)
                            .await?
                    }
                    None => true,
                }
            }
        };
        let culprit_dirty = !self
            .probe_revision(&culprit, &mut cache, &mut trail)
            .await?;
        let verified = parent_clean && culprit_dirty;
        if !verified {
            warn!(
                culprit = %culprit.short_id(),
                parent_clean,
                culprit_dirty,
                "isolation verification failed — probe may be flaky"
            );
        }

        let diff = self.repo.diff_against_parent(&culprit.id).await?;
        info!(
            culprit = %culprit.short_id(),
            author = %culprit.author,
            verified,
            iterations,
            "fault isolated"
        );

        Ok(IsolationOutcome::Isolated(IsolationReport {
            culprit,
            verified,
            diff,
            trail,
            iterations,
        }))
    }

    /// Probe one revision in a scoped temporary checkout, memoizing the
    /// result for the rest of the run.
    async fn probe_revision(
        &self,
        revision: &Revision,
        cache: &mut HashMap<String, bool>,
        trail: &mut Vec<TrailEntry>,
    ) -> Result<bool> {
        if let Some(&clean) = cache.get(&revision.id) {
            return Ok(clean);
        }

        let checkout = self.repo.checkout_temporary(&revision.id).await?;
        let probed = self.probe.probe(checkout.path()).await;
        if let Err(e) = checkout.remove().await {
            warn!(revision = %revision.short_id(), err = %e, "checkout cleanup failed");
        }

        let clean = probed?.success;
        cache.insert(revision.id.clone(), clean);
        trail.push(TrailEntry {
            revision: revision.id.clone(),
            clean,
        });
        info!(revision = %revision.short_id(), clean, "bisection probe");
        Ok(clean)
    }
}
