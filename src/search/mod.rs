//! Backward revision search for the last revision that builds cleanly.
//!
//! Linear, nearest-first, best-effort — builds are expensive, so the walk is
//! capped and returns on the first clean probe. Exhaustion is a normal
//! outcome, not an error. Every candidate is probed in a scoped temporary
//! checkout, so the primary working tree is identical before and after the
//! call on every exit path.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::probe::BuildProbe;
use crate::repo::{RepoAdapter, Revision};

pub struct RevisionSearcher {
    repo: Arc<RepoAdapter>,
    probe: Arc<dyn BuildProbe>,
}

impl RevisionSearcher {
    pub fn new(repo: Arc<RepoAdapter>, probe: Arc<dyn BuildProbe>) -> Self {
        Self { repo, probe }
    }

    /// Walk up to `max_depth` revisions back from the current one and return
    /// the first that builds cleanly, or `None` when the window is exhausted.
    ///
    /// A probe that errors on one candidate (tool crash, timeout) counts as
    /// not-clean and the walk continues — the search is best-effort.
    pub async fn find_last_good_revision(&self, max_depth: usize) -> Result<Option<Revision>> {
        let candidates = self.repo.revisions_back(max_depth).await?;
        info!(
            depth = candidates.len(),
            "searching history for last good revision"
        );

        for (idx, revision) in candidates.iter().enumerate() {
            debug!(
                revision = %revision.short_id(),
                position = idx + 1,
                "probing candidate"
            );

            let checkout = self.repo.checkout_temporary(&revision.id).await?;
            let probed = self.probe.probe(checkout.path()).await;
            if let Err(e) = checkout.remove().await {
                warn!(revision = %revision.short_id(), err = %e, "checkout cleanup failed");
            }

            match probed {
                Ok(report) if report.success => {
                    info!(
                        revision = %revision.short_id(),
                        position = idx + 1,
                        "found last good revision"
                    );
                    return Ok(Some(revision.clone()));
                }
                Ok(report) => {
                    debug!(
                        revision = %revision.short_id(),
                        errors = report.diagnostics.len(),
                        "candidate fails to build"
                    );
                }
                Err(e) => {
                    warn!(revision = %revision.short_id(), err = %e, "probe failed on candidate — skipping");
                }
            }
        }

        info!(depth = max_depth, "no good revision within search window");
        Ok(None)
    }
}
