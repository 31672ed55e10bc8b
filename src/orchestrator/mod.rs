//! Recovery orchestrator — the top-level decision procedure.
//!
//! Composes the classifier, learning store, fix service, revision searcher
//! and fault isolator into one ordered policy:
//!
//! 1. Clean probe → done.
//! 2. Classify every diagnostic; split into fixable / needs-review.
//! 3. Fixable errors go to the fix service (bounded attempts, integrity
//!    gate, re-probe). Verified fixes are committed and recorded as
//!    successes; leftover needs-review errors get a change request.
//! 4. Otherwise fall back to history: last good revision, or escalate with
//!    a change request and optional background fault isolation.
//!
//! Every terminal outcome carries the classified errors, revision, and
//! request id the presentation layer needs — no error is silently dropped.

pub mod integrity;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::classifier::{Classifier, ErrorObservation};
use crate::config::RecoveryConfig;
use crate::feedback::{ChangeRequestStore, TaggedSignature};
use crate::isolate::{FaultIsolator, IsolationOutcome};
use crate::learning::{FixOutcome, LearningStore};
use crate::probe::{BuildProbe, ProbeReport};
use crate::repo::{RepoAdapter, Revision};
use crate::retry::{self, Attempted};
use crate::search::RevisionSearcher;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── Collaborator seams ───────────────────────────────────────────────────────

/// Opaque fix-suggestion service: full source + the diagnostics to fix in,
/// replacement source out. The orchestrator never trusts the reply blindly —
/// see [`integrity`].
#[async_trait]
pub trait FixService: Send + Sync {
    async fn suggest_fix(&self, source: &str, diagnostics: &[String]) -> Result<String>;
}

/// External change-request tracker: opens a review request and returns its
/// id. Comment formatting/posting details live outside the core.
#[async_trait]
pub trait ChangeRequestNotifier: Send + Sync {
    async fn open_request(
        &self,
        title: &str,
        body: &str,
        signatures: &[TaggedSignature],
    ) -> Result<String>;
}

// ─── Outcome ──────────────────────────────────────────────────────────────────

/// Terminal result of one recovery run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RecoveryOutcome {
    /// Build is clean — either it already was, or every error was fixed and
    /// the re-probe verified it.
    Success { fixed: Vec<ErrorObservation> },
    /// High-confidence errors fixed and committed; the rest await review.
    PartialFixPendingReview {
        request_id: Option<String>,
        fixed: Vec<ErrorObservation>,
        pending: Vec<ErrorObservation>,
    },
    /// No safe fix; a prior revision builds cleanly.
    RecoveredFromHistory {
        revision: Revision,
        errors: Vec<ErrorObservation>,
    },
    /// Nothing recoverable automatically — handed to humans.
    EscalatedForReview {
        request_id: Option<String>,
        errors: Vec<ErrorObservation>,
    },
}

impl RecoveryOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            RecoveryOutcome::Success { .. } => "success",
            RecoveryOutcome::PartialFixPendingReview { .. } => "partial_fix_pending_review",
            RecoveryOutcome::RecoveredFromHistory { .. } => "recovered_from_history",
            RecoveryOutcome::EscalatedForReview { .. } => "escalated_for_review",
        }
    }

    /// Compact report for the embedding pipeline.
    pub fn summary(&self) -> serde_json::Value {
        match self {
            RecoveryOutcome::Success { fixed } => json!({
                "outcome": self.kind(),
                "fixed": fixed.len(),
            }),
            RecoveryOutcome::PartialFixPendingReview {
                request_id,
                fixed,
                pending,
            } => json!({
                "outcome": self.kind(),
                "fixed": fixed.len(),
                "pending": pending.len(),
                "requestId": request_id,
            }),
            RecoveryOutcome::RecoveredFromHistory { revision, errors } => json!({
                "outcome": self.kind(),
                "revision": revision.id,
                "errors": errors.len(),
            }),
            RecoveryOutcome::EscalatedForReview { request_id, errors } => json!({
                "outcome": self.kind(),
                "requestId": request_id,
                "errors": errors.len(),
            }),
        }
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

pub struct RecoveryOrchestrator {
    cfg: RecoveryConfig,
    repo: Arc<RepoAdapter>,
    probe: Arc<dyn BuildProbe>,
    classifier: Arc<Classifier>,
    learning: LearningStore,
    requests: ChangeRequestStore,
    fix_service: Arc<dyn FixService>,
    notifier: Arc<dyn ChangeRequestNotifier>,
    /// Source artifact path, relative to the repository root.
    artifact: PathBuf,
    /// Spawn background fault isolation to enrich escalations.
    pub isolate_in_background: bool,
}

impl RecoveryOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: RecoveryConfig,
        repo: Arc<RepoAdapter>,
        probe: Arc<dyn BuildProbe>,
        classifier: Arc<Classifier>,
        learning: LearningStore,
        requests: ChangeRequestStore,
        fix_service: Arc<dyn FixService>,
        notifier: Arc<dyn ChangeRequestNotifier>,
        artifact: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cfg,
            repo,
            probe,
            classifier,
            learning,
            requests,
            fix_service,
            notifier,
            artifact: artifact.into(),
            isolate_in_background: true,
        }
    }

    /// Probe the working tree, then run the decision procedure on the result.
    pub async fn run(&self) -> Result<RecoveryOutcome> {
        let report = self.probe.probe(self.repo.repo_path()).await?;
        self.recover(report).await
    }

    /// The decision procedure, applied to one probe result.
    pub async fn recover(&self, report: ProbeReport) -> Result<RecoveryOutcome> {
        if report.success {
            info!("build is clean — nothing to recover");
            return Ok(RecoveryOutcome::Success { fixed: vec![] });
        }

        let snapshot = self.learning.snapshot().await?;
        let observations = self
            .classifier
            .classify_all(&report.diagnostics, &snapshot);
        let (fixable, needs_review): (Vec<_>, Vec<_>) =
            observations.into_iter().partition(|o| o.fixable);

        info!(
            fixable = fixable.len(),
            needs_review = needs_review.len(),
            "diagnostics classified"
        );

        if !fixable.is_empty() {
            if let Some(outcome) = self.try_fix(&fixable, &needs_review).await? {
                return Ok(outcome);
            }
            // Fix attempt fell through — the fixable errors are unresolved
            // failures from here on.
        }

        self.recover_from_history(fixable, needs_review).await
    }

    // ── Step 3: auto-fix ─────────────────────────────────────────────────────

    /// Attempt the external fix. `Ok(None)` means the attempt failed and the
    /// caller should fall through to history search.
    async fn try_fix(
        &self,
        fixable: &[ErrorObservation],
        needs_review: &[ErrorObservation],
    ) -> Result<Option<RecoveryOutcome>> {
        let artifact_abs = self.repo.repo_path().join(&self.artifact);
        let original = tokio::fs::read_to_string(&artifact_abs)
            .await
            .with_context(|| format!("failed to read artifact {}", artifact_abs.display()))?;

        // Only the fixable texts go out; needs-review errors are withheld so
        // the service cannot "fix" what a human must look at.
        let diagnostics: Vec<String> = fixable.iter().map(|o| o.raw_text.clone()).collect();

        let attempt = retry::bounded(self.cfg.fix.max_attempts, RETRY_BASE_DELAY, || {
            let source = original.clone();
            let diags = diagnostics.clone();
            async move {
                tokio::time::timeout(
                    self.cfg.fix.timeout(),
                    self.fix_service.suggest_fix(&source, &diags),
                )
                .await
                .map_err(|_| anyhow::anyhow!("fix service timed out"))?
            }
        })
        .await;

        let candidate = match attempt {
            Attempted::Ok(candidate) => candidate,
            Attempted::Failed(reason) => {
                warn!(%reason, "fix service unavailable — falling back to history");
                return Ok(None);
            }
        };

        if let Err(violation) =
            integrity::check_candidate(&original, &candidate, self.cfg.fix.min_source_fraction)
        {
            warn!(%violation, "rejecting fix candidate — integrity violation");
            self.record_outcomes(fixable, FixOutcome::Failure).await;
            return Ok(None);
        }

        tokio::fs::write(&artifact_abs, &candidate)
            .await
            .context("failed to apply fix candidate")?;

        let verified = match self.probe.probe(self.repo.repo_path()).await {
            Ok(report) => report,
            Err(e) => {
                warn!(err = %e, "re-probe failed after applying candidate");
                self.restore_artifact(&artifact_abs, &original).await;
                return Ok(None);
            }
        };

        let snapshot = self.learning.snapshot().await?;
        let remaining = self
            .classifier
            .classify_all(&verified.diagnostics, &snapshot);
        let review_signatures: HashSet<&str> =
            needs_review.iter().map(|o| o.signature.as_str()).collect();
        let only_review_left = remaining
            .iter()
            .all(|o| review_signatures.contains(o.signature.as_str()));

        if !(verified.success || only_review_left) {
            warn!(
                remaining = remaining.len(),
                "candidate did not resolve the fixable errors — restoring source"
            );
            self.record_outcomes(fixable, FixOutcome::Failure).await;
            self.restore_artifact(&artifact_abs, &original).await;
            return Ok(None);
        }

        // Verified: the fixable errors are gone. Commit and record successes.
        self.record_outcomes(fixable, FixOutcome::Success).await;
        let commit_msg = format!("fix: resolve {} compilation error(s)", fixable.len());
        if let Err(e) = self.repo.commit_file(&self.artifact, &commit_msg).await {
            warn!(err = %e, "failed to commit applied fix — leaving working tree changes");
        }

        if needs_review.is_empty() {
            info!(fixed = fixable.len(), "all errors fixed and verified");
            return Ok(Some(RecoveryOutcome::Success {
                fixed: fixable.to_vec(),
            }));
        }

        let request_id = self
            .open_review_request(needs_review, "fixed high-confidence errors; the rest need review")
            .await;
        info!(
            fixed = fixable.len(),
            pending = needs_review.len(),
            request = request_id.as_deref().unwrap_or("-"),
            "partial fix applied"
        );
        Ok(Some(RecoveryOutcome::PartialFixPendingReview {
            request_id,
            fixed: fixable.to_vec(),
            pending: needs_review.to_vec(),
        }))
    }

    // ── Step 4: history fallback ─────────────────────────────────────────────

    async fn recover_from_history(
        &self,
        unfixed: Vec<ErrorObservation>,
        needs_review: Vec<ErrorObservation>,
    ) -> Result<RecoveryOutcome> {
        let searcher = RevisionSearcher::new(self.repo.clone(), self.probe.clone());
        let found = searcher
            .find_last_good_revision(self.cfg.history.max_search_depth)
            .await?;

        let mut errors = needs_review;
        errors.extend(unfixed);

        if let Some(revision) = found {
            info!(revision = %revision.short_id(), "recovered from history");
            return Ok(RecoveryOutcome::RecoveredFromHistory { revision, errors });
        }

        let request_id = self
            .open_review_request(&errors, "no fixable errors and no clean revision in recent history")
            .await;

        if let Some(id) = &request_id {
            if self.isolate_in_background {
                self.spawn_isolation(id.clone());
            }
        }

        info!(
            errors = errors.len(),
            request = request_id.as_deref().unwrap_or("-"),
            "escalated for review"
        );
        Ok(RecoveryOutcome::EscalatedForReview { request_id, errors })
    }

    // ── Change requests ──────────────────────────────────────────────────────

    /// Open a change request for `errors` and track it. Returns `None` (with
    /// a warning) when the external tracker call fails — the outcome still
    /// reports every error.
    async fn open_review_request(
        &self,
        errors: &[ErrorObservation],
        context_line: &str,
    ) -> Option<String> {
        let tagged: Vec<TaggedSignature> = errors
            .iter()
            .map(|o| TaggedSignature {
                signature: o.signature.clone(),
                category: o.category.clone(),
                confidence: o.adjusted_confidence,
            })
            .collect();

        let title = format!("[buildmend] {} error(s) need manual review", errors.len());
        let body = self.build_request_body(errors, context_line).await;

        match self.notifier.open_request(&title, &body, &tagged).await {
            Ok(id) => {
                if let Err(e) = self.requests.track(&id, &title, &tagged).await {
                    warn!(request = %id, err = %e, "failed to track change request");
                }
                Some(id)
            }
            Err(e) => {
                warn!(err = %e, "failed to open change request");
                None
            }
        }
    }

    async fn build_request_body(&self, errors: &[ErrorObservation], context_line: &str) -> String {
        let mut body = format!("Automated build recovery: {context_line}.\n\n");
        for (i, o) in errors.iter().enumerate() {
            body.push_str(&format!(
                "{}. [{}] confidence {:.0}%\n{}\n\n",
                i + 1,
                o.category,
                o.adjusted_confidence * 100.0,
                o.raw_text
            ));
        }
        // Tag the most likely responsible author: whoever made the newest
        // change to this tree.
        if let Ok(head) = self.repo.current_revision().await {
            body.push_str(&format!(
                "Most recent change by {} <{}> ({})\n",
                head.author,
                head.email,
                head.short_id()
            ));
        }
        body
    }

    // ── Background fault isolation ───────────────────────────────────────────

    /// Non-blocking enrichment: find a deeper good bound, bisect, and attach
    /// the culprit to the change request. Failures are logged, never raised.
    fn spawn_isolation(&self, request_id: String) {
        let repo = self.repo.clone();
        let probe = self.probe.clone();
        let requests = self.requests.clone();
        let depth = self.cfg.history.max_search_depth * 2;
        let max_iterations = self.cfg.history.max_bisect_iterations;

        tokio::spawn(async move {
            let searcher = RevisionSearcher::new(repo.clone(), probe.clone());
            let good = match searcher.find_last_good_revision(depth).await {
                Ok(Some(rev)) => rev,
                Ok(None) => {
                    info!(request = %request_id, "isolation skipped — no good bound found");
                    return;
                }
                Err(e) => {
                    warn!(request = %request_id, err = %e, "isolation search failed");
                    return;
                }
            };
            let bad = match repo.current_revision().await {
                Ok(rev) => rev,
                Err(e) => {
                    warn!(request = %request_id, err = %e, "isolation failed to read HEAD");
                    return;
                }
            };

            let isolator = FaultIsolator::new(repo, probe);
            match isolator.isolate_fault(&good.id, &bad.id, max_iterations).await {
                Ok(IsolationOutcome::Isolated(report)) => {
                    info!(
                        request = %request_id,
                        culprit = %report.culprit.short_id(),
                        author = %report.culprit.author,
                        verified = report.verified,
                        "background isolation found the culprit"
                    );
                    if let Err(e) = requests
                        .attach_culprit(&request_id, &report.culprit.id)
                        .await
                    {
                        warn!(request = %request_id, err = %e, "failed to attach culprit");
                    }
                }
                Ok(IsolationOutcome::Inconclusive { iterations, .. }) => {
                    info!(request = %request_id, iterations, "background isolation inconclusive");
                }
                Err(e) => {
                    warn!(request = %request_id, err = %e, "background isolation failed");
                }
            }
        });
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    /// Record one outcome per distinct signature in `observations`.
    async fn record_outcomes(&self, observations: &[ErrorObservation], outcome: FixOutcome) {
        let mut seen = HashSet::new();
        for obs in observations {
            if !seen.insert(obs.signature.as_str()) {
                continue;
            }
            if let Err(e) = self
                .learning
                .record_outcome(&obs.signature, &obs.category, outcome)
                .await
            {
                warn!(signature = %obs.signature, err = %e, "failed to record fix outcome");
            }
        }
    }

    async fn restore_artifact(&self, path: &std::path::Path, original: &str) {
        if let Err(e) = tokio::fs::write(path, original).await {
            warn!(path = %path.display(), err = %e, "failed to restore original source");
        }
    }
}
