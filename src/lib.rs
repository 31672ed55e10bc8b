//! buildmend — build-recovery engine.
//!
//! Recovers automated builds from compilation failures: classifies each
//! diagnostic with learning-adjusted confidence, hands safe errors to an
//! external fix service, and falls back to revision history (last-good
//! search, fault bisection) when an automated fix is not trustworthy. Fix
//! outcomes feed back into a persistent pattern store, so confidence adapts
//! across runs.

pub mod classifier;
pub mod config;
pub mod feedback;
pub mod isolate;
pub mod learning;
pub mod orchestrator;
pub mod probe;
pub mod repo;
pub mod retry;
pub mod search;
pub mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use classifier::Classifier;
use config::RecoveryConfig;
use feedback::{ChangeRequestStore, OutcomeFeedbackProcessor};
use learning::LearningStore;
use orchestrator::{ChangeRequestNotifier, FixService, RecoveryOrchestrator};
use probe::BuildProbe;
use repo::RepoAdapter;

/// Wired-together recovery engine for one repository.
///
/// Owns the shared SQLite pool and hands pre-connected components to the
/// embedding job runner. One build job holds one context; the feedback
/// processor may also run from a separate context against the same database.
pub struct RecoveryContext {
    pub config: RecoveryConfig,
    pub repo: Arc<RepoAdapter>,
    pub probe: Arc<dyn BuildProbe>,
    pub classifier: Arc<Classifier>,
    pub learning: LearningStore,
    pub requests: ChangeRequestStore,
    pub orchestrator: RecoveryOrchestrator,
    pub feedback: OutcomeFeedbackProcessor,
}

impl RecoveryContext {
    /// Open the database, run migrations, and wire every component.
    ///
    /// `artifact` is the source file under recovery, relative to `repo_path`.
    pub async fn init(
        config: RecoveryConfig,
        repo_path: impl Into<PathBuf>,
        artifact: impl AsRef<Path>,
        probe: Arc<dyn BuildProbe>,
        fix_service: Arc<dyn FixService>,
        notifier: Arc<dyn ChangeRequestNotifier>,
    ) -> Result<Self> {
        let pool = storage::open_pool(&config.db_path).await?;

        let learning = LearningStore::new(pool.clone(), config.learning.clone());
        learning.migrate().await?;
        let requests = ChangeRequestStore::new(pool);
        requests.migrate().await?;

        let repo = Arc::new(RepoAdapter::new(
            repo_path.into(),
            config.data_dir.join("checkouts"),
        ));
        let classifier = Arc::new(Classifier::new(config.learning.clone()));

        let orchestrator = RecoveryOrchestrator::new(
            config.clone(),
            repo.clone(),
            probe.clone(),
            classifier.clone(),
            learning.clone(),
            requests.clone(),
            fix_service,
            notifier,
            artifact.as_ref(),
        );
        let feedback = OutcomeFeedbackProcessor::new(requests.clone(), learning.clone());

        Ok(Self {
            config,
            repo,
            probe,
            classifier,
            learning,
            requests,
            orchestrator,
            feedback,
        })
    }
}
