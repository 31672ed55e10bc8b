//! Revision repository adapter over a local Git history.
//!
//! Wraps `git2` behind the handful of operations the recovery core needs:
//! enumerate recent revisions, describe a revision (author / timestamp /
//! diff stats), materialize a revision into a scoped temporary checkout, and
//! commit an applied fix. All libgit2 work runs in `spawn_blocking` — the
//! `Repository` handle is opened per call and never crosses threads.

pub mod checkout;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use git2::{Oid, Repository, Sort};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub use checkout::TemporaryCheckout;

// ─── Types ────────────────────────────────────────────────────────────────────

/// One revision of the underlying history. The core only reads these.
#[derive(Debug, Clone, Serialize)]
pub struct Revision {
    /// Full object id (hex).
    pub id: String,
    pub author: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
    /// First line of the commit message.
    pub summary: String,
}

impl Revision {
    /// Abbreviated id for log lines.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(7)]
    }
}

/// Size of the change a revision introduced, for downstream notification.
#[derive(Debug, Clone, Serialize)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

// ─── Adapter ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RepoAdapter {
    repo_path: PathBuf,
    /// Scratch directory that temporary checkouts are materialized under.
    checkout_base: PathBuf,
}

impl RepoAdapter {
    pub fn new(repo_path: impl Into<PathBuf>, checkout_base: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            checkout_base: checkout_base.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// The revision the working tree is currently at.
    pub async fn current_revision(&self) -> Result<Revision> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            let commit = repo
                .head()
                .context("repository has no HEAD")?
                .peel_to_commit()
                .context("HEAD does not point to a commit")?;
            Ok(revision_from_commit(&commit))
        })
        .await
        .context("current_revision task panicked")?
    }

    /// Up to `n` revisions preceding the current one, nearest first.
    /// The current revision itself is not included.
    pub async fn revisions_back(&self, n: usize) -> Result<Vec<Revision>> {
        let repo_path = self.repo_path.clone();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            let mut walk = repo.revwalk().context("failed to start revision walk")?;
            walk.push_head().context("failed to push HEAD onto walk")?;
            walk.set_sorting(Sort::TOPOLOGICAL)?;

            let mut revisions = Vec::with_capacity(n);
            for oid in walk.skip(1).take(n) {
                let commit = repo.find_commit(oid?)?;
                revisions.push(revision_from_commit(&commit));
            }
            Ok(revisions)
        })
        .await
        .context("revisions_back task panicked")?
    }

    /// Revisions strictly after `good_id` up to and including `bad_id`,
    /// oldest first — the candidate interval for fault isolation.
    pub async fn revisions_between(&self, good_id: &str, bad_id: &str) -> Result<Vec<Revision>> {
        let repo_path = self.repo_path.clone();
        let good = good_id.to_string();
        let bad = bad_id.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            let mut walk = repo.revwalk().context("failed to start revision walk")?;
            walk.push(Oid::from_str(&bad).context("bad revision id")?)?;
            walk.hide(Oid::from_str(&good).context("good revision id")?)?;
            walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

            let mut revisions = Vec::new();
            for oid in walk {
                let commit = repo.find_commit(oid?)?;
                revisions.push(revision_from_commit(&commit));
            }
            Ok(revisions)
        })
        .await
        .context("revisions_between task panicked")?
    }

    /// First parent of `id`, or `None` for a root commit.
    pub async fn parent_of(&self, id: &str) -> Result<Option<Revision>> {
        let repo_path = self.repo_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            let commit = repo.find_commit(Oid::from_str(&id)?)?;
            Ok(commit.parents().next().map(|p| revision_from_commit(&p)))
        })
        .await
        .context("parent_of task panicked")?
    }

    /// Author name and email of `id`.
    pub async fn author_of(&self, id: &str) -> Result<(String, String)> {
        let repo_path = self.repo_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            let commit = repo.find_commit(Oid::from_str(&id)?)?;
            let author = commit.author();
            Ok((
                author.name().unwrap_or("unknown").to_string(),
                author.email().unwrap_or("").to_string(),
            ))
        })
        .await
        .context("author_of task panicked")?
    }

    /// Diff stats of `id` against its first parent (empty tree for a root
    /// commit).
    pub async fn diff_against_parent(&self, id: &str) -> Result<DiffSummary> {
        let repo_path = self.repo_path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            let commit = repo.find_commit(Oid::from_str(&id)?)?;
            let tree = commit.tree()?;
            let parent_tree = commit
                .parents()
                .next()
                .map(|p| p.tree())
                .transpose()?;

            let diff =
                repo.diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)?;
            let stats = diff.stats().context("failed to compute diff stats")?;
            Ok(DiffSummary {
                files_changed: stats.files_changed(),
                insertions: stats.insertions(),
                deletions: stats.deletions(),
            })
        })
        .await
        .context("diff_against_parent task panicked")?
    }

    /// Materialize `id` into a scoped temporary checkout.
    ///
    /// The primary working tree is never touched: the revision is checked out
    /// as an ephemeral detached worktree under the scratch directory, and the
    /// returned guard prunes it on every exit path.
    pub async fn checkout_temporary(&self, id: &str) -> Result<TemporaryCheckout> {
        TemporaryCheckout::create(&self.repo_path, &self.checkout_base, id).await
    }

    /// Stage `rel_path` and commit it on the current branch. Returns the new
    /// revision. Used after a verified fix has been applied.
    pub async fn commit_file(&self, rel_path: &Path, message: &str) -> Result<Revision> {
        let repo_path = self.repo_path.clone();
        let rel_path = rel_path.to_path_buf();
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            let repo = open(&repo_path)?;
            if rel_path.is_absolute() {
                bail!("commit_file takes a path relative to the repository root");
            }

            let mut index = repo.index().context("failed to read index")?;
            index
                .add_path(&rel_path)
                .with_context(|| format!("failed to stage {}", rel_path.display()))?;
            index.write()?;
            let tree_id = index.write_tree()?;
            let tree = repo.find_tree(tree_id)?;

            let head = repo.head().context("repository has no HEAD")?;
            let parent = head.peel_to_commit()?;
            let sig = git2::Signature::now("buildmend", "buildmend@localhost")
                .context("failed to build commit signature")?;

            let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
            let commit = repo.find_commit(oid)?;
            debug!(id = %oid, "committed applied fix");
            Ok(revision_from_commit(&commit))
        })
        .await
        .context("commit_file task panicked")?
    }
}

// ─── Blocking helpers ─────────────────────────────────────────────────────────

fn open(repo_path: &Path) -> Result<Repository> {
    Repository::open(repo_path)
        .with_context(|| format!("failed to open repository at {}", repo_path.display()))
}

fn revision_from_commit(commit: &git2::Commit<'_>) -> Revision {
    let author = commit.author();
    Revision {
        id: commit.id().to_string(),
        author: author.name().unwrap_or("unknown").to_string(),
        email: author.email().unwrap_or("").to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
            .unwrap_or_default(),
        summary: commit.summary().unwrap_or("").to_string(),
    }
}
