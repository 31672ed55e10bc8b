//! Scoped temporary checkout of a single revision.
//!
//! A revision is materialized as an ephemeral Git worktree on a throwaway
//! branch under the adapter's scratch directory. The primary working tree is
//! never modified, so "restore the original state on every exit path" holds
//! by construction; the guard prunes the worktree and deletes its branch on
//! release, and `Drop` is the last-resort cleanup for panic/early-return
//! paths.

use anyhow::{Context as _, Result};
use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct TemporaryCheckout {
    repo_path: PathBuf,
    path: PathBuf,
    worktree_name: String,
    branch: String,
    released: bool,
}

impl TemporaryCheckout {
    /// Materialize revision `id` under `base`.
    pub(crate) async fn create(repo_path: &Path, base: &Path, id: &str) -> Result<Self> {
        let repo_path = repo_path.to_path_buf();
        let base = base.to_path_buf();
        let id = id.to_string();

        tokio::task::spawn_blocking(move || create_blocking(&repo_path, &base, &id))
            .await
            .context("temporary checkout task panicked")?
    }

    /// Directory the revision is materialized at — hand this to the probe.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the checkout: prune the worktree, delete the branch, remove
    /// the directory. Call this on every path; `Drop` only covers panics.
    pub async fn remove(mut self) -> Result<()> {
        self.released = true;
        let repo_path = self.repo_path.clone();
        let path = self.path.clone();
        let name = self.worktree_name.clone();
        let branch = self.branch.clone();

        tokio::task::spawn_blocking(move || release_blocking(&repo_path, &path, &name, &branch))
            .await
            .context("checkout release task panicked")?
    }
}

impl Drop for TemporaryCheckout {
    fn drop(&mut self) {
        if !self.released {
            // Last-resort cleanup; errors are logged, never raised from Drop.
            if let Err(e) =
                release_blocking(&self.repo_path, &self.path, &self.worktree_name, &self.branch)
            {
                warn!(path = %self.path.display(), err = %e, "leaked temporary checkout");
            }
        }
    }
}

// ─── Blocking worktree plumbing ──────────────────────────────────────────────

fn create_blocking(repo_path: &Path, base: &Path, id: &str) -> Result<TemporaryCheckout> {
    let repo = Repository::open(repo_path)
        .context("failed to open repository for temporary checkout")?;
    let commit = repo
        .find_commit(git2::Oid::from_str(id).context("invalid revision id")?)
        .context("revision not found")?;

    let tag = uuid::Uuid::new_v4().simple().to_string();
    let branch_name = format!("buildmend/probe-{}", &tag[..8]);
    // Worktree names may not contain '/'.
    let worktree_name = branch_name.replace('/', "--");
    let path = base.join(&worktree_name);

    std::fs::create_dir_all(base).context("failed to create checkout scratch directory")?;

    let branch = repo
        .branch(&branch_name, &commit, false)
        .with_context(|| format!("failed to create probe branch {branch_name}"))?;

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(branch.get()));
    repo.worktree(&worktree_name, &path, Some(&opts))
        .context("failed to add temporary worktree")?;

    debug!(revision = %id, path = %path.display(), "temporary checkout created");

    Ok(TemporaryCheckout {
        repo_path: repo_path.to_path_buf(),
        path,
        worktree_name,
        branch: branch_name,
        released: false,
    })
}

fn release_blocking(repo_path: &Path, path: &Path, name: &str, branch: &str) -> Result<()> {
    // Directory first — a removed working tree makes the prune unconditional.
    if path.exists() {
        std::fs::remove_dir_all(path).context("failed to remove checkout directory")?;
    }

    let repo = Repository::open(repo_path)
        .context("failed to open repository for checkout release")?;

    if let Ok(wt) = repo.find_worktree(name) {
        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).working_tree(true);
        if let Err(e) = wt.prune(Some(&mut opts)) {
            warn!(worktree = name, err = %e, "worktree prune failed");
        }
    }

    if let Ok(mut b) = repo.find_branch(branch, BranchType::Local) {
        if let Err(e) = b.delete() {
            warn!(branch, err = %e, "probe branch delete failed");
        }
    }

    debug!(worktree = name, "temporary checkout released");
    Ok(())
}
