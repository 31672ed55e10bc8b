//! Shared fixtures: a real temp Git history plus scripted collaborators.
#![allow(dead_code)] // each test binary uses a different subset

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use buildmend::feedback::TaggedSignature;
use buildmend::orchestrator::{ChangeRequestNotifier, FixService};
use buildmend::probe::{BuildProbe, ProbeReport};

/// Call at the top of a test to see `RUST_LOG`-filtered engine logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// ─── Git fixture ─────────────────────────────────────────────────────────────

/// A throwaway repository whose history is driven by the tests.
pub struct GitFixture {
    _dir: TempDir,
    pub path: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("repo");
        std::fs::create_dir_all(&path).expect("repo dir");
        git2::Repository::init(&path).expect("git init");
        Self { _dir: dir, path }
    }

    /// Commit `content` to `file`, authored by `author`. Returns the new
    /// revision id.
    pub fn commit(&self, file: &str, content: &str, author: &str) -> String {
        let repo = git2::Repository::open(&self.path).expect("open repo");
        std::fs::write(self.path.join(file), content).expect("write file");

        let mut index = repo.index().expect("index");
        index.add_path(Path::new(file)).expect("stage");
        index.write().expect("index write");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("tree");

        let sig = git2::Signature::now(author, &format!("{author}@example.com"))
            .expect("signature");
        let parents: Vec<git2::Commit> = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().expect("head commit")],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();

        let oid = repo
            .commit(
                Some("HEAD"),
                &sig,
                &sig,
                &format!("update {file}"),
                &tree,
                &parent_refs,
            )
            .expect("commit");
        oid.to_string()
    }

    /// Build a linear history of `n + 1` commits where commit `i` writes
    /// `marker(i)` to `build.marker`. Returns the ids, oldest first.
    pub fn marker_history(&self, n: usize, marker: impl Fn(usize) -> String) -> Vec<String> {
        (0..=n)
            .map(|i| self.commit("build.marker", &marker(i), "alice"))
            .collect()
    }

    pub fn head_id(&self) -> String {
        let repo = git2::Repository::open(&self.path).expect("open repo");
        let id = repo
            .head()
            .expect("head")
            .peel_to_commit()
            .expect("commit")
            .id()
            .to_string();
        id
    }

    pub fn head_summary(&self) -> String {
        let repo = git2::Repository::open(&self.path).expect("open repo");
        let summary = repo
            .head()
            .expect("head")
            .peel_to_commit()
            .expect("commit")
            .summary()
            .unwrap_or("")
            .to_string();
        summary
    }

    pub fn read(&self, file: &str) -> String {
        std::fs::read_to_string(self.path.join(file)).expect("read file")
    }

    /// Scratch directory for temporary checkouts, next to the repository.
    pub fn scratch(&self) -> PathBuf {
        self._dir.path().join("scratch")
    }

    /// Number of leftover entries under the checkout scratch directory.
    pub fn scratch_entries(&self) -> usize {
        match std::fs::read_dir(self.scratch()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

// ─── Marker probe ────────────────────────────────────────────────────────────

/// Probe that reads `build.marker` in the working tree it is pointed at:
/// `ok` → clean, `error` → probe failure, anything else → failing build.
/// Records every marker it sees, in order.
pub struct MarkerProbe {
    pub seen: Mutex<Vec<String>>,
}

impl MarkerProbe {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildProbe for MarkerProbe {
    async fn probe(&self, workdir: &Path) -> Result<ProbeReport> {
        let marker = std::fs::read_to_string(workdir.join("build.marker"))?;
        let marker = marker.trim().to_string();
        self.seen.lock().unwrap().push(marker.clone());

        // Markers are formatted `rev-{i} {status}`; classify on the status
        // token so substrings like the "ok" inside "broken" don't misfire.
        let status = marker.split_whitespace().last().unwrap_or("");
        if status == "error" {
            anyhow::bail!("probe tooling crashed at {marker}");
        }
        if status == "ok" {
            Ok(ProbeReport::clean())
        } else {
            Ok(ProbeReport::failed(vec![format!(
                "App.java:1: error: broken at {marker}"
            )]))
        }
    }
}

// ─── Scripted probe ──────────────────────────────────────────────────────────

/// Probe that replays a queue of reports, then falls back to a default.
pub struct ScriptedProbe {
    queue: Mutex<VecDeque<ProbeReport>>,
    default_clean: bool,
    pub calls: Mutex<usize>,
}

impl ScriptedProbe {
    pub fn new(reports: Vec<ProbeReport>, default_clean: bool) -> Self {
        Self {
            queue: Mutex::new(reports.into()),
            default_clean,
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl BuildProbe for ScriptedProbe {
    async fn probe(&self, _workdir: &Path) -> Result<ProbeReport> {
        *self.calls.lock().unwrap() += 1;
        let next = self.queue.lock().unwrap().pop_front();
        Ok(next.unwrap_or(if self.default_clean {
            ProbeReport::clean()
        } else {
            ProbeReport::failed(vec!["App.java:1: error: still broken".to_string()])
        }))
    }
}

// ─── Scripted fix service ────────────────────────────────────────────────────

pub enum FixBehavior {
    Respond(String),
    Fail,
}

/// Fix service that replays scripted behaviors and records the diagnostics
/// of every call.
pub struct ScriptedFixService {
    behaviors: Mutex<VecDeque<FixBehavior>>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedFixService {
    pub fn new(behaviors: Vec<FixBehavior>) -> Self {
        Self {
            behaviors: Mutex::new(behaviors.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixService for ScriptedFixService {
    async fn suggest_fix(&self, _source: &str, diagnostics: &[String]) -> Result<String> {
        self.calls.lock().unwrap().push(diagnostics.to_vec());
        match self.behaviors.lock().unwrap().pop_front() {
            Some(FixBehavior::Respond(body)) => Ok(body),
            Some(FixBehavior::Fail) | None => anyhow::bail!("fix service unavailable"),
        }
    }
}

// ─── Recording notifier ──────────────────────────────────────────────────────

pub struct RecordedRequest {
    pub title: String,
    pub body: String,
    pub signatures: Vec<TaggedSignature>,
}

/// Change-request tracker stub that hands out sequential ids.
pub struct RecordingNotifier {
    pub opened: Mutex<Vec<RecordedRequest>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn count(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

#[async_trait]
impl ChangeRequestNotifier for RecordingNotifier {
    async fn open_request(
        &self,
        title: &str,
        body: &str,
        signatures: &[TaggedSignature],
    ) -> Result<String> {
        if self.fail {
            anyhow::bail!("tracker unreachable");
        }
        let mut opened = self.opened.lock().unwrap();
        opened.push(RecordedRequest {
            title: title.to_string(),
            body: body.to_string(),
            signatures: signatures.to_vec(),
        });
        Ok(format!("cr-{}", opened.len()))
    }
}
