//! Build probe — runs the external compiler/checker and captures a
//! structured result.
//!
//! The probe knows nothing beyond "run the command and capture
//! stdout/stderr/exit code"; compiler mechanics stay outside the core.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ProbeConfig;

// ─── Report ───────────────────────────────────────────────────────────────────

/// Outcome of one probe run: clean, or a list of raw diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub success: bool,
    pub diagnostics: Vec<String>,
}

impl ProbeReport {
    pub fn clean() -> Self {
        Self {
            success: true,
            diagnostics: vec![],
        }
    }

    pub fn failed(diagnostics: Vec<String>) -> Self {
        Self {
            success: false,
            diagnostics,
        }
    }
}

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Anything that can answer "does this working tree build cleanly?".
///
/// An `Err` means the probe itself could not run (spawn failure, timeout) —
/// a failed step for the orchestrator, distinct from a failing build.
#[async_trait]
pub trait BuildProbe: Send + Sync {
    async fn probe(&self, workdir: &Path) -> Result<ProbeReport>;
}

// ─── CommandProbe ─────────────────────────────────────────────────────────────

/// Probe that shells out to a configured compiler command, with a bounded
/// timeout per invocation.
pub struct CommandProbe {
    cfg: ProbeConfig,
    /// Artifact path relative to the working tree, appended to the command
    /// line when present.
    artifact: Option<PathBuf>,
}

impl CommandProbe {
    pub fn new(cfg: ProbeConfig, artifact: Option<PathBuf>) -> Self {
        Self { cfg, artifact }
    }
}

#[async_trait]
impl BuildProbe for CommandProbe {
    async fn probe(&self, workdir: &Path) -> Result<ProbeReport> {
        let mut cmd = tokio::process::Command::new(&self.cfg.command);
        cmd.args(&self.cfg.args);
        if let Some(artifact) = &self.artifact {
            cmd.arg(artifact);
        }
        cmd.current_dir(workdir);

        let output = tokio::time::timeout(self.cfg.timeout(), cmd.output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("build probe timed out after {}s", self.cfg.timeout_s)
            })?
            .with_context(|| format!("failed to run build probe '{}'", self.cfg.command))?;

        if output.status.success() {
            debug!(workdir = %workdir.display(), "probe clean");
            return Ok(ProbeReport::clean());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw = if stderr.trim().is_empty() {
            stdout
        } else {
            stderr
        };

        let diagnostics = parse_diagnostics(&raw);
        debug!(
            workdir = %workdir.display(),
            count = diagnostics.len(),
            exit = output.status.code().unwrap_or(-1),
            "probe failed"
        );
        Ok(ProbeReport::failed(diagnostics))
    }
}

// ─── Diagnostic splitting ─────────────────────────────────────────────────────

/// A diagnostic starts at a `file:line:` marker (javac, rustc --error-format
/// short, gcc all fit).
static DIAG_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+\.\w+:\d+(?::\d+)?:").expect("diag-start regex"));

/// Split raw compiler output into one string per diagnostic.
///
/// Lines between two `file:line:` markers belong to the earlier diagnostic
/// (carets, symbol lines, notes). Output with no recognizable markers comes
/// back as a single diagnostic so nothing is ever dropped.
pub fn parse_diagnostics(raw: &str) -> Vec<String> {
    let mut diagnostics: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if DIAG_START.is_match(line) {
            if !current.is_empty() {
                diagnostics.push(current.join("\n").trim().to_string());
                current.clear();
            }
            current.push(line);
        } else if !current.is_empty() && !line.trim().is_empty() {
            current.push(line);
        }
    }
    if !current.is_empty() {
        diagnostics.push(current.join("\n").trim().to_string());
    }

    diagnostics.retain(|d| !d.is_empty());
    if diagnostics.is_empty() && !raw.trim().is_empty() {
        diagnostics.push(raw.trim().to_string());
    }
    diagnostics
}
