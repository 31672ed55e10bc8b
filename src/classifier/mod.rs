//! Diagnostic confidence classifier.
//!
//! Maps one raw compiler diagnostic to a category and confidence score via
//! the ordered rule table in [`rules`], then adjusts the score from the
//! learning store's outcome history: promoted patterns are trusted at 0.9
//! outright, everything else gets a small success-rate boost that cannot by
//! itself cross the auto-fix threshold.
//!
//! Classification is pure over a [`LearningSnapshot`] — no I/O, no locking.

pub mod rules;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::LearningConfig;
use crate::learning::LearningSnapshot;
use rules::RuleSet;

/// Confidence a promoted pattern is classified at, regardless of its tier.
const PROMOTED_CONFIDENCE: f64 = 0.9;

/// Category used when no rule matches.
const UNKNOWN_CATEGORY: &str = "unknown";
const UNKNOWN_CONFIDENCE: f64 = 0.5;

/// How much raw text feeds the fallback signature hash.
const SIGNATURE_PREFIX_LEN: usize = 100;

// ─── ErrorObservation ─────────────────────────────────────────────────────────

/// One classified compiler diagnostic. Immutable after classification and
/// discarded once the orchestration decision is made — only the aggregated
/// pattern statistics persist.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorObservation {
    pub raw_text: String,
    pub category: String,
    /// Stable learning key: `category:token` (or `category:#<hash>` when no
    /// token is extractable).
    pub signature: String,
    /// Short SHA-256 prefix of the raw text, for deduplication across a run.
    pub dedup_hash: String,
    pub base_confidence: f64,
    pub adjusted_confidence: f64,
    pub fixable: bool,
}

// ─── Classifier ───────────────────────────────────────────────────────────────

pub struct Classifier {
    rules: RuleSet,
    cfg: LearningConfig,
}

impl Classifier {
    pub fn new(cfg: LearningConfig) -> Self {
        Self {
            rules: RuleSet::default(),
            cfg,
        }
    }

    /// Use a custom rule table (e.g. for a non-JVM toolchain).
    pub fn with_rules(rules: RuleSet, cfg: LearningConfig) -> Self {
        Self { rules, cfg }
    }

    /// Classify one raw diagnostic against the current learning snapshot.
    pub fn classify(&self, raw_text: &str, learning: &LearningSnapshot) -> ErrorObservation {
        let (category, base_confidence) = match self.rules.first_match(raw_text) {
            Some(rule) => (rule.category.to_string(), rule.tier.base_confidence()),
            None => (UNKNOWN_CATEGORY.to_string(), UNKNOWN_CONFIDENCE),
        };

        let signature = format!("{}:{}", category, signature_token(raw_text));
        let adjusted_confidence = self.adjust(&signature, base_confidence, learning);

        ErrorObservation {
            raw_text: raw_text.to_string(),
            category,
            dedup_hash: dedup_hash(raw_text),
            signature,
            base_confidence,
            adjusted_confidence,
            fixable: adjusted_confidence >= self.cfg.high_confidence_threshold,
        }
    }

    /// Classify a batch and drop duplicate diagnostics (same dedup hash).
    pub fn classify_all(
        &self,
        diagnostics: &[String],
        learning: &LearningSnapshot,
    ) -> Vec<ErrorObservation> {
        let mut seen = std::collections::HashSet::new();
        diagnostics
            .iter()
            .map(|d| self.classify(d, learning))
            .filter(|obs| seen.insert(obs.dedup_hash.clone()))
            .collect()
    }

    fn adjust(&self, signature: &str, base: f64, learning: &LearningSnapshot) -> f64 {
        let Some(summary) = learning.summary(signature) else {
            return base;
        };
        if summary.promoted {
            return PROMOTED_CONFIDENCE;
        }
        let attempts = (summary.success_count + summary.failure_count).max(1);
        let success_rate = summary.success_count as f64 / attempts as f64;
        (base + success_rate * self.cfg.boost_factor).min(1.0)
    }
}

// ─── Signature extraction ─────────────────────────────────────────────────────

static SYMBOL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"symbol:\s*(?:class|method|variable)\s+([A-Za-z_][A-Za-z0-9_$]*)")
        .expect("symbol regex")
});
static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"'([A-Za-z_][A-Za-z0-9_$.]*)'").expect("quoted regex"));

/// Extract the most specific stable token from a diagnostic: the named
/// symbol if the compiler reported one, else the first quoted identifier,
/// else a hash of the leading text.
fn signature_token(raw: &str) -> String {
    if let Some(cap) = SYMBOL_RE.captures(raw) {
        return cap[1].to_string();
    }
    if let Some(cap) = QUOTED_RE.captures(raw) {
        return cap[1].to_string();
    }
    let prefix: String = raw.chars().take(SIGNATURE_PREFIX_LEN).collect();
    format!("#{}", short_sha256(prefix.as_bytes(), 12))
}

fn dedup_hash(raw: &str) -> String {
    short_sha256(raw.as_bytes(), 8)
}

fn short_sha256(bytes: &[u8], len: usize) -> String {
    let digest = Sha256::digest(bytes);
    let mut hx = hex::encode(digest);
    hx.truncate(len);
    hx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{LearningSnapshot, PatternSummary};
    use proptest::prelude::*;

    fn classifier() -> Classifier {
        Classifier::new(LearningConfig::default())
    }

    fn snapshot_with(signature: &str, summary: PatternSummary) -> LearningSnapshot {
        let mut snap = LearningSnapshot::default();
        snap.insert(signature.to_string(), summary);
        snap
    }

    #[test]
    fn safe_error_is_fixable() {
        let obs = classifier().classify(
            "App.java:3: error: cannot find symbol\n  symbol:   class StringUtils",
            &LearningSnapshot::default(),
        );
        assert_eq!(obs.category, "missing_import");
        assert_eq!(obs.signature, "missing_import:StringUtils");
        assert!((obs.base_confidence - 0.9).abs() < f64::EPSILON);
        assert!(obs.fixable);
    }

    #[test]
    fn risky_error_needs_review() {
        let obs = classifier().classify(
            "App.java:9: error: cannot find symbol\n  symbol:   method computeTotal(int)",
            &LearningSnapshot::default(),
        );
        assert_eq!(obs.category, "business_logic");
        assert!((obs.base_confidence - 0.1).abs() < f64::EPSILON);
        assert!(!obs.fixable);
    }

    #[test]
    fn unknown_error_defaults_to_half_confidence() {
        let obs = classifier().classify("gremlins in the build", &LearningSnapshot::default());
        assert_eq!(obs.category, "unknown");
        assert!((obs.adjusted_confidence - 0.5).abs() < f64::EPSILON);
        assert!(!obs.fixable);
        assert!(obs.signature.starts_with("unknown:#"));
    }

    #[test]
    fn boost_alone_cannot_cross_the_threshold() {
        // Perfect success rate, not promoted: 0.1 + 1.0 × 0.05 = 0.15.
        let raw = "App.java:9: error: RuntimeException in handler";
        let base = classifier().classify(raw, &LearningSnapshot::default());
        let snap = snapshot_with(
            &base.signature,
            PatternSummary {
                success_count: 50,
                failure_count: 0,
                promoted: false,
            },
        );
        let boosted = classifier().classify(raw, &snap);
        assert!(boosted.adjusted_confidence > base.adjusted_confidence);
        assert!(!boosted.fixable);
    }

    #[test]
    fn promoted_pattern_is_high_confidence_regardless_of_tier() {
        let raw = "App.java:9: error: RuntimeException in handler";
        let base = classifier().classify(raw, &LearningSnapshot::default());
        let snap = snapshot_with(
            &base.signature,
            PatternSummary {
                success_count: 3,
                failure_count: 0,
                promoted: true,
            },
        );
        let obs = classifier().classify(raw, &snap);
        assert!((obs.adjusted_confidence - 0.9).abs() < f64::EPSILON);
        assert!(obs.fixable);
    }

    #[test]
    fn classify_all_deduplicates_identical_diagnostics() {
        let diag = "App.java:3: error: ';' expected".to_string();
        let observations =
            classifier().classify_all(&[diag.clone(), diag], &LearningSnapshot::default());
        assert_eq!(observations.len(), 1);
    }

    proptest! {
        /// More successes (no new failures) never lower adjusted confidence.
        #[test]
        fn confidence_is_monotonic_in_success_count(
            successes in 0u32..500,
            extra in 1u32..100,
            failures in 0u32..500,
        ) {
            let raw = "App.java:1: error: unexpected token";
            let c = classifier();
            let sig = c.classify(raw, &LearningSnapshot::default()).signature;

            let before = snapshot_with(&sig, PatternSummary {
                success_count: successes as i64,
                failure_count: failures as i64,
                promoted: false,
            });
            let after = snapshot_with(&sig, PatternSummary {
                success_count: (successes + extra) as i64,
                failure_count: failures as i64,
                promoted: false,
            });

            let conf_before = c.classify(raw, &before).adjusted_confidence;
            let conf_after = c.classify(raw, &after).adjusted_confidence;
            prop_assert!(conf_after >= conf_before);
        }
    }
}
