//! Ordered diagnostic rule table.
//!
//! Two tiers: RISKY rules (manual review) and SAFE rules (auto-fixable).
//! Risky rules are always evaluated first so ambiguous text defaults to
//! caution — first matching rule wins. The table is plain data so alternate
//! toolchains can ship their own rule sets.

use regex::{Regex, RegexBuilder};
use serde::Serialize;

/// Which side of the auto-fix line a rule falls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTier {
    /// Requires manual review — base confidence 0.1.
    Risky,
    /// Safe to hand to the fix service — base confidence 0.9.
    Safe,
}

impl RuleTier {
    pub fn base_confidence(self) -> f64 {
        match self {
            RuleTier::Risky => 0.1,
            RuleTier::Safe => 0.9,
        }
    }
}

/// One classification rule: a tier, a category label, and the pattern that
/// selects it.
#[derive(Debug, Clone)]
pub struct Rule {
    pub tier: RuleTier,
    pub category: &'static str,
    pub pattern: Regex,
}

impl Rule {
    fn new(tier: RuleTier, category: &'static str, pattern: &str) -> Self {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .unwrap_or_else(|e| panic!("built-in rule pattern invalid ({category}): {e}"));
        Self {
            tier,
            category,
            pattern,
        }
    }
}

/// An ordered rule table, risky tier first.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Build a rule set from an explicit rule list. The caller is responsible
    /// for ordering; `default()` already puts the risky tier first.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// First rule matching `text`, or `None` for unrecognized diagnostics.
    pub fn first_match(&self, text: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.pattern.is_match(text))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Default for RuleSet {
    /// The built-in table for javac-style diagnostics.
    ///
    /// Unresolved *method/variable* symbols lead the risky tier: they usually
    /// mean a business-logic change, even though the text also matches the
    /// safe "cannot find symbol" import rule below.
    fn default() -> Self {
        let rules = vec![
            // ── Risky tier ────────────────────────────────────────────────
            Rule::new(
                RuleTier::Risky,
                "business_logic",
                r"symbol:\s*(method|variable)",
            ),
            Rule::new(
                RuleTier::Risky,
                "business_logic",
                r"NullPointerException|IndexOutOfBoundsException|RuntimeException|logic error|method .* not found",
            ),
            Rule::new(
                RuleTier::Risky,
                "security",
                r"SQL injection|XSS|vulnerability|insecure",
            ),
            Rule::new(
                RuleTier::Risky,
                "migration",
                r"\bdatabase\b|\bschema\b|ALTER TABLE|\bmigration\b",
            ),
            // ── Safe tier ─────────────────────────────────────────────────
            Rule::new(
                RuleTier::Safe,
                "missing_import",
                r"cannot find symbol|package .* does not exist|unresolved import|import not found",
            ),
            Rule::new(
                RuleTier::Safe,
                "syntax",
                r"unexpected token|invalid syntax|malformed|';' expected|class, interface, enum, or record expected|mismatched|unclosed",
            ),
            Rule::new(
                RuleTier::Safe,
                "test_failure",
                r"AssertionError|Test .* failed|\bFAILED\b",
            ),
            Rule::new(
                RuleTier::Safe,
                "lint",
                r"unused variable|dead code|\bwarning\b",
            ),
        ];
        Self { rules }
    }
}
