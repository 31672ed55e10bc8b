//! Fix-integrity gate.
//!
//! The fix service is told to preserve unrelated code, but its output is not
//! trusted: a candidate that looks like it deleted code sections is rejected
//! outright and counted as a failed fix attempt. The check is structural —
//! overall size plus block-marker counts — because the core does not
//! understand program semantics.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum IntegrityViolation {
    #[error("candidate source is empty")]
    Empty,
    #[error("candidate is {actual} bytes, below {required} ({fraction:.0}% of the original)")]
    TooShort {
        actual: usize,
        required: usize,
        fraction: f64,
    },
    #[error("candidate keeps {kept} of {original} code lines — sections appear deleted")]
    LinesLost { kept: usize, original: usize },
    #[error("candidate keeps {kept} of {original} block markers — structure appears deleted")]
    BlocksLost { kept: usize, original: usize },
}

/// Accept or reject a fix-service candidate against the source it replaces.
///
/// `min_fraction` applies to total size, non-blank line count, and block
/// (`{`) markers; any dimension falling below it rejects the candidate.
pub fn check_candidate(
    original: &str,
    candidate: &str,
    min_fraction: f64,
) -> Result<(), IntegrityViolation> {
    if candidate.trim().is_empty() {
        return Err(IntegrityViolation::Empty);
    }

    let required = (original.len() as f64 * min_fraction) as usize;
    if candidate.len() < required {
        return Err(IntegrityViolation::TooShort {
            actual: candidate.len(),
            required,
            fraction: min_fraction * 100.0,
        });
    }

    let original_lines = code_lines(original);
    let kept_lines = code_lines(candidate);
    if kept_lines < (original_lines as f64 * min_fraction) as usize {
        return Err(IntegrityViolation::LinesLost {
            kept: kept_lines,
            original: original_lines,
        });
    }

    let original_blocks = original.matches('{').count();
    let kept_blocks = candidate.matches('{').count();
    if original_blocks > 0 && kept_blocks < (original_blocks as f64 * min_fraction) as usize {
        return Err(IntegrityViolation::BlocksLost {
            kept: kept_blocks,
            original: original_blocks,
        });
    }

    Ok(())
}

fn code_lines(source: &str) -> usize {
    source.lines().filter(|l| !l.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGINAL: &str = "\
public class App {
    public void a() {
        int x = 1;
    }

    public void b() {
        int y = 2;
    }

    public void c() {
        int z = 3;
    }
}
";

    #[test]
    fn faithful_candidate_passes() {
        let candidate = ORIGINAL.replace("int x = 1;", "int x = 1; // fixed");
        assert_eq!(check_candidate(ORIGINAL, &candidate, 0.5), Ok(()));
    }

    #[test]
    fn empty_candidate_is_rejected() {
        assert_eq!(
            check_candidate(ORIGINAL, "  \n", 0.5),
            Err(IntegrityViolation::Empty)
        );
    }

    #[test]
    fn truncated_candidate_is_rejected() {
        // Keeps only one method — well under half the original.
        let candidate = "public class App {\n    public void a() {\n        int x = 1;\n    }\n}\n";
        assert!(check_candidate(ORIGINAL, candidate, 0.5).is_err());
    }

    #[test]
    fn padded_but_gutted_candidate_is_rejected_by_block_check() {
        // Same byte length, but most structure replaced by comment filler.
        let filler = "// filler comment line to keep the byte count up\n".repeat(8);
        let candidate = format!("public class App {{\n{filler}}}\n");
        assert!(candidate.len() >= ORIGINAL.len() / 2);
        assert!(matches!(
            check_candidate(ORIGINAL, &candidate, 0.5),
            Err(IntegrityViolation::BlocksLost { .. })
        ));
    }

    #[test]
    fn growth_is_always_acceptable() {
        let candidate = format!("{ORIGINAL}\n// extra helper\npublic class Helper {{}}\n");
        assert_eq!(check_candidate(ORIGINAL, &candidate, 0.5), Ok(()));
    }
}
