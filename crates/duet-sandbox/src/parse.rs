//! Test outcome classification from raw program output
//!
//! The sandbox does not impose a test framework, so results are sniffed from
//! the text, in priority order:
//! 1. explicit counts ("3 passed", "1 failed", "2 errors"), errors counted as failures
//! 2. failure markers (tracebacks, exceptions, assertion failures, `FAIL`),
//!    which beat success markers ("passed", "OK")
//! 3. otherwise a single implicit pass

use regex::Regex;
use std::sync::OnceLock;

/// Which rule produced the counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Explicit "N passed / N failed / N error" counts
    Counted { passed: u32, failed: u32 },
    /// A failure marker was present
    FailureMarker,
    /// A success phrase and no failure marker
    SuccessMarker,
    /// Nothing recognizable and a clean exit
    ImplicitPass,
}

impl Classification {
    /// `(passed, failed)` for this classification
    pub fn counts(&self) -> (u32, u32) {
        match *self {
            Classification::Counted { passed, failed } => (passed, failed),
            Classification::FailureMarker => (0, 1),
            Classification::SuccessMarker | Classification::ImplicitPass => (1, 0),
        }
    }
}

struct Patterns {
    passed: Regex,
    failed: Regex,
    errors: Regex,
    failure: Regex,
    success: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        passed: Regex::new(r"(?i)\b([0-9]+)\s+passed\b").unwrap(),
        failed: Regex::new(r"(?i)\b([0-9]+)\s+failed\b").unwrap(),
        errors: Regex::new(r"(?i)\b([0-9]+)\s+errors?\b").unwrap(),
        failure: Regex::new(
            r"Traceback|Error|Exception|panicked|(?i:assertion)|\bFAIL(?:ED|URE)?\b",
        )
        .unwrap(),
        success: Regex::new(r"(?i:\bpassed\b)|\bOK\b").unwrap(),
    })
}

/// Count from the last match, so a final summary line wins over progress lines
///
/// Counts too large for `u32` saturate rather than being dropped.
fn last_count(pattern: &Regex, output: &str) -> Option<u32> {
    pattern
        .captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| saturating_parse(m.as_str()))
}

fn saturating_parse(digits: &str) -> u32 {
    digits
        .parse::<u64>()
        .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
        .unwrap_or(u32::MAX)
}

/// Classify program output
///
/// `clean_exit` is false when the program exited non-zero, timed out or was
/// cut off; that counts as a failure marker when no explicit counts exist.
pub fn classify(output: &str, clean_exit: bool) -> Classification {
    let p = patterns();

    let passed = last_count(&p.passed, output);
    let failed = last_count(&p.failed, output);
    let errors = last_count(&p.errors, output);

    if passed.is_some() || failed.is_some() || errors.is_some() {
        return Classification::Counted {
            passed: passed.unwrap_or(0),
            failed: failed.unwrap_or(0).saturating_add(errors.unwrap_or(0)),
        };
    }

    if !clean_exit || p.failure.is_match(output) {
        Classification::FailureMarker
    } else if p.success.is_match(output) {
        Classification::SuccessMarker
    } else {
        Classification::ImplicitPass
    }
}
