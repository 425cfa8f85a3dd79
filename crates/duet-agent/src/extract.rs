//! Artifact extraction from free-form model output
//!
//! Models answer in markdown. Code and tests are taken from fenced blocks:
//!
//! ````text
//! Language: python
//!
//! ```python
//! def add(a, b):
//!     return a + b
//! ```
//! ````
//!
//! A block whose label matches the preferred label wins; otherwise the longest
//! block is taken, which tolerates models that omit the label.

use duet_core::Language;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const FENCE: &str = "```";

/// Token a reviewer must include to approve the code
pub const APPROVAL_MARKER: &str = "APPROVED";

/// A fenced block found in model output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    /// Info string after the opening fence (first word only, may be empty)
    pub label: String,
    /// Block contents, trimmed
    pub body: String,
}

/// Extract every fenced block in order of appearance
///
/// An unterminated final fence runs to the end of the text.
pub fn extract_all_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(info) = trimmed.strip_prefix(FENCE) {
                    let label = info
                        .trim_start_matches('`')
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .to_string();
                    current = Some((label, Vec::new()));
                }
            }
            Some((label, mut lines)) => {
                if trimmed.starts_with(FENCE) && trimmed.trim_end().trim_start_matches('`').is_empty() {
                    blocks.push(CodeBlock {
                        label,
                        body: lines.join("\n").trim().to_string(),
                    });
                } else {
                    lines.push(line);
                    current = Some((label, lines));
                }
            }
        }
    }

    if let Some((label, lines)) = current {
        blocks.push(CodeBlock {
            label,
            body: lines.join("\n").trim().to_string(),
        });
    }

    blocks
}

/// Extract the main code block from model output
///
/// Returns the first block labelled `preferred_label` (case-insensitive) if
/// there is one, otherwise the longest block. Empty when the text has no
/// fenced blocks.
pub fn extract_block(text: &str, preferred_label: Option<&str>) -> String {
    let blocks = extract_all_blocks(text);

    if let Some(label) = preferred_label.map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(block) = blocks.iter().find(|b| b.label.eq_ignore_ascii_case(label)) {
            return block.body.clone();
        }
    }

    // Longest wins; ties go to the earliest block
    blocks
        .into_iter()
        .fold(None::<CodeBlock>, |best, block| match best {
            Some(b) if b.body.len() >= block.body.len() => Some(b),
            _ => Some(block),
        })
        .map(|b| b.body)
        .unwrap_or_default()
}

fn language_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Tolerates markdown decoration such as "**Language:** Python" or "- language: js"
        Regex::new(r"(?im)^[\s>*#_-]*language[*_]*\s*:[*_\s]*([a-z0-9_+#.-]+)")
            .expect("language pattern is valid")
    })
}

/// Find a `Language: <word>` line; defaults to python when absent
pub fn extract_language(text: &str) -> Language {
    language_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| Language::new(m.as_str().trim_end_matches(['.', ','])))
        .unwrap_or_default()
}

/// Words that turn a following marker into a rejection
const NEGATIONS: &[&str] = &[
    "not", "never", "no", "isn't", "wasn't", "aren't", "cannot", "can't", "won't", "don't",
];

fn approval_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(&format!(r"\b{}\b", APPROVAL_MARKER)).expect("approval pattern is valid")
    })
}

/// Whether a review response approves the code
///
/// The marker must stand as its own word, and neither of the two words
/// before it on the same line may be a negation ("NOT APPROVED yet",
/// "not yet APPROVED").
pub fn is_approved(review: &str) -> bool {
    approval_pattern().find_iter(review).any(|m| {
        let line = review[..m.start()].rsplit('\n').next().unwrap_or_default();
        !line.split_whitespace().rev().take(2).any(|word| {
            let word = word
                .replace('\u{2019}', "'")
                .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase();
            NEGATIONS.contains(&word.as_str())
        })
    })
}
