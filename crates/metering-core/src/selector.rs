//! Deterministic tier-bounded model selection.
//!
//! Selection never uses randomness: identical inputs yield identical output,
//! so cost estimation and tests are reproducible.

use crate::tier::TierDefinition;
use crate::types::ModelId;

/// Keyword signals that mark a prompt as demanding a more capable model.
const COMPLEX_KEYWORDS: &[&str] = &[
    "code",
    "debug",
    "refactor",
    "analyze",
    "analyse",
    "summarize",
    "translate",
    "prove",
    "step by step",
];

/// Message length (chars) above which a prompt counts as moderately complex.
const MODERATE_LENGTH: usize = 280;

/// Message length (chars) above which a prompt counts as highly complex.
const HIGH_LENGTH: usize = 1200;

/// Score contributed by each matched keyword.
const KEYWORD_WEIGHT: usize = 400;

/// Chooses a model for a request, bounded by the tier's allowed set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelSelector;

impl ModelSelector {
    /// Create a selector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Pick a model for `message` from the tier's allowed list.
    ///
    /// The allowed list is ordered simplest to most capable; the complexity
    /// score indexes into it. Returns `None` only for a tier with an empty
    /// allowed set, which callers treat as a denial.
    #[must_use]
    pub fn select(&self, definition: &TierDefinition, message: &str) -> Option<ModelId> {
        let models = &definition.allowed_models;
        let last = models.len().checked_sub(1)?;

        let score = complexity_score(message);
        let index = if score >= HIGH_LENGTH {
            last
        } else if score >= MODERATE_LENGTH {
            1.min(last)
        } else {
            0
        };

        models.get(index).cloned()
    }
}

/// Length plus keyword-signal score for a message. Pure and deterministic.
fn complexity_score(message: &str) -> usize {
    let lowered = message.to_lowercase();
    let keyword_hits = COMPLEX_KEYWORDS
        .iter()
        .filter(|k| lowered.contains(*k))
        .count();
    message.chars().count() + keyword_hits * KEYWORD_WEIGHT
}
