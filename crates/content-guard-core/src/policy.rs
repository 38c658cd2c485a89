//! Match decision policy.
//!
//! Turns a similarity score into a match decision by thresholding, and
//! optionally folds in a verdict from the external judge for scores that
//! only just cleared the threshold. The judge refines an automated match;
//! it never creates one.
//!
//! | Score | Decision |
//! |-------|----------|
//! | `< threshold` | no match |
//! | `>= threshold`, `< 0.9` | `partial`, `medium` confidence |
//! | `>= 0.9` (and `>= threshold`) | `exact`, `high` confidence |

use serde_json::json;

use crate::judge::{Decision, JudgeVerdict};
use crate::models::{Confidence, MatchType};

/// Scores at or above this are exact matches with high confidence.
pub const EXACT_MATCH_SCORE: f64 = 0.9;

/// A surviving match, ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchDecision {
    pub match_type: MatchType,
    pub confidence: Confidence,
    pub score: f64,
    /// Evidence snippets (overlapping phrases from the judge).
    pub segments: Vec<String>,
    pub metadata: serde_json::Value,
}

impl MatchDecision {
    pub fn is_high_confidence(&self) -> bool {
        self.confidence == Confidence::High
    }
}

/// Automated threshold decision.
pub fn decide(score: f64, threshold: f64) -> Option<MatchDecision> {
    if score.is_nan() || score < threshold {
        return None;
    }
    let exact = score >= EXACT_MATCH_SCORE;
    Some(MatchDecision {
        match_type: if exact { MatchType::Exact } else { MatchType::Partial },
        confidence: if exact {
            Confidence::High
        } else {
            Confidence::Medium
        },
        score,
        segments: Vec::new(),
        metadata: json!({}),
    })
}

/// Score range in which a judge opinion is worth asking for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderlineBand {
    pub lower: f64,
    pub upper: f64,
}

impl BorderlineBand {
    /// `[threshold, threshold + margin)`, capped below the exact band.
    /// Empty when the threshold is already at or above 0.9.
    pub fn above(threshold: f64, margin: f64) -> Self {
        Self {
            lower: threshold,
            upper: (threshold + margin.max(0.0)).min(EXACT_MATCH_SCORE),
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        score >= self.lower && score < self.upper
    }
}

/// Fold a judge verdict into the automated decision.
///
/// Only a decision that already cleared the threshold is adjusted; with no
/// automated match the verdict is ignored.
///
/// - `yes` raises confidence to `high` when the judge's own score reaches
///   0.9, otherwise leaves it alone.
/// - `maybe` keeps the automated confidence.
/// - `no` never deletes an automated match; it drops its confidence to
///   `low` so reviewers see it last.
///
/// The verdict is attached as match metadata and its overlap phrases become
/// the matched segments. Score and match type are never changed.
pub fn apply_verdict(
    automated: Option<MatchDecision>,
    verdict: &JudgeVerdict,
) -> Option<MatchDecision> {
    let mut decision = automated?;
    match verdict.decision {
        Decision::Yes if verdict.similarity_score >= EXACT_MATCH_SCORE => {
            decision.confidence = Confidence::High;
        }
        Decision::Yes | Decision::Maybe => {}
        Decision::No => decision.confidence = Confidence::Low,
    }

    decision.segments = verdict.overlap_phrases.clone();
    decision.metadata = json!({
        "judge": {
            "decision": verdict.decision.as_str(),
            "similarity_score": verdict.similarity_score,
            "rationale": verdict.rationale,
        }
    });
    Some(decision)
}
