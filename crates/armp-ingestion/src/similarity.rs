//! Similarity scoring for publications, person names and project titles.
//!
//! The reconciliation steps only depend on [`SimilarityScorer`]; the string
//! distance behind [`FuzzyScorer`] can be swapped without touching them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use armp_common::{AuthorMention, Publication};

use crate::models::PublicationDraft;

/// Strategy computing 0–1 match confidences.
pub trait SimilarityScorer: Send + Sync {
    /// Confidence that a draft and a canonical publication are the same work.
    fn publication_similarity(&self, draft: &PublicationDraft, candidate: &Publication) -> f64;

    /// Similarity of two spellings of a person's name.
    fn name_similarity(&self, a: &str, b: &str) -> f64;

    /// Share of a project's significant title keywords found in a publication title.
    fn keyword_overlap(&self, project_title: &str, publication_title: &str) -> f64 {
        keyword_overlap(project_title, publication_title)
    }
}

/// Weights of the combined publication score. Sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchWeights {
    /// Title token overlap + edit-distance ratio
    pub title: f64,
    /// Author-set Jaccard overlap
    pub authors: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self { title: 0.7, authors: 0.3 }
    }
}

impl MatchWeights {
    /// Validate that the weights sum to ~1.0
    pub fn validate(&self) -> bool {
        self.title >= 0.0 && self.authors >= 0.0 && (self.title + self.authors - 1.0).abs() < 1e-6
    }

    /// Renormalise weights so they sum to 1.0
    pub fn normalise(&mut self) {
        let sum = self.title + self.authors;
        if sum > 0.0 {
            self.title /= sum;
            self.authors /= sum;
        } else {
            *self = Self::default();
        }
    }
}

/// Slack for comparisons of weighted scores, whose sums pick up rounding
/// error (`0.7 * 1.0 + 0.3 * (2.0 / 3.0)` is `0.8999999999999999`).
pub const SCORE_EPSILON: f64 = 1e-9;

/// `score >= threshold`, tolerant of rounding in `score`.
pub fn meets_threshold(score: f64, threshold: f64) -> bool {
    score + SCORE_EPSILON >= threshold
}

/// Whether `score` trails `top` by strictly less than `margin`.
pub fn within_margin(score: f64, top: f64, margin: f64) -> bool {
    top - score + SCORE_EPSILON < margin
}

/// Default scorer built on normalised Levenshtein distance and token sets.
#[derive(Debug, Clone, Default)]
pub struct FuzzyScorer {
    weights: MatchWeights,
}

impl FuzzyScorer {
    pub fn new(mut weights: MatchWeights) -> Self {
        if !weights.validate() {
            weights.normalise();
        }
        Self { weights }
    }
}

impl SimilarityScorer for FuzzyScorer {
    fn publication_similarity(&self, draft: &PublicationDraft, candidate: &Publication) -> f64 {
        let title = title_similarity(&draft.title, &candidate.title);
        match author_overlap(&draft.authors, &candidate.authors) {
            Some(overlap) => self.weights.title * title + self.weights.authors * overlap,
            None => title,
        }
    }

    fn name_similarity(&self, a: &str, b: &str) -> f64 {
        let (a, b) = (token_sorted(a), token_sorted(b));
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        normalized_levenshtein(&a, &b)
    }
}

// ── Text helpers ────────────────────────────────────────────────────────────

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let cleaned: String = s
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn token_sorted(s: &str) -> String {
    let normalized = normalize_text(s);
    let mut tokens: Vec<&str> = normalized.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

fn token_set(s: &str) -> BTreeSet<String> {
    normalize_text(s).split_whitespace().map(String::from).collect()
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Mean of title token Jaccard and normalised edit-distance ratio.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize_text(a), normalize_text(b));
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    let tokens = jaccard(&token_set(&na), &token_set(&nb));
    let edit = normalized_levenshtein(&na, &nb);
    0.5 * tokens + 0.5 * edit
}

/// Surname plus first initial, so "J. Smith", "John Smith" and
/// "Smith, John" share a key.
pub fn author_key(name: &str) -> Option<String> {
    let reordered = match name.split_once(',') {
        Some((family, given)) => format!("{given} {family}"),
        None => name.to_string(),
    };
    let normalized = normalize_text(&reordered);
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let surname = tokens.last()?;
    if tokens.len() == 1 {
        return Some(surname.to_string());
    }
    let initial = tokens[0].chars().next()?;
    Some(format!("{surname} {initial}"))
}

/// Jaccard overlap of two author lists; `None` when either list is empty.
pub fn author_overlap(a: &[AuthorMention], b: &[AuthorMention]) -> Option<f64> {
    let ka: BTreeSet<String> = a.iter().filter_map(|m| author_key(&m.name)).collect();
    let kb: BTreeSet<String> = b.iter().filter_map(|m| author_key(&m.name)).collect();
    if ka.is_empty() || kb.is_empty() {
        return None;
    }
    Some(jaccard(&ka, &kb))
}

/// Words longer than four characters.
pub fn significant_keywords(title: &str) -> BTreeSet<String> {
    normalize_text(title)
        .split_whitespace()
        .filter(|w| w.chars().count() > 4)
        .map(String::from)
        .collect()
}

pub fn keyword_overlap(project_title: &str, publication_title: &str) -> f64 {
    let keywords = significant_keywords(project_title);
    if keywords.is_empty() {
        return 0.0;
    }
    let words = token_set(publication_title);
    keywords.iter().filter(|k| words.contains(*k)).count() as f64 / keywords.len() as f64
}
