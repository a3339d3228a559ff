//! Active-correction priority.
//!
//! Estimates how valuable a user correction would be for a question:
//! uncertainty over the ranked candidates (small margin, high entropy)
//! combined with novelty of the question against the corpus patterns.
//! Advisory only; nothing in the pipeline branches on it.

use strsim::normalized_levenshtein;

use crate::config::AssistantConfig;
use crate::retriever::RankedTemplate;
use crate::template::TemplateCorpus;
use crate::text::Question;

/// Higher means more uncertain, in [0, 1]. Blends the margin between the
/// top two scores with the entropy of the top-5 score distribution.
pub fn uncertainty(ranked: &[RankedTemplate]) -> f64 {
    if ranked.is_empty() {
        return 1.0;
    }
    let scores: Vec<f64> = ranked
        .iter()
        .take(5)
        .map(|r| r.similarity.max(1e-6))
        .collect();
    let margin = scores[0] - scores.get(1).copied().unwrap_or(0.0);

    let total: f64 = scores.iter().sum();
    let entropy: f64 = -scores
        .iter()
        .map(|s| {
            let p = s / total;
            p * (p + 1e-12).ln()
        })
        .sum::<f64>()
        / (scores.len() as f64 + 1e-9).ln();

    let u = (1.0 - margin.min(1.0)) * 0.6 + entropy * 0.4;
    u.clamp(0.0, 1.0)
}

/// True when no corpus pattern is close to the question, by a quick fuzzy
/// scan and the retriever's own best similarity.
pub fn is_novel(
    question: &Question,
    best_similarity: f64,
    corpus: &TemplateCorpus,
    config: &AssistantConfig,
) -> bool {
    if corpus.is_empty() {
        return true;
    }
    let normalized = question.normalized();
    let best_fuzzy = corpus
        .list()
        .iter()
        .map(|t| normalized_levenshtein(&normalized, &t.pattern))
        .fold(0.0f64, f64::max);
    if best_fuzzy >= config.novelty_fuzzy_threshold {
        return false;
    }
    best_similarity < config.novelty_cosine_threshold
}

/// Priority in [0, 1] for asking the user to confirm or correct this
/// translation.
pub fn priority(
    question: &Question,
    ranked: &[RankedTemplate],
    corpus: &TemplateCorpus,
    config: &AssistantConfig,
) -> f64 {
    let u = uncertainty(ranked);
    let best = ranked.first().map(|r| r.similarity).unwrap_or(0.0);
    let novel = if is_novel(question, best, corpus, config) {
        1.0
    } else {
        0.0
    };
    (0.6 * u + 0.4 * novel).clamp(0.0, 1.0)
}
