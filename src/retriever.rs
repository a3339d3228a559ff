//! TF-IDF retrieval over template patterns.
//!
//! The index is a read-only view derived from the corpus, rebuilt in full
//! whenever the corpus version moves. Rebuilds happen behind a write lock
//! and the finished index is swapped in as one `Arc`, so concurrent readers
//! either see the old complete index or the new complete index, never a
//! partial one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::template::{Template, TemplateCorpus, TemplateId};
use crate::text::Question;

/// One ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedTemplate {
    pub id: TemplateId,
    /// Cosine similarity between question and pattern, in [0, 1].
    pub similarity: f64,
    /// The template's corpus weight at ranking time.
    pub weight: f64,
    pub pattern: String,
}

/// Unigram + bigram terms for a token sequence. Bigrams never span a
/// wildcard gap.
fn terms_of_segments(segments: &[Vec<&str>]) -> Vec<String> {
    let mut terms = Vec::new();
    for segment in segments {
        for token in segment {
            terms.push((*token).to_string());
        }
        for pair in segment.windows(2) {
            terms.push(format!("{} {}", pair[0], pair[1]));
        }
    }
    terms
}

fn question_terms(question: &Question) -> Vec<String> {
    let tokens: Vec<&str> = question.tokens.iter().map(String::as_str).collect();
    terms_of_segments(&[tokens])
}

/// Pattern tokens split into contiguous runs between wildcard slots.
fn pattern_segments(template: &Template) -> Vec<Vec<&str>> {
    let mut segments = vec![Vec::new()];
    for token in template.pattern.split_whitespace() {
        if token.starts_with('{') && token.ends_with('}') {
            if !segments.last().is_some_and(Vec::is_empty) {
                segments.push(Vec::new());
            }
        } else {
            segments.last_mut().expect("segments never empty").push(token);
        }
    }
    segments.retain(|s| !s.is_empty());
    segments
}

#[derive(Debug)]
struct DocVector {
    id: TemplateId,
    weight: f64,
    created_at: DateTime<Utc>,
    pattern: String,
    /// l2-normalized sparse tf-idf vector, term id -> weight.
    tfidf: HashMap<usize, f64>,
}

#[derive(Debug)]
struct TfIdfIndex {
    corpus_version: u64,
    vocab: HashMap<String, usize>,
    idf: Vec<f64>,
    docs: Vec<DocVector>,
}

impl TfIdfIndex {
    fn build(corpus: &TemplateCorpus) -> Self {
        let templates = corpus.list();
        let mut vocab: HashMap<String, usize> = HashMap::new();
        let mut doc_terms: Vec<Vec<usize>> = Vec::with_capacity(templates.len());

        for template in templates {
            let terms = terms_of_segments(&pattern_segments(template));
            let ids = terms
                .iter()
                .map(|t| {
                    let next = vocab.len();
                    *vocab.entry(t.clone()).or_insert(next)
                })
                .collect();
            doc_terms.push(ids);
        }

        // Smoothed idf, so terms present in every pattern still separate
        // documents slightly and empty vocab divides nothing.
        let n_docs = templates.len() as f64;
        let mut df = vec![0usize; vocab.len()];
        for ids in &doc_terms {
            let mut seen: Vec<usize> = ids.clone();
            seen.sort_unstable();
            seen.dedup();
            for id in seen {
                df[id] += 1;
            }
        }
        let idf: Vec<f64> = df
            .iter()
            .map(|&d| ((1.0 + n_docs) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let docs = templates
            .iter()
            .zip(doc_terms)
            .map(|(template, ids)| DocVector {
                id: template.id,
                weight: template.weight,
                created_at: template.created_at,
                pattern: template.pattern.clone(),
                tfidf: vectorize(&ids, &idf),
            })
            .collect();

        Self {
            corpus_version: corpus.version(),
            vocab,
            idf,
            docs,
        }
    }

    fn rank(&self, question: &Question) -> Vec<RankedTemplate> {
        let term_ids: Vec<usize> = question_terms(question)
            .iter()
            // Unseen tokens contribute zero weight; they are simply absent
            // from the question vector.
            .filter_map(|t| self.vocab.get(t).copied())
            .collect();
        let qvec = vectorize(&term_ids, &self.idf);

        let mut ranked: Vec<(usize, RankedTemplate)> = self
            .docs
            .iter()
            .enumerate()
            .map(|(ord, doc)| {
                let similarity = cosine(&qvec, &doc.tfidf);
                (
                    ord,
                    RankedTemplate {
                        id: doc.id,
                        similarity,
                        weight: doc.weight,
                        pattern: doc.pattern.clone(),
                    },
                )
            })
            .collect();

        // Descending similarity; ties broken by weight, then recency, then
        // insertion order.
        ranked.sort_by(|(ord_a, a), (ord_b, b)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| {
                    let ta = self.docs[*ord_a].created_at;
                    let tb = self.docs[*ord_b].created_at;
                    tb.cmp(&ta)
                })
                .then_with(|| ord_a.cmp(ord_b))
        });

        ranked.into_iter().map(|(_, r)| r).collect()
    }
}

fn vectorize(term_ids: &[usize], idf: &[f64]) -> HashMap<usize, f64> {
    let mut tf: HashMap<usize, f64> = HashMap::new();
    for &id in term_ids {
        *tf.entry(id).or_insert(0.0) += 1.0;
    }
    for (id, value) in tf.iter_mut() {
        *value *= idf[*id];
    }
    let norm = tf.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        for value in tf.values_mut() {
            *value /= norm;
        }
    }
    tf
}

fn cosine(a: &HashMap<usize, f64>, b: &HashMap<usize, f64>) -> f64 {
    // Both sides are l2-normalized, so the dot product is the cosine.
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(id, va)| large.get(id).map(|vb| va * vb))
        .sum()
}

/// Ranks corpus templates by lexical similarity to an incoming question.
#[derive(Debug, Default)]
pub struct Retriever {
    index: RwLock<Option<Arc<TfIdfIndex>>>,
}

impl Retriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the index stale. The next `rank` call rebuilds it.
    pub fn invalidate(&self) {
        *self.index.write().expect("retriever lock poisoned") = None;
    }

    /// Rank all templates for a question, best first. Returns an empty
    /// sequence for an empty corpus.
    pub fn rank(&self, question: &Question, corpus: &TemplateCorpus) -> Vec<RankedTemplate> {
        if corpus.is_empty() {
            return Vec::new();
        }
        self.current_index(corpus).rank(question)
    }

    fn current_index(&self, corpus: &TemplateCorpus) -> Arc<TfIdfIndex> {
        {
            let guard = self.index.read().expect("retriever lock poisoned");
            if let Some(index) = guard.as_ref() {
                if index.corpus_version == corpus.version() {
                    return Arc::clone(index);
                }
            }
        }
        let mut guard = self.index.write().expect("retriever lock poisoned");
        // Another writer may have rebuilt while we waited.
        if let Some(index) = guard.as_ref() {
            if index.corpus_version == corpus.version() {
                return Arc::clone(index);
            }
        }
        let rebuilt = Arc::new(TfIdfIndex::build(corpus));
        tracing::debug!(
            templates = rebuilt.docs.len(),
            vocab = rebuilt.vocab.len(),
            "retriever index rebuilt"
        );
        *guard = Some(Arc::clone(&rebuilt));
        rebuilt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantConfig;
    use crate::template::{SlotKind, SlotSpec, TemplateDraft};

    fn corpus_with(patterns: &[&str]) -> TemplateCorpus {
        let mut corpus = TemplateCorpus::new();
        for p in patterns {
            corpus
                .add_or_update(TemplateDraft::new(p, "SELECT 1", vec![]))
                .unwrap();
        }
        corpus
    }

    #[test]
    fn test_empty_corpus_ranks_empty() {
        let retriever = Retriever::new();
        let q = Question::parse("anything at all");
        assert!(retriever.rank(&q, &TemplateCorpus::new()).is_empty());
    }

    #[test]
    fn test_exact_pattern_match_is_first_with_similarity_one() {
        let corpus = corpus_with(&[
            "how many policies are active",
            "unique status in claims",
            "how many rows in policies",
        ]);
        let retriever = Retriever::new();
        let ranked = retriever.rank(&Question::parse("How many policies are active?"), &corpus);
        assert_eq!(ranked[0].pattern, "how many policies are active");
        assert!((ranked[0].similarity - 1.0).abs() < 1e-9);
        assert!(ranked[1].similarity < ranked[0].similarity);
    }

    #[test]
    fn test_partial_overlap_ranks_by_similarity() {
        let corpus = corpus_with(&["unique status in claims", "sum amount in claims"]);
        let retriever = Retriever::new();
        let ranked = retriever.rank(&Question::parse("distinct status values in claims"), &corpus);
        assert_eq!(ranked[0].pattern, "unique status in claims");
    }

    #[test]
    fn test_ties_break_by_weight() {
        let mut corpus = TemplateCorpus::new();
        corpus
            .add_or_update(TemplateDraft::new("show {table}", "SELECT 1", vec![SlotSpec::new("table", SlotKind::Table)]).weight(0.3))
            .unwrap();
        corpus
            .add_or_update(TemplateDraft::new("show {table} now", "SELECT 2", vec![SlotSpec::new("table", SlotKind::Table)]).weight(0.9))
            .unwrap();
        let retriever = Retriever::new();
        // "hello" overlaps neither pattern: similarity 0 for both, weight decides
        let ranked = retriever.rank(&Question::parse("hello"), &corpus);
        assert_eq!(ranked[0].pattern, "show {table} now");
    }

    #[test]
    fn test_stale_index_rebuilds_after_mutation() {
        let mut corpus = corpus_with(&["how many rows in policies"]);
        let retriever = Retriever::new();
        let q = Question::parse("unique status in claims");
        let before = retriever.rank(&q, &corpus);
        assert_eq!(before.len(), 1);

        corpus
            .add_or_update(TemplateDraft::new("unique status in claims", "SELECT 1", vec![]))
            .unwrap();
        let after = retriever.rank(&q, &corpus);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].pattern, "unique status in claims");
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let corpus = corpus_with(&["how many rows in policies"]);
        let retriever = Retriever::new();
        let q = Question::parse("how many rows in policies");
        retriever.rank(&q, &corpus);
        retriever.invalidate();
        assert!(retriever.index.read().unwrap().is_none());
        let ranked = retriever.rank(&q, &corpus);
        assert!((ranked[0].similarity - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bigrams_do_not_span_wildcards() {
        let mut corpus = TemplateCorpus::new();
        corpus
            .add_or_update(TemplateDraft::new(
                "unique {column} in {table}",
                "SELECT DISTINCT {column} FROM {table}",
                vec![
                    SlotSpec::new("table", SlotKind::Table),
                    SlotSpec::new("column", SlotKind::Column),
                ],
            ))
            .unwrap();
        let retriever = Retriever::new();
        // "unique in" never appears adjacently in the question, but both
        // unigrams do: similarity must be positive, not perfect.
        let ranked = retriever.rank(&Question::parse("unique status in claims"), &corpus);
        assert!(ranked[0].similarity > 0.0);
        assert!(ranked[0].similarity < 1.0);
    }

    #[test]
    fn test_seeded_corpus_ranks_seed_pattern_first() {
        let corpus = TemplateCorpus::with_seeds(&AssistantConfig::default());
        let retriever = Retriever::new();
        let ranked = retriever.rank(&Question::parse("how many rows in policies"), &corpus);
        assert_eq!(ranked[0].pattern, "how many rows in {table}");
    }
}
