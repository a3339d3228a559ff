//! The translation pipeline.
//!
//! [`Assistant`] owns the schema catalog, the template corpus, and the
//! derived views (retriever index, PMI model). Ranking reads run
//! concurrently against snapshot indexes; feedback mutations serialize
//! behind the corpus write lock, which is held across the corpus update and
//! the index invalidation so concurrent feedback events cannot interleave.

use std::path::Path;
use std::sync::{Arc, RwLock};

use sqlx::SqlitePool;

use crate::active;
use crate::catalog::SchemaCatalog;
use crate::composer::{self, ComposedQuery};
use crate::config::AssistantConfig;
use crate::error::{AskqlError, AskqlResult};
use crate::explain::{self, Rationale};
use crate::feedback::{self, Feedback, FeedbackOutcome};
use crate::matcher;
use crate::pmi::PmiModel;
use crate::retriever::{RankedTemplate, Retriever};
use crate::template::{SlotKind, TemplateCorpus};
use crate::text::Question;

/// Fraction of the pattern's distinct terms present in the question.
fn covers(pattern_terms: Vec<&str>, question: &Question, threshold: f64) -> bool {
    if pattern_terms.is_empty() {
        return false;
    }
    let mut terms = pattern_terms;
    terms.sort_unstable();
    terms.dedup();
    let hit = terms
        .iter()
        .filter(|t| question.tokens.iter().any(|q| q == *t))
        .count();
    hit as f64 / terms.len() as f64 >= threshold
}

/// A successful translation: the statement, why it was chosen, and how
/// worthwhile a correction would be.
#[derive(Debug, Clone)]
pub struct Translation {
    pub query: ComposedQuery,
    pub rationale: Rationale,
    /// The ranking the winner was drawn from, best first.
    pub ranked: Vec<RankedTemplate>,
    /// Advisory priority in [0, 1] for asking the user to confirm.
    pub correction_priority: f64,
}

/// Owns the corpus and derived state; shared across sessions by reference.
pub struct Assistant {
    catalog: SchemaCatalog,
    corpus: RwLock<TemplateCorpus>,
    retriever: Retriever,
    pmi: RwLock<Arc<PmiModel>>,
    config: AssistantConfig,
}

impl Assistant {
    /// Build an assistant over an already-introspected catalog, seeding the
    /// corpus with the static and schema-derived templates.
    pub fn new(catalog: SchemaCatalog, config: AssistantConfig) -> Self {
        let mut corpus = TemplateCorpus::with_seeds(&config);
        corpus.add_schema_templates(&catalog, &config);
        tracing::info!(templates = corpus.len(), "assistant ready");
        Self {
            catalog,
            corpus: RwLock::new(corpus),
            retriever: Retriever::new(),
            pmi: RwLock::new(Arc::new(PmiModel::default())),
            config,
        }
    }

    /// Introspect the database behind `pool` and build an assistant for it.
    pub async fn from_pool(pool: &SqlitePool, config: AssistantConfig) -> AskqlResult<Self> {
        let catalog = SchemaCatalog::introspect(pool, &config).await?;
        Ok(Self::new(catalog, config))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Run a closure against the current corpus snapshot.
    pub fn with_corpus<R>(&self, f: impl FnOnce(&TemplateCorpus) -> R) -> R {
        let corpus = self.corpus.read().expect("corpus lock poisoned");
        f(&corpus)
    }

    /// Translate a natural-language question into a composed statement.
    ///
    /// Candidates are tried best-first; slot-resolution failures fall back
    /// to the next-ranked template until the retry budget is exhausted.
    pub fn translate(&self, question_text: &str) -> AskqlResult<Translation> {
        let question = Question::parse(question_text);
        let corpus = self.corpus.read().expect("corpus lock poisoned");

        let ranked = self.retriever.rank(&question, &corpus);
        let pmi = self.current_pmi(&corpus);
        let entities = matcher::extract(&question, &self.catalog, &pmi);
        tracing::debug!(
            question = %question_text,
            candidates = ranked.len(),
            entities = entities.len(),
            "ranking complete"
        );

        let mut missing: Vec<SlotKind> = Vec::new();
        let mut winner = None;
        let mut attempts = 0;

        for candidate in &ranked {
            // ranked is sorted descending: nothing further is eligible
            if candidate.similarity < self.config.min_similarity || attempts >= self.config.retry_budget
            {
                break;
            }
            let template = corpus.get(candidate.id)?;
            // A concrete template has no slots to bind, so a partial
            // lexical match is its only evidence; require the question to
            // actually cover the pattern.
            if template.slots.is_empty() && !covers(template.pattern_terms(), &question, self.config.concrete_coverage)
            {
                continue;
            }
            attempts += 1;
            match composer::compose(template, &entities, &self.catalog, &self.config) {
                Ok(query) => {
                    let rationale = explain::explain(template, &query.binding, candidate.similarity);
                    tracing::info!(
                        template = %candidate.id,
                        similarity = candidate.similarity,
                        sql = %query.sql,
                        "translated"
                    );
                    winner = Some((query, rationale));
                    break;
                }
                Err(e) if e.is_recoverable() => {
                    if let AskqlError::UnresolvedSlot { kind, .. } = &e {
                        if !missing.contains(kind) {
                            missing.push(*kind);
                        }
                    }
                    tracing::debug!(template = %candidate.id, error = %e, "falling back");
                }
                Err(e) => return Err(e),
            }
        }

        match winner {
            Some((query, rationale)) => {
                let correction_priority =
                    active::priority(&question, &ranked, &corpus, &self.config);
                Ok(Translation {
                    query,
                    rationale,
                    ranked,
                    correction_priority,
                })
            }
            None => Err(AskqlError::UnsupportedQuery {
                question: question_text.to_string(),
                nearest: ranked.iter().take(3).map(|r| r.pattern.clone()).collect(),
                missing,
            }),
        }
    }

    /// Apply a user correction: update the corpus and invalidate the
    /// retriever index, all under the single mutation lock.
    pub fn apply_feedback(&self, feedback_event: &Feedback) -> AskqlResult<FeedbackOutcome> {
        let mut corpus = self.corpus.write().expect("corpus lock poisoned");
        let pmi = self.current_pmi(&corpus);
        let outcome = feedback::apply(
            &mut corpus,
            feedback_event,
            &self.catalog,
            &pmi,
            &self.config,
        )?;
        // Applied: readers may see the stale index until the next rank call
        // rebuilds it; they never see a partial one.
        self.retriever.invalidate();
        Ok(outcome)
    }

    /// Load previously learned templates from a JSONL file.
    pub fn load_learned(&self, path: &Path) -> AskqlResult<usize> {
        let mut corpus = self.corpus.write().expect("corpus lock poisoned");
        let added = corpus.load_learned(path)?;
        if added > 0 {
            self.retriever.invalidate();
        }
        Ok(added)
    }

    /// Persist learned templates to a JSONL file.
    pub fn save_learned(&self, path: &Path) -> AskqlResult<usize> {
        let corpus = self.corpus.read().expect("corpus lock poisoned");
        corpus.save_learned(path)
    }

    /// The PMI model for the current corpus version, rebuilding if stale.
    fn current_pmi(&self, corpus: &TemplateCorpus) -> Arc<PmiModel> {
        {
            let guard = self.pmi.read().expect("pmi lock poisoned");
            if guard.corpus_version() == corpus.version() {
                return Arc::clone(&*guard);
            }
        }
        let mut guard = self.pmi.write().expect("pmi lock poisoned");
        if guard.corpus_version() != corpus.version() {
            *guard = Arc::new(PmiModel::build(corpus));
        }
        Arc::clone(&*guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_fixtures::demo_catalog;
    use crate::composer::BoundValue;
    use crate::template::Provenance;

    fn assistant() -> Assistant {
        Assistant::new(demo_catalog(), AssistantConfig::default())
    }

    #[test]
    fn test_count_where_scenario() {
        let t = assistant().translate("how many policies are active").unwrap();
        assert_eq!(t.query.sql, "SELECT COUNT(*) FROM policies WHERE status = ?");
        assert_eq!(t.query.params, vec![BoundValue::Text("ACTIVE".into())]);
    }

    #[test]
    fn test_distinct_scenario() {
        let t = assistant().translate("unique status in claims").unwrap();
        assert!(t.query.sql.starts_with("SELECT DISTINCT status FROM claims"));
    }

    #[test]
    fn test_top_k_scenario() {
        let t = assistant()
            .translate("top 10 organizations by credit limit")
            .unwrap();
        assert_eq!(
            t.query.sql,
            "SELECT * FROM organizations ORDER BY credit_limit DESC LIMIT 10"
        );
    }

    #[test]
    fn test_unknown_table_is_unsupported() {
        let err = assistant().translate("show widgets").unwrap_err();
        match err {
            AskqlError::UnsupportedQuery { nearest, missing, .. } => {
                assert!(!nearest.is_empty());
                assert!(missing.contains(&SlotKind::Table));
            }
            other => panic!("expected UnsupportedQuery, got {other:?}"),
        }
    }

    #[test]
    fn test_translation_carries_rationale_and_priority() {
        let t = assistant().translate("how many rows in policies").unwrap();
        assert_eq!(t.rationale.template_id, t.query.template_id);
        assert!(t.rationale.similarity > 0.9);
        assert!((0.0..=1.0).contains(&t.correction_priority));
        assert!(!t.ranked.is_empty());
    }

    #[test]
    fn test_feedback_grows_corpus_and_retrieval_learns() {
        let assistant = assistant();
        let before = assistant.with_corpus(|c| c.len());

        let generated = assistant.translate("show policies").unwrap();
        let feedback = Feedback::new(
            "show lapsed policies",
            &generated.query.sql,
            "SELECT * FROM policies WHERE status = 'EXPIRED'",
            Some(generated.query.template_id),
        );
        let outcome = assistant.apply_feedback(&feedback).unwrap();
        assert_eq!(assistant.with_corpus(|c| c.len()), before + 1);

        let learned = assistant
            .with_corpus(|c| c.get(outcome.template_id).map(|t| t.clone()))
            .unwrap();
        assert_eq!(learned.provenance, Provenance::Learned);

        // the same phrasing now retrieves the learned template; "lapsed"
        // matched nothing in the question, so the literal stayed concrete
        let t = assistant.translate("show lapsed policies").unwrap();
        assert_eq!(t.query.template_id, outcome.template_id);
        assert_eq!(
            t.query.sql,
            "select * from policies where status = 'EXPIRED' LIMIT 200"
        );
        assert!(t.query.params.is_empty());
    }

    #[test]
    fn test_shared_across_threads() {
        let assistant = std::sync::Arc::new(assistant());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let assistant = std::sync::Arc::clone(&assistant);
            handles.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    assistant.translate("how many rows in claims").unwrap();
                }
            }));
        }
        let writer = std::sync::Arc::clone(&assistant);
        handles.push(std::thread::spawn(move || {
            let generated = writer.translate("show claims").unwrap();
            let feedback = Feedback::new(
                "show rejected claims",
                &generated.query.sql,
                "SELECT * FROM claims WHERE status = 'REJECTED'",
                Some(generated.query.template_id),
            );
            writer.apply_feedback(&feedback).unwrap();
        }));
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
