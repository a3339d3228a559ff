//! Pointwise mutual information between pattern tokens and the columns
//! their skeletons reference.
//!
//! Used by the matcher as a weak signal when a column mention is ambiguous
//! across tables: tokens that co-occur with `policies.status` across the
//! corpus pull "status" toward that column. Rebuilt alongside the retriever
//! index whenever the corpus version moves.

use std::collections::{HashMap, HashSet};

use crate::template::TemplateCorpus;

/// PMI scores keyed by (token, column key), where the column key is either
/// `table.column` or a bare `column`.
#[derive(Debug, Default)]
pub struct PmiModel {
    corpus_version: u64,
    scores: HashMap<(String, String), f64>,
}

impl PmiModel {
    /// Build PMI scores over all (pattern token, referenced column) pairs in
    /// the corpus, with add-one smoothing.
    pub fn build(corpus: &TemplateCorpus) -> Self {
        let mut tf_tok: HashMap<String, u32> = HashMap::new();
        let mut tf_col: HashMap<String, u32> = HashMap::new();
        let mut tf_pair: HashMap<(String, String), u32> = HashMap::new();
        let mut n = 0u32;

        for template in corpus.list() {
            let tokens: HashSet<&str> = template.pattern_terms().into_iter().collect();
            let columns = columns_from_sql(&template.skeleton);
            if tokens.is_empty() || columns.is_empty() {
                continue;
            }
            n += 1;
            for tok in &tokens {
                *tf_tok.entry(tok.to_string()).or_default() += 1;
            }
            for col in &columns {
                *tf_col.entry(col.clone()).or_default() += 1;
            }
            for tok in &tokens {
                for col in &columns {
                    *tf_pair.entry((tok.to_string(), col.clone())).or_default() += 1;
                }
            }
        }

        let mut scores = HashMap::new();
        if n > 0 {
            let n = f64::from(n);
            for ((tok, col), pair_count) in tf_pair {
                let p_t = f64::from(tf_tok[&tok] + 1) / (n + 1.0);
                let p_c = f64::from(tf_col[&col] + 1) / (n + 1.0);
                let p_tc = f64::from(pair_count + 1) / (n + 1.0);
                scores.insert((tok, col), (p_tc / (p_t * p_c)).ln());
            }
        }

        Self {
            corpus_version: corpus.version(),
            scores,
        }
    }

    pub fn corpus_version(&self) -> u64 {
        self.corpus_version
    }

    /// PMI(token, table.column), backing off to the bare column key.
    pub fn score(&self, token: &str, table: &str, column: &str) -> f64 {
        let token = token.to_lowercase();
        let qualified = (token.clone(), format!("{table}.{column}"));
        if let Some(v) = self.scores.get(&qualified) {
            return *v;
        }
        self.scores
            .get(&(token, column.to_string()))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Column keys referenced by a SQL skeleton: `table.column` pairs anywhere,
/// plus the bare column after `SELECT DISTINCT`.
fn columns_from_sql(sql: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |key: String| {
        if !out.contains(&key) {
            out.push(key);
        }
    };

    let lower = sql.to_lowercase();
    let bytes = lower.as_bytes();
    let is_ident = |c: u8| c.is_ascii_alphanumeric() || c == b'_';

    // table.column pairs
    let mut i = 0;
    while let Some(dot) = lower[i..].find('.') {
        let dot = i + dot;
        let mut start = dot;
        while start > 0 && is_ident(bytes[start - 1]) {
            start -= 1;
        }
        let mut end = dot + 1;
        while end < bytes.len() && is_ident(bytes[end]) {
            end += 1;
        }
        let table = &lower[start..dot];
        let column = &lower[dot + 1..end];
        if !table.is_empty()
            && !column.is_empty()
            && table.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && column.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        {
            push(format!("{table}.{column}"));
        }
        i = end.max(dot + 1);
    }

    // SELECT DISTINCT <column>
    if let Some(pos) = lower.find("select distinct ") {
        let rest = &lower[pos + "select distinct ".len()..];
        let ident: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
        if ident.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
            push(ident);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateDraft;

    #[test]
    fn test_columns_from_sql() {
        assert_eq!(
            columns_from_sql("SELECT c.claim_number FROM claims c JOIN policies p ON p.policy_id = c.policy_id"),
            vec!["c.claim_number", "p.policy_id", "c.policy_id"]
        );
        assert_eq!(columns_from_sql("SELECT DISTINCT status FROM claims"), vec!["status"]);
        assert!(columns_from_sql("SELECT * FROM claims").is_empty());
    }

    #[test]
    fn test_pmi_prefers_cooccurring_column() {
        let mut corpus = TemplateCorpus::new();
        corpus
            .add_or_update(TemplateDraft::new(
                "unique status in claims",
                "SELECT DISTINCT status FROM claims",
                vec![],
            ))
            .unwrap();
        corpus
            .add_or_update(TemplateDraft::new(
                "claims joined to policies",
                "SELECT claims.status FROM claims JOIN policies ON claims.policy_id = policies.policy_id",
                vec![],
            ))
            .unwrap();

        let pmi = PmiModel::build(&corpus);
        assert!(pmi.score("status", "claims", "status") > 0.0);
        assert_eq!(pmi.score("nonsense", "claims", "status"), 0.0);
    }

    #[test]
    fn test_empty_corpus_scores_zero() {
        let pmi = PmiModel::build(&TemplateCorpus::new());
        assert_eq!(pmi.score("status", "claims", "status"), 0.0);
    }
}
