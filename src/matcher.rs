//! Rule-based entity extraction.
//!
//! Scans the normalized question for schema mentions (token n-grams against
//! the catalog's synonym map), literal mentions (quoted spans, sample
//! values, numbers and year-like tokens), comparison operators, and top-N
//! counts. Overlapping spans resolve longest-match-first, then leftmost.
//! This step is schema-grounded but template-agnostic; a missing entity is
//! never an error here.

use strsim::levenshtein;

use crate::catalog::{SchemaCatalog, SchemaRef, ValueHit};
use crate::composer::BoundValue;
use crate::pmi::PmiModel;
use crate::text::{is_stop_word, Question};

/// Status-style qualifier words. When one matches no sample value it
/// degrades to an origin-less literal mention rather than being dropped.
const QUALIFIER_WORDS: &[&str] = &[
    "active", "inactive", "open", "closed", "pending", "expired", "cancelled",
    "rejected", "enabled", "disabled", "current",
];

/// Comparison phrases recognized by the operator scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Token-level location of a mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    fn end(&self) -> usize {
        self.start + self.len
    }

    fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// The closed set of things the matcher can find in a question.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    Table {
        name: String,
    },
    Column {
        table: Option<String>,
        name: String,
    },
    Literal {
        value: BoundValue,
        /// Table/column the value was sampled from, when known.
        table: Option<String>,
        column: Option<String>,
    },
    Operator(CompareOp),
    Count(i64),
}

/// An extracted mention: where it was, what it said, what it resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub span: Span,
    pub surface: String,
    pub kind: EntityKind,
}

#[derive(Debug)]
enum CandKind {
    Quoted(String),
    Schema(Vec<SchemaRef>),
    Value(Vec<ValueHit>),
    Count(i64),
    Operator(CompareOp),
    Number(i64),
    Qualifier(String),
}

#[derive(Debug)]
struct Candidate {
    span: Span,
    surface: String,
    priority: u8,
    kind: CandKind,
}

/// Extract schema-relevant entities from a normalized question.
pub fn extract(question: &Question, catalog: &SchemaCatalog, pmi: &PmiModel) -> Vec<Entity> {
    let tokens: Vec<&str> = question.tokens.iter().map(String::as_str).collect();
    let mut candidates = Vec::new();

    collect_quoted(question, &tokens, &mut candidates);
    collect_schema_ngrams(&tokens, catalog, &mut candidates);
    collect_value_ngrams(&tokens, catalog, &mut candidates);
    collect_counts(&tokens, &mut candidates);
    collect_operators(&tokens, &mut candidates);
    collect_numbers(&tokens, &mut candidates);
    collect_qualifiers(&tokens, catalog, &mut candidates);

    // Longest match first, then leftmost, then detector priority.
    candidates.sort_by(|a, b| {
        b.span
            .len
            .cmp(&a.span.len)
            .then_with(|| a.span.start.cmp(&b.span.start))
            .then_with(|| a.priority.cmp(&b.priority))
    });

    let mut selected: Vec<Candidate> = Vec::new();
    for cand in candidates {
        if !selected.iter().any(|s| s.span.overlaps(&cand.span)) {
            selected.push(cand);
        }
    }

    fuzzy_schema_pass(&tokens, catalog, &mut selected);

    // Tables the question names directly, used to resolve ambiguity below.
    let mentioned: Vec<String> = selected
        .iter()
        .filter_map(|c| match &c.kind {
            CandKind::Schema(refs) => match refs.first() {
                Some(SchemaRef::Table(name)) => Some(name.clone()),
                _ => None,
            },
            _ => None,
        })
        .collect();

    let mut entities: Vec<Entity> = selected
        .into_iter()
        .filter_map(|c| finalize(c, &mentioned, catalog, pmi))
        .collect();
    entities.sort_by_key(|e| (e.span.start, e.span.len));
    entities
}

fn collect_quoted(question: &Question, tokens: &[&str], out: &mut Vec<Candidate>) {
    for quoted in &question.quoted {
        let inner = crate::text::tokenize(quoted);
        let span = find_subsequence(tokens, &inner)
            // Quoted text the tokenizer cannot locate still yields a
            // literal, anchored past the last token.
            .unwrap_or(Span {
                start: tokens.len(),
                len: 0,
            });
        out.push(Candidate {
            span,
            surface: quoted.clone(),
            priority: 0,
            kind: CandKind::Quoted(quoted.clone()),
        });
    }
}

fn find_subsequence(tokens: &[&str], needle: &[String]) -> Option<Span> {
    if needle.is_empty() || needle.len() > tokens.len() {
        return None;
    }
    (0..=tokens.len() - needle.len())
        .find(|&start| tokens[start..start + needle.len()].iter().zip(needle).all(|(a, b)| *a == b))
        .map(|start| Span {
            start,
            len: needle.len(),
        })
}

fn collect_schema_ngrams(tokens: &[&str], catalog: &SchemaCatalog, out: &mut Vec<Candidate>) {
    for n in (1..=3usize).rev() {
        if tokens.len() < n {
            continue;
        }
        for start in 0..=tokens.len() - n {
            let phrase = tokens[start..start + n].join(" ");
            let refs: Vec<SchemaRef> = catalog.resolve_all(&phrase).into_iter().cloned().collect();
            if !refs.is_empty() {
                out.push(Candidate {
                    span: Span { start, len: n },
                    surface: phrase,
                    priority: 1,
                    kind: CandKind::Schema(refs),
                });
            }
        }
    }
}

fn collect_value_ngrams(tokens: &[&str], catalog: &SchemaCatalog, out: &mut Vec<Candidate>) {
    for n in (1..=3usize).rev() {
        if tokens.len() < n {
            continue;
        }
        for start in 0..=tokens.len() - n {
            let phrase = tokens[start..start + n].join(" ");
            let hits: Vec<ValueHit> = catalog.lookup_value_all(&phrase).into_iter().cloned().collect();
            if !hits.is_empty() {
                out.push(Candidate {
                    span: Span { start, len: n },
                    surface: phrase,
                    priority: 2,
                    kind: CandKind::Value(hits),
                });
            }
        }
    }
}

fn collect_counts(tokens: &[&str], out: &mut Vec<Candidate>) {
    for (i, pair) in tokens.windows(2).enumerate() {
        if matches!(pair[0], "top" | "first" | "largest" | "biggest") {
            if let Ok(n) = pair[1].parse::<i64>() {
                out.push(Candidate {
                    span: Span { start: i, len: 2 },
                    surface: pair.join(" "),
                    priority: 3,
                    kind: CandKind::Count(n),
                });
            }
        }
    }
}

fn collect_operators(tokens: &[&str], out: &mut Vec<Candidate>) {
    for (i, pair) in tokens.windows(2).enumerate() {
        let op = match (pair[0], pair[1]) {
            ("more", "than") | ("greater", "than") | ("bigger", "than") => Some(CompareOp::Gt),
            ("less", "than") | ("fewer", "than") | ("smaller", "than") => Some(CompareOp::Lt),
            ("at", "least") => Some(CompareOp::Gte),
            ("at", "most") => Some(CompareOp::Lte),
            ("equal", "to") => Some(CompareOp::Eq),
            ("not", "equal") => Some(CompareOp::Ne),
            _ => None,
        };
        if let Some(op) = op {
            out.push(Candidate {
                span: Span { start: i, len: 2 },
                surface: pair.join(" "),
                priority: 4,
                kind: CandKind::Operator(op),
            });
        }
    }
    for (i, token) in tokens.iter().enumerate() {
        let op = match *token {
            "over" | "above" | "exceeding" => Some(CompareOp::Gt),
            "under" | "below" => Some(CompareOp::Lt),
            "equals" => Some(CompareOp::Eq),
            _ => None,
        };
        if let Some(op) = op {
            out.push(Candidate {
                span: Span { start: i, len: 1 },
                surface: (*token).to_string(),
                priority: 4,
                kind: CandKind::Operator(op),
            });
        }
    }
}

fn collect_numbers(tokens: &[&str], out: &mut Vec<Candidate>) {
    for (i, token) in tokens.iter().enumerate() {
        if token.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = token.parse::<i64>() {
                out.push(Candidate {
                    span: Span { start: i, len: 1 },
                    surface: (*token).to_string(),
                    priority: 5,
                    kind: CandKind::Number(n),
                });
            }
        }
    }
}

fn collect_qualifiers(tokens: &[&str], catalog: &SchemaCatalog, out: &mut Vec<Candidate>) {
    for (i, token) in tokens.iter().enumerate() {
        if QUALIFIER_WORDS.contains(token) && catalog.lookup_value(token).is_none() {
            out.push(Candidate {
                span: Span { start: i, len: 1 },
                surface: (*token).to_string(),
                priority: 6,
                kind: CandKind::Qualifier((*token).to_string()),
            });
        }
    }
}

/// Second chance for uncovered tokens: fuzzy-match misspellings against the
/// schema's names with a length-scaled edit-distance threshold.
fn fuzzy_schema_pass(tokens: &[&str], catalog: &SchemaCatalog, selected: &mut Vec<Candidate>) {
    for (i, token) in tokens.iter().enumerate() {
        let span = Span { start: i, len: 1 };
        if token.len() < 4
            || is_stop_word(token)
            || token.chars().all(|c| c.is_ascii_digit())
            || selected.iter().any(|s| s.span.overlaps(&span))
        {
            continue;
        }
        let threshold = if token.len() <= 5 { 1 } else { 2 };
        let mut best: Option<(usize, SchemaRef)> = None;
        for table in &catalog.metadata().tables {
            let dist = levenshtein(token, &table.name);
            if dist <= threshold && best.as_ref().is_none_or(|(d, _)| dist < *d) {
                best = Some((dist, SchemaRef::Table(table.name.clone())));
            }
            for col in &table.columns {
                let dist = levenshtein(token, &col.name);
                if dist <= threshold && best.as_ref().is_none_or(|(d, _)| dist < *d) {
                    best = Some((
                        dist,
                        SchemaRef::Column {
                            table: table.name.clone(),
                            column: col.name.clone(),
                        },
                    ));
                }
            }
        }
        if let Some((dist, sref)) = best {
            // Exact hits were handled by the n-gram scan.
            if dist > 0 {
                selected.push(Candidate {
                    span,
                    surface: (*token).to_string(),
                    priority: 7,
                    kind: CandKind::Schema(vec![sref]),
                });
            }
        }
    }
}

fn finalize(
    cand: Candidate,
    mentioned: &[String],
    catalog: &SchemaCatalog,
    pmi: &PmiModel,
) -> Option<Entity> {
    let kind = match cand.kind {
        CandKind::Schema(refs) => resolve_schema_ref(&cand.surface, refs, mentioned, pmi)?,
        CandKind::Value(hits) => {
            let hit = prefer_mentioned_hit(hits, mentioned)?;
            EntityKind::Literal {
                value: BoundValue::Text(hit.stored),
                table: Some(hit.table),
                column: Some(hit.column),
            }
        }
        CandKind::Quoted(raw) => {
            let origin = catalog
                .lookup_value_all(&raw)
                .into_iter()
                .cloned()
                .collect::<Vec<_>>();
            let origin = prefer_mentioned_hit(origin, mentioned);
            EntityKind::Literal {
                value: BoundValue::Text(raw),
                table: origin.as_ref().map(|h| h.table.clone()),
                column: origin.map(|h| h.column),
            }
        }
        CandKind::Count(n) => EntityKind::Count(n),
        CandKind::Operator(op) => EntityKind::Operator(op),
        CandKind::Number(n) => EntityKind::Literal {
            value: BoundValue::Int(n),
            table: None,
            column: None,
        },
        CandKind::Qualifier(word) => EntityKind::Literal {
            value: BoundValue::Text(word),
            table: None,
            column: None,
        },
    };
    Some(Entity {
        span: cand.span,
        surface: cand.surface,
        kind,
    })
}

fn prefer_mentioned_hit(hits: Vec<ValueHit>, mentioned: &[String]) -> Option<ValueHit> {
    hits.iter()
        .find(|h| mentioned.contains(&h.table))
        .cloned()
        .or_else(|| hits.into_iter().next())
}

/// Pick one schema element for a mention. Tables win outright; ambiguous
/// columns prefer a mentioned table, then the PMI signal, then schema order.
fn resolve_schema_ref(
    surface: &str,
    refs: Vec<SchemaRef>,
    mentioned: &[String],
    pmi: &PmiModel,
) -> Option<EntityKind> {
    if let Some(SchemaRef::Table(name)) = refs.iter().find(|r| r.is_table()) {
        return Some(EntityKind::Table { name: name.clone() });
    }

    let columns: Vec<(&String, &String)> = refs
        .iter()
        .filter_map(|r| match r {
            SchemaRef::Column { table, column } => Some((table, column)),
            SchemaRef::Table(_) => None,
        })
        .collect();
    if columns.is_empty() {
        return None;
    }

    let tokens = crate::text::tokenize(surface);
    let chosen = columns
        .iter()
        .enumerate()
        .max_by(|(ia, (ta, ca)), (ib, (tb, cb))| {
            let in_a = mentioned.contains(*ta);
            let in_b = mentioned.contains(*tb);
            if in_a != in_b {
                return in_a.cmp(&in_b);
            }
            let score = |t: &str, c: &str| {
                tokens
                    .iter()
                    .map(|tok| pmi.score(tok, t, c))
                    .fold(0.0f64, f64::max)
            };
            score(ta, ca)
                .partial_cmp(&score(tb, cb))
                .unwrap_or(std::cmp::Ordering::Equal)
                // max_by keeps the later of equals; invert so schema order wins
                .then_with(|| ib.cmp(ia))
        })
        .map(|(_, (t, c))| (t.to_string(), c.to_string()));

    chosen.map(|(table, column)| EntityKind::Column {
        table: Some(table),
        name: column,
    })
}
