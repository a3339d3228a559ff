//! The feedback engine: turn user corrections into corpus updates.
//!
//! Each feedback event moves through Received -> Diffed ->
//! {Reinforced | NewTemplateCreated} -> Applied. The corrected SQL is lexed
//! into a canonical skeleton (literals lifted out, casing and whitespace
//! normalized); if it matches what was generated, the originating template
//! is reinforced, otherwise the correction is generalized into a new
//! learned template. Corrections that cannot be parsed fail with
//! `FeedbackConflict` and leave the corpus untouched.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map, opt, recognize, value},
    multi::many0,
    sequence::{pair, preceded, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};

use crate::catalog::SchemaCatalog;
use crate::composer::BoundValue;
use crate::config::AssistantConfig;
use crate::error::{AskqlError, AskqlResult};
use crate::matcher::{self, Entity, EntityKind};
use crate::pmi::PmiModel;
use crate::template::{Provenance, SlotKind, SlotSpec, TemplateCorpus, TemplateDraft, TemplateId};
use crate::text::Question;

/// A user's correction for one translated question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub question: String,
    pub generated_sql: String,
    pub corrected_sql: String,
    /// The template the generation came from, when known.
    pub template_id: Option<TemplateId>,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(
        question: &str,
        generated_sql: &str,
        corrected_sql: &str,
        template_id: Option<TemplateId>,
    ) -> Self {
        Self {
            question: question.to_string(),
            generated_sql: generated_sql.to_string(),
            corrected_sql: corrected_sql.to_string(),
            template_id,
            created_at: Utc::now(),
        }
    }
}

/// What happened to the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackDisposition {
    /// The correction confirmed an existing template.
    Reinforced,
    /// A new learned template was registered.
    Created,
}

/// Result of applying one feedback event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    pub template_id: TemplateId,
    pub disposition: FeedbackDisposition,
    /// The affected template's weight after the update.
    pub weight: f64,
}

// --- corrected-SQL lexing -------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum SqlToken {
    Word(String),
    Number(String),
    Str(String),
    Placeholder,
    Symbol(char),
}

/// Single-quoted string with `''` as the escape for a quote.
fn lex_str(input: &str) -> IResult<&str, SqlToken> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                rest = &rest[pos + 1..];
                if let Some(tail) = rest.strip_prefix('\'') {
                    out.push('\'');
                    rest = tail;
                } else {
                    return Ok((rest, SqlToken::Str(out)));
                }
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )))
            }
        }
    }
}

fn lex_number(input: &str) -> IResult<&str, SqlToken> {
    map(
        recognize(tuple((digit1, opt(pair(char('.'), digit1))))),
        |s: &str| SqlToken::Number(s.to_string()),
    )(input)
}

fn lex_word(input: &str) -> IResult<&str, SqlToken> {
    map(
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        |s: &str| SqlToken::Word(s.to_lowercase()),
    )(input)
}

fn lex_symbol(input: &str) -> IResult<&str, SqlToken> {
    alt((
        value(SqlToken::Placeholder, char('?')),
        map(one_of("()*,.;=<>!+-/%"), SqlToken::Symbol),
    ))(input)
}

fn lex_token(input: &str) -> IResult<&str, SqlToken> {
    preceded(multispace0, alt((lex_str, lex_number, lex_word, lex_symbol)))(input)
}

fn lex_sql(input: &str) -> AskqlResult<Vec<SqlToken>> {
    match many0(lex_token)(input) {
        Ok((rest, tokens)) => {
            if !rest.trim().is_empty() {
                return Err(AskqlError::FeedbackConflict(format!(
                    "unrecognized SQL near '{}'",
                    rest.trim().chars().take(20).collect::<String>()
                )));
            }
            if tokens.is_empty() {
                return Err(AskqlError::FeedbackConflict("empty statement".into()));
            }
            Ok(tokens)
        }
        Err(e) => Err(AskqlError::FeedbackConflict(format!("lex failed: {e}"))),
    }
}

/// One canonical token: its text, and which lifted literal it stands for.
#[derive(Debug, Clone)]
struct CanonTok {
    text: String,
    literal: Option<usize>,
}

/// A corrected statement reduced to comparable form.
#[derive(Debug, Clone)]
pub struct CanonicalSql {
    /// Lowercased, whitespace-normalized skeleton with literals as `?`.
    pub skeleton: String,
    /// The lifted literals, in placeholder order.
    pub literals: Vec<BoundValue>,
    /// Tables the statement reads from.
    pub tables: Vec<String>,
    toks: Vec<CanonTok>,
}

/// Parse a statement into its canonical skeleton. SELECT-only; referenced
/// tables must exist in the schema.
pub fn canonicalize(sql: &str, catalog: &SchemaCatalog) -> AskqlResult<CanonicalSql> {
    let tokens = lex_sql(sql)?;

    if !matches!(&tokens[0], SqlToken::Word(w) if w == "select") {
        return Err(AskqlError::FeedbackConflict(
            "only SELECT statements can be learned".into(),
        ));
    }

    let mut toks: Vec<CanonTok> = Vec::new();
    let mut literals: Vec<BoundValue> = Vec::new();
    let mut tables: Vec<String> = Vec::new();
    let mut expect_table = false;

    for token in &tokens {
        match token {
            SqlToken::Word(w) => {
                if expect_table && !tables.contains(w) {
                    tables.push(w.clone());
                }
                expect_table = matches!(w.as_str(), "from" | "join");
                toks.push(CanonTok {
                    text: w.clone(),
                    literal: None,
                });
            }
            SqlToken::Number(n) => {
                let value = match n.parse::<i64>() {
                    Ok(v) => BoundValue::Int(v),
                    Err(_) => BoundValue::Float(n.parse::<f64>().map_err(|_| {
                        AskqlError::FeedbackConflict(format!("bad numeric literal '{n}'"))
                    })?),
                };
                toks.push(CanonTok {
                    text: "?".into(),
                    literal: Some(literals.len()),
                });
                literals.push(value);
                expect_table = false;
            }
            SqlToken::Str(s) => {
                toks.push(CanonTok {
                    text: "?".into(),
                    literal: Some(literals.len()),
                });
                literals.push(BoundValue::Text(s.clone()));
                expect_table = false;
            }
            SqlToken::Placeholder => {
                toks.push(CanonTok {
                    text: "?".into(),
                    literal: None,
                });
                expect_table = false;
            }
            SqlToken::Symbol(c) => {
                if *c == ';' {
                    break;
                }
                toks.push(CanonTok {
                    text: c.to_string(),
                    literal: None,
                });
                // subqueries: "from (" does not name a table
                if expect_table && *c == '(' {
                    expect_table = false;
                }
            }
        }
    }

    // A trailing LIMIT is ambient (the composer re-appends one), so it does
    // not participate in structural comparison.
    if toks.len() >= 2
        && toks[toks.len() - 2].text == "limit"
        && toks[toks.len() - 1].text == "?"
    {
        if let Some(idx) = toks[toks.len() - 1].literal {
            literals.remove(idx);
        }
        toks.truncate(toks.len() - 2);
    }

    for table in &tables {
        if !catalog.metadata().has_table(table) {
            return Err(AskqlError::FeedbackConflict(format!(
                "statement references unknown table '{table}'"
            )));
        }
    }

    Ok(CanonicalSql {
        skeleton: join_tokens(&toks),
        literals,
        tables,
        toks,
    })
}

fn join_tokens(toks: &[CanonTok]) -> String {
    let mut out = String::new();
    for tok in toks {
        let no_space_before = matches!(tok.text.as_str(), ")" | "," | "." | "(");
        let after_open = out.ends_with('(') || out.ends_with('.');
        if !out.is_empty() && !no_space_before && !after_open {
            out.push(' ');
        } else if !out.is_empty() && tok.text == "(" && !after_open {
            // keep "count(" tight but "where (" readable: attach to idents
            if out
                .chars()
                .last()
                .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                // no space
            } else {
                out.push(' ');
            }
        }
        out.push_str(&tok.text);
    }
    out
}

/// Apply one feedback event to the corpus. The caller holds the corpus
/// write lock and invalidates the retriever afterwards.
pub fn apply(
    corpus: &mut TemplateCorpus,
    feedback: &Feedback,
    catalog: &SchemaCatalog,
    pmi: &PmiModel,
    config: &AssistantConfig,
) -> AskqlResult<FeedbackOutcome> {
    tracing::debug!(question = %feedback.question, "feedback received");

    // Received -> Diffed. A conflict here leaves the corpus untouched.
    let corrected = canonicalize(&feedback.corrected_sql, catalog)?;
    let generated = canonicalize(&feedback.generated_sql, catalog).ok();

    let same_shape = generated
        .as_ref()
        .is_some_and(|g| g.skeleton == corrected.skeleton);

    // A confirmation only counts as such when we know which template to
    // credit; otherwise the correction is generalized like any other.
    let outcome = if let (true, Some(id)) = (same_shape, feedback.template_id) {
        // Diffed -> Reinforced
        let weight = corpus.reinforce(id, config.reinforce_rate)?;
        tracing::info!(template = %id, weight, "feedback reinforced template");
        FeedbackOutcome {
            template_id: id,
            disposition: FeedbackDisposition::Reinforced,
            weight,
        }
    } else {
        // Diffed -> NewTemplateCreated. The replaced template loses weight.
        if !same_shape {
            if let Some(id) = feedback.template_id {
                let weight = corpus.penalize(id, config.penalty_rate)?;
                tracing::debug!(template = %id, weight, "originating template penalized");
            }
        }

        let question = Question::parse(&feedback.question);
        let entities = matcher::extract(&question, catalog, pmi);
        let draft = generalize(&question, &entities, &corrected, config);
        let (id, created) = corpus.add_or_update(draft)?;
        let weight = corpus.get(id)?.weight;
        let disposition = if created {
            tracing::info!(template = %id, "feedback created learned template");
            FeedbackDisposition::Created
        } else {
            // identical feedback resubmitted: reinforce, don't duplicate
            tracing::info!(template = %id, "learned template already present, reinforced");
            FeedbackDisposition::Reinforced
        };
        FeedbackOutcome {
            template_id: id,
            disposition,
            weight,
        }
    };

    // {Reinforced | NewTemplateCreated} -> Applied happens in the pipeline,
    // which invalidates the retriever under the same lock.
    Ok(outcome)
}

/// Generalize a corrected statement into a template: literals the matcher
/// also extracted from the question become slots; everything else stays
/// concrete.
fn generalize(
    question: &Question,
    entities: &[Entity],
    corrected: &CanonicalSql,
    config: &AssistantConfig,
) -> TemplateDraft {
    let mut slots: Vec<SlotSpec> = Vec::new();
    let mut pattern_tokens: Vec<String> = question.tokens.clone();
    // literal index -> slot name
    let mut slotted: Vec<Option<String>> = vec![None; corrected.literals.len()];
    let mut spans: Vec<(crate::matcher::Span, String)> = Vec::new();
    let mut used_entities: Vec<usize> = Vec::new();

    for (idx, literal) in corrected.literals.iter().enumerate() {
        let Some((eidx, entity)) = entities.iter().enumerate().find(|(i, e)| {
            !used_entities.contains(i)
                && matches!(&e.kind, EntityKind::Literal { value, .. } if values_match(value, literal))
        }) else {
            continue;
        };
        used_entities.push(eidx);
        let name = format!("lit{}", slots.len() + 1);
        spans.push((entity.span, name.clone()));
        slots.push(SlotSpec::new(&name, SlotKind::Literal));
        slotted[idx] = Some(name);
    }

    // Replace entity spans with wildcards, right to left so earlier spans
    // keep their indices.
    spans.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (span, name) in spans {
        if span.start < pattern_tokens.len() && span.len > 0 {
            pattern_tokens.splice(
                span.start..(span.start + span.len).min(pattern_tokens.len()),
                [format!("{{{name}}}")],
            );
        }
    }

    // Rebuild the skeleton: slotted literals as placeholders, the rest
    // restored to concrete literals.
    let rebuilt: Vec<CanonTok> = corrected
        .toks
        .iter()
        .map(|tok| match tok.literal {
            Some(idx) => match &slotted[idx] {
                Some(name) => CanonTok {
                    text: format!("{{{name}}}"),
                    literal: None,
                },
                None => CanonTok {
                    text: render_literal(&corrected.literals[idx]),
                    literal: None,
                },
            },
            None => tok.clone(),
        })
        .collect();

    TemplateDraft::new(&pattern_tokens.join(" "), &join_tokens(&rebuilt), slots)
        .weight(config.learned_weight)
        .provenance(Provenance::Learned)
}

fn values_match(a: &BoundValue, b: &BoundValue) -> bool {
    match (a, b) {
        (BoundValue::Text(x), BoundValue::Text(y)) => x.eq_ignore_ascii_case(y),
        (BoundValue::Int(x), BoundValue::Int(y)) => x == y,
        (BoundValue::Float(x), BoundValue::Float(y)) => (x - y).abs() < f64::EPSILON,
        _ => a.to_string().eq_ignore_ascii_case(&b.to_string()),
    }
}

fn render_literal(value: &BoundValue) -> String {
    match value {
        BoundValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

// --- audit log ------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FeedbackRecord<'a> {
    ts: i64,
    question: &'a str,
    generated_sql: &'a str,
    corrected_sql: &'a str,
    template_id: TemplateId,
    disposition: FeedbackDisposition,
    weight: f64,
}

/// Append-only JSONL audit trail of feedback events.
#[derive(Debug, Clone)]
pub struct FeedbackLog {
    path: PathBuf,
}

impl FeedbackLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, feedback: &Feedback, outcome: &FeedbackOutcome) -> AskqlResult<()> {
        let record = FeedbackRecord {
            ts: feedback.created_at.timestamp(),
            question: &feedback.question,
            generated_sql: &feedback.generated_sql,
            corrected_sql: &feedback.corrected_sql,
            template_id: outcome.template_id,
            disposition: outcome.disposition,
            weight: outcome.weight,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| AskqlError::Config(format!("serialize feedback record: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}
