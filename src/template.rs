//! The template corpus: question patterns paired with SQL skeletons.
//!
//! A [`Template`] is one way of phrasing one kind of query. The corpus is
//! insertion-ordered, de-duplicated on the normalized pattern, and mutated
//! only through [`TemplateCorpus::add_or_update`]. Every mutation bumps a
//! version counter so derived views (the retriever index, the PMI model)
//! can detect staleness.

use std::collections::HashSet;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SchemaCatalog;
use crate::config::AssistantConfig;
use crate::error::{AskqlError, AskqlResult};
use crate::text::{singular, underscore_to_words};

/// Identifier of a template within one corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(pub u64);

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The closed set of slot kinds a skeleton may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Table,
    Column,
    Literal,
    Operator,
    Count,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotKind::Table => "table",
            SlotKind::Column => "column",
            SlotKind::Literal => "literal",
            SlotKind::Operator => "operator",
            SlotKind::Count => "count",
        };
        f.write_str(s)
    }
}

/// A named, typed placeholder declared by a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSpec {
    pub name: String,
    pub kind: SlotKind,
    /// Required slots fail composition when no entity (or fallback) covers
    /// them. Operator and count slots always have a default and are
    /// conventionally optional.
    pub required: bool,
}

impl SlotSpec {
    pub fn new(name: &str, kind: SlotKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: matches!(kind, SlotKind::Table | SlotKind::Column | SlotKind::Literal),
        }
    }

    pub fn optional(name: &str, kind: SlotKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Where a template came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Shipped with the binary.
    Seed,
    /// Generated from the introspected schema.
    Schema,
    /// Derived from user feedback.
    Learned,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Seed => "seed",
            Provenance::Schema => "schema",
            Provenance::Learned => "learned",
        };
        f.write_str(s)
    }
}

/// A reusable (pattern, skeleton, slots) triple with a feedback-adjusted
/// weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    /// Normalized token sequence, possibly containing `{slot}` wildcards.
    pub pattern: String,
    /// Parameterized SQL with `{slot}` placeholders.
    pub skeleton: String,
    pub slots: Vec<SlotSpec>,
    /// Confidence in [0, 1], adjusted by feedback.
    pub weight: f64,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn slot(&self, name: &str) -> Option<&SlotSpec> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Pattern tokens with wildcard slots removed; what the retriever
    /// indexes.
    pub fn pattern_terms(&self) -> Vec<&str> {
        self.pattern
            .split_whitespace()
            .filter(|t| !(t.starts_with('{') && t.ends_with('}')))
            .collect()
    }
}

/// Everything needed to register a template, before an id is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub pattern: String,
    pub skeleton: String,
    pub slots: Vec<SlotSpec>,
    pub weight: f64,
    pub provenance: Provenance,
}

impl TemplateDraft {
    pub fn new(pattern: &str, skeleton: &str, slots: Vec<SlotSpec>) -> Self {
        Self {
            pattern: pattern.into(),
            skeleton: skeleton.into(),
            slots,
            weight: 0.5,
            provenance: Provenance::Seed,
        }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// `{name}` placeholders appearing in a pattern or skeleton, in order of
/// first appearance.
pub(crate) fn placeholders(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + 1 + len];
        if !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !out.iter().any(|n| n == name)
        {
            out.push(name.to_string());
        }
        rest = &rest[start + 1 + len + 1..];
    }
    out
}

/// Insertion-ordered, de-duplicated template collection.
#[derive(Debug, Default)]
pub struct TemplateCorpus {
    templates: Vec<Template>,
    next_id: u64,
    version: u64,
}

impl TemplateCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty corpus populated with the static seed templates.
    pub fn with_seeds(config: &AssistantConfig) -> Self {
        let mut corpus = Self::new();
        for draft in seed_templates(config) {
            // Seeds are hand-written; invariant violations here are bugs.
            if let Err(e) = corpus.add_or_update(draft) {
                tracing::error!(error = %e, "seed template rejected");
            }
        }
        corpus
    }

    /// Monotonic counter bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// All templates, insertion-ordered.
    pub fn list(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, id: TemplateId) -> AskqlResult<&Template> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .ok_or(AskqlError::TemplateNotFound(id))
    }

    /// Register a template, or reinforce the existing one if an equivalent
    /// normalized pattern is already present. Returns the id and whether a
    /// new template was created.
    pub fn add_or_update(&mut self, draft: TemplateDraft) -> AskqlResult<(TemplateId, bool)> {
        validate_draft(&draft)?;
        let pattern = normalize_pattern(&draft.pattern);

        if let Some(existing) = self.templates.iter_mut().find(|t| t.pattern == pattern) {
            existing.weight = reinforced(existing.weight, 0.2);
            let id = existing.id;
            self.version += 1;
            tracing::debug!(%id, pattern, "pattern already known, reinforced");
            return Ok((id, false));
        }

        let id = TemplateId(self.next_id);
        self.next_id += 1;
        self.templates.push(Template {
            id,
            pattern,
            skeleton: draft.skeleton.trim().to_string(),
            slots: draft.slots,
            weight: draft.weight.clamp(0.0, 1.0),
            provenance: draft.provenance,
            created_at: Utc::now(),
        });
        self.version += 1;
        Ok((id, true))
    }

    /// Confirmation feedback: move the weight toward 1 without ever
    /// reaching it in one step.
    pub fn reinforce(&mut self, id: TemplateId, rate: f64) -> AskqlResult<f64> {
        let template = self.get_mut(id)?;
        template.weight = reinforced(template.weight, rate);
        let w = template.weight;
        self.version += 1;
        Ok(w)
    }

    /// Correction feedback against this template: shrink the weight.
    pub fn penalize(&mut self, id: TemplateId, rate: f64) -> AskqlResult<f64> {
        let template = self.get_mut(id)?;
        template.weight = (template.weight * (1.0 - rate)).clamp(0.0, 1.0);
        let w = template.weight;
        self.version += 1;
        Ok(w)
    }

    fn get_mut(&mut self, id: TemplateId) -> AskqlResult<&mut Template> {
        self.templates
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(AskqlError::TemplateNotFound(id))
    }

    /// Append learned templates to a JSONL file.
    pub fn save_learned(&self, path: &Path) -> AskqlResult<usize> {
        let mut file = std::fs::File::create(path)?;
        let mut written = 0;
        for t in self.templates.iter().filter(|t| t.provenance == Provenance::Learned) {
            let line = serde_json::to_string(t)
                .map_err(|e| AskqlError::Config(format!("serialize template: {e}")))?;
            writeln!(file, "{line}")?;
            written += 1;
        }
        Ok(written)
    }

    /// Reload previously persisted learned templates. Malformed lines are
    /// skipped with a warning.
    pub fn load_learned(&mut self, path: &Path) -> AskqlResult<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let file = std::fs::File::open(path)?;
        let mut added = 0;
        for line in std::io::BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: Result<Template, _> = serde_json::from_str(&line);
            match parsed {
                Ok(t) => {
                    let draft = TemplateDraft {
                        pattern: t.pattern,
                        skeleton: t.skeleton,
                        slots: t.slots,
                        weight: t.weight,
                        provenance: Provenance::Learned,
                    };
                    if let Ok((_, true)) = self.add_or_update(draft) {
                        added += 1;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "skipping malformed learned template"),
            }
        }
        Ok(added)
    }

    /// Generate schema-derived templates for every table and column of the
    /// catalog and register them.
    pub fn add_schema_templates(&mut self, catalog: &SchemaCatalog, config: &AssistantConfig) {
        for draft in schema_templates(catalog, config) {
            if let Err(e) = self.add_or_update(draft) {
                tracing::warn!(error = %e, "schema-derived template rejected");
            }
        }
    }
}

fn reinforced(weight: f64, rate: f64) -> f64 {
    (weight + (1.0 - weight) * rate).clamp(0.0, 1.0)
}

fn normalize_pattern(pattern: &str) -> String {
    pattern.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn validate_draft(draft: &TemplateDraft) -> AskqlResult<()> {
    let declared: HashSet<&str> = draft.slots.iter().map(|s| s.name.as_str()).collect();
    if declared.len() != draft.slots.len() {
        return Err(AskqlError::InvalidTemplate {
            pattern: draft.pattern.clone(),
            reason: "duplicate slot names".into(),
        });
    }
    for name in placeholders(&draft.skeleton) {
        if !declared.contains(name.as_str()) {
            return Err(AskqlError::InvalidTemplate {
                pattern: draft.pattern.clone(),
                reason: format!("skeleton references undeclared slot '{name}'"),
            });
        }
    }
    for name in placeholders(&draft.pattern) {
        if !declared.contains(name.as_str()) {
            return Err(AskqlError::InvalidTemplate {
                pattern: draft.pattern.clone(),
                reason: format!("pattern references undeclared slot '{name}'"),
            });
        }
    }
    if draft.pattern.trim().is_empty() {
        return Err(AskqlError::InvalidTemplate {
            pattern: draft.pattern.clone(),
            reason: "empty pattern".into(),
        });
    }
    Ok(())
}

/// The static seed templates: slotted query shapes that work against any
/// schema.
fn seed_templates(config: &AssistantConfig) -> Vec<TemplateDraft> {
    use SlotKind::*;
    let w = config.seed_weight;
    vec![
        TemplateDraft::new(
            "how many {table} are {value}",
            "SELECT COUNT(*) FROM {table} WHERE {column} = {value}",
            vec![
                SlotSpec::new("table", Table),
                SlotSpec::new("column", Column),
                SlotSpec::new("value", Literal),
            ],
        )
        .weight(w),
        TemplateDraft::new(
            "how many rows in {table}",
            "SELECT COUNT(*) AS row_count FROM {table}",
            vec![SlotSpec::new("table", Table)],
        )
        .weight(w),
        TemplateDraft::new(
            "how many {column} in {table}",
            "SELECT COUNT(DISTINCT {column}) FROM {table}",
            vec![SlotSpec::new("table", Table), SlotSpec::new("column", Column)],
        )
        .weight(w),
        TemplateDraft::new(
            "unique {column} in {table}",
            "SELECT DISTINCT {column} FROM {table}",
            vec![SlotSpec::new("table", Table), SlotSpec::new("column", Column)],
        )
        .weight(w),
        TemplateDraft::new(
            "top {count} {table} by {column}",
            "SELECT * FROM {table} ORDER BY {column} DESC LIMIT {count}",
            vec![
                SlotSpec::new("table", Table),
                SlotSpec::new("column", Column),
                SlotSpec::optional("count", Count),
            ],
        )
        .weight(w),
        TemplateDraft::new(
            "show {table}",
            "SELECT * FROM {table}",
            vec![SlotSpec::new("table", Table)],
        )
        .weight(w),
        TemplateDraft::new(
            "show {table} where {column} {op} {value}",
            "SELECT * FROM {table} WHERE {column} {op} {value}",
            vec![
                SlotSpec::new("table", Table),
                SlotSpec::new("column", Column),
                SlotSpec::optional("op", Operator),
                SlotSpec::new("value", Literal),
            ],
        )
        .weight(w),
        TemplateDraft::new(
            "sum {column} in {table}",
            "SELECT SUM({column}) FROM {table}",
            vec![SlotSpec::new("table", Table), SlotSpec::new("column", Column)],
        )
        .weight(w),
        TemplateDraft::new(
            "average {column} in {table}",
            "SELECT AVG({column}) FROM {table}",
            vec![SlotSpec::new("table", Table), SlotSpec::new("column", Column)],
        )
        .weight(w),
        TemplateDraft::new(
            "count by {column} in {table}",
            "SELECT {column}, COUNT(*) AS n FROM {table} GROUP BY {column} ORDER BY n DESC",
            vec![SlotSpec::new("table", Table), SlotSpec::new("column", Column)],
        )
        .weight(w),
        TemplateDraft::new(
            "{table} in {year}",
            "SELECT * FROM {table} WHERE substr({column}, 1, 4) = {year}",
            vec![
                SlotSpec::new("table", Table),
                SlotSpec::new("column", Column),
                SlotSpec::new("year", Literal),
            ],
        )
        .weight(w),
    ]
}

/// Concrete templates generated from the introspected schema: per-table row
/// counts, per-column distinct/count-by/aggregate/top-k shapes, date-year
/// filters, sample-value filters, and foreign-key join shapes.
fn schema_templates(catalog: &SchemaCatalog, config: &AssistantConfig) -> Vec<TemplateDraft> {
    use SlotKind::*;
    let w = config.schema_weight;
    let meta = catalog.metadata();
    let mut out = Vec::new();

    for table in &meta.tables {
        let t = &table.name;
        let t_words = underscore_to_words(t);

        out.push(
            TemplateDraft::new(
                &format!("how many rows in {t_words}"),
                &format!("SELECT COUNT(*) AS row_count FROM {t}"),
                vec![],
            )
            .weight(w)
            .provenance(Provenance::Schema),
        );

        for col in &table.columns {
            let c = &col.name;
            let c_words = underscore_to_words(c);

            out.push(
                TemplateDraft::new(
                    &format!("unique {c_words} in {t_words}"),
                    &format!("SELECT DISTINCT {c} FROM {t} ORDER BY {c}"),
                    vec![],
                )
                .weight(w)
                .provenance(Provenance::Schema),
            );
            out.push(
                TemplateDraft::new(
                    &format!("count by {c_words} in {t_words}"),
                    &format!("SELECT {c}, COUNT(*) AS n FROM {t} GROUP BY {c} ORDER BY n DESC"),
                    vec![],
                )
                .weight(w)
                .provenance(Provenance::Schema),
            );

            if col.is_numeric {
                out.push(
                    TemplateDraft::new(
                        &format!("sum {c_words} in {t_words}"),
                        &format!("SELECT SUM({c}) AS sum_{c} FROM {t}"),
                        vec![],
                    )
                    .weight(w)
                    .provenance(Provenance::Schema),
                );
                out.push(
                    TemplateDraft::new(
                        &format!("average {c_words} in {t_words}"),
                        &format!("SELECT AVG({c}) AS avg_{c} FROM {t}"),
                        vec![],
                    )
                    .weight(w)
                    .provenance(Provenance::Schema),
                );
                out.push(
                    TemplateDraft::new(
                        &format!("top {{count}} {t_words} by {c_words}"),
                        &format!("SELECT * FROM {t} ORDER BY {c} DESC LIMIT {{count}}"),
                        vec![SlotSpec::optional("count", Count)],
                    )
                    .weight(w)
                    .provenance(Provenance::Schema),
                );
            }

            for value in col.samples.iter().filter(|v| (2..=40).contains(&v.len())).take(5) {
                // Numeric samples are not useful as phrase patterns.
                if col.is_numeric {
                    continue;
                }
                let v_words = crate::text::normalized(value);
                if v_words.is_empty() {
                    continue;
                }
                out.push(
                    TemplateDraft::new(
                        &format!("show {t_words} where {c_words} {v_words}"),
                        &format!("SELECT * FROM {t} WHERE {c} = {{value}}"),
                        vec![SlotSpec::new("value", Literal)],
                    )
                    .weight(w)
                    .provenance(Provenance::Schema),
                );
            }
        }

        // One year-filter template per table, on its first date column.
        if let Some(date_col) = table.first_date_column() {
            let c = &date_col.name;
            out.push(
                TemplateDraft::new(
                    &format!("{t_words} in {{year}}"),
                    &format!("SELECT * FROM {t} WHERE substr({c}, 1, 4) = {{year}}"),
                    vec![SlotSpec::new("year", Literal)],
                )
                .weight(w)
                .provenance(Provenance::Schema),
            );
        }
    }

    out.extend(join_templates(catalog, config));
    out
}

/// Foreign keys inferred from `<stem>_id` column names.
pub(crate) fn inferred_joins(catalog: &SchemaCatalog) -> Vec<InferredJoin> {
    let meta = catalog.metadata();
    let mut joins = Vec::new();
    for table in &meta.tables {
        for col in &table.columns {
            let Some(stem) = col.name.strip_suffix("_id") else {
                continue;
            };
            let target = meta.tables.iter().find(|other| {
                if other.name == table.name {
                    return false;
                }
                let sing = singular(&other.name);
                other.name == stem || sing == stem || (stem.len() >= 3 && sing.starts_with(stem))
            });
            if let Some(target) = target {
                // Join key on the referenced side: same column name if it
                // exists there, then "id", then its first column.
                let dst_key = if target.column(&col.name).is_some() {
                    col.name.clone()
                } else if target.column("id").is_some() {
                    "id".into()
                } else {
                    match target.columns.first() {
                        Some(c) => c.name.clone(),
                        None => continue,
                    }
                };
                joins.push(InferredJoin {
                    src_table: table.name.clone(),
                    src_column: col.name.clone(),
                    dst_table: target.name.clone(),
                    dst_column: dst_key,
                });
            }
        }
    }
    joins
}

/// A `src.src_column = dst.dst_column` relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredJoin {
    pub src_table: String,
    pub src_column: String,
    pub dst_table: String,
    pub dst_column: String,
}

fn join_templates(catalog: &SchemaCatalog, config: &AssistantConfig) -> Vec<TemplateDraft> {
    let w = config.schema_weight;
    let meta = catalog.metadata();
    let mut out = Vec::new();
    for join in inferred_joins(catalog) {
        let (src, dst) = (&join.src_table, &join.dst_table);
        let Some(src_meta) = meta.table(src) else { continue };
        let Some(dst_meta) = meta.table(dst) else { continue };
        let (Some(src_show), Some(dst_show)) = (src_meta.columns.first(), dst_meta.columns.first())
        else {
            continue;
        };
        let on = format!("{src}.{} = {dst}.{}", join.src_column, join.dst_column);
        out.push(
            TemplateDraft::new(
                &format!("show {} with {}", underscore_to_words(src), underscore_to_words(dst)),
                &format!(
                    "SELECT {src}.{}, {dst}.{} FROM {src} JOIN {dst} ON {on}",
                    src_show.name, dst_show.name
                ),
                vec![],
            )
            .weight(w)
            .provenance(Provenance::Schema),
        );
        out.push(
            TemplateDraft::new(
                &format!("count {} by {}", underscore_to_words(src), underscore_to_words(dst)),
                &format!(
                    "SELECT {dst}.{}, COUNT(*) AS n FROM {src} JOIN {dst} ON {on} GROUP BY {dst}.{} ORDER BY n DESC",
                    join.dst_column, join.dst_column
                ),
                vec![],
            )
            .weight(w)
            .provenance(Provenance::Schema),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_fixtures::demo_catalog;

    fn table_slot() -> Vec<SlotSpec> {
        vec![SlotSpec::new("table", SlotKind::Table)]
    }

    #[test]
    fn test_add_then_get() {
        let mut corpus = TemplateCorpus::new();
        let (id, created) = corpus
            .add_or_update(TemplateDraft::new("show {table}", "SELECT * FROM {table}", table_slot()))
            .unwrap();
        assert!(created);
        assert_eq!(corpus.get(id).unwrap().pattern, "show {table}");
        assert!(corpus.get(TemplateId(99)).is_err());
    }

    #[test]
    fn test_duplicate_pattern_reinforces() {
        let mut corpus = TemplateCorpus::new();
        let draft = TemplateDraft::new("show {table}", "SELECT * FROM {table}", table_slot()).weight(0.5);
        let (id, created) = corpus.add_or_update(draft.clone()).unwrap();
        assert!(created);
        let before = corpus.get(id).unwrap().weight;

        let (id2, created2) = corpus.add_or_update(draft).unwrap();
        assert_eq!(id, id2);
        assert!(!created2);
        assert_eq!(corpus.len(), 1);
        assert!(corpus.get(id).unwrap().weight > before);
    }

    #[test]
    fn test_undeclared_slot_rejected() {
        let mut corpus = TemplateCorpus::new();
        let err = corpus
            .add_or_update(TemplateDraft::new("show {table}", "SELECT {column} FROM {table}", table_slot()))
            .unwrap_err();
        assert!(matches!(err, AskqlError::InvalidTemplate { .. }));
    }

    #[test]
    fn test_weight_stays_bounded() {
        let mut corpus = TemplateCorpus::new();
        let (id, _) = corpus
            .add_or_update(
                TemplateDraft::new("show {table}", "SELECT * FROM {table}", table_slot()).weight(0.9),
            )
            .unwrap();
        for _ in 0..50 {
            corpus.reinforce(id, 0.3).unwrap();
        }
        assert!(corpus.get(id).unwrap().weight <= 1.0);
        for _ in 0..50 {
            corpus.penalize(id, 0.3).unwrap();
        }
        assert!(corpus.get(id).unwrap().weight >= 0.0);
    }

    #[test]
    fn test_version_bumps_on_mutation() {
        let mut corpus = TemplateCorpus::new();
        let v0 = corpus.version();
        let (id, _) = corpus
            .add_or_update(TemplateDraft::new("show {table}", "SELECT * FROM {table}", table_slot()))
            .unwrap();
        assert!(corpus.version() > v0);
        let v1 = corpus.version();
        corpus.reinforce(id, 0.2).unwrap();
        assert!(corpus.version() > v1);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("SELECT {column} FROM {table} WHERE {column} = {value}"),
            vec!["column", "table", "value"]
        );
        assert!(placeholders("SELECT * FROM policies").is_empty());
    }

    #[test]
    fn test_pattern_terms_skip_wildcards() {
        let mut corpus = TemplateCorpus::new();
        let (id, _) = corpus
            .add_or_update(TemplateDraft::new(
                "unique {column} in {table}",
                "SELECT DISTINCT {column} FROM {table}",
                vec![
                    SlotSpec::new("table", SlotKind::Table),
                    SlotSpec::new("column", SlotKind::Column),
                ],
            ))
            .unwrap();
        assert_eq!(corpus.get(id).unwrap().pattern_terms(), vec!["unique", "in"]);
    }

    #[test]
    fn test_schema_templates_cover_tables_and_values() {
        let catalog = demo_catalog();
        let mut corpus = TemplateCorpus::new();
        corpus.add_schema_templates(&catalog, &AssistantConfig::default());

        let patterns: Vec<&str> = corpus.list().iter().map(|t| t.pattern.as_str()).collect();
        assert!(patterns.contains(&"how many rows in policies"));
        assert!(patterns.contains(&"unique status in claims"));
        assert!(patterns.contains(&"show policies where status active"));
        assert!(patterns.contains(&"top {count} organizations by credit limit"));
        assert!(patterns.contains(&"policies in {year}"));
    }

    #[test]
    fn test_fk_inference() {
        let catalog = demo_catalog();
        let joins = inferred_joins(&catalog);
        assert!(joins.contains(&InferredJoin {
            src_table: "claims".into(),
            src_column: "policy_id".into(),
            dst_table: "policies".into(),
            dst_column: "policy_id".into(),
        }));
        assert!(joins.contains(&InferredJoin {
            src_table: "policies".into(),
            src_column: "org_id".into(),
            dst_table: "organizations".into(),
            dst_column: "org_id".into(),
        }));
    }

    #[test]
    fn test_learned_roundtrip() {
        let dir = std::env::temp_dir().join("askql-test-learned");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("learned.jsonl");

        let mut corpus = TemplateCorpus::new();
        corpus
            .add_or_update(
                TemplateDraft::new("show {table}", "SELECT * FROM {table}", table_slot())
                    .provenance(Provenance::Learned)
                    .weight(0.5),
            )
            .unwrap();
        assert_eq!(corpus.save_learned(&path).unwrap(), 1);

        let mut fresh = TemplateCorpus::new();
        assert_eq!(fresh.load_learned(&path).unwrap(), 1);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.list()[0].provenance, Provenance::Learned);
        std::fs::remove_file(&path).ok();
    }
}
