//! Query composition: bind extracted entities into a template's slots,
//! validate the binding against the schema, and render parameterized SQL.
//!
//! Literals are always emitted as bound parameters, never interpolated into
//! the statement text.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::SchemaCatalog;
use crate::config::AssistantConfig;
use crate::error::{AskqlError, AskqlResult};
use crate::matcher::{CompareOp, Entity, EntityKind};
use crate::template::{SlotKind, SlotSpec, Template, TemplateId};

/// SQL keywords that force identifier quoting when they show up as names.
const RESERVED: &[&str] = &[
    "select", "from", "where", "group", "order", "by", "limit", "offset",
    "table", "index", "values", "join", "on", "and", "or", "not", "as",
    "case", "when", "then", "else", "end", "union", "all", "distinct",
    "having", "in", "is", "null", "like", "between", "exists", "set",
    "update", "delete", "insert", "create", "drop", "default", "primary",
    "key", "references", "to", "transaction",
];

/// Always-quoted form, for statements assembled from introspected names.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote only when the bare name would not survive as an identifier.
fn render_identifier(name: &str) -> String {
    let plain = !name.is_empty()
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name.to_lowercase().as_str());
    if plain {
        name.to_string()
    } else {
        quote_identifier(name)
    }
}

/// A literal value carried as a bound parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundValue::Int(v) => write!(f, "{v}"),
            BoundValue::Float(v) => write!(f, "{v}"),
            BoundValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl BoundValue {
    fn is_year(&self) -> bool {
        matches!(self, BoundValue::Int(n) if (1900..=2100).contains(n))
    }
}

/// The resolved value assigned to one slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotBinding {
    Table(String),
    Column { table: Option<String>, name: String },
    Literal(BoundValue),
    Operator(CompareOp),
    Count(i64),
}

impl SlotBinding {
    /// How this binding reads in a rationale.
    pub fn rendered(&self) -> String {
        match self {
            SlotBinding::Table(name) => name.clone(),
            SlotBinding::Column { table: Some(t), name } => format!("{t}.{name}"),
            SlotBinding::Column { table: None, name } => name.clone(),
            SlotBinding::Literal(v) => v.to_string(),
            SlotBinding::Operator(op) => op.as_sql().to_string(),
            SlotBinding::Count(n) => n.to_string(),
        }
    }
}

/// One bound slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundSlot {
    pub name: String,
    pub kind: SlotKind,
    pub value: SlotBinding,
}

/// A concrete assignment of schema elements and values to a template's
/// slots for one question.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Binding {
    pub slots: Vec<BoundSlot>,
}

impl Binding {
    pub fn get(&self, name: &str) -> Option<&BoundSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    fn bound_table(&self) -> Option<&str> {
        self.slots.iter().find_map(|s| match &s.value {
            SlotBinding::Table(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// A rendered statement with its parameters and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<BoundValue>,
    pub template_id: TemplateId,
    pub binding: Binding,
}

/// Bind entities into the template's slots and render SQL.
pub fn compose(
    template: &Template,
    entities: &[Entity],
    catalog: &SchemaCatalog,
    config: &AssistantConfig,
) -> AskqlResult<ComposedQuery> {
    let mut binding = Binding::default();
    let mut used: Vec<usize> = Vec::new();

    for slot in &template.slots {
        match bind_slot(slot, template, entities, catalog, config, &binding, &mut used)? {
            Some(value) => binding.slots.push(BoundSlot {
                name: slot.name.clone(),
                kind: slot.kind,
                value,
            }),
            None => {
                if slot.required {
                    return Err(AskqlError::UnresolvedSlot {
                        slot: slot.name.clone(),
                        kind: slot.kind,
                        pattern: template.pattern.clone(),
                    });
                }
            }
        }
    }

    let (sql, params) = render(template, &binding, config);
    Ok(ComposedQuery {
        sql,
        params,
        template_id: template.id,
        binding,
    })
}

#[allow(clippy::too_many_arguments)]
fn bind_slot(
    slot: &SlotSpec,
    template: &Template,
    entities: &[Entity],
    catalog: &SchemaCatalog,
    config: &AssistantConfig,
    binding: &Binding,
    used: &mut Vec<usize>,
) -> AskqlResult<Option<SlotBinding>> {
    let take = |used: &mut Vec<usize>, idx: usize| used.push(idx);

    match slot.kind {
        SlotKind::Table => {
            // First table mention in scan order, else the origin table of a
            // sampled literal.
            if let Some((idx, name)) = entities.iter().enumerate().find_map(|(i, e)| match &e.kind {
                EntityKind::Table { name } if !used.contains(&i) => Some((i, name.clone())),
                _ => None,
            }) {
                if !catalog.metadata().has_table(&name) {
                    return Err(AskqlError::UnknownSchemaElement {
                        kind: "table",
                        name,
                    });
                }
                take(used, idx);
                return Ok(Some(SlotBinding::Table(name)));
            }
            if let Some(name) = entities.iter().find_map(|e| match &e.kind {
                EntityKind::Literal { table: Some(t), .. } => Some(t.clone()),
                _ => None,
            }) {
                return Ok(Some(SlotBinding::Table(name)));
            }
            Ok(None)
        }
        SlotKind::Column => {
            let bound_table = binding.bound_table();
            // Column mention, preferring one on the already-bound table.
            let mut pick: Option<(usize, Option<String>, String)> = None;
            for (i, e) in entities.iter().enumerate() {
                if used.contains(&i) {
                    continue;
                }
                if let EntityKind::Column { table, name } = &e.kind {
                    let on_bound = bound_table.is_some() && table.as_deref() == bound_table;
                    match &pick {
                        None => pick = Some((i, table.clone(), name.clone())),
                        Some(_) if on_bound => {
                            pick = Some((i, table.clone(), name.clone()));
                            break;
                        }
                        Some(_) => {}
                    }
                }
            }
            if let Some((idx, table, name)) = pick {
                if let Some(t) = table.as_deref().or(bound_table) {
                    if !catalog.metadata().has_column(t, &name) {
                        return Err(AskqlError::UnknownSchemaElement {
                            kind: "column",
                            name: format!("{t}.{name}"),
                        });
                    }
                }
                take(used, idx);
                return Ok(Some(SlotBinding::Column { table, name }));
            }
            // Origin column of a sampled literal on the bound table.
            if let Some((table, name)) = entities.iter().find_map(|e| match &e.kind {
                EntityKind::Literal {
                    table: Some(t),
                    column: Some(c),
                    ..
                } if bound_table.is_none() || bound_table == Some(t.as_str()) => {
                    Some((t.clone(), c.clone()))
                }
                _ => None,
            }) {
                return Ok(Some(SlotBinding::Column {
                    table: Some(table),
                    name,
                }));
            }
            // Year literal present: fall back to the bound table's date column.
            let has_year = entities.iter().any(|e| {
                matches!(&e.kind, EntityKind::Literal { value, .. } if value.is_year())
            });
            if has_year {
                if let Some(table) = bound_table.and_then(|t| catalog.metadata().table(t)) {
                    if let Some(col) = table.first_date_column() {
                        return Ok(Some(SlotBinding::Column {
                            table: Some(table.name.clone()),
                            name: col.name.clone(),
                        }));
                    }
                }
            }
            Ok(None)
        }
        SlotKind::Literal => {
            let bound_table = binding.bound_table();
            // Prefer a literal sampled from the bound table, then any
            // literal, in scan order.
            let preferred = entities.iter().enumerate().find(|(i, e)| {
                !used.contains(i)
                    && matches!(&e.kind, EntityKind::Literal { table: Some(t), .. }
                        if bound_table.is_none() || bound_table == Some(t.as_str()))
            });
            let fallback = entities
                .iter()
                .enumerate()
                .find(|(i, e)| !used.contains(i) && matches!(e.kind, EntityKind::Literal { .. }));
            if let Some((idx, entity)) = preferred.or(fallback) {
                if let EntityKind::Literal { value, .. } = &entity.kind {
                    let mut value = value.clone();
                    // substr(date, 1, 4) comparisons are textual
                    if value.is_year() && compared_to_substr(&template.skeleton, &slot.name) {
                        value = BoundValue::Text(value.to_string());
                    }
                    take(used, idx);
                    return Ok(Some(SlotBinding::Literal(value)));
                }
            }
            Ok(None)
        }
        SlotKind::Operator => {
            if let Some((idx, op)) = entities.iter().enumerate().find_map(|(i, e)| match &e.kind {
                EntityKind::Operator(op) if !used.contains(&i) => Some((i, *op)),
                _ => None,
            }) {
                take(used, idx);
                return Ok(Some(SlotBinding::Operator(op)));
            }
            Ok(Some(SlotBinding::Operator(CompareOp::Eq)))
        }
        SlotKind::Count => {
            if let Some((idx, n)) = entities.iter().enumerate().find_map(|(i, e)| match &e.kind {
                EntityKind::Count(n) if !used.contains(&i) => Some((i, *n)),
                _ => None,
            }) {
                take(used, idx);
                return Ok(Some(SlotBinding::Count(n)));
            }
            // An explicit bare number works too; years do not.
            if let Some((idx, n)) = entities.iter().enumerate().find_map(|(i, e)| match &e.kind {
                EntityKind::Literal {
                    value: BoundValue::Int(n),
                    ..
                } if !used.contains(&i) && !(1900..=2100).contains(n) => Some((i, *n)),
                _ => None,
            }) {
                take(used, idx);
                return Ok(Some(SlotBinding::Count(n)));
            }
            Ok(Some(SlotBinding::Count(config.default_top_k)))
        }
    }
}

/// True when `{slot}` appears as the right-hand side of a substr()
/// comparison in the skeleton.
fn compared_to_substr(skeleton: &str, slot: &str) -> bool {
    let needle = format!("{{{slot}}}");
    let lower = skeleton.to_lowercase();
    match lower.find(&needle) {
        Some(pos) => lower[..pos].rfind("substr(").is_some_and(|s| pos - s < 60),
        None => false,
    }
}

fn render(template: &Template, binding: &Binding, config: &AssistantConfig) -> (String, Vec<BoundValue>) {
    let mut sql = String::with_capacity(template.skeleton.len());
    let mut params = Vec::new();

    // Substitute one placeholder occurrence at a time, left to right, so
    // parameters line up with their `?` positions.
    let mut rest = template.skeleton.as_str();
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + 1 + len];
        sql.push_str(&rest[..start]);
        match binding.get(name).map(|s| &s.value) {
            Some(SlotBinding::Table(t)) => sql.push_str(&render_identifier(t)),
            Some(SlotBinding::Column { name, .. }) => sql.push_str(&render_identifier(name)),
            Some(SlotBinding::Operator(op)) => sql.push_str(op.as_sql()),
            Some(SlotBinding::Count(n)) => sql.push_str(&n.to_string()),
            Some(SlotBinding::Literal(value)) => {
                params.push(value.clone());
                sql.push('?');
            }
            // Unbound optional slots keep their placeholder; templates with
            // such skeletons declare them required, so this is unreachable
            // in practice and harmless if reached.
            None => sql.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }
    sql.push_str(rest);

    (ensure_limit(&sql, config.row_limit), params)
}

/// Append a LIMIT to non-aggregate SELECTs that lack one. Never emits a
/// second LIMIT.
fn ensure_limit(sql: &str, row_limit: i64) -> String {
    let s = sql.trim().trim_end_matches(';').to_string();
    let lower = s.to_lowercase();
    if !lower.starts_with("select") {
        return s;
    }
    if lower.contains(" limit ") || lower.ends_with(" limit") {
        return s;
    }
    if ["count(", "sum(", "avg(", "min(", "max("].iter().any(|f| lower.contains(f)) {
        return s;
    }
    format!("{s} LIMIT {row_limit}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_fixtures::demo_catalog;
    use crate::matcher::extract;
    use crate::pmi::PmiModel;
    use crate::template::{TemplateCorpus, TemplateDraft};
    use crate::text::Question;

    fn template(pattern: &str, skeleton: &str, slots: Vec<SlotSpec>) -> Template {
        let mut corpus = TemplateCorpus::new();
        let (id, _) = corpus
            .add_or_update(TemplateDraft::new(pattern, skeleton, slots))
            .unwrap();
        corpus.get(id).unwrap().clone()
    }

    fn entities_for(text: &str) -> Vec<Entity> {
        extract(&Question::parse(text), &demo_catalog(), &PmiModel::default())
    }

    #[test]
    fn test_count_where_composition() {
        let t = template(
            "how many {table} are {value}",
            "SELECT COUNT(*) FROM {table} WHERE {column} = {value}",
            vec![
                SlotSpec::new("table", SlotKind::Table),
                SlotSpec::new("column", SlotKind::Column),
                SlotSpec::new("value", SlotKind::Literal),
            ],
        );
        let composed = compose(
            &t,
            &entities_for("how many policies are active"),
            &demo_catalog(),
            &AssistantConfig::default(),
        )
        .unwrap();
        assert_eq!(composed.sql, "SELECT COUNT(*) FROM policies WHERE status = ?");
        assert_eq!(composed.params, vec![BoundValue::Text("ACTIVE".into())]);
    }

    #[test]
    fn test_top_k_composition() {
        let t = template(
            "top {count} {table} by {column}",
            "SELECT * FROM {table} ORDER BY {column} DESC LIMIT {count}",
            vec![
                SlotSpec::new("table", SlotKind::Table),
                SlotSpec::new("column", SlotKind::Column),
                SlotSpec::optional("count", SlotKind::Count),
            ],
        );
        let composed = compose(
            &t,
            &entities_for("top 10 organizations by credit limit"),
            &demo_catalog(),
            &AssistantConfig::default(),
        )
        .unwrap();
        assert_eq!(
            composed.sql,
            "SELECT * FROM organizations ORDER BY credit_limit DESC LIMIT 10"
        );
        assert!(composed.params.is_empty());
    }

    #[test]
    fn test_missing_required_slot() {
        let t = template(
            "show {table}",
            "SELECT * FROM {table}",
            vec![SlotSpec::new("table", SlotKind::Table)],
        );
        let err = compose(
            &t,
            &entities_for("show widgets"),
            &demo_catalog(),
            &AssistantConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AskqlError::UnresolvedSlot { kind: SlotKind::Table, .. }));
    }

    #[test]
    fn test_count_slot_defaults() {
        let t = template(
            "top {count} {table} by {column}",
            "SELECT * FROM {table} ORDER BY {column} DESC LIMIT {count}",
            vec![
                SlotSpec::new("table", SlotKind::Table),
                SlotSpec::new("column", SlotKind::Column),
                SlotSpec::optional("count", SlotKind::Count),
            ],
        );
        let composed = compose(
            &t,
            &entities_for("organizations by credit limit"),
            &demo_catalog(),
            &AssistantConfig::default(),
        )
        .unwrap();
        assert!(composed.sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_limit_appended_once() {
        let cfg = AssistantConfig::default();
        assert_eq!(
            ensure_limit("SELECT * FROM policies", cfg.row_limit),
            "SELECT * FROM policies LIMIT 200"
        );
        assert_eq!(
            ensure_limit("SELECT * FROM policies LIMIT 10", cfg.row_limit),
            "SELECT * FROM policies LIMIT 10"
        );
        assert_eq!(
            ensure_limit("SELECT COUNT(*) FROM policies", cfg.row_limit),
            "SELECT COUNT(*) FROM policies"
        );
    }

    #[test]
    fn test_operator_defaults_to_equality() {
        let t = template(
            "show {table} where {column} {op} {value}",
            "SELECT * FROM {table} WHERE {column} {op} {value}",
            vec![
                SlotSpec::new("table", SlotKind::Table),
                SlotSpec::new("column", SlotKind::Column),
                SlotSpec::optional("op", SlotKind::Operator),
                SlotSpec::new("value", SlotKind::Literal),
            ],
        );
        let catalog = demo_catalog();
        let cfg = AssistantConfig::default();

        let composed =
            compose(&t, &entities_for("show policies where status active"), &catalog, &cfg).unwrap();
        assert_eq!(
            composed.sql,
            "SELECT * FROM policies WHERE status = ? LIMIT 200"
        );
        assert_eq!(composed.params, vec![BoundValue::Text("ACTIVE".into())]);

        let composed = compose(
            &t,
            &entities_for("show claims where amount more than 5000"),
            &catalog,
            &cfg,
        )
        .unwrap();
        assert_eq!(composed.sql, "SELECT * FROM claims WHERE amount > ? LIMIT 200");
        assert_eq!(composed.params, vec![BoundValue::Int(5000)]);
    }

    #[test]
    fn test_year_literal_binds_date_column_as_text() {
        let t = template(
            "{table} in {year}",
            "SELECT * FROM {table} WHERE substr({column}, 1, 4) = {year}",
            vec![
                SlotSpec::new("table", SlotKind::Table),
                SlotSpec::new("column", SlotKind::Column),
                SlotSpec::new("year", SlotKind::Literal),
            ],
        );
        let composed = compose(
            &t,
            &entities_for("policies in 2024"),
            &demo_catalog(),
            &AssistantConfig::default(),
        )
        .unwrap();
        assert_eq!(
            composed.sql,
            "SELECT * FROM policies WHERE substr(expiry_date, 1, 4) = ? LIMIT 200"
        );
        assert_eq!(composed.params, vec![BoundValue::Text("2024".into())]);
    }

    #[test]
    fn test_literal_params_round_trip_bit_for_bit() {
        let t = template(
            "show {table} where {column} {op} {value}",
            "SELECT * FROM {table} WHERE {column} {op} {value}",
            vec![
                SlotSpec::new("table", SlotKind::Table),
                SlotSpec::new("column", SlotKind::Column),
                SlotSpec::optional("op", SlotKind::Operator),
                SlotSpec::new("value", SlotKind::Literal),
            ],
        );
        let composed = compose(
            &t,
            &entities_for("show organizations where city 'London'"),
            &demo_catalog(),
            &AssistantConfig::default(),
        )
        .unwrap();
        // every literal in the binding appears bit-for-bit in the params
        let literals: Vec<&BoundValue> = composed
            .binding
            .slots
            .iter()
            .filter_map(|s| match &s.value {
                SlotBinding::Literal(v) => Some(v),
                _ => None,
            })
            .collect();
        assert_eq!(literals, composed.params.iter().collect::<Vec<_>>());
        assert_eq!(composed.params, vec![BoundValue::Text("London".into())]);
    }

    #[test]
    fn test_reserved_identifier_is_quoted() {
        assert_eq!(render_identifier("policies"), "policies");
        assert_eq!(render_identifier("order"), "\"order\"");
        assert_eq!(render_identifier("credit limit"), "\"credit limit\"");
    }
}
