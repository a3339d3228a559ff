//! Schema catalog: introspection, synonym resolution, and sample values.
//!
//! The catalog is built once per connection and is read-only afterwards.
//! Rebuilding from the same database state yields an equal [`SchemaMetadata`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::composer::quote_identifier;
use crate::config::AssistantConfig;
use crate::error::{AskqlError, AskqlResult};
use crate::text::{singular, surface_forms};

/// English words that commonly stand in for schema names. An alias is only
/// registered when a matching schema element actually exists.
const CURATED_ALIASES: &[(&str, &str)] = &[
    ("company", "organization"),
    ("companies", "organization"),
    ("customer", "organization"),
    ("client", "organization"),
    ("party", "organization"),
    ("policyholder", "organization"),
    ("org", "organization"),
    ("orgs", "organization"),
    ("contract", "policy"),
    ("loss", "claim"),
    ("case", "claim"),
    ("account", "user"),
    ("member", "user"),
    ("state", "status"),
    ("stage", "status"),
    ("town", "city"),
    ("location", "city"),
    ("coverage", "credit limit"),
    ("exposure", "credit limit"),
];

/// One column of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared SQL type, as reported by the database.
    pub decl_type: String,
    pub nullable: bool,
    pub is_numeric: bool,
    pub is_date: bool,
    /// Bounded sample of distinct values, most frequent first, cast to text.
    pub samples: Vec<String>,
}

/// One table with its ordered column list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// First column whose samples look like ISO dates.
    pub fn first_date_column(&self) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.is_date)
    }
}

/// Immutable-per-connection snapshot of the target database's shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaMetadata {
    pub tables: Vec<TableMeta>,
}

impl SchemaMetadata {
    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).is_some_and(|t| t.column(column).is_some())
    }
}

/// A resolved schema element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaRef {
    Table(String),
    Column { table: String, column: String },
}

impl SchemaRef {
    pub fn is_table(&self) -> bool {
        matches!(self, SchemaRef::Table(_))
    }
}

/// Where a sample value was seen.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueHit {
    pub table: String,
    pub column: String,
    /// The value as stored in the database (original casing).
    pub stored: String,
}

/// Read-only view over [`SchemaMetadata`] with synonym and sample-value
/// lookup tables.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    meta: SchemaMetadata,
    /// Lowercase phrase -> schema elements it may refer to.
    synonyms: HashMap<String, Vec<SchemaRef>>,
    /// Lowercase sample value -> columns it was seen in.
    value_index: HashMap<String, Vec<ValueHit>>,
}

impl SchemaCatalog {
    /// Introspect a live SQLite database.
    pub async fn introspect(pool: &SqlitePool, config: &AssistantConfig) -> AskqlResult<Self> {
        let meta = introspect_metadata(pool, config).await?;
        tracing::info!(tables = meta.tables.len(), "schema catalog built");
        Ok(Self::from_metadata(meta, config))
    }

    /// Build the catalog from already-known metadata. Used by tests and by
    /// anything that produces a schema without a live connection.
    pub fn from_metadata(meta: SchemaMetadata, config: &AssistantConfig) -> Self {
        let synonyms = build_synonyms(&meta, config);
        let value_index = build_value_index(&meta);
        Self {
            meta,
            synonyms,
            value_index,
        }
    }

    pub fn metadata(&self) -> &SchemaMetadata {
        &self.meta
    }

    /// Resolve a phrase to the first matching schema element. Lookups are
    /// case-insensitive and tolerant of simple pluralization.
    pub fn resolve(&self, phrase: &str) -> Option<&SchemaRef> {
        self.resolve_all(phrase).first().copied()
    }

    /// All schema elements a phrase may refer to, tables before columns,
    /// schema order within each group.
    pub fn resolve_all(&self, phrase: &str) -> Vec<&SchemaRef> {
        let key = phrase.trim().to_lowercase();
        if let Some(refs) = self.synonyms.get(&key) {
            return refs.iter().collect();
        }
        let sing = singular(&key);
        if sing != key {
            if let Some(refs) = self.synonyms.get(&sing) {
                return refs.iter().collect();
            }
        }
        Vec::new()
    }

    /// Resolve a literal against the sample-value index, case-insensitively.
    /// The returned hit carries the stored form of the value.
    pub fn lookup_value(&self, text: &str) -> Option<&ValueHit> {
        self.value_index
            .get(&text.trim().to_lowercase())
            .and_then(|hits| hits.first())
    }

    pub fn lookup_value_all(&self, text: &str) -> Vec<&ValueHit> {
        self.value_index
            .get(&text.trim().to_lowercase())
            .map(|hits| hits.iter().collect())
            .unwrap_or_default()
    }
}

async fn introspect_metadata(
    pool: &SqlitePool,
    config: &AssistantConfig,
) -> AskqlResult<SchemaMetadata> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(AskqlError::introspection)?;

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let info_sql = format!("PRAGMA table_info({})", quote_identifier(&name));
        let rows = sqlx::query(&info_sql)
            .fetch_all(pool)
            .await
            .map_err(AskqlError::introspection)?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let col_name: String = row.try_get("name").map_err(AskqlError::introspection)?;
            let decl_type: String = row.try_get("type").map_err(AskqlError::introspection)?;
            let notnull: i64 = row.try_get("notnull").map_err(AskqlError::introspection)?;

            let samples = sample_column(pool, &name, &col_name, config.sample_limit).await?;
            let is_numeric = declared_numeric(&decl_type);
            let is_date = samples.iter().take(10).any(|v| looks_like_date(v));

            columns.push(ColumnMeta {
                name: col_name,
                decl_type,
                nullable: notnull == 0,
                is_numeric,
                is_date,
                samples,
            });
        }
        tables.push(TableMeta { name, columns });
    }
    Ok(SchemaMetadata { tables })
}

/// Frequency-ordered distinct sample for one column, cast to text.
async fn sample_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    limit: u32,
) -> AskqlResult<Vec<String>> {
    let col = quote_identifier(column);
    let sql = format!(
        "SELECT CAST({col} AS TEXT) FROM {} WHERE {col} IS NOT NULL GROUP BY {col} ORDER BY COUNT(*) DESC LIMIT {limit}",
        quote_identifier(table),
    );
    sqlx::query_scalar(&sql)
        .fetch_all(pool)
        .await
        .map_err(AskqlError::introspection)
}

fn declared_numeric(decl_type: &str) -> bool {
    let t = decl_type.to_uppercase();
    ["INT", "REAL", "FLOA", "DOUB", "NUM", "DEC"]
        .iter()
        .any(|m| t.contains(m))
}

/// `2024-03-17` and friends. A loose check is enough to pick a date column
/// for year filters.
fn looks_like_date(v: &str) -> bool {
    let b = v.as_bytes();
    b.len() >= 8
        && b[..4].iter().all(|c| c.is_ascii_digit())
        && b[4] == b'-'
        && b[5].is_ascii_digit()
        && b[6].is_ascii_digit()
        && b[7] == b'-'
}

fn build_synonyms(
    meta: &SchemaMetadata,
    config: &AssistantConfig,
) -> HashMap<String, Vec<SchemaRef>> {
    let mut map: HashMap<String, Vec<SchemaRef>> = HashMap::new();
    let mut add = |map: &mut HashMap<String, Vec<SchemaRef>>, key: String, sref: SchemaRef| {
        let entry = map.entry(key).or_default();
        if !entry.contains(&sref) {
            entry.push(sref);
        }
    };

    // Tables first so a phrase naming both resolves to the table.
    for table in &meta.tables {
        let sref = SchemaRef::Table(table.name.clone());
        add(&mut map, table.name.to_lowercase(), sref.clone());
        for form in surface_forms(&table.name) {
            add(&mut map, form, sref.clone());
        }
    }
    for table in &meta.tables {
        for col in &table.columns {
            let sref = SchemaRef::Column {
                table: table.name.clone(),
                column: col.name.clone(),
            };
            add(&mut map, col.name.to_lowercase(), sref.clone());
            for form in surface_forms(&col.name) {
                add(&mut map, form, sref.clone());
            }
        }
    }

    // Curated English aliases, only where the target word names something real.
    for (alias, target) in CURATED_ALIASES {
        let targets: Vec<SchemaRef> = map.get(*target).cloned().unwrap_or_default();
        for sref in targets {
            add(&mut map, alias.to_string(), sref);
        }
    }

    // Explicitly configured aliases: "token" -> "table" or "table.column".
    for (alias, canonical) in &config.aliases {
        let sref = match canonical.split_once('.') {
            Some((t, c)) if meta.has_column(t, c) => Some(SchemaRef::Column {
                table: t.to_string(),
                column: c.to_string(),
            }),
            None if meta.has_table(canonical) => Some(SchemaRef::Table(canonical.clone())),
            _ => None,
        };
        match sref {
            Some(sref) => add(&mut map, alias.to_lowercase(), sref),
            None => {
                tracing::warn!(alias, canonical, "configured alias targets nothing in the schema")
            }
        }
    }

    map
}

fn build_value_index(meta: &SchemaMetadata) -> HashMap<String, Vec<ValueHit>> {
    let mut index: HashMap<String, Vec<ValueHit>> = HashMap::new();
    for table in &meta.tables {
        for col in &table.columns {
            // Numeric samples would shadow counts and years; skip them.
            if col.is_numeric {
                continue;
            }
            for value in &col.samples {
                let key = value.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                index.entry(key).or_default().push(ValueHit {
                    table: table.name.clone(),
                    column: col.name.clone(),
                    stored: value.clone(),
                });
            }
        }
    }
    index
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    fn col(name: &str, decl: &str, numeric: bool, date: bool, samples: &[&str]) -> ColumnMeta {
        ColumnMeta {
            name: name.into(),
            decl_type: decl.into(),
            nullable: true,
            is_numeric: numeric,
            is_date: date,
            samples: samples.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// The insurance-shaped schema used across unit tests.
    pub fn demo_metadata() -> SchemaMetadata {
        SchemaMetadata {
            tables: vec![
                TableMeta {
                    name: "claims".into(),
                    columns: vec![
                        col("claim_id", "INTEGER", true, false, &[]),
                        col("policy_id", "INTEGER", true, false, &[]),
                        col("claim_number", "TEXT", false, false, &["CLM-000001"]),
                        col("created_at", "TEXT", false, true, &["2024-05-01", "2024-06-12"]),
                        col("amount", "REAL", true, false, &[]),
                        col("status", "TEXT", false, false, &["OPEN", "CLOSED", "PENDING"]),
                    ],
                },
                TableMeta {
                    name: "organizations".into(),
                    columns: vec![
                        col("org_id", "INTEGER", true, false, &[]),
                        col("org_name", "TEXT", false, false, &["Alpha Trading Ltd"]),
                        col("city", "TEXT", false, false, &["London", "Cardiff"]),
                        col("credit_limit", "REAL", true, false, &[]),
                    ],
                },
                TableMeta {
                    name: "policies".into(),
                    columns: vec![
                        col("policy_id", "INTEGER", true, false, &[]),
                        col("policy_number", "TEXT", false, false, &["POL-000001"]),
                        col("org_id", "INTEGER", true, false, &[]),
                        col("expiry_date", "TEXT", false, true, &["2025-01-31", "2024-11-02"]),
                        col("status", "TEXT", false, false, &["ACTIVE", "EXPIRED", "CANCELLED"]),
                        col("credit_limit", "REAL", true, false, &[]),
                    ],
                },
            ],
        }
    }

    pub fn demo_catalog() -> SchemaCatalog {
        SchemaCatalog::from_metadata(demo_metadata(), &AssistantConfig::default())
    }
}
