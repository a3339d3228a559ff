//! Execution boundary adapter.
//!
//! Hands a composed, parameterized statement to SQLite via sqlx and returns
//! rows or a structured execution error. The core never retries failed
//! executions; errors pass through with the offending SQL attached.

use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo};

use crate::composer::{BoundValue, ComposedQuery};
use crate::error::{AskqlError, AskqlResult};

/// An executed statement's output.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Runs composed statements against a SQLite pool.
#[derive(Clone)]
pub struct Executor {
    pool: SqlitePool,
}

impl Executor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (`sqlite:path` or `sqlite::memory:`).
    pub async fn connect(url: &str) -> AskqlResult<Self> {
        // Every pooled connection to :memory: would get its own database.
        let max = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max)
            .connect(url)
            .await
            .map_err(|e| AskqlError::SqlExecution {
                message: e.to_string(),
                sql: String::new(),
            })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Execute a composed statement with its bound parameters.
    pub async fn run(&self, query: &ComposedQuery) -> AskqlResult<QueryResult> {
        self.fetch(&query.sql, &query.params).await
    }

    /// Execute a raw SELECT, appending `row_limit` when the statement has no
    /// LIMIT of its own.
    pub async fn run_sql(&self, sql: &str, row_limit: Option<i64>) -> AskqlResult<QueryResult> {
        let mut s = sql.trim().trim_end_matches(';').to_string();
        if let Some(n) = row_limit {
            let lower = s.to_lowercase();
            if lower.starts_with("select") && !lower.contains(" limit ") {
                s = format!("{s} LIMIT {n}");
            }
        }
        self.fetch(&s, &[]).await
    }

    async fn fetch(&self, sql: &str, params: &[BoundValue]) -> AskqlResult<QueryResult> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                BoundValue::Int(v) => query.bind(*v),
                BoundValue::Float(v) => query.bind(*v),
                BoundValue::Text(v) => query.bind(v.as_str()),
            };
        }

        let rows: Vec<SqliteRow> = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AskqlError::execution(e, sql))?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let rows = rows.iter().map(row_to_values).collect();
        Ok(QueryResult { columns, rows })
    }
}

fn row_to_values(row: &SqliteRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let type_name = column.type_info().name().to_uppercase();
            if type_name.contains("INT") {
                row.try_get::<i64, _>(i)
                    .map(|v| Value::Number(v.into()))
                    .unwrap_or(Value::Null)
            } else if ["REAL", "FLOA", "DOUB", "NUMERIC"].iter().any(|t| type_name.contains(t)) {
                row.try_get::<f64, _>(i)
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            } else if type_name.contains("BOOL") {
                row.try_get::<bool, _>(i)
                    .map(Value::Bool)
                    .unwrap_or(Value::Null)
            } else {
                row.try_get::<String, _>(i)
                    .map(Value::String)
                    .unwrap_or(Value::Null)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::Binding;
    use crate::template::TemplateId;

    async fn memory_executor() -> Executor {
        let exec = Executor::connect("sqlite::memory:").await.unwrap();
        sqlx::query("CREATE TABLE t(name TEXT, n INTEGER)")
            .execute(exec.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES ('a', 1), ('b', 2), ('c', 3)")
            .execute(exec.pool())
            .await
            .unwrap();
        exec
    }

    fn composed(sql: &str, params: Vec<BoundValue>) -> ComposedQuery {
        ComposedQuery {
            sql: sql.into(),
            params,
            template_id: TemplateId(0),
            binding: Binding::default(),
        }
    }

    #[tokio::test]
    async fn test_run_binds_parameters() {
        let exec = memory_executor().await;
        let result = exec
            .run(&composed(
                "SELECT name FROM t WHERE n > ?",
                vec![BoundValue::Int(1)],
            ))
            .await
            .unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.columns, vec!["name"]);
        assert_eq!(result.rows[0][0], Value::String("b".into()));
    }

    #[tokio::test]
    async fn test_run_sql_appends_limit_once() {
        let exec = memory_executor().await;
        let result = exec.run_sql("SELECT * FROM t", Some(2)).await.unwrap();
        assert_eq!(result.len(), 2);
        // a statement with its own LIMIT is left alone
        let result = exec.run_sql("SELECT * FROM t LIMIT 1", Some(50)).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_execution_error_carries_sql() {
        let exec = memory_executor().await;
        let err = exec
            .run(&composed("SELECT * FROM missing_table", vec![]))
            .await
            .unwrap_err();
        match err {
            AskqlError::SqlExecution { sql, .. } => {
                assert_eq!(sql, "SELECT * FROM missing_table")
            }
            other => panic!("expected SqlExecution, got {other:?}"),
        }
    }
}
