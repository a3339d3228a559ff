//! Seeded in-memory demo database.
//!
//! An insurance-shaped schema (organizations, policies, claims, users) with
//! generated rows, deterministic for a fixed seed. Used by the CLI when no
//! database URL is given and by the integration tests.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::AssistantConfig;
use crate::error::{AskqlError, AskqlResult};

const CITIES: &[&str] = &[
    "London", "Cardiff", "Amsterdam", "Madrid", "Paris", "Berlin", "Rome",
    "Dublin", "Prague", "Lisbon",
];
const COUNTRIES: &[&str] = &["GB", "NL", "ES", "FR", "DE", "IE"];
const CURRENCIES: &[&str] = &["GBP", "EUR", "USD"];
const NAME_A: &[&str] = &["Alpha", "Beta", "Gamma", "Orion", "Vega", "Nova"];
const NAME_B: &[&str] = &["Trading", "Exports", "Holdings"];
const NAME_C: &[&str] = &["Ltd", "BV", "GmbH"];

/// Build and populate the demo database.
pub async fn create_demo_pool(config: &AssistantConfig) -> AskqlResult<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(AskqlError::introspection)?;

    sqlx::query(
        "CREATE TABLE organizations(
            org_id INTEGER PRIMARY KEY,
            org_code TEXT UNIQUE,
            org_name TEXT,
            city TEXT,
            country_code TEXT
        )",
    )
    .execute(&pool)
    .await
    .map_err(AskqlError::introspection)?;
    sqlx::query(
        "CREATE TABLE policies(
            policy_id INTEGER PRIMARY KEY,
            policy_number TEXT UNIQUE,
            org_id INTEGER REFERENCES organizations(org_id),
            inception_date TEXT,
            expiry_date TEXT,
            currency TEXT,
            status TEXT,
            credit_limit REAL
        )",
    )
    .execute(&pool)
    .await
    .map_err(AskqlError::introspection)?;
    sqlx::query(
        "CREATE TABLE claims(
            claim_id INTEGER PRIMARY KEY,
            policy_id INTEGER REFERENCES policies(policy_id),
            claim_number TEXT UNIQUE,
            created_at TEXT,
            amount REAL,
            status TEXT
        )",
    )
    .execute(&pool)
    .await
    .map_err(AskqlError::introspection)?;
    sqlx::query("CREATE TABLE users(user_id INTEGER PRIMARY KEY, username TEXT UNIQUE, role TEXT)")
        .execute(&pool)
        .await
        .map_err(AskqlError::introspection)?;

    populate(&pool, config).await?;
    tracing::info!(
        policies = config.demo_policies,
        claims = config.demo_claims,
        "demo database ready"
    );
    Ok(pool)
}

async fn populate(pool: &SqlitePool, config: &AssistantConfig) -> AskqlResult<()> {
    let mut rng = StdRng::seed_from_u64(config.demo_seed);
    let policies = config.demo_policies as i64;
    let claims = config.demo_claims as i64;
    let orgs = (policies / 10).max(50);
    let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();

    for org_id in 1..=orgs {
        let name = format!(
            "{} {} {}",
            pick(&mut rng, NAME_A),
            pick(&mut rng, NAME_B),
            pick(&mut rng, NAME_C)
        );
        sqlx::query("INSERT INTO organizations VALUES (?, ?, ?, ?, ?)")
            .bind(org_id)
            .bind(format!("ORG-{org_id:04}"))
            .bind(name)
            .bind(pick(&mut rng, CITIES))
            .bind(pick(&mut rng, COUNTRIES))
            .execute(pool)
            .await
            .map_err(AskqlError::introspection)?;
    }

    for policy_id in 1..=policies {
        let inception = base + Duration::days(rng.random_range(0..=365));
        let expiry = inception + Duration::days(rng.random_range(180..=540));
        let status = weighted(
            &mut rng,
            &[("ACTIVE", 0.55), ("EXPIRED", 0.25), ("CANCELLED", 0.1), ("PENDING", 0.1)],
        );
        let credit = (rng.random_range(10_000.0..500_000.0) * 100.0).round() / 100.0;
        sqlx::query("INSERT INTO policies VALUES (?, ?, ?, ?, ?, ?, ?, ?)")
            .bind(policy_id)
            .bind(format!("POL-{policy_id:06}"))
            .bind(rng.random_range(1..=orgs))
            .bind(inception.to_string())
            .bind(expiry.to_string())
            .bind(pick(&mut rng, CURRENCIES))
            .bind(status)
            .bind(credit)
            .execute(pool)
            .await
            .map_err(AskqlError::introspection)?;
    }

    for claim_id in 1..=claims {
        let created = base + Duration::days(rng.random_range(60..=600));
        let status = weighted(
            &mut rng,
            &[("OPEN", 0.35), ("CLOSED", 0.45), ("PENDING", 0.15), ("REJECTED", 0.05)],
        );
        let amount = (rng.random_range(500.0..100_000.0) * 100.0).round() / 100.0;
        sqlx::query("INSERT INTO claims VALUES (?, ?, ?, ?, ?, ?)")
            .bind(claim_id)
            .bind(rng.random_range(1..=policies))
            .bind(format!("CLM-{claim_id:06}"))
            .bind(created.to_string())
            .bind(amount)
            .bind(status)
            .execute(pool)
            .await
            .map_err(AskqlError::introspection)?;
    }

    for (user_id, username, role) in [(1, "admin", "ADMIN"), (2, "dev1", "DEV"), (3, "analyst", "ANALYST")]
    {
        sqlx::query("INSERT INTO users VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(username)
            .bind(role)
            .execute(pool)
            .await
            .map_err(AskqlError::introspection)?;
    }

    Ok(())
}

fn pick<'a>(rng: &mut StdRng, options: &'a [&'a str]) -> &'a str {
    options.choose(rng).copied().unwrap_or(options[0])
}

fn weighted(rng: &mut StdRng, options: &[(&'static str, f64)]) -> &'static str {
    let roll: f64 = rng.random_range(0.0..1.0);
    let mut acc = 0.0;
    for (value, weight) in options {
        acc += weight;
        if roll < acc {
            return value;
        }
    }
    options[options.len() - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;

    fn small_config() -> AssistantConfig {
        AssistantConfig {
            demo_policies: 60,
            demo_claims: 120,
            ..AssistantConfig::default()
        }
    }

    #[tokio::test]
    async fn test_demo_database_shape() {
        let pool = create_demo_pool(&small_config()).await.unwrap();
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM policies")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 60);
        let statuses: Vec<String> = sqlx::query_scalar("SELECT DISTINCT status FROM policies")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(statuses.iter().any(|s| s == "ACTIVE"));
    }

    #[tokio::test]
    async fn test_demo_is_deterministic_and_introspection_idempotent() {
        let cfg = small_config();
        let a = create_demo_pool(&cfg).await.unwrap();
        let b = create_demo_pool(&cfg).await.unwrap();

        let meta_a = SchemaCatalog::introspect(&a, &cfg).await.unwrap();
        let meta_b = SchemaCatalog::introspect(&b, &cfg).await.unwrap();
        assert_eq!(meta_a.metadata(), meta_b.metadata());

        // rebuilding from the same database state yields an equal snapshot
        let again = SchemaCatalog::introspect(&a, &cfg).await.unwrap();
        assert_eq!(meta_a.metadata(), again.metadata());
    }
}
