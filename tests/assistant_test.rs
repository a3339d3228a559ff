//! End-to-end tests over the demo database: introspect, translate,
//! execute, and learn from feedback.

use askql::demo::create_demo_pool;
use askql::prelude::*;

fn small_config() -> AssistantConfig {
    AssistantConfig {
        demo_policies: 80,
        demo_claims: 200,
        ..AssistantConfig::default()
    }
}

async fn demo_setup() -> (Assistant, Executor) {
    let config = small_config();
    let pool = create_demo_pool(&config).await.expect("demo pool");
    let executor = Executor::new(pool);
    let assistant = Assistant::from_pool(executor.pool(), config)
        .await
        .expect("introspection");
    (assistant, executor)
}

#[tokio::test]
async fn count_question_executes_to_a_single_number() {
    let (assistant, executor) = demo_setup().await;
    let t = assistant.translate("how many policies are active").unwrap();
    assert_eq!(t.query.sql, "SELECT COUNT(*) FROM policies WHERE status = ?");

    let result = executor.run(&t.query).await.unwrap();
    assert_eq!(result.len(), 1);
    assert!(matches!(&result.rows[0][0], serde_json::Value::Number(n) if n.as_i64().unwrap() > 0));
}

#[tokio::test]
async fn distinct_question_lists_statuses() {
    let (assistant, executor) = demo_setup().await;
    let t = assistant.translate("unique status in claims").unwrap();

    let result = executor.run(&t.query).await.unwrap();
    let values: Vec<&str> = result
        .rows
        .iter()
        .filter_map(|row| row[0].as_str())
        .collect();
    assert!(values.contains(&"OPEN"));
    assert!(values.contains(&"CLOSED"));
}

#[tokio::test]
async fn top_k_question_orders_and_limits() {
    let (assistant, executor) = demo_setup().await;
    let t = assistant
        .translate("top 10 policies by credit limit")
        .unwrap();
    assert!(t.query.sql.ends_with("ORDER BY credit_limit DESC LIMIT 10"));

    let result = executor.run(&t.query).await.unwrap();
    assert_eq!(result.len(), 10);
    let limits: Vec<f64> = result
        .rows
        .iter()
        .map(|row| {
            let idx = result
                .columns
                .iter()
                .position(|c| c == "credit_limit")
                .unwrap();
            row[idx].as_f64().unwrap()
        })
        .collect();
    assert!(limits.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn unknown_table_is_reported_not_guessed() {
    let (assistant, _) = demo_setup().await;
    let err = assistant.translate("show widgets").unwrap_err();
    assert!(matches!(err, AskqlError::UnsupportedQuery { .. }));
}

#[tokio::test]
async fn feedback_learns_a_new_phrasing() {
    let (assistant, executor) = demo_setup().await;
    let size_before = assistant.with_corpus(|c| c.len());

    let first = assistant.translate("show policies").unwrap();
    let feedback = Feedback::new(
        "show revoked policies",
        &first.query.sql,
        "SELECT * FROM policies WHERE status = 'CANCELLED'",
        Some(first.query.template_id),
    );
    let outcome = assistant.apply_feedback(&feedback).unwrap();
    assert_eq!(outcome.disposition, FeedbackDisposition::Created);
    assert_eq!(assistant.with_corpus(|c| c.len()), size_before + 1);

    // the learned template now answers the same phrasing, executably
    let t = assistant.translate("show revoked policies").unwrap();
    assert_eq!(t.query.template_id, outcome.template_id);
    let result = executor.run(&t.query).await.unwrap();
    for row in &result.rows {
        let idx = result.columns.iter().position(|c| c == "status").unwrap();
        assert_eq!(row[idx].as_str(), Some("CANCELLED"));
    }

    // resubmitting the identical correction must not duplicate
    let again = assistant.apply_feedback(&feedback).unwrap();
    assert_eq!(again.disposition, FeedbackDisposition::Reinforced);
    assert_eq!(assistant.with_corpus(|c| c.len()), size_before + 1);
}

#[tokio::test]
async fn rejected_feedback_leaves_the_corpus_alone() {
    let (assistant, _) = demo_setup().await;
    let size_before = assistant.with_corpus(|c| c.len());

    let first = assistant.translate("show claims").unwrap();
    let feedback = Feedback::new(
        "show claims",
        &first.query.sql,
        "UPDATE claims SET status = 'CLOSED'",
        Some(first.query.template_id),
    );
    let err = assistant.apply_feedback(&feedback).unwrap_err();
    assert!(matches!(err, AskqlError::FeedbackConflict(_)));
    assert_eq!(assistant.with_corpus(|c| c.len()), size_before);
}

#[tokio::test]
async fn quoted_literal_round_trips_through_execution() {
    let (assistant, executor) = demo_setup().await;
    let t = assistant
        .translate("show organizations where city 'London'")
        .unwrap();
    assert_eq!(t.query.params, vec![BoundValue::Text("London".into())]);

    let result = executor.run(&t.query).await.unwrap();
    for row in &result.rows {
        let idx = result.columns.iter().position(|c| c == "city").unwrap();
        assert_eq!(row[idx].as_str(), Some("London"));
    }
}

#[tokio::test]
async fn rationale_accounts_for_every_bound_slot() {
    let (assistant, _) = demo_setup().await;
    let t = assistant.translate("how many policies are active").unwrap();

    assert_eq!(t.rationale.template_id, t.query.template_id);
    assert_eq!(t.rationale.slots.len(), t.query.binding.slots.len());
    for (rationale_slot, bound) in t.rationale.slots.iter().zip(&t.query.binding.slots) {
        assert_eq!(rationale_slot.name, bound.name);
    }
}
