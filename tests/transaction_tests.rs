//! Integration tests against a real Postgres instance with the `ltree`
//! extension, exercising the coordinator end to end.
//!
//! Metadata and application tables live in the same test database for
//! simplicity; the engine itself treats them as two independent pools, so
//! production callers are free to point them at separate databases.

use sqlx::{Executor, PgPool};
use std::time::Duration;
use txn_engine::{Engine, EngineConfig, Error, Value};

async fn setup_widgets(pool: &PgPool) {
    let ddl = txn_engine::schema::ensure_versioned_table("widgets", &["name TEXT NOT NULL"]);
    pool.execute(ddl.as_str()).await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn insert_is_visible_within_same_transaction(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut tx = engine.open_tx().await.unwrap();
    let id = tx
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();

    let row = tx.select("widgets", id).await.unwrap();
    assert_eq!(row.get("name"), Some(&Value::Text("sprocket".to_string())));

    tx.commit().await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn uncommitted_insert_is_invisible_to_other_transaction(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut writer = engine.open_tx().await.unwrap();
    let id = writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();

    let reader = engine.open_tx().await.unwrap();
    let result = reader.select("widgets", id).await;
    assert!(result.is_err());

    writer.commit().await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn committed_insert_becomes_visible_to_later_transaction(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut writer = engine.open_tx().await.unwrap();
    let id = writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let reader = engine.open_tx().await.unwrap();
    let row = reader.select("widgets", id).await.unwrap();
    assert_eq!(row.get("name"), Some(&Value::Text("sprocket".to_string())));
}

#[sqlx::test(migrations = "./migrations")]
async fn rollback_undoes_insert(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut writer = engine.open_tx().await.unwrap();
    let id = writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();
    writer.rollback().await.unwrap();

    let reader = engine.open_tx().await.unwrap();
    let result = reader.select("widgets", id).await;
    assert!(result.is_err());
}

#[sqlx::test(migrations = "./migrations")]
async fn update_creates_new_version_visible_after_commit(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut writer = engine.open_tx().await.unwrap();
    let id = writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let mut updater = engine.open_tx().await.unwrap();
    updater
        .update(
            "widgets",
            id,
            &["name".to_string()],
            &[Value::Text("widget".to_string())],
        )
        .await
        .unwrap();
    updater.commit().await.unwrap();

    let reader = engine.open_tx().await.unwrap();
    let row = reader.select("widgets", id).await.unwrap();
    assert_eq!(row.get("name"), Some(&Value::Text("widget".to_string())));
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_makes_row_invisible_after_commit(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut writer = engine.open_tx().await.unwrap();
    let id = writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let mut deleter = engine.open_tx().await.unwrap();
    deleter.delete("widgets", id).await.unwrap();
    deleter.commit().await.unwrap();

    let reader = engine.open_tx().await.unwrap();
    let result = reader.select("widgets", id).await;
    assert!(result.is_err());
}

#[sqlx::test(migrations = "./migrations")]
async fn delete_on_row_locked_by_another_transaction_times_out(pool: PgPool) {
    setup_widgets(&pool).await;
    let config = EngineConfig::for_tests().with_max_lock_retries(5);
    let engine = Engine::new(pool.clone(), pool, config);

    let mut writer = engine.open_tx().await.unwrap();
    let id = writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();
    writer.commit().await.unwrap();

    let mut first = engine.open_tx().await.unwrap();
    first.delete("widgets", id).await.unwrap();

    // `first` never releases its lock within this test, so `second` keeps
    // waiting until it exhausts its bounded retry budget.
    let mut second = engine.open_tx().await.unwrap();
    let result = second.delete("widgets", id).await;
    assert!(result.is_err());

    second.rollback().await.unwrap();
    first.rollback().await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_mutual_wait_aborts_one_transaction(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut setup = engine.open_tx().await.unwrap();
    let id_a = setup
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("a".to_string())],
        )
        .await
        .unwrap();
    let id_b = setup
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("b".to_string())],
        )
        .await
        .unwrap();
    setup.commit().await.unwrap();

    let mut first = engine.open_tx().await.unwrap();
    first
        .update("widgets", id_a, &["name".to_string()], &[Value::Text("a1".to_string())])
        .await
        .unwrap();

    let mut second = engine.open_tx().await.unwrap();
    second
        .update("widgets", id_b, &["name".to_string()], &[Value::Text("b1".to_string())])
        .await
        .unwrap();

    // `second` holds `b` and now waits on `a` (held by `first`), recording
    // a wait-for edge second -> first. Give it a moment to register that
    // edge before `first` waits on `b` in turn: the side that closes the
    // cycle is the one whose own cycle check observes it and aborts.
    let waiting = tokio::spawn(async move {
        let result = second
            .update("widgets", id_a, &["name".to_string()], &[Value::Text("b2".to_string())])
            .await;
        (second, result)
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let first_result = first
        .update("widgets", id_b, &["name".to_string()], &[Value::Text("a2".to_string())])
        .await;

    assert!(
        matches!(first_result, Err(Error::DependencyCycle { .. })),
        "expected first to be aborted for closing the wait-for cycle, got {first_result:?}"
    );
    first.rollback().await.unwrap();

    let (second, second_result) = waiting.await.unwrap();
    second_result.expect("second should proceed once first released its lock");
    second.commit().await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
async fn vacuum_reclaims_rolled_back_insert(pool: PgPool) {
    setup_widgets(&pool).await;
    let engine = Engine::new(pool.clone(), pool, EngineConfig::for_tests());

    let mut writer = engine.open_tx().await.unwrap();
    writer
        .insert(
            "widgets",
            &["name".to_string()],
            &[Value::Text("sprocket".to_string())],
        )
        .await
        .unwrap();
    writer.rollback().await.unwrap();

    let deleted = engine.vacuum_table("widgets").await.unwrap();
    assert_eq!(deleted, 1);
}
