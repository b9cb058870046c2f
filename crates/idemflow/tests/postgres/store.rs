//! Integration tests for PgStore.

use std::time::Duration;

use idemflow::{IdempotencyStore, StoreError, TransactionProvider, TxOutcome};
use test_utils::db_test;

use crate::support::{Order, Store, fetch_locked_until, fetch_step};

db_test!(lookup_without_record_finds_nothing, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    let record = scope.get_idempotency_key(&mut tx).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    assert!(record.is_none());
    Ok(())
});

db_test!(created_record_round_trips_args, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");
    let order = Order::new("o-1", 10);

    let mut tx = scope.start_transaction().await?;
    let key = scope.create_idempotency_key(&mut tx, "start").await?;
    scope.save_args(&mut tx, &order).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = scope.start_transaction().await?;
    let record = scope
        .get_idempotency_key(&mut tx)
        .await?
        .expect("record was committed");
    scope.close_transaction(tx, TxOutcome::Rollback).await?;

    assert_eq!(record.key, key);
    assert_eq!(record.step, "start");
    assert_eq!(record.args, Some(order));
    assert_eq!(record.response, None);
    Ok(())
});

db_test!(rollback_discards_created_record, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    scope.create_idempotency_key(&mut tx, "start").await?;
    scope.close_transaction(tx, TxOutcome::Rollback).await?;

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM idemflow.idempotency_keys")
        .fetch_one(pool)
        .await?;
    assert_eq!(count, 0);
    Ok(())
});

db_test!(response_moves_record_to_final_step, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    scope.create_idempotency_key(&mut tx, "start").await?;
    scope.save_rec_point(&mut tx, "reserve").await?;
    scope.save_resp(&mut tx, "finish", &"receipt".to_owned()).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = scope.start_transaction().await?;
    let record = scope.get_idempotency_key(&mut tx).await?.expect("record exists");
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    assert!(record.is_finished("finish"));
    assert_eq!(record.response.as_deref(), Some("receipt"));
    Ok(())
});

db_test!(finished_response_is_not_overwritten, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    scope.create_idempotency_key(&mut tx, "start").await?;
    scope.save_resp(&mut tx, "finish", &"first".to_owned()).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = scope.start_transaction().await?;
    let err = scope
        .save_resp(&mut tx, "finish", &"second".to_owned())
        .await
        .unwrap_err();
    scope.close_transaction(tx, TxOutcome::Rollback).await?;

    assert!(matches!(err, StoreError::Finished(ref lookup) if lookup == "req-1"));
    Ok(())
});

db_test!(finished_record_rejects_recovery_points, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    scope.create_idempotency_key(&mut tx, "start").await?;
    scope.save_resp(&mut tx, "finish", &"receipt".to_owned()).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = scope.start_transaction().await?;
    let err = scope.save_rec_point(&mut tx, "charge").await.unwrap_err();
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    assert!(matches!(err, StoreError::Finished(ref lookup) if lookup == "req-1"));
    assert_eq!(fetch_step(pool, "req-1").await?, "finish");
    Ok(())
});

db_test!(held_lease_blocks_refresh_until_released, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    let key = scope.create_idempotency_key(&mut tx, "start").await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = scope.start_transaction().await?;
    let err = scope.refresh_idempotency_key(&mut tx, &key).await.unwrap_err();
    scope.close_transaction(tx, TxOutcome::Rollback).await?;
    assert!(matches!(err, StoreError::Leased(ref lookup) if lookup == "req-1"));

    let mut tx = scope.start_transaction().await?;
    scope.release_idempotency_key(&mut tx, &key).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;
    assert!(fetch_locked_until(pool, "req-1").await?.is_none());

    let mut tx = scope.start_transaction().await?;
    scope.refresh_idempotency_key(&mut tx, &key).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;
    assert!(fetch_locked_until(pool, "req-1").await?.is_some());
    Ok(())
});

db_test!(expired_lease_can_be_taken_over, |pool| {
    let store = Store::new(pool.clone()).with_lease_duration(Duration::ZERO);
    let scope = store.scope("req-1");

    let mut tx = scope.start_transaction().await?;
    let key = scope.create_idempotency_key(&mut tx, "start").await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = scope.start_transaction().await?;
    scope.refresh_idempotency_key(&mut tx, &key).await?;
    scope.close_transaction(tx, TxOutcome::Commit).await?;
    Ok(())
});

db_test!(writes_to_missing_record_report_not_found, |pool| {
    let store = Store::new(pool.clone());
    let scope = store.scope("req-404");

    let mut tx = scope.start_transaction().await?;
    let err = scope.save_rec_point(&mut tx, "reserve").await.unwrap_err();
    scope.close_transaction(tx, TxOutcome::Rollback).await?;

    assert!(matches!(err, StoreError::NotFound(_)));
    Ok(())
});

db_test!(scopes_are_isolated, |pool| {
    let store = Store::new(pool.clone());
    let a = store.scope("req-a");
    let b = store.scope("req-b");

    let mut tx = a.start_transaction().await?;
    a.create_idempotency_key(&mut tx, "start").await?;
    a.save_rec_point(&mut tx, "reserve").await?;
    a.close_transaction(tx, TxOutcome::Commit).await?;

    let mut tx = b.start_transaction().await?;
    assert!(b.get_idempotency_key(&mut tx).await?.is_none());
    b.create_idempotency_key(&mut tx, "start").await?;
    b.close_transaction(tx, TxOutcome::Commit).await?;

    assert_eq!(fetch_step(pool, "req-a").await?, "reserve");
    assert_eq!(fetch_step(pool, "req-b").await?, "start");
    Ok(())
});

db_test!(migrate_is_idempotent, |pool| {
    let store = Store::new(pool.clone());

    store.migrate().await?;

    Ok(())
});
