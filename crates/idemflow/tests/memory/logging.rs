//! Structured log output of a run.

use idemflow::{Coordinator, EffectResult};

use crate::support::effects::{Order, Recorder, Store, response};
use crate::support::helpers::capture_logs;

#[tokio::test]
async fn completed_run_logs_each_effect_and_the_key() {
    let (logs, _guard) = capture_logs();
    let store = Store::new();
    let recorder = Recorder::new(&store);
    let coordinator = Coordinator::builder(recorder.local("reserve", EffectResult::RecoveryPoint))
        .effect(recorder.external("charge", response("charged")))
        .build()
        .unwrap();

    coordinator
        .run(&store.scope("req-1"), Order::new("o-1", 10))
        .await
        .unwrap();

    let output = logs.contents();
    let key = store.record("req-1").unwrap().key;
    assert!(output.contains("Created idempotency key"));
    assert!(output.contains(&format!("key={key}")));
    assert!(output.contains("effect=\"reserve\"") || output.contains("effect=reserve"));
    assert!(output.contains("result=\"recovery_point\"") || output.contains("result=recovery_point"));
    assert!(output.contains("Operation completed"));
}

#[tokio::test]
async fn replay_and_mismatch_are_logged() {
    let (logs, _guard) = capture_logs();
    let store = Store::new();
    let recorder = Recorder::new(&store);
    let coordinator = Coordinator::builder(recorder.local("reserve", EffectResult::RecoveryPoint))
        .effect(recorder.failing_external("charge"))
        .build()
        .unwrap();

    coordinator
        .run(&store.scope("req-1"), Order::new("o-1", 10))
        .await
        .unwrap_err();
    coordinator
        .run(&store.scope("req-1"), Order::new("o-1", 11))
        .await
        .unwrap_err();

    let output = logs.contents();
    assert!(output.contains("Effect failed, stopping operation"));
    assert!(output.contains("WARN"));
    assert!(output.contains("Idempotency key reused with different args"));
}

#[tokio::test]
async fn cached_response_is_logged() {
    let (logs, _guard) = capture_logs();
    let store = Store::new();
    let recorder = Recorder::new(&store);
    let coordinator = Coordinator::builder(recorder.local("charge", response("receipt")))
        .build()
        .unwrap();

    for _ in 0..2 {
        coordinator
            .run(&store.scope("req-1"), Order::new("o-1", 10))
            .await
            .unwrap();
    }

    assert!(logs
        .contents()
        .contains("Operation already completed, returning stored response"));
}
