//! Integration tests for the circuit-breaker-guarded invoker.

use std::sync::Arc;
use std::time::Duration;

use rpc::{
    BreakerEventKind, BreakerState, InMemoryChannel, InvokeOptions, InvokerError, RpcInvoker,
    ServiceRegistry,
};
use serde_json::json;

struct TestHarness {
    invoker: Arc<RpcInvoker>,
    media: InMemoryChannel,
}

impl TestHarness {
    fn new() -> Self {
        let media = InMemoryChannel::new();
        media.reply("attachAvatar", json!({"mediaId": "m-1"}));
        media.reply("resize", json!({"ok": true}));

        let services = ServiceRegistry::new().with("media", Arc::new(media.clone()));
        Self {
            invoker: Arc::new(RpcInvoker::new(services)),
            media,
        }
    }

    async fn attach(&self, options: &InvokeOptions) -> Result<serde_json::Value, InvokerError> {
        self.invoker
            .invoke("media", "attachAvatar", json!({}), options)
            .await
    }
}

#[tokio::test(start_paused = true)]
async fn test_two_of_two_failures_stop_traffic() {
    let h = TestHarness::new();
    let options = InvokeOptions::default()
        .error_threshold_percentage(50.0)
        .volume_threshold(2);
    h.media.fail_action("attachAvatar", "storage unavailable");

    assert!(h.attach(&options).await.is_err());
    assert!(h.attach(&options).await.is_err());
    assert_eq!(h.media.calls_for("attachAvatar").len(), 2);

    let third = h.attach(&options).await;
    assert!(matches!(third, Err(InvokerError::CircuitOpen { .. })));
    assert_eq!(h.media.calls_for("attachAvatar").len(), 2);

    let snapshot = h.invoker.snapshot("media", "attachAvatar").unwrap();
    assert_eq!(snapshot.state, BreakerState::Open);
    assert_eq!(snapshot.failure_count, 2);
    assert_eq!(snapshot.invocation_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_through_half_open_trial() {
    let h = TestHarness::new();
    let options = InvokeOptions::default().reset_timeout(Duration::from_secs(30));
    h.media.fail_action("attachAvatar", "storage unavailable");
    assert!(h.attach(&options).await.is_err());

    h.media.clear_failure("attachAvatar");
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(
        h.attach(&options).await,
        Err(InvokerError::CircuitOpen { .. })
    ));
    assert_eq!(h.media.calls_for("attachAvatar").len(), 1);

    tokio::time::advance(Duration::from_secs(20)).await;
    let reply = h.attach(&options).await.unwrap();
    assert_eq!(reply, json!({"mediaId": "m-1"}));

    let snapshot = h.invoker.snapshot("media", "attachAvatar").unwrap();
    assert_eq!(snapshot.state, BreakerState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_uses_fallback_without_reaching_transport() {
    let h = TestHarness::new();
    let options = InvokeOptions::default();
    h.media.fail_action("attachAvatar", "storage unavailable");
    assert!(h.attach(&options).await.is_err());

    let reply = h
        .invoker
        .invoke_with_fallback("media", "attachAvatar", json!({}), &options, |err| async move {
            assert!(matches!(err, InvokerError::CircuitOpen { .. }));
            Ok(json!({"mediaId": "placeholder"}))
        })
        .await
        .unwrap();

    assert_eq!(reply, json!({"mediaId": "placeholder"}));
    assert_eq!(h.media.calls_for("attachAvatar").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_breakers_are_isolated_per_action() {
    let h = TestHarness::new();
    let options = InvokeOptions::default();
    h.media.fail_action("attachAvatar", "storage unavailable");
    assert!(h.attach(&options).await.is_err());

    let resized = h
        .invoker
        .invoke("media", "resize", json!({}), &options)
        .await
        .unwrap();
    assert_eq!(resized, json!({"ok": true}));

    let summary = h.invoker.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.open, 1);
    assert_eq!(summary.closed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_reply_times_out_and_counts_as_failure() {
    let h = TestHarness::new();
    h.media
        .delay_action("attachAvatar", Duration::from_secs(15));

    let err = h.attach(&InvokeOptions::default()).await.unwrap_err();
    assert_eq!(
        err,
        InvokerError::UpstreamTimeout {
            service: "media".into(),
            action: "attachAvatar".into(),
            timeout: Duration::from_secs(10),
        }
    );
    assert_eq!(
        h.invoker.snapshot("media", "attachAvatar").unwrap().state,
        BreakerState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_applies_per_call_on_shared_breaker() {
    let h = TestHarness::new();
    h.attach(&InvokeOptions::default()).await.unwrap();

    h.media
        .delay_action("attachAvatar", Duration::from_secs(15));
    let patient = InvokeOptions::default().timeout(Duration::from_secs(30));
    assert_eq!(h.attach(&patient).await.unwrap(), json!({"mediaId": "m-1"}));

    let hasty = InvokeOptions::default().timeout(Duration::from_secs(1));
    let err = h.attach(&hasty).await.unwrap_err();
    assert_eq!(
        err,
        InvokerError::UpstreamTimeout {
            service: "media".into(),
            action: "attachAvatar".into(),
            timeout: Duration::from_secs(1),
        }
    );
    assert_eq!(h.invoker.breakers().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_consistent_counters() {
    let h = TestHarness::new();
    let options = InvokeOptions::default().enabled(false);
    h.media.fail_action("attachAvatar", "storage unavailable");

    let mut handles = Vec::new();
    for _ in 0..32 {
        let invoker = h.invoker.clone();
        let options = options.clone();
        handles.push(tokio::spawn(async move {
            invoker
                .invoke("media", "attachAvatar", json!({}), &options)
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }

    let snapshot = h.invoker.snapshot("media", "attachAvatar").unwrap();
    assert_eq!(snapshot.invocation_count, 32);
    assert_eq!(snapshot.failure_count, 32);
    assert_eq!(h.media.calls_for("attachAvatar").len(), 32);
}

#[tokio::test(start_paused = true)]
async fn test_transitions_observable_across_registry() {
    let h = TestHarness::new();
    let mut events = h.invoker.subscribe();
    h.media.fail_action("attachAvatar", "storage unavailable");

    let _ = h.attach(&InvokeOptions::default()).await;
    let _ = h.attach(&InvokeOptions::default()).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(
        kinds,
        vec![
            BreakerEventKind::Failure {
                reason: "storage unavailable".into()
            },
            BreakerEventKind::StateChanged {
                from: BreakerState::Closed,
                to: BreakerState::Open
            },
            BreakerEventKind::Rejected,
        ]
    );
}
