//! Integration tests for saga execution, compensation and housekeeping.

use std::sync::Arc;
use std::time::Duration;

use rpc::{InMemoryChannel, RpcInvoker, ServiceRegistry};
use saga::{
    InMemorySagaStore, Saga, SagaError, SagaOrchestrator, SagaOutcome, SagaStatus, SagaStep,
    SagaStore, SagaType, StepStatus, definitions,
};
use saga::orchestrator::INTERRUPTED_ERROR;
use serde_json::json;

struct TestHarness {
    orchestrator: Arc<SagaOrchestrator<InMemorySagaStore>>,
    store: InMemorySagaStore,
    user: InMemoryChannel,
    media: InMemoryChannel,
    follow: InMemoryChannel,
}

impl TestHarness {
    fn new() -> Self {
        let user = InMemoryChannel::new();
        user.reply("createUser", json!({"userId": "u-1"}))
            .reply("deleteUser", json!({"deleted": true}))
            .reply("linkMedia", json!({"linked": true}))
            .reply("unlinkMedia", json!({"unlinked": true}))
            .reply("incrementFollowers", json!({"followers": 1}))
            .reply("decrementFollowers", json!({"followers": 0}));
        let media = InMemoryChannel::new();
        media
            .reply("attachAvatar", json!({"mediaId": "m-1"}))
            .reply("uploadMedia", json!({"mediaId": "m-1"}))
            .reply("deleteMedia", json!({"deleted": true}));
        let follow = InMemoryChannel::new();
        follow
            .reply("createFollow", json!({"followId": "f-1"}))
            .reply("deleteFollow", json!({"deleted": true}));

        let services = ServiceRegistry::new()
            .with("user", Arc::new(user.clone()))
            .with("media", Arc::new(media.clone()))
            .with("follow", Arc::new(follow.clone()));
        let store = InMemorySagaStore::new();
        let orchestrator = SagaOrchestrator::new(store.clone(), Arc::new(RpcInvoker::new(services)));

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            user,
            media,
            follow,
        }
    }

    async fn create(&self, saga_type: SagaType, steps: Vec<SagaStep>) -> Saga {
        self.orchestrator.create_saga(saga_type, steps).await.unwrap()
    }

    async fn load(&self, saga: &Saga) -> Saga {
        self.orchestrator.get_saga(saga.id()).await.unwrap().unwrap()
    }

    /// Stores a copy of `saga` as a crashed process would have left it.
    async fn store_interrupted(&self, saga: &Saga, status: &str, completed_steps: usize) {
        let mut body = serde_json::to_value(saga).unwrap();
        body["status"] = json!(status);
        for step in body["steps"].as_array_mut().unwrap().iter_mut().take(completed_steps) {
            step["status"] = json!("Completed");
        }
        let interrupted: Saga = serde_json::from_value(body).unwrap();
        self.store.save(&interrupted).await.unwrap();
    }
}

fn create_user_then_avatar() -> Vec<SagaStep> {
    vec![
        SagaStep::new("create-user", "user", "createUser")
            .with_data(json!({"email": "a@b.c"}))
            .with_compensation("deleteUser", json!({"email": "a@b.c"})),
        SagaStep::new("attach-avatar", "media", "attachAvatar")
            .with_data(json!({"url": "https://cdn/a.png"})),
    ]
}

#[tokio::test]
async fn test_avatar_failure_rolls_back_user() {
    let h = TestHarness::new();
    h.media.fail_action("attachAvatar", "unsupported image format");
    let saga = h.create(SagaType::UserCreation, create_user_then_avatar()).await;

    let outcome = h.orchestrator.execute_saga(saga.id()).await.unwrap();
    assert_eq!(outcome, SagaOutcome::failure("unsupported image format"));

    let saga = h.load(&saga).await;
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(saga.error(), Some("unsupported image format"));
    assert_eq!(
        saga.step("create-user").unwrap().status(),
        StepStatus::Compensated
    );
    let avatar = saga.step("attach-avatar").unwrap();
    assert_eq!(avatar.status(), StepStatus::Failed);
    assert_eq!(avatar.error(), Some("unsupported image format"));

    assert_eq!(h.user.calls_for("deleteUser").len(), 1);
    assert!(saga.is_fully_compensated());
}

#[tokio::test]
async fn test_all_steps_succeed_without_compensation() {
    let h = TestHarness::new();
    let saga = h.create(SagaType::UserCreation, create_user_then_avatar()).await;

    let outcome = h.orchestrator.execute_saga(saga.id()).await.unwrap();
    assert!(outcome.success);
    assert!(outcome.error.is_none());

    let saga = h.load(&saga).await;
    assert_eq!(saga.status(), SagaStatus::Completed);
    assert!(
        saga.steps()
            .iter()
            .all(|s| s.status() == StepStatus::Completed)
    );
    assert!(h.user.calls_for("deleteUser").is_empty());
    assert_eq!(h.user.call_count() + h.media.call_count(), 2);
}

#[tokio::test]
async fn test_first_failure_at_each_position() {
    const N: usize = 4;

    for k in 1..=N {
        let h = TestHarness::new();
        let steps: Vec<SagaStep> = (1..=N)
            .map(|i| {
                let step = SagaStep::new(format!("step-{i}"), "follow", format!("do{i}"));
                // Odd steps can be undone, even steps cannot.
                if i % 2 == 1 {
                    step.with_compensation(format!("undo{i}"), json!({"i": i}))
                } else {
                    step
                }
            })
            .collect();
        for i in 1..=N {
            h.follow.reply(format!("do{i}"), json!({"i": i}));
            h.follow.reply(format!("undo{i}"), json!({}));
        }
        h.follow.fail_action(format!("do{k}"), format!("step {k} failed"));

        let saga = h.create(SagaType::FollowCreation, steps).await;
        let outcome = h.orchestrator.execute_saga(saga.id()).await.unwrap();
        assert_eq!(outcome, SagaOutcome::failure(format!("step {k} failed")));

        let saga = h.load(&saga).await;
        assert_eq!(saga.status(), SagaStatus::Compensated, "k={k}");
        for (idx, step) in saga.steps().iter().enumerate() {
            let i = idx + 1;
            let expected = if i < k {
                if step.is_compensable() {
                    StepStatus::Compensated
                } else {
                    StepStatus::Completed
                }
            } else if i == k {
                StepStatus::Failed
            } else {
                StepStatus::Pending
            };
            assert_eq!(step.status(), expected, "k={k}, step {i}");
        }

        // Compensations run in reverse order.
        let undone: Vec<String> = h
            .follow
            .calls()
            .into_iter()
            .filter(|c| c.action.starts_with("undo"))
            .map(|c| c.action)
            .collect();
        let expected: Vec<String> = (1..k)
            .rev()
            .filter(|i| i % 2 == 1)
            .map(|i| format!("undo{i}"))
            .collect();
        assert_eq!(undone, expected, "k={k}");
    }
}

#[tokio::test]
async fn test_failed_compensation_does_not_stop_rollback() {
    let h = TestHarness::new();
    h.user.fail_action("unlinkMedia", "user service unavailable");
    h.follow.reply("notify", json!({}));
    h.follow.fail_action("notify", "notification queue full");

    let mut steps = definitions::media_upload("u-1", "m-1", "https://cdn/m.png").steps;
    steps.push(SagaStep::new("notify", "follow", "notify"));
    let saga = h.create(SagaType::MediaUpload, steps).await;

    let outcome = h.orchestrator.execute_saga(saga.id()).await.unwrap();
    assert_eq!(outcome, SagaOutcome::failure("notification queue full"));

    let saga = h.load(&saga).await;
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert!(!saga.is_fully_compensated());

    let report = saga.rollback_report();
    assert_eq!(report.compensated, vec![definitions::STEP_UPLOAD_MEDIA]);
    assert_eq!(report.failed, vec![definitions::STEP_LINK_MEDIA]);
    assert_eq!(
        saga.step(definitions::STEP_LINK_MEDIA)
            .unwrap()
            .compensation_error(),
        Some("user service unavailable")
    );
    assert_eq!(h.media.calls_for("deleteMedia").len(), 1);
}

#[tokio::test]
async fn test_get_saga_never_mutates() {
    let h = TestHarness::new();
    let saga = h.create(SagaType::UserCreation, create_user_then_avatar()).await;
    h.orchestrator.execute_saga(saga.id()).await.unwrap();

    let first = h.load(&saga).await;
    for _ in 0..5 {
        assert_eq!(h.load(&saga).await, first);
    }
    assert_eq!(h.user.call_count(), 1);
}

#[tokio::test]
async fn test_unknown_saga_is_not_found() {
    let h = TestHarness::new();
    let id = common::SagaId::new();
    assert!(matches!(
        h.orchestrator.execute_saga(id).await,
        Err(SagaError::NotFound(_))
    ));
    assert!(h.orchestrator.get_saga(id).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_removes_finished_but_never_running_sagas() {
    let h = TestHarness::new();
    let done = h.create(SagaType::UserCreation, create_user_then_avatar()).await;
    h.orchestrator.execute_saga(done.id()).await.unwrap();

    h.follow.delay_action("createFollow", Duration::from_secs(20));
    let running = h
        .create(
            SagaType::FollowCreation,
            definitions::follow_creation("u-1", "u-2").steps,
        )
        .await;
    let handle = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        let id = running.id();
        async move { orchestrator.execute_saga(id).await }
    });
    while h.follow.call_count() == 0 {
        tokio::task::yield_now().await;
    }

    let removed = h.orchestrator.cleanup_old_sagas(Duration::ZERO).await.unwrap();
    assert_eq!(removed, 1);
    assert!(h.orchestrator.get_saga(done.id()).await.unwrap().is_none());
    assert_eq!(
        h.load(&running).await.status(),
        SagaStatus::InProgress
    );

    assert!(handle.await.unwrap().unwrap().success);
    assert_eq!(h.load(&running).await.status(), SagaStatus::Completed);
}

#[tokio::test]
async fn test_cleanup_respects_max_age() {
    let h = TestHarness::new();
    let saga = h.create(SagaType::UserCreation, create_user_then_avatar()).await;
    h.orchestrator.execute_saga(saga.id()).await.unwrap();
    let pending = h.create(SagaType::UserCreation, create_user_then_avatar()).await;

    let removed = h
        .orchestrator
        .cleanup_old_sagas(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(removed, 0);

    let removed = h.orchestrator.cleanup_old_sagas(Duration::ZERO).await.unwrap();
    assert_eq!(removed, 1);
    assert!(h.orchestrator.get_saga(pending.id()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_recovery_compensates_interrupted_sagas() {
    let h = TestHarness::new();
    let saga = h
        .create(
            SagaType::MediaUpload,
            definitions::media_upload("u-1", "m-1", "https://cdn/m.png").steps,
        )
        .await;
    h.store_interrupted(&saga, "InProgress", 1).await;
    let pending = h.create(SagaType::UserCreation, create_user_then_avatar()).await;

    let recovered = h.orchestrator.recover_incomplete().await.unwrap();
    assert_eq!(recovered, vec![saga.id()]);

    let saga = h.load(&saga).await;
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(saga.error(), Some(INTERRUPTED_ERROR));
    assert_eq!(
        saga.step(definitions::STEP_UPLOAD_MEDIA).unwrap().status(),
        StepStatus::Compensated
    );
    assert_eq!(
        saga.step(definitions::STEP_LINK_MEDIA).unwrap().status(),
        StepStatus::Pending
    );
    assert_eq!(h.media.calls_for("deleteMedia").len(), 1);
    assert!(h.user.calls_for("unlinkMedia").is_empty());

    assert_eq!(h.load(&pending).await.status(), SagaStatus::Pending);
    assert!(h.orchestrator.recover_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recovery_resumes_interrupted_compensation() {
    let h = TestHarness::new();
    let saga = h
        .create(
            SagaType::FollowCreation,
            definitions::follow_creation("u-1", "u-2").steps,
        )
        .await;
    h.store_interrupted(&saga, "Compensating", 2).await;

    let recovered = h.orchestrator.recover_incomplete().await.unwrap();
    assert_eq!(recovered, vec![saga.id()]);

    let saga = h.load(&saga).await;
    assert!(saga.is_fully_compensated());
    let undone: Vec<String> = h
        .user
        .calls()
        .into_iter()
        .chain(h.follow.calls())
        .map(|c| c.action)
        .collect();
    assert_eq!(undone, vec!["decrementFollowers", "deleteFollow"]);
}

#[tokio::test]
async fn test_open_breaker_fails_later_sagas_without_calls() {
    let h = TestHarness::new();
    h.media.fail_action("attachAvatar", "storage unavailable");

    let first = h.create(SagaType::UserCreation, create_user_then_avatar()).await;
    h.orchestrator.execute_saga(first.id()).await.unwrap();
    assert_eq!(h.media.calls_for("attachAvatar").len(), 1);

    let second = h.create(SagaType::UserCreation, create_user_then_avatar()).await;
    let outcome = h.orchestrator.execute_saga(second.id()).await.unwrap();
    assert_eq!(
        outcome,
        SagaOutcome::failure("Circuit breaker open for media.attachAvatar")
    );
    assert_eq!(h.media.calls_for("attachAvatar").len(), 1);
    assert_eq!(h.user.calls_for("deleteUser").len(), 2);
}

#[tokio::test]
async fn test_predefined_user_creation_runs_local_step_without_calls() {
    let h = TestHarness::new();
    let saga = h
        .orchestrator
        .create_from(definitions::user_creation("a-1", "a@b.c", "alice", None))
        .await
        .unwrap();

    assert!(h.orchestrator.execute_saga(saga.id()).await.unwrap().success);
    assert_eq!(h.user.call_count(), 1);
    assert_eq!(h.user.calls()[0].payload["username"], "alice");
}
