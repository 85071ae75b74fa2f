//! ---
//! xp_section: "04-experience-orchestration"
//! xp_subsection: "integration-tests"
//! xp_type: "source"
//! xp_scope: "test"
//! xp_description: "End-to-end open, reconcile, reload and teardown scenarios."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
mod common;

use std::time::Duration;

use common::{test_config, Harness};
use serde_json::json;
use xphost_kernel::collaborators::{PreferenceStore, SurfaceFactory};
use xphost_kernel::preferences::{LOCAL_KERNEL_URL_KEY, NUX_HAS_FINISHED_FIRST_RUN_KEY, REFERRER_KEY};
use xphost_kernel::{ExperienceOptions, KernelEvent, OpenPhase, TaskId, TaskRecord};

const M1: &str = "https://e.com/m1";
const M2: &str = "https://e.com/m2";

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn home_identifier_never_fetches() {
    let mut harness = Harness::manual(test_config());
    let home = test_config().host.home_url;

    harness.kernel.open_experience(home.clone(), None).unwrap();
    harness
        .next_matching(|event| matches!(event, KernelEvent::HomeOpened))
        .await;
    harness.kernel.open_experience(format!("{home}/"), None).unwrap();
    harness
        .next_matching(|event| matches!(event, KernelEvent::HomeOpened))
        .await;
    harness.kernel.flush().await.unwrap();

    assert!(harness.fetcher.calls().is_empty());
    assert_eq!(harness.surfaces.home_opens(), 2);
    assert!(harness.kernel.registry_snapshot().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn existing_home_task_is_brought_forward() {
    let mut harness = Harness::manual(test_config());
    harness.tasks.add_task(TaskRecord::home(TaskId(1)));

    harness.kernel.open_experience("", None).unwrap();
    harness
        .next_matching(|event| matches!(event, KernelEvent::HomeOpened))
        .await;

    assert_eq!(harness.tasks.activations(), vec![TaskId(1)]);
    assert_eq!(harness.surfaces.home_opens(), 0);
    assert!(harness.fetcher.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_run_shows_onboarding_exactly_once() {
    let mut harness = Harness::manual(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    harness.phase(M1, OpenPhase::Reconciled).await;
    harness.kernel.flush().await.unwrap();
    assert_eq!(harness.surfaces.optimistic_requests(), vec![M1.to_string()]);

    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    let event = harness.delivered(M1).await;
    assert_eq!(
        event,
        KernelEvent::Delivered {
            manifest_url: M1.into(),
            bundle_url: "https://e.com/m1/bundle".into(),
            surface,
            task_id,
            load_nux: true,
        }
    );
    harness.phase(M1, OpenPhase::Running).await;

    let delivered = harness.surfaces.delivered();
    assert_eq!(delivered.len(), 1);
    let (target, request) = &delivered[0];
    assert_eq!(*target, surface);
    assert_eq!(request.bundle_url, "https://e.com/m1/bundle");
    assert_eq!(request.payload()["kernelOptions"]["loadNux"], true);
    assert_eq!(request.manifest["manifestUrl"], M1);
    assert!(harness.preferences.get_bool(NUX_HAS_FINISHED_FIRST_RUN_KEY));

    let snapshot = harness.kernel.registry_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].os_task_id, Some(task_id));
    assert_eq!(snapshot[0].surface, Some(surface));
    assert_eq!(snapshot[0].bundle_url.as_deref(), Some("https://e.com/m1/bundle"));

    harness.kernel.open_experience(M2, None).unwrap();
    harness.phase(M2, OpenPhase::Reconciled).await;
    let (surface, task_id) = harness.surfaces.materialize(M2);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    match harness.delivered(M2).await {
        KernelEvent::Delivered { load_nux, .. } => assert!(!load_nux),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn onboarding_can_be_disabled() {
    let mut config = test_config();
    config.host.show_onboarding = false;
    let mut harness = Harness::auto(config);

    harness.kernel.open_experience(M1, None).unwrap();
    match harness.delivered(M1).await {
        KernelEvent::Delivered { load_nux, .. } => assert!(!load_nux),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!harness.preferences.get_bool(NUX_HAS_FINISHED_FIRST_RUN_KEY));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reopening_activates_the_existing_task() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    let (surface, task_id) = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, task_id, .. } => (surface, task_id),
        other => panic!("unexpected event {other:?}"),
    };

    let options = ExperienceOptions::new(format!("{M1}+/settings")).with_param("tab", json!("a"));
    harness
        .kernel
        .open_experience(format!("{M1}/+/settings"), Some(options.clone()))
        .unwrap();
    harness.phase(M1, OpenPhase::DirectActivate).await;
    let event = harness
        .next_matching(|event| matches!(event, KernelEvent::Activated { .. }))
        .await;
    assert_eq!(
        event,
        KernelEvent::Activated {
            manifest_url: M1.into(),
            task_id,
        }
    );
    harness.kernel.flush().await.unwrap();

    assert_eq!(harness.kernel.registry_snapshot().await.unwrap().len(), 1);
    assert_eq!(harness.tasks.activations(), vec![task_id]);
    assert_eq!(harness.surfaces.optimistic_requests().len(), 1);
    assert_eq!(harness.fetcher.calls(), vec![M1.to_string(), M1.to_string()]);
    assert_eq!(harness.surfaces.option_checks(), vec![surface]);

    assert!(harness.kernel.has_options(M1).await.unwrap());
    assert_eq!(harness.kernel.pop_options(M1).await.unwrap(), Some(options));
    assert_eq!(harness.kernel.pop_options(M1).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn open_options_travel_with_the_load_request() {
    let mut harness = Harness::auto(test_config());
    let options = ExperienceOptions::new(format!("{M1}+abc/")).with_param("referrer", json!("qr"));

    harness
        .kernel
        .open_experience(format!("{M1}+abc/"), Some(options.clone()))
        .unwrap();
    harness.delivered(M1).await;

    let delivered = harness.surfaces.delivered();
    assert_eq!(delivered[0].1.manifest_url, M1);
    assert_eq!(delivered[0].1.options, Some(options));
    assert_eq!(harness.kernel.pop_options(M1).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fetch_failure_reports_once_and_keeps_the_entry() {
    let mut harness = Harness::manual(test_config());
    harness.fetcher.fail(M1);

    harness.kernel.open_experience(M1, None).unwrap();
    let event = harness
        .next_matching(|event| matches!(event, KernelEvent::Failed { .. }))
        .await;
    harness.phase(M1, OpenPhase::Failed).await;
    harness.kernel.flush().await.unwrap();

    let errors = harness.kernel.errors().entries();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_fatal);
    assert!(errors[0].id < 0);
    assert!(errors[0].message.contains("connection refused"));
    match event {
        KernelEvent::Failed { error_id, .. } => assert_eq!(error_id, errors[0].id),
        other => panic!("unexpected event {other:?}"),
    }

    let snapshot = harness.kernel.registry_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].manifest_url, M1);
    assert_eq!(snapshot[0].bundle_url, None);
    assert_eq!(harness.surfaces.optimistic_requests(), vec![M1.to_string()]);
    assert!(harness.surfaces.delivered().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failure_of_another_open_keeps_a_ready_surface() {
    let mut harness = Harness::manual(test_config());
    let m1_fetch = harness.fetcher.hold_url(M1);
    harness.fetcher.fail(M2);

    harness.kernel.open_experience(M1, None).unwrap();
    harness.phase(M1, OpenPhase::OptimisticPending).await;
    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.kernel.flush().await.unwrap();

    harness.kernel.open_experience(M2, None).unwrap();
    match harness
        .next_matching(|event| matches!(event, KernelEvent::Failed { .. }))
        .await
    {
        KernelEvent::Failed { manifest_url, .. } => assert_eq!(manifest_url, M2),
        other => panic!("unexpected event {other:?}"),
    }

    m1_fetch.add_permits(1);
    match harness.delivered(M1).await {
        KernelEvent::Delivered {
            surface: target,
            task_id: bound,
            ..
        } => assert_eq!((target, bound), (surface, task_id)),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(harness.kernel.errors().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn late_surface_of_a_failed_open_is_not_reused() {
    let mut harness = Harness::manual(test_config());
    harness.fetcher.fail(M1);

    harness.kernel.open_experience(M1, None).unwrap();
    harness
        .next_matching(|event| matches!(event, KernelEvent::Failed { .. }))
        .await;
    let (stale, stale_task) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(stale, stale_task).unwrap();
    harness.kernel.flush().await.unwrap();

    harness.kernel.open_experience(M2, None).unwrap();
    harness.phase(M2, OpenPhase::Reconciled).await;
    harness.kernel.flush().await.unwrap();
    assert!(harness.surfaces.delivered().is_empty());

    let (surface, task_id) = harness.surfaces.materialize(M2);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.delivered(M2).await;

    let delivered = harness.surfaces.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].0, surface);
    assert_eq!(delivered[0].1.manifest_url, M2);
    let snapshot = harness.kernel.registry_snapshot().await.unwrap();
    let entry = snapshot
        .iter()
        .find(|entry| entry.manifest_url == M2)
        .expect("entry for m2");
    assert_eq!(entry.os_task_id, Some(task_id));
    assert_eq!(entry.surface, Some(surface));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_delivery_keeps_the_open_options() {
    let mut harness = Harness::manual(test_config());
    let latch = harness.fetcher.hold();
    let options = ExperienceOptions::new(format!("{M1}+/settings")).with_param("tab", json!("b"));

    harness
        .kernel
        .open_experience(format!("{M1}+/settings"), Some(options.clone()))
        .unwrap();
    harness.phase(M1, OpenPhase::OptimisticPending).await;
    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.kernel.flush().await.unwrap();
    assert!(harness.surfaces.destroy(surface));

    latch.add_permits(1);
    match harness
        .next_matching(|event| matches!(event, KernelEvent::Failed { .. }))
        .await
    {
        KernelEvent::Failed { manifest_url, .. } => assert_eq!(manifest_url, M1),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(harness.surfaces.delivered().is_empty());
    assert_eq!(harness.kernel.pop_options(M1).await.unwrap(), Some(options));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_manifest_fails_the_open() {
    let mut harness = Harness::manual(test_config());
    harness.fetcher.malformed(M1);

    harness.kernel.open_experience(M1, None).unwrap();
    match harness
        .next_matching(|event| matches!(event, KernelEvent::Failed { .. }))
        .await
    {
        KernelEvent::Failed { message, .. } => assert!(message.contains("malformed manifest")),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(harness.kernel.errors().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_while_loading_does_nothing() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    let surface = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, .. } => surface,
        other => panic!("unexpected event {other:?}"),
    };
    harness.surfaces.set_loading(surface, true);

    harness.kernel.reload_experience(M1).unwrap();
    harness
        .next_matching(|event| matches!(event, KernelEvent::ReloadSkipped { .. }))
        .await;
    harness.kernel.flush().await.unwrap();

    assert_eq!(harness.fetcher.calls().len(), 1);
    assert!(harness.tasks.terminations().is_empty());
    assert!(harness.surfaces.loading_screens().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_of_idle_surface_restarts_the_experience() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    let (surface, task_id) = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, task_id, .. } => (surface, task_id),
        other => panic!("unexpected event {other:?}"),
    };

    harness.kernel.reload_experience(M1).unwrap();
    let (reloaded, reloaded_task) = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, task_id, .. } => (surface, task_id),
        other => panic!("unexpected event {other:?}"),
    };

    assert_eq!(harness.surfaces.loading_screens(), vec![surface]);
    assert_eq!(harness.tasks.terminations(), vec![task_id]);
    assert_ne!(reloaded, surface);
    assert_ne!(reloaded_task, task_id);
    assert_eq!(harness.fetcher.calls().len(), 2);
    let snapshot = harness.kernel.registry_snapshot().await.unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].surface, Some(reloaded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reload_without_live_surface_just_opens() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.reload_experience(M1).unwrap();
    harness.delivered(M1).await;

    assert!(harness.tasks.terminations().is_empty());
    assert_eq!(harness.surfaces.optimistic_requests(), vec![M1.to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vanished_task_falls_back_to_an_optimistic_surface() {
    let mut harness = Harness::manual(test_config());
    harness
        .tasks
        .add_task(TaskRecord::experience(TaskId(40), M1));
    harness.tasks.vanish_on_activate(TaskId(40));

    harness.kernel.open_experience(M1, None).unwrap();
    harness.phase(M1, OpenPhase::DirectActivate).await;
    harness.phase(M1, OpenPhase::Reconciled).await;
    harness.kernel.flush().await.unwrap();
    assert_eq!(harness.surfaces.optimistic_requests(), vec![M1.to_string()]);

    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.delivered(M1).await;
    assert!(harness.tasks.activations().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn vanished_task_prefers_another_task_for_the_same_url() {
    let mut harness = Harness::manual(test_config());
    harness
        .tasks
        .add_task(TaskRecord::experience(TaskId(40), M1));
    harness
        .tasks
        .add_task(TaskRecord::experience(TaskId(41), M1));
    harness.tasks.vanish_on_activate(TaskId(40));

    harness.kernel.open_experience(M1, None).unwrap();
    let event = harness
        .next_matching(|event| matches!(event, KernelEvent::Activated { .. }))
        .await;
    assert_eq!(
        event,
        KernelEvent::Activated {
            manifest_url: M1.into(),
            task_id: TaskId(41),
        }
    );
    harness.kernel.flush().await.unwrap();
    assert!(harness.surfaces.optimistic_requests().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn surface_reporting_before_the_manifest_is_fed_once_it_arrives() {
    let mut harness = Harness::manual(test_config());
    let latch = harness.fetcher.hold();

    harness.kernel.open_experience(M1, None).unwrap();
    harness.phase(M1, OpenPhase::OptimisticPending).await;
    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.kernel.flush().await.unwrap();
    assert!(harness.surfaces.delivered().is_empty());

    latch.add_permits(1);
    harness.delivered(M1).await;
    assert_eq!(harness.surfaces.delivered().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deferred_open_waits_for_a_reported_surface() {
    let mut harness = Harness::manual(test_config());

    harness.kernel.open_experience_deferred(M1, None).unwrap();
    harness.phase(M1, OpenPhase::Reconciled).await;
    harness.kernel.flush().await.unwrap();
    assert!(harness.surfaces.optimistic_requests().is_empty());

    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.delivered(M1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unclaimed_handoff_is_abandoned_after_timeout() {
    let mut config = test_config();
    config.kernel.optimistic_timeout = Duration::from_millis(100);
    let mut harness = Harness::manual(config);

    harness.kernel.open_experience(M1, None).unwrap();
    let event = harness
        .next_matching(|event| matches!(event, KernelEvent::HandoffAbandoned { .. }))
        .await;
    assert_eq!(
        event,
        KernelEvent::HandoffAbandoned {
            manifest_url: M1.into()
        }
    );

    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.kernel.flush().await.unwrap();
    assert!(harness.surfaces.delivered().is_empty());
    assert!(harness.kernel.errors().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_pending_handoff_is_reported_as_fatal() {
    let mut harness = Harness::manual(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    harness.phase(M1, OpenPhase::Reconciled).await;
    harness.kernel.open_experience(M2, None).unwrap();
    match harness
        .next_matching(|event| matches!(event, KernelEvent::Failed { .. }))
        .await
    {
        KernelEvent::Failed { manifest_url, message, .. } => {
            assert_eq!(manifest_url, M2);
            assert!(message.contains("already registered"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(harness.kernel.errors().len(), 1);

    let (surface, task_id) = harness.surfaces.materialize(M1);
    harness.kernel.set_optimistic_surface(surface, task_id).unwrap();
    harness.delivered(M1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn killing_the_activity_stack_forgets_the_experience() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    let (surface, task_id) = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, task_id, .. } => (surface, task_id),
        other => panic!("unexpected event {other:?}"),
    };

    harness.kernel.kill_activity_stack(surface).unwrap();
    harness.kernel.flush().await.unwrap();

    assert!(harness.kernel.registry_snapshot().await.unwrap().is_empty());
    assert_eq!(harness.tasks.terminations(), vec![task_id]);
    assert!(!harness.tasks.contains(task_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroyed_task_drops_its_entry() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    let (surface, task_id) = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, task_id, .. } => (surface, task_id),
        other => panic!("unexpected event {other:?}"),
    };

    harness.tasks.remove(task_id);
    harness.surfaces.destroy(surface);
    harness.kernel.surface_destroyed(surface).unwrap();
    harness.kernel.task_destroyed(task_id).unwrap();
    harness.kernel.flush().await.unwrap();

    assert!(harness.kernel.registry_snapshot().await.unwrap().is_empty());
    assert!(!harness.surfaces.is_alive(surface));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bundle_url_lookup_supports_hot_reload() {
    let mut harness = Harness::auto(test_config());

    harness.kernel.open_experience(M1, None).unwrap();
    let surface = match harness.delivered(M1).await {
        KernelEvent::Delivered { surface, .. } => surface,
        other => panic!("unexpected event {other:?}"),
    };

    assert_eq!(
        harness.kernel.bundle_url_for_surface(surface, false).await.unwrap(),
        Some("https://e.com/m1/bundle".to_string())
    );
    assert_eq!(
        harness.kernel.bundle_url_for_surface(surface, true).await.unwrap(),
        Some("https://e.com/m1/bundle?hot=true".to_string())
    );

    harness.surfaces.destroy(surface);
    let stale = harness.kernel.bundle_url_for_surface(
        xphost_kernel::SurfaceHandle::new(surface.id + 10, 0),
        false,
    );
    assert_eq!(stale.await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn orphaned_launcher_task_is_reclaimed_after_reconcile() {
    let mut harness = Harness::auto(test_config());
    let mut orphan = TaskRecord::home(TaskId(90));
    orphan.is_home = false;
    orphan.activity_count = 0;
    harness.tasks.add_task(orphan);

    harness.kernel.open_experience(M1, None).unwrap();
    let event = harness
        .next_matching(|event| matches!(event, KernelEvent::TaskReclaimed { .. }))
        .await;
    assert_eq!(event, KernelEvent::TaskReclaimed { task_id: TaskId(90) });
    assert_eq!(harness.tasks.terminations(), vec![TaskId(90)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn home_bundle_and_launch_options_follow_preferences() {
    let harness = Harness::manual(test_config());

    assert_eq!(
        harness.kernel.home_bundle_url().await.unwrap(),
        "http://127.0.0.1:8081/exponent.bundle?dev=true&platform=android"
    );
    harness
        .preferences
        .set_string(LOCAL_KERNEL_URL_KEY, "http://10.0.0.2:19000/")
        .unwrap();
    assert_eq!(
        harness.kernel.home_bundle_url().await.unwrap(),
        "http://10.0.0.2:19000/exponent.bundle?dev=true&platform=android"
    );

    assert_eq!(
        harness.kernel.home_launch_options().await.unwrap(),
        json!({ "exp": { "nuxHasFinishedFirstRun": false } })
    );
    harness.preferences.set_string(REFERRER_KEY, "store").unwrap();
    harness
        .preferences
        .set_bool(NUX_HAS_FINISHED_FIRST_RUN_KEY, true)
        .unwrap();
    assert_eq!(
        harness.kernel.home_launch_options().await.unwrap(),
        json!({ "exp": { "referrer": "store", "nuxHasFinishedFirstRun": true } })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_home_bundle_uses_configured_url() {
    let mut config = test_config();
    config.kernel.use_remote_bundle = true;
    let harness = Harness::manual(config.clone());

    assert_eq!(
        harness.kernel.home_bundle_url().await.unwrap(),
        config.kernel.remote_kernel_url
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handle_reports_stopped_after_shutdown() {
    let harness = Harness::manual(test_config());
    harness.kernel.shutdown().await;

    assert!(harness.kernel.open_experience(M1, None).is_err());
    assert!(harness.kernel.flush().await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_share_one_task() {
    let mut harness = Harness::auto(test_config());

    let opens = (0..8).map(|_| {
        let kernel = harness.kernel.clone();
        async move { kernel.open_experience(M1, None) }
    });
    for result in futures::future::join_all(opens).await {
        result.unwrap();
    }

    let mut delivered = 0;
    let mut activated = 0;
    while delivered + activated < 8 {
        match harness
            .next_matching(|event| {
                matches!(event, KernelEvent::Delivered { .. } | KernelEvent::Activated { .. })
            })
            .await
        {
            KernelEvent::Delivered { .. } => delivered += 1,
            _ => activated += 1,
        }
    }
    harness.kernel.flush().await.unwrap();

    assert_eq!(delivered, 1);
    assert_eq!(activated, 7);
    assert_eq!(harness.surfaces.optimistic_requests(), vec![M1.to_owned()]);
    assert_eq!(harness.kernel.registry_snapshot().await.unwrap().len(), 1);
}
