//! Integration tests for the lifecycle manager's on-demand operations

mod common;

use common::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tenantry_config_memory::InMemoryConfigStore;
use tenantry_core::{ConfigStore, Error, LifecyclePhase, LifecycleState, TenantConfiguration};
use tenantry_engine::ManagerConfig;

async fn seeded_store(tenants: &[&str]) -> Arc<InMemoryConfigStore> {
    let store = Arc::new(InMemoryConfigStore::new());
    for id in tenants {
        store
            .write(&config_path(id), format!("name: {}", id).into())
            .await
            .unwrap();
    }
    store
}

fn fail_fast() -> ManagerConfig {
    ManagerConfig {
        wait_for_configuration: false,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assure_runs_one_initialization() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    factory.set_init_delay(Duration::from_millis(100));
    let manager = manager(store, &factory);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.assure_tenant_engine_available(&tenant("acme")).await
        }));
    }

    let mut versions = Vec::new();
    for handle in handles {
        let record = handle.await.unwrap().unwrap();
        assert_eq!(record.state, LifecycleState::Started);
        versions.push(record.config_version.unwrap());
    }

    assert_eq!(factory.created(), 1);
    assert_eq!(factory.max_initializing(), 1);
    assert!(versions.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(
        manager
            .get_tenant_engine_by_tenant_id(&tenant("acme"))
            .unwrap()
            .attempts,
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assure_shares_failure() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    factory.set_init_delay(Duration::from_millis(50));
    factory.fail_init("acme", true);
    let manager = manager(store, &factory);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.assure_tenant_engine_available(&tenant("acme")).await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Err(Error::TenantEngineNotAvailable { tenant_id, cause, .. }) => {
                assert_eq!(tenant_id, tenant("acme"));
                assert_eq!(cause.unwrap().phase, LifecyclePhase::Initialize);
            }
            other => panic!("expected TenantEngineNotAvailable, got {:?}", other),
        }
    }
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_assure_started_engine_returns_immediately() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    let first = manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    let second = manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();

    assert_eq!(first.config_version, second.config_version);
    assert!(second.engine().is_some());
    assert_eq!(factory.created(), 1);
}

#[tokio::test]
async fn test_lookup_never_creates() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    assert!(manager.get_tenant_engine_by_tenant_id(&tenant("acme")).is_none());
    assert!(manager.list_tenant_engines().is_empty());
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_assure_without_configuration_fails_fast() {
    let store = Arc::new(InMemoryConfigStore::new());
    let factory = TestEngineFactory::new();
    let manager = manager_with_config(store, &factory, fail_fast());

    let err = manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TenantNotConfigured(ref id) if *id == tenant("acme")));

    let record = manager
        .get_tenant_engine_by_tenant_id(&tenant("acme"))
        .unwrap();
    assert_eq!(record.state, LifecycleState::Unconfigured);
    assert_eq!(record.last_error.unwrap().phase, LifecyclePhase::Configure);
    assert_eq!(factory.created(), 0);
}

#[tokio::test]
async fn test_assure_waiting_for_configuration_times_out_as_not_configured() {
    let store = Arc::new(InMemoryConfigStore::new());
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    let started = Instant::now();
    let err = manager
        .assure_tenant_engine_available_within(&tenant("acme"), Duration::from_millis(200))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TenantNotConfigured(_)));
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_unconfigured_tenant_starts_once_configuration_exists() {
    let store = Arc::new(InMemoryConfigStore::new());
    let factory = TestEngineFactory::new();
    let manager = manager_with_config(store, &factory, fail_fast());

    assert!(matches!(
        manager.assure_tenant_engine_available(&tenant("acme")).await,
        Err(Error::TenantNotConfigured(_))
    ));

    manager
        .update_tenant_configuration(&tenant("acme"), "name: acme")
        .await
        .unwrap();

    let record = manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    assert_eq!(record.state, LifecycleState::Started);
    assert!(record.last_error.is_none());
    assert_eq!(factory.applied("acme"), vec!["name: acme".to_string()]);
}

#[tokio::test]
async fn test_failed_engine_is_retried() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    factory.fail_start("acme", true);
    let manager = manager(store, &factory);

    match manager.assure_tenant_engine_available(&tenant("acme")).await {
        Err(Error::TenantEngineNotAvailable { cause, .. }) => {
            let cause = cause.unwrap();
            assert_eq!(cause.phase, LifecyclePhase::Start);
            assert!(cause.message.contains("port in use"));
        }
        other => panic!("expected TenantEngineNotAvailable, got {:?}", other),
    }
    assert_eq!(
        manager
            .get_tenant_engine_by_tenant_id(&tenant("acme"))
            .unwrap()
            .state,
        LifecycleState::Failed
    );

    factory.fail_start("acme", false);
    let record = manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    assert_eq!(record.state, LifecycleState::Started);
    assert_eq!(record.attempts, 2);
    assert!(record.last_error.is_none());
}

#[tokio::test]
async fn test_assure_timeout_reports_not_available() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    factory.set_init_delay(Duration::from_secs(2));
    let manager = manager(store, &factory);

    let err = manager
        .assure_tenant_engine_available_within(&tenant("acme"), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TenantEngineNotAvailable { .. }));

    // The initialization itself keeps running and completes
    wait_until(|| {
        manager
            .get_tenant_engine_by_tenant_id(&tenant("acme"))
            .is_some_and(|record| record.is_started())
    })
    .await;
}

#[tokio::test]
async fn test_configuration_roundtrip_through_store() {
    let store = Arc::new(InMemoryConfigStore::new());
    let factory = TestEngineFactory::new();
    let manager = manager(store.clone(), &factory);

    assert!(matches!(
        manager.get_tenant_configuration(&tenant("acme")).await,
        Err(Error::TenantNotConfigured(_))
    ));

    manager
        .update_tenant_configuration(&tenant("acme"), "name: acme")
        .await
        .unwrap();
    assert_eq!(
        manager.get_tenant_configuration(&tenant("acme")).await.unwrap(),
        "name: acme"
    );
    assert!(store.read(&config_path("acme")).await.unwrap().is_some());

    // Writing configuration does not touch engine state by itself
    assert!(manager.get_tenant_engine_by_tenant_id(&tenant("acme")).is_none());
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();

    manager.remove_tenant_engine(&tenant("acme")).await.unwrap();
    manager.remove_tenant_engine(&tenant("acme")).await.unwrap();

    assert!(manager.get_tenant_engine_by_tenant_id(&tenant("acme")).is_none());
    assert_eq!(factory.stopped(), 1);
}

#[tokio::test]
async fn test_remove_deregisters_despite_stop_failure() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    factory.fail_stop("acme", true);

    manager.remove_tenant_engine(&tenant("acme")).await.unwrap();
    assert!(manager.get_tenant_engine_by_tenant_id(&tenant("acme")).is_none());
}

#[tokio::test]
async fn test_restart_unknown_tenant_is_not_found() {
    let store = Arc::new(InMemoryConfigStore::new());
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    assert!(matches!(
        manager.restart_tenant_engine(&tenant("acme")).await,
        Err(Error::NotFound(ref id)) if *id == tenant("acme")
    ));
}

#[tokio::test]
async fn test_restart_creates_fresh_engine() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    let record = manager.restart_tenant_engine(&tenant("acme")).await.unwrap();

    assert_eq!(record.state, LifecycleState::Started);
    assert_eq!(record.attempts, 2);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.stopped(), 1);
}

#[tokio::test]
async fn test_restart_stop_failure_marks_failed() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    factory.fail_stop("acme", true);

    match manager.restart_tenant_engine(&tenant("acme")).await {
        Err(Error::Lifecycle { cause, .. }) => assert_eq!(cause.phase, LifecyclePhase::Stop),
        other => panic!("expected lifecycle error, got {:?}", other),
    }

    let record = manager
        .get_tenant_engine_by_tenant_id(&tenant("acme"))
        .unwrap();
    assert_eq!(record.state, LifecycleState::Failed);
    assert!(record.engine().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_all_isolates_failures() {
    let store = seeded_store(&["acme", "beta", "gamma"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    for id in ["acme", "beta", "gamma"] {
        manager
            .assure_tenant_engine_available(&tenant(id))
            .await
            .unwrap();
    }
    factory.fail_stop("beta", true);

    let report = manager.restart_all_tenant_engines().await;

    assert_eq!(report.attempted(), 3);
    assert_eq!(report.succeeded, vec![tenant("acme"), tenant("gamma")]);
    assert_eq!(report.failed_tenants().collect::<Vec<_>>(), vec![&tenant("beta")]);

    for id in ["acme", "gamma"] {
        let record = manager.get_tenant_engine_by_tenant_id(&tenant(id)).unwrap();
        assert_eq!(record.state, LifecycleState::Started);
        assert_eq!(record.attempts, 2);
    }

    match report.into_result() {
        Err(Error::AggregateFailure(failure)) => {
            assert_eq!(failure.attempted, 3);
            assert_eq!(failure.failed_tenants().collect::<Vec<_>>(), vec![&tenant("beta")]);
        }
        other => panic!("expected aggregate failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_all() {
    let store = seeded_store(&["acme", "beta"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    for id in ["acme", "beta"] {
        manager
            .assure_tenant_engine_available(&tenant(id))
            .await
            .unwrap();
    }
    factory.fail_stop("acme", true);

    let report = manager.remove_all_tenant_engines().await;
    assert!(report.is_success());
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(manager.tenant_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_interrupts_initialization() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    factory.set_init_delay(Duration::from_secs(30));
    let manager = manager(store, &factory);

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .assure_tenant_engine_available_within(&tenant("acme"), Duration::from_secs(10))
                .await
        })
    };
    wait_until(|| factory.initializing() == 1).await;
    factory.set_init_delay(Duration::ZERO);

    let record = manager.restart_tenant_engine(&tenant("acme")).await.unwrap();
    assert_eq!(record.state, LifecycleState::Started);
    assert_eq!(record.attempts, 2);

    // The interrupted caller receives the restarted engine rather than starting its own
    let observed = waiter.await.unwrap().unwrap();
    assert_eq!(observed.state, LifecycleState::Started);
    assert_eq!(observed.attempts, record.attempts);
    assert_eq!(observed.config_version, record.config_version);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.max_initializing(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_interrupts_initialization() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    factory.set_init_delay(Duration::from_secs(30));
    let manager = manager(store, &factory);

    let creator = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .assure_tenant_engine_available_within(&tenant("acme"), Duration::from_secs(10))
                .await
        })
    };
    wait_until(|| factory.initializing() == 1).await;

    manager.remove_tenant_engine(&tenant("acme")).await.unwrap();
    assert_eq!(manager.tenant_count(), 0);

    // The interrupted caller fails instead of starting a new engine
    match creator.await.unwrap() {
        Err(Error::TenantEngineNotAvailable { reason, .. }) => {
            assert!(reason.contains("removed"), "unexpected reason: {}", reason);
        }
        other => panic!("expected removal to fail the caller, got {:?}", other),
    }
    assert_eq!(factory.created(), 1);
    assert_eq!(factory.stopped(), 0);
    assert!(manager.get_tenant_engine_by_tenant_id(&tenant("acme")).is_none());
}

#[tokio::test]
async fn test_engine_left_by_failed_stop_is_stopped_before_retry() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    factory.fail_stop("acme", true);
    assert!(manager.restart_tenant_engine(&tenant("acme")).await.is_err());
    let record = manager.get_tenant_engine_by_tenant_id(&tenant("acme")).unwrap();
    assert_eq!(record.state, LifecycleState::Failed);
    assert!(record.engine().is_some());

    factory.fail_stop("acme", false);
    let record = manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    assert_eq!(record.state, LifecycleState::Started);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.stopped(), 1);
}

#[tokio::test]
async fn test_configuration_event_stops_engine_left_by_failed_stop() {
    let store = seeded_store(&["acme"]).await;
    let factory = TestEngineFactory::new();
    let manager = manager(store, &factory);

    manager
        .assure_tenant_engine_available(&tenant("acme"))
        .await
        .unwrap();
    factory.fail_stop("acme", true);
    assert!(manager.restart_tenant_engine(&tenant("acme")).await.is_err());
    factory.fail_stop("acme", false);

    let record = manager
        .apply_tenant_configuration(
            &tenant("acme"),
            TenantConfiguration::new(config_path("acme"), "name: acme-v2"),
        )
        .await
        .unwrap();
    assert_eq!(record.state, LifecycleState::Started);
    assert_eq!(factory.created(), 2);
    assert_eq!(factory.stopped(), 1);
}
