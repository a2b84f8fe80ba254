//! End-to-end tests exercising the store, probe executor, scheduler,
//! config reconciler, retention pipeline and event bus together rather
//! than in isolation.

use chrono::{Duration as ChronoDuration, Utc};
use nanostatus::config::{self, RawMonitorEntry};
use nanostatus::events::{EventBus, EventKind};
use nanostatus::store::{MonitorPatch, MonitorStatus, NewMonitor, Store};
use nanostatus::{probe, retention, scheduler::Scheduler, stats};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn probe_persists_sample_and_publishes_update() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let store = Store::in_memory().await.unwrap();
    let events = Arc::new(EventBus::new());
    let client = probe::build_client();

    let monitor = store
        .create_monitor(NewMonitor {
            name: "Mock".to_string(),
            url: format!("{}/health", mock_server.uri()),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();

    let mut sub = events.subscribe();
    sub.receiver.try_recv().unwrap(); // drain the connected frame

    probe::probe(&store, &events, &client, monitor.id).await;

    let updated = store.get_monitor(monitor.id).await.unwrap();
    assert_eq!(updated.status, MonitorStatus::Up);
    assert_eq!(updated.uptime_percent_24h, 100.0);

    let frame = sub.receiver.try_recv().unwrap();
    assert!(frame.contains("monitor_update"));
    assert!(frame.contains("\"status\":\"up\""));
}

#[tokio::test]
async fn probe_marks_failing_target_down_and_keeps_uptime_at_zero() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let store = Store::in_memory().await.unwrap();
    let events = Arc::new(EventBus::new());
    let client = probe::build_client();

    let monitor = store
        .create_monitor(NewMonitor {
            name: "Mock".to_string(),
            url: format!("{}/down", mock_server.uri()),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();

    probe::probe(&store, &events, &client, monitor.id).await;

    let updated = store.get_monitor(monitor.id).await.unwrap();
    assert_eq!(updated.status, MonitorStatus::Down);
    assert_eq!(updated.uptime_percent_24h, 0.0);
    assert_eq!(updated.last_response_time_ms, 0);
}

#[tokio::test]
async fn paused_monitor_is_untouched_by_probe_and_scheduler() {
    let store = Store::in_memory().await.unwrap();
    let events = Arc::new(EventBus::new());
    let client = probe::build_client();

    let monitor = store
        .create_monitor(NewMonitor {
            name: "Paused".to_string(),
            url: "ping://1.1.1.1".to_string(),
            icon: String::new(),
            is_third_party: true,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();
    store
        .update_monitor(monitor.id, MonitorPatch::Pause(true), Utc::now())
        .await
        .unwrap();

    probe::probe(&store, &events, &client, monitor.id).await;
    let after_probe = store.get_monitor(monitor.id).await.unwrap();
    assert_eq!(after_probe.status, MonitorStatus::Unknown);

    let scheduler = Scheduler::new(store.clone(), Arc::clone(&events), client);
    scheduler.reconcile().await;
    assert_eq!(scheduler.active_job_count(), 0);
}

#[tokio::test]
async fn interval_change_triggers_a_replacement_job_not_a_duplicate() {
    let store = Store::in_memory().await.unwrap();
    let events = Arc::new(EventBus::new());
    let client = probe::build_client();
    let scheduler = Scheduler::new(store.clone(), Arc::clone(&events), client);

    let monitor = store
        .create_monitor(NewMonitor {
            name: "A".to_string(),
            url: "ping://localhost".to_string(),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();

    scheduler.reconcile().await;
    assert_eq!(scheduler.active_job_count(), 1);

    store
        .update_monitor(
            monitor.id,
            MonitorPatch::Edit {
                name: monitor.name.clone(),
                url: monitor.url.clone(),
                icon: monitor.icon.clone(),
                check_interval_seconds: 10,
                is_third_party: monitor.is_third_party,
            },
            Utc::now(),
        )
        .await
        .unwrap();

    scheduler.reconcile().await;
    // Still exactly one job for this monitor, not two.
    assert_eq!(scheduler.active_job_count(), 1);
}

#[tokio::test]
async fn yaml_reconciliation_is_idempotent_and_tracks_edits_and_removals() {
    let dir = tempfile::tempdir().unwrap();
    let yaml_path = dir.path().join("monitors.yaml");

    let store = Store::in_memory().await.unwrap();
    let events = Arc::new(EventBus::new());

    let write = |entries: &[RawMonitorEntry]| {
        let file = config::MonitorsFile {
            monitors: entries.to_vec(),
        };
        std::fs::write(&yaml_path, serde_yaml::to_string(&file).unwrap()).unwrap();
    };

    let entry = |name: &str, url: &str, interval: i64| RawMonitorEntry {
        name: name.to_string(),
        url: url.to_string(),
        icon: String::new(),
        check_interval: interval,
        is_third_party: false,
        paused: false,
    };

    write(&[entry("Alpha", "https://alpha.test", 60), entry("Beta", "https://beta.test", 60)]);
    config::reconcile(&store, &events, &yaml_path).await.unwrap();
    let first = store.list_monitors().await.unwrap();
    assert_eq!(first.len(), 2);

    // Re-running against the same file changes nothing: same rows, same ids.
    config::reconcile(&store, &events, &yaml_path).await.unwrap();
    let second = store.list_monitors().await.unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(first[0].id, second[0].id);
    assert_eq!(first[0].created_at, second[0].created_at);

    // Editing Beta's interval updates the row in place rather than creating
    // a duplicate.
    write(&[entry("Alpha", "https://alpha.test", 60), entry("Beta", "https://beta.test", 120)]);
    config::reconcile(&store, &events, &yaml_path).await.unwrap();
    let after_edit = store.list_monitors().await.unwrap();
    assert_eq!(after_edit.len(), 2);
    let beta = after_edit.iter().find(|m| m.name == "Beta").unwrap();
    assert_eq!(beta.check_interval_seconds, 120);

    // Removing Beta from the file deletes its row.
    write(&[entry("Alpha", "https://alpha.test", 60)]);
    config::reconcile(&store, &events, &yaml_path).await.unwrap();
    let after_removal = store.list_monitors().await.unwrap();
    assert_eq!(after_removal.len(), 1);
    assert_eq!(after_removal[0].name, "Alpha");
}

#[tokio::test]
async fn retention_compaction_preserves_sample_counts_in_buckets() {
    let store = Store::in_memory().await.unwrap();
    let monitor = store
        .create_monitor(NewMonitor {
            name: "A".to_string(),
            url: "https://a.test".to_string(),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();

    let now = Utc::now();
    let window_start = now - ChronoDuration::days(3);
    let mut up_count = 0;
    for i in 0..50 {
        let at = window_start + ChronoDuration::minutes(i);
        let status = if i % 5 == 0 { MonitorStatus::Down } else { MonitorStatus::Up };
        if status == MonitorStatus::Up {
            up_count += 1;
        }
        store.insert_sample(monitor.id, status, 20 + i, at).await.unwrap();
    }

    retention::run(&store, now).await.unwrap();

    let buckets = store
        .buckets_in_range(monitor.id, window_start - ChronoDuration::hours(1), now, 1000)
        .await
        .unwrap();
    let total: i64 = buckets.iter().map(|b| b.total).sum();
    let up: i64 = buckets.iter().map(|b| b.up).sum();
    assert_eq!(total, 50);
    assert_eq!(up, up_count);

    let remaining_raw = store
        .samples_in_range(monitor.id, window_start - ChronoDuration::hours(1), now, 1000)
        .await
        .unwrap();
    assert!(remaining_raw.is_empty());
}

#[tokio::test]
async fn fleet_stats_reflect_monitors_via_stats_engine() {
    let store = Store::in_memory().await.unwrap();
    let up = store
        .create_monitor(NewMonitor {
            name: "Up".to_string(),
            url: "https://up.test".to_string(),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();
    let down = store
        .create_monitor(NewMonitor {
            name: "Down".to_string(),
            url: "https://down.test".to_string(),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();

    let now = Utc::now();
    store.insert_sample(up.id, MonitorStatus::Up, 100, now).await.unwrap();
    store.insert_sample(down.id, MonitorStatus::Down, 0, now).await.unwrap();
    store
        .update_monitor(
            up.id,
            MonitorPatch::Runtime {
                status: MonitorStatus::Up,
                last_response_time_ms: 100,
                uptime_percent_24h: 100.0,
                last_check_label: "just now".to_string(),
            },
            now,
        )
        .await
        .unwrap();
    store
        .update_monitor(
            down.id,
            MonitorPatch::Runtime {
                status: MonitorStatus::Down,
                last_response_time_ms: 0,
                uptime_percent_24h: 0.0,
                last_check_label: "just now".to_string(),
            },
            now,
        )
        .await
        .unwrap();

    let fleet = stats::fleet_stats(&store, now).await.unwrap();
    assert_eq!(fleet.services_up, 1);
    assert_eq!(fleet.services_down, 1);
    assert_eq!(fleet.overall_uptime, 50.0);
    assert_eq!(fleet.avg_response_time_ms, 100.0);
}

#[tokio::test]
async fn one_slow_subscriber_drops_frames_without_starving_the_others() {
    let bus = Arc::new(EventBus::new());

    let mut slow = bus.subscribe();
    slow.receiver.try_recv().unwrap(); // drain connected frame, then never read again

    let mut fast_subs: Vec<_> = (0..9)
        .map(|_| {
            let mut s = bus.subscribe();
            s.receiver.try_recv().unwrap();
            s
        })
        .collect();

    for i in 0..1000 {
        bus.publish(EventKind::MonitorUpdate, serde_json::json!({ "i": i }));
    }

    // The whole bus is still alive and every subscriber is still registered;
    // a full queue never disconnects anyone.
    assert_eq!(bus.subscriber_count(), 10);

    let mut slow_received = 0;
    while slow.receiver.try_recv().is_ok() {
        slow_received += 1;
    }
    assert!(slow_received <= nanostatus::events::SUBSCRIBER_QUEUE_CAPACITY);
    assert!(slow_received > 0);

    for sub in fast_subs.iter_mut() {
        let mut received = 0;
        while sub.receiver.try_recv().is_ok() {
            received += 1;
        }
        assert!(received >= 256, "active subscriber only received {received} frames");
    }
}

#[tokio::test]
async fn debounced_stats_publish_fires_once_after_a_burst() {
    let store = Store::in_memory().await.unwrap();
    let bus = Arc::new(EventBus::new());
    store
        .create_monitor(NewMonitor {
            name: "A".to_string(),
            url: "https://a.test".to_string(),
            icon: String::new(),
            is_third_party: false,
            check_interval_seconds: 60,
            config_hash: String::new(),
        })
        .await
        .unwrap();

    let mut sub = bus.subscribe();
    sub.receiver.try_recv().unwrap();

    for _ in 0..20 {
        bus.publish_stats_debounced(&store);
    }

    tokio::time::sleep(Duration::from_millis(700)).await;

    let mut stats_frames = 0;
    while let Ok(frame) = sub.receiver.try_recv() {
        if frame.contains("stats_update") {
            stats_frames += 1;
        }
    }
    assert_eq!(stats_frames, 1);
}

mod config_properties {
    use nanostatus::config::{config_hash, RawMonitorEntry};
    use proptest::prelude::*;

    fn entry(
        name: String,
        url: String,
        icon: String,
        check_interval: i64,
        is_third_party: bool,
        paused: bool,
    ) -> RawMonitorEntry {
        RawMonitorEntry {
            name,
            url,
            icon,
            check_interval,
            is_third_party,
            paused,
        }
    }

    proptest! {
        #[test]
        fn hash_is_a_pure_function_of_the_declared_fields(
            name in "[a-zA-Z0-9 ]{1,20}",
            url in "https://[a-z]{3,10}\\.test",
            icon in "[a-z]{0,10}",
            interval in 10i64..3600i64,
            is_third_party in any::<bool>(),
            paused in any::<bool>(),
        ) {
            let a = entry(name.clone(), url.clone(), icon.clone(), interval, is_third_party, paused);
            let b = entry(name, url, icon, interval, is_third_party, paused);
            prop_assert_eq!(config_hash(&a), config_hash(&b));
        }

        #[test]
        fn hash_changes_when_the_interval_changes(
            name in "[a-zA-Z0-9]{1,20}",
            url in "https://[a-z]{3,10}\\.test",
            interval_a in 10i64..1800i64,
            interval_b in 1801i64..3600i64,
        ) {
            let a = entry(name.clone(), url.clone(), String::new(), interval_a, false, false);
            let b = entry(name, url, String::new(), interval_b, false, false);
            prop_assert_ne!(config_hash(&a), config_hash(&b));
        }
    }
}

mod uptime_properties {
    use nanostatus::store::{MonitorStatus, NewMonitor, Store};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(20))]
        #[test]
        fn uptime_percentage_never_leaves_zero_to_hundred(
            statuses in prop::collection::vec(any::<bool>(), 0..50),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let store = Store::in_memory().await.unwrap();
                let monitor = store
                    .create_monitor(NewMonitor {
                        name: "A".to_string(),
                        url: "https://a.test".to_string(),
                        icon: String::new(),
                        is_third_party: false,
                        check_interval_seconds: 60,
                        config_hash: String::new(),
                    })
                    .await
                    .unwrap();

                let now = chrono::Utc::now();
                for (i, up) in statuses.iter().enumerate() {
                    let status = if *up { MonitorStatus::Up } else { MonitorStatus::Down };
                    store
                        .insert_sample(monitor.id, status, 10, now - chrono::Duration::seconds(i as i64))
                        .await
                        .unwrap();
                }

                let counts = store.uptime_24h(monitor.id, now).await.unwrap();
                if counts.total > 0 {
                    let pct = 100.0 * counts.up as f64 / counts.total as f64;
                    prop_assert!((0.0..=100.0).contains(&pct));
                }
                Ok(())
            })?;
        }
    }
}
