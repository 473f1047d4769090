//! Poll cycle behavior driven through the orchestrator with mocked collaborators

mod common;

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde_json::json;
use tokio::time::Instant;
use vb_core::{ClientConfig, Command, ScheduleTime, CHARGE_LIMIT_DISABLED};
use vb_engine::{EngineSettings, StateRepairer, INITIAL_BACKOFF};

use common::{settle, status, TestEngine};

fn limit(pct: u8) -> ClientConfig {
    ClientConfig {
        charge_limit_pct: pct,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_charge_limit_issues_single_stop() {
    let mut engine = TestEngine::start(limit(80)).await;
    engine.client.push_status(status(Utc::now(), 80.0, 7.0, "connected"));

    engine.orchestrator.poll_once().await;

    assert_eq!(engine.client.commands(), vec![Command::stop_charging()]);
    assert_eq!(engine.orchestrator.config().charge_limit_pct, CHARGE_LIMIT_DISABLED);
    assert_eq!(
        engine.store.saved().map(|c| c.charge_limit_pct),
        Some(CHARGE_LIMIT_DISABLED)
    );
    // the limit hit triggers one immediate re-fetch
    assert_eq!(engine.client.fetches(), 2);

    let calls = engine.webhook.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "charge_limit_reached");
    assert_eq!(calls[0].1, json!({"event": "charge_limit_reached", "soc": 80.0, "limit": 80}));
    settle().await;
    assert_eq!(engine.notifier.count_containing("Charge limit of 80%"), 1);

    // still above the old limit, but nothing is armed anymore
    engine.orchestrator.poll_once().await;
    assert_eq!(engine.client.commands().len(), 1);
}

#[tokio::test]
async fn test_charge_limit_disarms_when_stop_already_pending() {
    let mut engine = TestEngine::start(limit(80)).await;
    assert!(engine
        .handle
        .request_command(Command::stop_charging())
        .await
        .unwrap());

    engine.client.push_status(status(Utc::now(), 82.0, 7.0, "connected"));
    engine.orchestrator.poll_once().await;

    assert_eq!(engine.client.commands(), vec![Command::stop_charging()]);
    assert_eq!(engine.orchestrator.config().charge_limit_pct, CHARGE_LIMIT_DISABLED);
    assert!(engine.webhook.calls().is_empty());
}

#[tokio::test]
async fn test_extend_switched_off_on_low_battery() {
    let config = ClientConfig {
        climatisation_extend: true,
        ..ClientConfig::default()
    };
    let mut engine = TestEngine::start(config).await;
    engine.client.push_status(status(Utc::now(), 15.0, 0.0, "disconnected"));

    engine.orchestrator.poll_once().await;

    assert!(engine.client.commands().is_empty());
    assert!(!engine.orchestrator.config().climatisation_extend);
    assert_eq!(engine.store.saved().map(|c| c.climatisation_extend), Some(false));
    settle().await;
    assert_eq!(engine.notifier.count_containing("extension switched off"), 1);
}

#[tokio::test]
async fn test_extend_restarts_climatisation() {
    let config = ClientConfig {
        climatisation_extend: true,
        ..ClientConfig::default()
    };
    let mut engine = TestEngine::start(config).await;
    engine.client.push_status(status(Utc::now(), 60.0, 0.0, "disconnected"));

    engine.orchestrator.poll_once().await;

    // start, re-fetch, then the pending start suppresses a second one
    assert_eq!(engine.client.commands(), vec![Command::start_climatisation()]);
    assert_eq!(engine.client.fetches(), 2);
    assert!(engine.orchestrator.config().climatisation_extend);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_then_resets() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    for _ in 0..8 {
        engine.client.push_failure("timeout");
    }

    let mut waits = Vec::new();
    for _ in 0..8 {
        engine.orchestrator.poll_once().await;
        let deadline = engine.orchestrator.scheduler().deadline().unwrap();
        waits.push(deadline.duration_since(Instant::now()).as_secs());
    }
    assert_eq!(waits, vec![10, 20, 40, 80, 160, 320, 320, 320]);
    assert!(!engine.orchestrator.is_online());
    assert_eq!(engine.transport.problems().len(), 8);
    settle().await;
    assert_eq!(engine.notifier.count_containing("offline"), 1);

    engine.client.push_status(status(Utc::now(), 50.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;
    assert!(engine.orchestrator.is_online());
    assert_eq!(engine.orchestrator.scheduler().backoff(), INITIAL_BACKOFF);
    settle().await;
    assert_eq!(engine.notifier.count_containing("back online"), 1);

    engine.client.push_failure("timeout");
    engine.orchestrator.poll_once().await;
    let deadline = engine.orchestrator.scheduler().deadline().unwrap();
    assert_eq!(deadline.duration_since(Instant::now()), Duration::from_secs(10));
}

#[tokio::test]
async fn test_quiet_vehicle_uses_drive_just_under_slow_age() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    let captured = Utc::now() - chrono::Duration::seconds(1800 - 1);
    engine.client.push_status(status(captured, 50.0, 0.0, "disconnected"));

    engine.orchestrator.poll_once().await;
    assert_eq!(
        engine.orchestrator.scheduler().last_interval(),
        Some(Duration::from_secs(60))
    );

    let captured = Utc::now() - chrono::Duration::seconds(1800);
    engine.client.push_status(status(captured, 50.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;
    assert_eq!(
        engine.orchestrator.scheduler().last_interval(),
        Some(Duration::from_secs(1800))
    );
}

#[tokio::test]
async fn test_subscribers_force_refresh_interval() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    engine.transport.set_subscribers(1);
    let captured = Utc::now() - chrono::Duration::hours(5);
    engine.client.push_status(status(captured, 50.0, 0.0, "disconnected"));

    engine.orchestrator.poll_once().await;
    assert_eq!(
        engine.orchestrator.scheduler().last_interval(),
        Some(Duration::from_secs(30))
    );
}

#[tokio::test]
async fn test_session_report_after_charging_stops() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    let samples = [(50.0, 0.0), (50.0, 5.0), (55.0, 7.0), (61.0, 0.0)];

    for (soc, kw) in samples {
        engine.client.push_status(status(Utc::now(), soc, kw, "connected"));
        engine.orchestrator.poll_once().await;
    }

    settle().await;
    let texts = engine.notifier.texts();
    assert_eq!(texts.len(), 1, "{:?}", texts);
    assert!(texts[0].starts_with("Charging stopped: charged 11%"));
    assert!(texts[0].contains("max 7.0 kW"));
}

#[tokio::test]
async fn test_battery_cycles_count_only_discharge() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    for soc in [80.0, 60.0, 70.0, 50.0] {
        engine.client.push_status(status(Utc::now(), soc, 0.0, "disconnected"));
        engine.orchestrator.poll_once().await;
    }

    assert!((engine.orchestrator.battery_cycles() - 0.4).abs() < 1e-9);
    let update = engine.transport.updates().pop().unwrap();
    assert!(update.new_data);
    assert!((update.battery_cycles - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn test_telemetry_and_log_skip_unchanged_snapshots() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    let captured = Utc::now();

    engine.client.push_status(status(captured, 50.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;
    engine.client.push_status(status(captured, 50.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;

    assert_eq!(engine.telemetry.len(), 1);
    assert_eq!(engine.log.len(), 1);

    engine.client.push_status(status(captured, 49.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;
    assert_eq!(engine.telemetry.len(), 2);
    assert_eq!(engine.log.len(), 2);
}

#[tokio::test]
async fn test_partial_document_is_repaired() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    engine.client.push_status(json!({
        "charging": {"status": {"battery": {"currentSOC_pct": 0}}},
        "climatisation": null,
        "status": {"engine": false}
    }));

    engine.orchestrator.poll_once().await;

    let update = engine.orchestrator.current_update(false).unwrap();
    for path in StateRepairer::guaranteed_paths() {
        assert!(update.vehicle.pointer(&path).is_some(), "missing {}", path);
    }
    assert_eq!(update.vehicle.pointer("/charging/status/battery/currentSOC_pct"), Some(&json!(0)));
    assert_eq!(update.vehicle.pointer("/status/engine"), Some(&json!(false)));
}

fn local(hour: u32, minute: u32, second: u32) -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(hour, minute, second)
        .unwrap()
}

#[tokio::test]
async fn test_one_off_climatisation_schedule() {
    let config = ClientConfig {
        climatisation_at: Some(ScheduleTime::new(7, 15).unwrap()),
        climatisation_once: true,
        ..ClientConfig::default()
    };
    let settings = EngineSettings {
        command_timeout: Duration::from_secs(120),
        ..EngineSettings::default()
    };
    let mut engine = TestEngine::start_with(settings, config).await;
    engine.client.push_status(status(Utc::now(), 60.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;

    engine.orchestrator.maintenance_tick(Utc::now(), local(7, 15, 0)).await;
    settle().await;
    assert_eq!(engine.client.commands(), vec![Command::start_climatisation()]);
    assert!(engine.orchestrator.config().climatisation_at.is_none());
    assert_eq!(engine.store.saved().and_then(|c| c.climatisation_at), None);

    // the accepted start is pending, so the window waits
    engine.orchestrator.maintenance_tick(Utc::now(), local(7, 15, 1)).await;
    assert_eq!(engine.client.commands().len(), 1);

    // the start expires while the cabin is still off
    let later = Utc::now() + chrono::Duration::seconds(121);
    engine.orchestrator.maintenance_tick(later, local(7, 17, 0)).await;
    settle().await;
    assert_eq!(engine.notifier.count_containing("could not be started"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_start_leaves_maintenance_tick_free() {
    let config = ClientConfig {
        climatisation_at: Some(ScheduleTime::new(7, 15).unwrap()),
        ..ClientConfig::default()
    };
    let mut engine = TestEngine::start(config).await;
    engine.client.push_status(status(Utc::now(), 60.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;
    engine.client.set_command_delay(Duration::from_secs(30));

    let started = Instant::now();
    engine.orchestrator.maintenance_tick(Utc::now(), local(7, 15, 0)).await;
    assert_eq!(started.elapsed(), Duration::ZERO);

    // the first start is still with the vehicle, so the next tick waits for it
    engine.orchestrator.maintenance_tick(Utc::now(), local(7, 15, 1)).await;
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(engine.client.commands(), vec![Command::start_climatisation()]);
    assert!(engine.orchestrator.active_commands().is_active("climatisation"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_notifier_does_not_hold_up_polling() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    engine.notifier.set_delay(Duration::from_secs(15));
    for _ in 0..6 {
        engine.client.push_failure("timeout");
    }

    let started = Instant::now();
    for _ in 0..6 {
        engine.orchestrator.poll_once().await;
    }
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(engine.notifier.texts().is_empty());

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(engine.notifier.count_containing("offline"), 1);
}

#[tokio::test]
async fn test_failed_command_reported_to_subscribers() {
    let mut engine = TestEngine::start(ClientConfig::default()).await;
    engine.client.fail_commands("denied");

    let accepted = engine
        .handle
        .request_command(Command::stop_charging())
        .await
        .unwrap();
    assert!(!accepted);
    assert!(engine.orchestrator.active_commands().is_empty());

    engine.orchestrator.drain_outcomes().await;
    let problems = engine.transport.problems();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].starts_with("Command charging stop failed"));
}

#[tokio::test]
async fn test_climatisation_stop_clears_extend() {
    let config = ClientConfig {
        climatisation_extend: true,
        ..ClientConfig::default()
    };
    let mut engine = TestEngine::start(config).await;

    assert!(engine
        .handle
        .request_command(Command::stop_climatisation())
        .await
        .unwrap());
    engine.orchestrator.drain_outcomes().await;

    assert!(!engine.orchestrator.config().climatisation_extend);
    assert_eq!(engine.store.saved().map(|c| c.climatisation_extend), Some(false));
}

#[tokio::test]
async fn test_stop_accepted_during_fetch_is_not_undone() {
    let config = ClientConfig {
        climatisation_extend: true,
        ..ClientConfig::default()
    };
    let mut engine = TestEngine::start(config).await;

    assert!(engine
        .handle
        .request_command(Command::stop_climatisation())
        .await
        .unwrap());
    // the poll runs before the orchestrator saw the stop's outcome
    engine.client.push_status(status(Utc::now(), 60.0, 0.0, "disconnected"));
    engine.orchestrator.poll_once().await;

    assert_eq!(engine.client.commands(), vec![Command::stop_climatisation()]);
    assert!(!engine.orchestrator.config().climatisation_extend);
    assert_eq!(engine.store.saved().map(|c| c.climatisation_extend), Some(false));
}
