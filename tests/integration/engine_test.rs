use std::sync::Arc;

use hwsense::core::sensors::engine::{EngineConfig, EngineHandle, SensorEngine};
use hwsense::core::sensors::providers::{ProviderError, ProviderRegistry, SensorProvider};
use hwsense::core::sensors::status::Status;

use super::support::{temperature, wait_for, ManualProvider, Probe};

fn spawn(primary: Vec<Arc<ManualProvider>>, auxiliary: Vec<Arc<ManualProvider>>) -> EngineHandle {
    let primary: Vec<Arc<dyn SensorProvider>> = primary
        .into_iter()
        .map(|p| p as Arc<dyn SensorProvider>)
        .collect();
    let auxiliary: Vec<Arc<dyn SensorProvider>> = auxiliary
        .into_iter()
        .map(|p| p as Arc<dyn SensorProvider>)
        .collect();
    SensorEngine::new(ProviderRegistry::new(primary, auxiliary), EngineConfig::default()).spawn()
}

fn denied() -> ProviderError {
    ProviderError::permission_denied("a password is required")
}

fn broken() -> ProviderError {
    ProviderError::unexpected("malformed output")
}

#[tokio::test]
async fn test_precedence_wins_regardless_of_arrival_order() {
    let hwmon = ManualProvider::new("hwmon", Probe::Available);
    let lm_sensors = ManualProvider::new("lm-sensors", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon)], vec![Arc::clone(&lm_sensors)]);
    let mut rx = engine.subscribe();

    hwmon.wait_started(1).await;
    lm_sensors.wait_started(1).await;

    lm_sensors.emit(vec![temperature("chip0:temp1", 48.0)]);
    let snapshot = wait_for(&mut rx, |s| s.data.reading_count() == 1).await;
    assert_eq!(snapshot.data.groups[0].readings[0].input, 48.0);

    hwmon.emit(vec![temperature("chip0:temp1", 50.0)]);
    let snapshot = wait_for(&mut rx, |s| {
        s.data.groups.first().map(|g| g.readings[0].input) == Some(50.0)
    })
    .await;
    assert_eq!(snapshot.data.reading_count(), 1);
    assert_eq!(snapshot.data.groups[0].source.as_deref(), Some("hwmon"));

    // A later update from the lower-precedence source does not take over.
    lm_sensors.emit(vec![temperature("chip0:temp1", 47.0)]);
    hwmon.emit(vec![temperature("chip0:temp1", 51.0)]);
    let snapshot = wait_for(&mut rx, |s| {
        s.data.groups.first().map(|g| g.readings[0].input) == Some(51.0)
    })
    .await;
    assert_eq!(snapshot.status, Status::Ready);
    assert_eq!(snapshot.active_provider.as_deref(), Some("hwmon"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_privileges_stay_until_retry() {
    let hwmon = ManualProvider::new("hwmon", Probe::Available);
    let nvme = ManualProvider::new("nvme", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon)], vec![Arc::clone(&nvme)]);
    let mut rx = engine.subscribe();

    hwmon.wait_started(1).await;
    nvme.wait_started(1).await;

    nvme.fail(denied());
    wait_for(&mut rx, |s| s.status == Status::NeedsPrivileges).await;

    hwmon.emit(vec![temperature("chip0:temp1", 44.0)]);
    let snapshot = wait_for(&mut rx, |s| s.data.reading_count() == 1).await;
    assert_eq!(snapshot.status, Status::NeedsPrivileges);
    assert!(snapshot.last_error.as_deref().unwrap().contains("nvme"));

    engine.retry();
    let snapshot = wait_for(&mut rx, |s| s.status == Status::Loading).await;
    assert!(snapshot.data.is_empty());
    assert!(snapshot.last_error.is_none());

    hwmon.wait_started(2).await;
    hwmon.emit(vec![temperature("chip0:temp1", 45.0)]);
    wait_for(&mut rx, |s| s.status == Status::Ready).await;

    engine.shutdown().await;
}

#[tokio::test]
async fn test_callbacks_from_previous_session_are_ignored() {
    let hwmon = ManualProvider::new("hwmon", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon)], Vec::new());
    let mut rx = engine.subscribe();

    hwmon.wait_started(1).await;
    let stale = hwmon.on_change();

    engine.retry();
    hwmon.wait_started(2).await;
    stale(vec![temperature("chip0:temp1", 99.0)]);

    hwmon.emit(Vec::new());
    let snapshot = wait_for(&mut rx, |s| s.status == Status::NoData).await;
    assert!(snapshot.data.is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_no_primary_means_no_sources() {
    let hwmon = ManualProvider::new("hwmon", Probe::Missing);
    let lm_sensors = ManualProvider::new("lm-sensors", Probe::Missing);
    let engine = spawn(vec![Arc::clone(&hwmon), Arc::clone(&lm_sensors)], Vec::new());
    let mut rx = engine.subscribe();

    let snapshot = wait_for(&mut rx, |s| s.status != Status::Loading).await;
    assert_eq!(snapshot.status, Status::NoSources);
    assert!(snapshot.active_provider.is_none());
    assert_eq!(hwmon.starts() + lm_sensors.starts(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_auxiliary_data_without_primary_is_ready() {
    let hwmon = ManualProvider::new("hwmon", Probe::Missing);
    let powercap = ManualProvider::new("powercap", Probe::Available);
    let engine = spawn(vec![hwmon], vec![Arc::clone(&powercap)]);
    let mut rx = engine.subscribe();

    powercap.wait_started(1).await;
    powercap.emit(vec![temperature("rapl:package", 12.5)]);

    let snapshot = wait_for(&mut rx, |s| s.status == Status::Ready).await;
    assert_eq!(snapshot.available_providers, vec!["powercap".to_string()]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_active_primary_without_readings_is_no_data() {
    let hwmon = ManualProvider::new("hwmon", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon)], Vec::new());
    let mut rx = engine.subscribe();

    hwmon.wait_started(1).await;
    hwmon.emit(Vec::new());

    let snapshot = wait_for(&mut rx, |s| s.status != Status::Loading).await;
    assert_eq!(snapshot.status, Status::NoData);
    assert_eq!(snapshot.active_provider.as_deref(), Some("hwmon"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_primary_permission_problem_stops_the_chain() {
    let hwmon = ManualProvider::new("hwmon", Probe::Fails(denied));
    let lm_sensors = ManualProvider::new("lm-sensors", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon), Arc::clone(&lm_sensors)], Vec::new());
    let mut rx = engine.subscribe();

    let snapshot = wait_for(&mut rx, |s| s.status != Status::Loading).await;
    assert_eq!(snapshot.status, Status::NeedsPrivileges);
    assert!(snapshot.active_provider.is_none());

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(lm_sensors.starts(), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_primary_probe_failure_falls_through() {
    let hwmon = ManualProvider::new("hwmon", Probe::Fails(broken));
    let lm_sensors = ManualProvider::new("lm-sensors", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon), Arc::clone(&lm_sensors)], Vec::new());
    let mut rx = engine.subscribe();

    lm_sensors.wait_started(1).await;
    lm_sensors.emit(vec![temperature("coretemp-isa-0000:temp1", 41.0)]);

    let snapshot = wait_for(&mut rx, |s| s.status == Status::Ready).await;
    assert_eq!(snapshot.active_provider.as_deref(), Some("lm-sensors"));
    assert!(snapshot.last_error.as_deref().unwrap().contains("malformed output"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_primary_runtime_failure_is_error_until_data() {
    let hwmon = ManualProvider::new("hwmon", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon)], Vec::new());
    let mut rx = engine.subscribe();

    hwmon.wait_started(1).await;
    hwmon.fail(broken());
    wait_for(&mut rx, |s| s.status == Status::Error).await;

    hwmon.emit(Vec::new());
    hwmon.emit(vec![temperature("chip0:temp1", 40.0)]);
    let snapshot = wait_for(&mut rx, |s| s.data.reading_count() == 1).await;
    assert_eq!(snapshot.status, Status::Ready);

    // Once ready, a later failure does not demote the status.
    hwmon.fail(ProviderError::unexpected("sensor went away"));
    let snapshot = wait_for(&mut rx, |s| {
        s.last_error.as_deref() == Some("hwmon: sensor went away")
    })
    .await;
    assert_eq!(snapshot.status, Status::Ready);
    assert_eq!(snapshot.data.reading_count(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_unsubscribes_providers() {
    let hwmon = ManualProvider::new("hwmon", Probe::Available);
    let engine = spawn(vec![Arc::clone(&hwmon)], Vec::new());
    let rx = engine.subscribe();

    hwmon.wait_started(1).await;
    let on_change = hwmon.on_change();
    engine.shutdown().await;

    on_change(vec![temperature("chip0:temp1", 40.0)]);
    assert!(rx.borrow().data.is_empty());
}
