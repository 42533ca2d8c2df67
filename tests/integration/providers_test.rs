use std::sync::Arc;
use std::time::Duration;

use hwsense::core::sensors::model::{SensorCategory, SensorKind};
use hwsense::core::sensors::providers::{
    ErrorCode, HwmonProvider, LmSensorsProvider, NvmeProvider, PowercapProvider, ProviderContext,
    SensorProvider, SmartctlProvider,
};
use hwsense::platform::{CommandError, HostShell};

use super::support::{error_sink, next, sample_sink, FakeHost};

fn shell(host: &Arc<FakeHost>) -> Arc<dyn HostShell> {
    Arc::clone(host) as Arc<dyn HostShell>
}

fn hwmon_host() -> Arc<FakeHost> {
    let host = FakeHost::new();
    host.command("ls -1 /sys/class/hwmon", Ok("hwmon0\nhwmon1\n".to_string()));
    host.command(
        "ls -1 /sys/class/hwmon/hwmon0",
        Ok("name\ntemp1_input\ntemp1_label\ntemp1_max\ntemp1_crit\nfan1_input\n".to_string()),
    );
    host.command("ls -1 /sys/class/hwmon/hwmon1", Ok("name\n".to_string()));
    host.file("/sys/class/hwmon/hwmon0/name", "coretemp\n");
    host.file("/sys/class/hwmon/hwmon0/temp1_input", "45000\n");
    host.file("/sys/class/hwmon/hwmon0/temp1_label", "Package id 0\n");
    host.file("/sys/class/hwmon/hwmon0/temp1_max", "80000\n");
    host.file("/sys/class/hwmon/hwmon0/temp1_crit", "100000\n");
    host.file("/sys/class/hwmon/hwmon0/fan1_input", "1200\n");
    host
}

#[tokio::test(start_paused = true)]
async fn test_hwmon_discovers_and_scales() {
    let host = hwmon_host();
    let provider = Arc::new(HwmonProvider::new(shell(&host)));
    assert!(provider.is_available().await.unwrap());

    let (on_change, mut rx) = sample_sink();
    let _subscription = Arc::clone(&provider).start(on_change, ProviderContext::default());

    let samples = next(&mut rx).await;
    assert_eq!(samples.len(), 2);

    let package = samples.iter().find(|s| s.kind == SensorKind::Temperature).unwrap();
    assert_eq!(package.id, "hwmon0:temp1");
    assert_eq!(package.label, "Package id 0");
    assert_eq!(package.value, 45.0);
    assert_eq!(package.max, Some(80.0));
    assert_eq!(package.critical, Some(100.0));
    assert_eq!(package.chip_name.as_deref(), Some("coretemp"));

    let fan = samples.iter().find(|s| s.kind == SensorKind::Fan).unwrap();
    assert_eq!(fan.value, 1200.0);
}

#[tokio::test(start_paused = true)]
async fn test_hwmon_debounces_watch_bursts() {
    let host = hwmon_host();
    let provider = Arc::new(HwmonProvider::new(shell(&host)));
    let (on_change, mut rx) = sample_sink();
    let subscription = provider.start(on_change, ProviderContext::default());

    next(&mut rx).await;

    let input = "/sys/class/hwmon/hwmon0/temp1_input";
    host.fire(input, Some("46000\n"));
    host.fire(input, Some("47000\n"));
    host.fire(input, Some("48000\n"));

    let samples = next(&mut rx).await;
    let package = samples.iter().find(|s| s.kind == SensorKind::Temperature).unwrap();
    assert_eq!(package.value, 48.0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(rx.try_recv().is_err());

    // A deleted input drops out of the next snapshot.
    host.fire(input, None);
    let samples = next(&mut rx).await;
    assert_eq!(samples.len(), 1);

    subscription.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn test_hwmon_keeps_readable_chips_when_one_is_denied() {
    let host = hwmon_host();
    host.command(
        "ls -1 /sys/class/hwmon/hwmon1",
        Err(CommandError::access_denied("ls: cannot open directory: Permission denied")),
    );
    let provider = Arc::new(HwmonProvider::new(shell(&host)));
    assert!(provider.is_available().await.unwrap());

    let (on_change, mut samples_rx) = sample_sink();
    let (on_error, mut errors_rx) = error_sink();
    let ctx = ProviderContext {
        refresh_interval: None,
        on_error: Some(on_error),
    };
    let _subscription = Arc::clone(&provider).start(on_change, ctx);

    assert_eq!(next(&mut samples_rx).await.len(), 2);
    assert_eq!(next(&mut errors_rx).await.code, ErrorCode::PermissionDenied);

    // Watches on the readable chip keep delivering.
    host.fire("/sys/class/hwmon/hwmon0/temp1_input", Some("52000\n"));
    let samples = next(&mut samples_rx).await;
    let package = samples.iter().find(|s| s.kind == SensorKind::Temperature).unwrap();
    assert_eq!(package.value, 52.0);
}

#[tokio::test(start_paused = true)]
async fn test_hwmon_reports_denied_attribute() {
    let host = hwmon_host();
    host.fail_read(
        "/sys/class/hwmon/hwmon0/temp1_input",
        CommandError::access_denied("temp1_input: Permission denied"),
    );
    let provider = Arc::new(HwmonProvider::new(shell(&host)));

    let (on_change, mut samples_rx) = sample_sink();
    let (on_error, mut errors_rx) = error_sink();
    let ctx = ProviderContext {
        refresh_interval: None,
        on_error: Some(on_error),
    };
    let _subscription = provider.start(on_change, ctx);

    let samples = next(&mut samples_rx).await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].kind, SensorKind::Fan);

    let err = next(&mut errors_rx).await;
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert!(err.message.contains("temp1_input"));
    assert!(errors_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_hwmon_missing_root_is_unavailable() {
    let host = FakeHost::new();
    let provider = HwmonProvider::new(shell(&host));
    assert!(!provider.is_available().await.unwrap());
}

#[tokio::test]
async fn test_hwmon_permission_problem_is_reported() {
    let host = FakeHost::new();
    host.command(
        "ls -1 /sys/class/hwmon",
        Err(CommandError::access_denied("ls: cannot open directory: Permission denied")),
    );
    let provider = HwmonProvider::new(shell(&host));
    let err = provider.is_available().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);

    // Every chip denied: nothing usable, so the probe asks for privileges.
    host.command("ls -1 /sys/class/hwmon", Ok("hwmon0\n".to_string()));
    host.command(
        "ls -1 /sys/class/hwmon/hwmon0",
        Err(CommandError::access_denied("ls: cannot open directory: Permission denied")),
    );
    let err = provider.is_available().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_is_idempotent_and_final() {
    let host = FakeHost::new();
    host.command(
        "sensors -j",
        Ok(r#"{"coretemp-isa-0000":{"Core 0":{"temp2_input":43.0}}}"#.to_string()),
    );
    let provider = Arc::new(LmSensorsProvider::new(shell(&host)));
    let (on_change, mut rx) = sample_sink();
    let subscription = provider.start(on_change, ProviderContext::with_interval(Duration::from_secs(1)));

    let samples = next(&mut rx).await;
    assert_eq!(samples[0].label, "CPU Core 0");

    subscription.unsubscribe();
    subscription.unsubscribe();
    assert!(!subscription.is_active());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_lm_sensors_availability() {
    let host = FakeHost::new();
    let provider = LmSensorsProvider::new(shell(&host));
    assert!(!provider.is_available().await.unwrap());

    host.command(
        "sensors -j",
        Err(CommandError::exited(Some(127), "sensors: command not found", String::new())),
    );
    assert!(!provider.is_available().await.unwrap());

    host.command("sensors -j", Ok("{}".to_string()));
    assert!(!provider.is_available().await.unwrap());

    host.command(
        "sensors -j",
        Err(CommandError::exited(Some(1), "Can't get value of subfeature", String::new())),
    );
    let err = provider.is_available().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unexpected);
}

#[tokio::test(start_paused = true)]
async fn test_nvme_permission_aborts_the_tick() {
    let host = FakeHost::new();
    host.command(
        "nvme list -o json",
        Ok(r#"{"Devices":[
            {"DevicePath":"/dev/nvme0n1","ModelNumber":"Samsung SSD 980"},
            {"DevicePath":"/dev/nvme1n1","ModelNumber":"WD Blue SN570"}
        ]}"#
        .to_string()),
    );
    host.command(
        "nvme smart-log /dev/nvme0n1 -o json",
        Err(CommandError::access_denied("Permission denied")),
    );
    host.command(
        "nvme smart-log /dev/nvme1n1 -o json",
        Ok(r#"{"temperature":310}"#.to_string()),
    );

    let provider = Arc::new(NvmeProvider::new(shell(&host)));
    assert!(provider.is_available().await.unwrap());

    let (on_change, mut samples_rx) = sample_sink();
    let (on_error, mut errors_rx) = error_sink();
    let ctx = ProviderContext {
        refresh_interval: None,
        on_error: Some(on_error),
    };
    let _subscription = provider.start(on_change, ctx);

    assert!(next(&mut samples_rx).await.is_empty());
    assert_eq!(next(&mut errors_rx).await.code, ErrorCode::PermissionDenied);
    assert!(!host.was_called("nvme smart-log /dev/nvme1n1 -o json"));
    let smart_logs = host.calls().iter().filter(|c| c.starts_with("nvme smart-log")).count();
    assert_eq!(smart_logs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_nvme_converts_kelvin() {
    let host = FakeHost::new();
    host.command(
        "nvme list -o json",
        Ok(r#"{"Devices":[{"DevicePath":"/dev/nvme0n1","ModelNumber":"Samsung SSD 980"}]}"#.to_string()),
    );
    host.command(
        "nvme smart-log /dev/nvme0n1 -o json",
        Ok(r#"{"temperature":318,"temperature_sensor_1":42}"#.to_string()),
    );

    let provider = Arc::new(NvmeProvider::new(shell(&host)));
    let (on_change, mut rx) = sample_sink();
    let _subscription = provider.start(on_change, ProviderContext::default());

    let samples = next(&mut rx).await;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].id, "nvme0:temperature");
    assert_eq!(samples[0].value, 45.0);
    assert_eq!(samples[1].value, 42.0);
    assert!(samples.iter().all(|s| s.category == Some(SensorCategory::Drive)));
}

#[tokio::test(start_paused = true)]
async fn test_smartctl_accepts_informational_exit_codes() {
    let host = FakeHost::new();
    host.command(
        "smartctl --scan -j",
        Ok(r#"{"devices":[{"name":"/dev/sda","type":"sat"}]}"#.to_string()),
    );
    let info = r#"{
        "model_name": "CT500MX500SSD1",
        "serial_number": "1234",
        "ata_smart_attributes": { "table": [{ "id": 194, "raw": { "value": 193274839075 } }] }
    }"#;
    host.command(
        "smartctl -i -A -j -d sat /dev/sda",
        Err(CommandError::exited(Some(4), "smartctl exited with status 4", info.to_string())),
    );

    let provider = Arc::new(SmartctlProvider::new(shell(&host)));
    assert!(provider.is_available().await.unwrap());

    let (on_change, mut rx) = sample_sink();
    let _subscription = provider.start(on_change, ProviderContext::default());

    let samples = next(&mut rx).await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].id, "sda:temperature");
    assert_eq!(samples[0].value, 35.0);
    assert_eq!(samples[0].chip_label.as_deref(), Some("CT500MX500SSD1 (sda)"));
}

#[tokio::test(start_paused = true)]
async fn test_smartctl_open_failure_is_reported() {
    let host = FakeHost::new();
    host.command(
        "smartctl --scan -j",
        Ok(r#"{"devices":[{"name":"/dev/sda"}]}"#.to_string()),
    );
    let output = r#"{"smartctl":{"messages":[{"string":"Smartctl open device: /dev/sda failed: Permission denied","severity":"error"}]}}"#;
    host.command(
        "smartctl -i -A -j /dev/sda",
        Err(CommandError::exited(Some(2), "smartctl exited with status 2", output.to_string())),
    );

    let provider = Arc::new(SmartctlProvider::new(shell(&host)));
    let (on_change, mut samples_rx) = sample_sink();
    let (on_error, mut errors_rx) = error_sink();
    let ctx = ProviderContext {
        refresh_interval: None,
        on_error: Some(on_error),
    };
    let _subscription = provider.start(on_change, ctx);

    assert!(next(&mut samples_rx).await.is_empty());
    assert_eq!(next(&mut errors_rx).await.code, ErrorCode::PermissionDenied);
}

#[tokio::test(start_paused = true)]
async fn test_powercap_derives_power_from_energy() {
    let host = FakeHost::new();
    host.command("ls -1 /sys/class/powercap", Ok("intel-rapl\nintel-rapl:0\nintel-rapl:0:0\n".to_string()));
    host.command(
        "ls -1 /sys/class/powercap/intel-rapl:0",
        Ok("energy_uj\nmax_energy_range_uj\nname\n".to_string()),
    );
    host.command(
        "ls -1 /sys/class/powercap/intel-rapl:0:0",
        Ok("energy_uj\nname\n".to_string()),
    );
    host.file("/sys/class/powercap/intel-rapl:0/name", "package-0\n");
    host.file("/sys/class/powercap/intel-rapl:0/max_energy_range_uj", "262143328850\n");
    host.file("/sys/class/powercap/intel-rapl:0/energy_uj", "262140000000\n");
    host.file("/sys/class/powercap/intel-rapl:0:0/name", "core\n");
    host.file("/sys/class/powercap/intel-rapl:0:0/energy_uj", "5000000\n");

    let provider = Arc::new(PowercapProvider::new(shell(&host)));
    assert!(provider.is_available().await.unwrap());

    let (on_change, mut rx) = sample_sink();
    let (on_error, mut errors_rx) = error_sink();
    let ctx = ProviderContext {
        refresh_interval: None,
        on_error: Some(on_error),
    };
    let _subscription = provider.start(on_change, ctx);

    // Counters need two readings.
    assert!(next(&mut rx).await.is_empty());

    // Package wraps past its range; the core counter goes backwards without one.
    host.file("/sys/class/powercap/intel-rapl:0/energy_uj", "5671150\n");
    host.file("/sys/class/powercap/intel-rapl:0:0/energy_uj", "1000000\n");

    let samples = next(&mut rx).await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].label, "Package 0");
    assert_eq!(samples[0].kind, SensorKind::Power);
    assert_eq!(samples[0].category, Some(SensorCategory::Power));
    assert!((samples[0].value - 3.0).abs() < 1e-6);

    host.file("/sys/class/powercap/intel-rapl:0:0/energy_uj", "7000000\n");
    let samples = next(&mut rx).await;
    let core = samples.iter().find(|s| s.id == "intel-rapl:0:0:power").unwrap();
    assert_eq!(core.label, "Package 0 Core");
    assert!((core.value - 2.0).abs() < 1e-6);

    assert!(errors_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_powercap_keeps_readable_zones_when_one_is_denied() {
    let host = FakeHost::new();
    host.command("ls -1 /sys/class/powercap", Ok("intel-rapl:0\nintel-rapl:1\n".to_string()));
    host.command(
        "ls -1 /sys/class/powercap/intel-rapl:0",
        Ok("name\npower_uw\n".to_string()),
    );
    host.command(
        "ls -1 /sys/class/powercap/intel-rapl:1",
        Err(CommandError::access_denied("ls: cannot open directory: Permission denied")),
    );
    host.file("/sys/class/powercap/intel-rapl:0/name", "package-0\n");
    host.file("/sys/class/powercap/intel-rapl:0/power_uw", "15500000\n");

    let provider = Arc::new(PowercapProvider::new(shell(&host)));
    assert!(provider.is_available().await.unwrap());

    let (on_change, mut rx) = sample_sink();
    let (on_error, mut errors_rx) = error_sink();
    let ctx = ProviderContext {
        refresh_interval: None,
        on_error: Some(on_error),
    };
    let _subscription = provider.start(on_change, ctx);

    let samples = next(&mut rx).await;
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].label, "Package 0");
    assert!((samples[0].value - 15.5).abs() < 1e-6);
    assert_eq!(next(&mut errors_rx).await.code, ErrorCode::PermissionDenied);

    // Later ticks keep the readable zone and do not repeat the report.
    assert_eq!(next(&mut rx).await.len(), 1);
    assert!(errors_rx.try_recv().is_err());
}
