use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_perfmon"))
}

#[test]
fn config_command_prints_defaults() {
    let output = cli().arg("config").output().expect("config command");

    assert!(output.status.success(), "config exited with {:?}", output.status.code());
    let json: Value = serde_json::from_slice(&output.stdout).expect("config JSON");
    assert_eq!(json["metrics_interval_ms"], 2000);
    assert_eq!(json["anr_timeout_ms"], 5000);
    assert_eq!(json["leak_detection_delay_ms"], 6000);
}

#[test]
fn run_reports_injected_stall_and_leak() {
    let log_root = tempfile::tempdir().expect("temp dir");
    let output = cli()
        .args([
            "run",
            "--duration-ms",
            "800",
            "--metrics-interval-ms",
            "100",
            "--anr-timeout-ms",
            "150",
            "--stall-ms",
            "500",
            "--leak",
            "--leak-delay-ms",
            "50",
            "--battery-drain",
            "--format",
            "json",
            "--log-root",
            log_root.path().to_str().unwrap(),
        ])
        .output()
        .expect("run command");

    assert!(
        output.status.success(),
        "run exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    let report: Value = serde_json::from_slice(&output.stdout).expect("run report JSON");
    let kinds = &report["events_by_kind"];
    assert!(kinds["anr"].as_u64().unwrap_or(0) >= 1, "{report}");
    assert_eq!(kinds["memory_leak"], 1, "{report}");
    assert_eq!(kinds["battery_drain"], 1, "{report}");
    assert_eq!(kinds["metric_alert"], 1, "{report}");
    assert!(report["snapshot_count"].as_u64().unwrap_or(0) >= 1, "{report}");

    let metrics_dir = log_root.path().join("perf_logs");
    assert_eq!(std::fs::read_dir(metrics_dir).expect("metrics dir").count(), 1);
}

#[test]
fn run_rejects_zero_duration() {
    let output = cli()
        .args(["run", "--duration-ms", "0"])
        .output()
        .expect("run command");
    assert!(!output.status.success());
}
