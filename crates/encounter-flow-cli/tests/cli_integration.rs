use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_efc<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_efc"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute efc binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_efc(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "efc command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn step_outcome(payload: &Value, index: usize) -> &Value {
    payload
        .get("steps")
        .and_then(|steps| steps.get(index))
        .and_then(|step| step.get("outcome"))
        .unwrap_or_else(|| panic!("missing outcome for step {index} in payload: {payload}"))
}

#[test]
fn config_show_reports_defaults_with_envelope() {
    let payload = run_json(["config", "show"]);
    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    assert!(!as_str(&payload, "generated_at").is_empty());
    assert_eq!(as_str(&payload, "source"), "defaults");

    let config = &payload["config"];
    assert_eq!(as_i64(config, "min_encounter_interval_ms"), 5_000);
    assert_eq!(as_i64(config, "lease_timeout_ms"), 1_000);
    assert_eq!(as_i64(config, "holding_capacity"), 3);
    assert_eq!(as_str(config, "retrigger_policy"), "manual");
    assert_eq!(as_i64(&config["hold_budgets"]["by_story_tag"], "insurgent"), 90_000);
}

#[test]
fn config_show_applies_file_then_flag_overrides() {
    let dir = unique_temp_dir("efc-config");
    let config_path = dir.join("flow.yaml");
    fs::write(&config_path, "holding_capacity: 5\ndecision_cooldown_ms: 1500\n")
        .unwrap_or_else(|err| panic!("failed to write config: {err}"));

    let payload = run_json([
        "config",
        "show",
        "--config",
        path_str(&config_path),
        "--holding-capacity",
        "7",
        "--retrigger-policy",
        "auto-after-cooldown",
    ]);
    let config = &payload["config"];
    assert_eq!(as_i64(config, "holding_capacity"), 7);
    assert_eq!(as_i64(config, "decision_cooldown_ms"), 1_500);
    assert_eq!(as_str(config, "retrigger_policy"), "auto_after_cooldown");
}

#[test]
fn invalid_config_fails_with_error_on_stderr() {
    let dir = unique_temp_dir("efc-bad-config");
    let config_path = dir.join("flow.yaml");
    fs::write(&config_path, "holding_capacity: 3\nwarp_factor: 9\n")
        .unwrap_or_else(|err| panic!("failed to write config: {err}"));

    let output = run_efc(["config", "show", "--config", path_str(&config_path)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid config file"), "stderr was: {stderr}");

    let output = run_efc(["config", "show", "--holding-capacity", "0"]);
    assert!(!output.status.success());
}

#[test]
fn simulate_demo_scenario_contract() {
    let scenario = repo_root().join("demos/checkpoint_shift.yaml");
    let payload = run_json(["simulate", "--scenario", path_str(&scenario)]);

    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    assert_eq!(as_str(&payload, "scenario"), "checkpoint shift");

    assert_eq!(as_str(step_outcome(&payload, 0), "outcome"), "displayed");
    let denied = step_outcome(&payload, 1);
    assert_eq!(as_str(denied, "outcome"), "denied");
    assert_eq!(as_str(&denied["reason"], "reason"), "already_processing");
    assert_eq!(as_str(step_outcome(&payload, 2), "outcome"), "held");
    assert_eq!(as_i64(step_outcome(&payload, 2), "budget_ms"), 90_000);
    assert_eq!(as_str(step_outcome(&payload, 4), "outcome"), "decided");
    assert_eq!(as_str(step_outcome(&payload, 6), "outcome"), "displayed");

    let refused = step_outcome(&payload, 7);
    assert_eq!(as_str(refused, "outcome"), "refused");
    assert_eq!(as_str(&refused["admission"], "decision"), "contention");

    assert_eq!(as_str(step_outcome(&payload, 9), "outcome"), "released");
    assert_eq!(as_str(step_outcome(&payload, 10), "outcome"), "not_held");
    assert_eq!(as_str(&step_outcome(&payload, 13)["reason"], "reason"), "session_inactive");

    let loyalty = &payload["loyalty"];
    assert_eq!(as_i64(loyalty, "applications"), 1);
    assert_eq!(as_i64(loyalty, "imperial"), -3);
    assert_eq!(as_i64(loyalty, "rebellion"), 3);

    let notifications = payload["notifications"]
        .as_array()
        .unwrap_or_else(|| panic!("notifications should be an array: {payload}"));
    assert!(notifications
        .iter()
        .filter_map(Value::as_str)
        .any(|message| message.contains("released from holding pattern")));
}

#[test]
fn simulate_reports_tick_events_for_hold_timeouts() {
    let dir = unique_temp_dir("efc-timeout");
    let scenario_path = dir.join("timeout.yaml");
    fs::write(
        &scenario_path,
        r"
backlog:
  - { ship_type: Corellian Corvette, captain_name: Rell, story_tag: insurgent, hold_budget_ms: 2000 }
consequences:
  insurgent: { imperial: -3, rebellion: 3 }
steps:
  - { at_ms: 0, action: request }
  - { at_ms: 100, action: defer }
  - { at_ms: 2100, action: tick }
",
    )
    .unwrap_or_else(|err| panic!("failed to write scenario: {err}"));

    let payload = run_json(["simulate", "--scenario", path_str(&scenario_path)]);
    let events = payload["events"]
        .as_array()
        .unwrap_or_else(|| panic!("events should be an array: {payload}"));
    let expired = events
        .iter()
        .find(|event| event["event"] == "hold_expired")
        .unwrap_or_else(|| panic!("expected a hold_expired event: {payload}"));
    assert_eq!(as_i64(expired, "at_ms"), 2_100);
    assert_eq!(as_str(&expired["release"], "reason"), "timeout");
    assert_eq!(as_i64(&payload["loyalty"], "applications"), 1);
}

#[test]
fn simulate_rejects_malformed_scenario() {
    let dir = unique_temp_dir("efc-bad-scenario");
    let scenario_path = dir.join("bad.yaml");
    fs::write(&scenario_path, "steps:\n  - { at_ms: 0, action: release }\n")
        .unwrap_or_else(|err| panic!("failed to write scenario: {err}"));

    let output = run_efc(["simulate", "--scenario", path_str(&scenario_path)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("hold"), "stderr was: {stderr}");
}

#[test]
fn run_drives_a_short_real_time_session() {
    let scenario = repo_root().join("demos/checkpoint_shift.yaml");
    let payload = run_json([
        "run",
        "--scenario",
        path_str(&scenario),
        "--duration-ms",
        "300",
        "--request-every-ms",
        "100",
        "--decide-after-ms",
        "20",
        "--operator",
        "approve,defer",
    ]);

    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    assert_eq!(as_i64(&payload, "duration_ms"), 300);
    assert!(as_i64(&payload["requests"], "issued") >= 1);
    assert!(as_i64(&payload["requests"], "displayed") >= 1);
}
