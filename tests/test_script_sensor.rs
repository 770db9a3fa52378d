//! Script-backed sensor tests
//!
//! Scripts are small shell files run with `sh` instead of the default
//! `python3` interpreter.
#![cfg(unix)]


use humidity_thing::monitor::Monitor;
use humidity_thing::sensor::script::MAX_ERROR_MESSAGE_CHARS;
use humidity_thing::sensor::{ScriptSensor, Sensor, SensorError};
use humidity_thing::testing::{BrokerSpy, FakeClock};
use humidity_thing::StatusCode;
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use test_helpers::test_options;

fn script(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{body}").unwrap();
    file
}

async fn sh_sensor(file: &NamedTempFile) -> ScriptSensor {
    ScriptSensor::with_interpreter(file.path(), "sh").await.unwrap()
}

#[tokio::test]
async fn test_json_output_becomes_a_reading() {
    let file = script(r#"echo '{"humidity": 48.5, "temperature": 21.0}'"#);
    let sensor = sh_sensor(&file).await;

    let reading = sensor.read().await.unwrap();

    assert_eq!(reading.get("humidity"), Some(&json!(48.5)));
    assert_eq!(reading.get("temperature"), Some(&json!(21.0)));
    assert_eq!(sensor.id(), "dht22");
}

#[tokio::test]
async fn test_non_json_output_is_rejected() {
    let file = script("echo sensor warming up");
    let sensor = sh_sensor(&file).await;

    let err = sensor.read().await.unwrap_err();

    assert!(matches!(err, SensorError::InvalidOutput(_)));
    assert!(err
        .to_string()
        .starts_with("Python script did not return json. Return value was 'sensor warming up"));
}

#[tokio::test]
async fn test_json_that_is_not_an_object_is_rejected() {
    let file = script("echo '[48.5]'");
    let sensor = sh_sensor(&file).await;

    let err = sensor.read().await.unwrap_err();

    assert!(matches!(err, SensorError::NotAReading(_)));
}

#[tokio::test]
async fn test_failing_script_reports_truncated_stderr() {
    let long = "x".repeat(400);
    let file = script(&format!("echo '{long}' >&2\nexit 3"));
    let sensor = sh_sensor(&file).await;

    let err = sensor.read().await.unwrap_err();

    assert!(matches!(err, SensorError::ScriptFailed(_)));
    assert_eq!(err.to_string(), "x".repeat(MAX_ERROR_MESSAGE_CHARS));
}

#[tokio::test]
async fn test_failing_script_without_stderr_reports_exit_status() {
    let file = script("exit 4");
    let sensor = sh_sensor(&file).await;

    let err = sensor.read().await.unwrap_err();

    assert!(err.to_string().starts_with("Sensor script exited with"));
    assert!(err.to_string().contains('4'));
}

#[tokio::test]
async fn test_missing_script_is_rejected_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.py");

    let err = ScriptSensor::new(&path).await.unwrap_err();

    assert!(matches!(err, SensorError::ScriptNotFound(_)));
    assert!(err.to_string().ends_with("does not exist"));
}

#[tokio::test]
async fn test_directory_is_not_a_readable_script() {
    let dir = tempfile::tempdir().unwrap();

    let err = ScriptSensor::new(dir.path()).await.unwrap_err();

    assert!(matches!(err, SensorError::ScriptNotReadable(_)));
}

#[tokio::test]
async fn test_empty_path_is_rejected() {
    let err = ScriptSensor::new("").await.unwrap_err();

    assert_eq!(err.to_string(), "Sensor reading script path is required");
}

#[tokio::test]
async fn test_script_failure_reaches_the_broker_as_a_failure_reading() {
    let file = script("echo 'DHT22 checksum mismatch' >&2\nexit 1");
    let sensor = sh_sensor(&file).await;
    let broker = BrokerSpy::new();
    let clock = FakeClock::new();
    let mut monitor = Monitor::with_clock(broker.clone(), sensor, clock.clone());
    clock.stop_after(1, monitor.stop_handle());

    monitor.start(test_options()).await.unwrap();

    let published = broker.published_readings().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].status_code(), Some(StatusCode::Failure));
    assert_eq!(
        published[0].status_msg(),
        Some("Sensor read failed: root cause DHT22 checksum mismatch")
    );
}
