//! Sensor backed by an external script (the `dht22` adapter)
//!
//! The script takes no input and prints a single JSON object to stdout.

use super::{Sensor, SensorError};
use crate::reading::Reading;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Interpreter used when none is configured
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Longest stderr excerpt carried by a failed read
pub const MAX_ERROR_MESSAGE_CHARS: usize = 150;

#[derive(Debug, Clone)]
pub struct ScriptSensor {
    script_path: PathBuf,
    interpreter: String,
}

impl ScriptSensor {
    /// Check the script exists and is readable, using the default interpreter
    pub async fn new<P: Into<PathBuf>>(script_path: P) -> Result<Self, SensorError> {
        Self::with_interpreter(script_path, DEFAULT_INTERPRETER).await
    }

    pub async fn with_interpreter<P, I>(script_path: P, interpreter: I) -> Result<Self, SensorError>
    where
        P: Into<PathBuf>,
        I: Into<String>,
    {
        let script_path = script_path.into();
        validate_script_path(&script_path).await?;

        Ok(Self {
            script_path,
            interpreter: interpreter.into(),
        })
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

async fn validate_script_path(path: &Path) -> Result<(), SensorError> {
    if path.as_os_str().is_empty() {
        return Err(SensorError::ScriptPathRequired);
    }

    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Err(SensorError::ScriptNotReadable(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SensorError::ScriptNotFound(path.to_path_buf()))
        }
        Err(_) => return Err(SensorError::ScriptNotReadable(path.to_path_buf())),
    }

    tokio::fs::File::open(path)
        .await
        .map_err(|_| SensorError::ScriptNotReadable(path.to_path_buf()))?;
    Ok(())
}

/// Parse script stdout into a reading
pub fn parse_script_output(stdout: &str) -> Result<Reading, SensorError> {
    let value: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|_| SensorError::InvalidOutput(stdout.to_string()))?;
    Ok(Reading::from_value(value)?)
}

/// Trim and cut stderr text down to [`MAX_ERROR_MESSAGE_CHARS`] characters
pub fn truncate_error_message(stderr: &str) -> String {
    stderr.trim().chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

#[async_trait]
impl Sensor for ScriptSensor {
    type Error = SensorError;

    async fn read(&self) -> Result<Reading, Self::Error> {
        debug!(
            interpreter = %self.interpreter,
            script = %self.script_path.display(),
            "Running sensor script"
        );

        let output = Command::new(&self.interpreter)
            .arg(&self.script_path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(SensorError::Spawn)?;

        if output.status.success() {
            return parse_script_output(&String::from_utf8_lossy(&output.stdout));
        }

        let message = truncate_error_message(&String::from_utf8_lossy(&output.stderr));
        if message.is_empty() {
            return Err(SensorError::ScriptFailed(format!(
                "Sensor script exited with {}",
                output.status
            )));
        }
        Err(SensorError::ScriptFailed(message))
    }

    fn id(&self) -> &'static str {
        "dht22"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_script_output() {
        let reading = parse_script_output("{\"humidity\": 61.2}\n").unwrap();
        assert_eq!(reading.get("humidity"), Some(&json!(61.2)));
    }

    #[test]
    fn test_parse_non_json_output() {
        let err = parse_script_output("sensor not ready").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Python script did not return json. Return value was 'sensor not ready'"
        );
    }

    #[test]
    fn test_parse_non_object_output() {
        let err = parse_script_output("[1, 2]").unwrap_err();
        assert!(matches!(err, SensorError::NotAReading(_)));
    }

    #[test]
    fn test_truncate_error_message() {
        let long = "x".repeat(400);
        assert_eq!(truncate_error_message(&long).len(), MAX_ERROR_MESSAGE_CHARS);
        assert_eq!(truncate_error_message("  boom \n"), "boom");
    }

    #[tokio::test]
    async fn test_empty_path_is_rejected() {
        let err = ScriptSensor::new("").await.unwrap_err();
        assert_eq!(err.to_string(), "Sensor reading script path is required");
    }

    #[tokio::test]
    async fn test_missing_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor.py");
        let err = ScriptSensor::new(&path).await.unwrap_err();
        assert!(matches!(err, SensorError::ScriptNotFound(_)));
        assert!(err.to_string().ends_with("does not exist"));
    }

    #[tokio::test]
    async fn test_directory_is_not_readable_script() {
        let dir = tempfile::tempdir().unwrap();
        let err = ScriptSensor::new(dir.path()).await.unwrap_err();
        assert!(matches!(err, SensorError::ScriptNotReadable(_)));
    }
}
