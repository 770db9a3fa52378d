//! Sensor readings and the status enrichment applied before publication
//!
//! A [`Reading`] is a flat JSON object. Sensors produce the measurement
//! fields (for example `humidity`); the monitor adds `thingName`, `time`,
//! `statusCode` and `statusMsg` to every reading it publishes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field holding the identifier of the publishing thing
pub const THING_NAME_FIELD: &str = "thingName";
/// Field holding the acquisition timestamp in milliseconds since the epoch
pub const TIME_FIELD: &str = "time";
/// Field holding the numeric [`StatusCode`]
pub const STATUS_CODE_FIELD: &str = "statusCode";
/// Field holding the human readable status message
pub const STATUS_MSG_FIELD: &str = "statusMsg";

/// Status message attached to successful readings
pub const SUCCESS_MESSAGE: &str = "success";

/// Outcome of the sensor read that produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success = 0,
    Failure = 1,
}

impl StatusCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(code: i64) -> Option<Self> {
        match code {
            0 => Some(StatusCode::Success),
            1 => Some(StatusCode::Failure),
            _ => None,
        }
    }
}

/// Errors raised when building a reading from arbitrary JSON
#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("Reading must be a JSON object, got: {0}")]
    NotAnObject(String),
    #[error("Reading is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// One sensor sample, serialized as a plain JSON object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    fields: Map<String, Value>,
}

impl Reading {
    /// Create an empty reading, used as the base when a sensor read fails
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a reading from a JSON value, rejecting anything but an object
    pub fn from_value(value: Value) -> Result<Self, ReadingError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ReadingError::NotAnObject(other.to_string())),
        }
    }

    /// Parse a reading from raw JSON text
    pub fn from_json_str(text: &str) -> Result<Self, ReadingError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Set a field, replacing any previous value
    pub fn insert<K: Into<String>, V: Into<Value>>(&mut self, key: K, value: V) {
        self.fields.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`Reading::insert`]
    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn thing_name(&self) -> Option<&str> {
        self.get(THING_NAME_FIELD).and_then(Value::as_str)
    }

    pub fn time(&self) -> Option<i64> {
        self.get(TIME_FIELD).and_then(Value::as_i64)
    }

    pub fn status_code(&self) -> Option<StatusCode> {
        self.get(STATUS_CODE_FIELD)
            .and_then(Value::as_i64)
            .and_then(StatusCode::from_i64)
    }

    pub fn status_msg(&self) -> Option<&str> {
        self.get(STATUS_MSG_FIELD).and_then(Value::as_str)
    }

    /// True once all four enrichment fields are present
    pub fn is_enriched(&self) -> bool {
        [
            THING_NAME_FIELD,
            TIME_FIELD,
            STATUS_CODE_FIELD,
            STATUS_MSG_FIELD,
        ]
        .iter()
        .all(|field| self.contains_key(field))
    }

    /// Serialize into the bytes handed to the broker
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<Map<String, Value>> for Reading {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl From<Reading> for Value {
    fn from(reading: Reading) -> Self {
        Value::Object(reading.fields)
    }
}

/// Status message for a failed sensor read
pub fn sensor_failure_message(cause: &str) -> String {
    format!("Sensor read failed: root cause {cause}")
}

/// Pure enrichment step: stamp a sensor result with status, thing name and time.
///
/// On success the sensor's fields are kept and the status fields overwrite any
/// same-named field the sensor produced. On failure the base is empty.
pub fn enrich(
    sensor_result: Result<Reading, String>,
    thing_name: &str,
    time_ms: i64,
) -> Reading {
    let mut reading = match sensor_result {
        Ok(base) => base
            .with(STATUS_CODE_FIELD, StatusCode::Success.as_i64())
            .with(STATUS_MSG_FIELD, SUCCESS_MESSAGE),
        Err(cause) => Reading::new()
            .with(STATUS_CODE_FIELD, StatusCode::Failure.as_i64())
            .with(STATUS_MSG_FIELD, sensor_failure_message(&cause)),
    };

    reading.insert(THING_NAME_FIELD, thing_name);
    reading.insert(TIME_FIELD, time_ms);
    reading
}
