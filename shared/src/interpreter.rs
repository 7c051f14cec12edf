//! Message Interpreter
//!
//! Classifies a raw device line as a time request or a data report and turns
//! it into a typed [`Message`]. Classification is substring based because the
//! device protocol is loosely structured; a data report is then parsed
//! defensively so stray fragments never abort the whole line.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::protocol::{
    DATA_REPORT_MARKER, DEVICE_TIME_FORMAT, KEY_DEBUG, KEY_ID, KEY_TIME, KEY_VALUE,
    REQUIRED_KEYS, TIME_REQUEST_MARKER, TIME_RESPONSE_FORMAT,
};
use crate::{now_local, Reading};

/// Reasons a line is not turned into a message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("Input is not text")]
    TypeMismatch,

    #[error("Could not understand message")]
    Unrecognized,

    #[error("Data report is missing key '{0}'")]
    MissingKey(&'static str),

    #[error("Could not parse {key} from '{value}'")]
    UnparsableValue { key: &'static str, value: String },
}

/// Result of interpreting a line
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Time request; the payload is the response to write back
    TimeResponse(String),
    /// Valid data report, ready for storage
    Reading(Reading),
}

/// Stateless line interpreter with an injectable wall clock
#[derive(Debug, Clone, Copy)]
pub struct Interpreter {
    clock: fn() -> NaiveDateTime,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Create an interpreter using local wall-clock time
    pub fn new() -> Self {
        Self { clock: now_local }
    }

    /// Create an interpreter with a custom clock
    pub fn with_clock(clock: fn() -> NaiveDateTime) -> Self {
        Self { clock }
    }

    /// Interpret raw bytes, rejecting anything that is not UTF-8 text
    pub fn interpret_bytes(&self, raw: &[u8]) -> Result<Message, InterpretError> {
        let line = std::str::from_utf8(raw).map_err(|_| InterpretError::TypeMismatch)?;
        self.interpret(line)
    }

    /// Interpret one line
    pub fn interpret(&self, line: &str) -> Result<Message, InterpretError> {
        if line.contains(TIME_REQUEST_MARKER) {
            return Ok(Message::TimeResponse(self.time_response()));
        }

        if line.contains(DATA_REPORT_MARKER) {
            let fields = parse_fields(line);
            return parse_reading(&fields).map(Message::Reading);
        }

        Err(InterpretError::Unrecognized)
    }

    /// Build the `T` + HHMMSSDDMMYYYY response from the current clock
    pub fn time_response(&self) -> String {
        (self.clock)().format(TIME_RESPONSE_FORMAT).to_string()
    }
}

/// Split a data report into `key -> value` pairs.
///
/// Keys and values are separated by the first colon; the value keeps any
/// further colons (timestamps). Empty fragments, fragments without a colon
/// and empty keys are skipped.
pub fn parse_fields(line: &str) -> HashMap<&str, &str> {
    line.split(',')
        .filter_map(|fragment| fragment.split_once(':'))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim(), value))
        .collect()
}

/// Validate required keys and convert them into a [`Reading`]
pub fn parse_reading(fields: &HashMap<&str, &str>) -> Result<Reading, InterpretError> {
    for key in REQUIRED_KEYS {
        if !fields.contains_key(key) {
            return Err(InterpretError::MissingKey(key));
        }
    }

    let raw_time = fields[KEY_TIME];
    let timestamp = NaiveDateTime::parse_from_str(raw_time.trim(), DEVICE_TIME_FORMAT)
        .map_err(|_| unparsable(KEY_TIME, raw_time))?;

    let raw_value = fields[KEY_VALUE];
    let value: f64 = raw_value
        .trim()
        .parse()
        .map_err(|_| unparsable(KEY_VALUE, raw_value))?;

    let raw_debug = fields[KEY_DEBUG];
    let is_debug = match raw_debug.trim().parse::<i64>() {
        Ok(0) => false,
        Ok(1) => true,
        _ => return Err(unparsable(KEY_DEBUG, raw_debug)),
    };

    Reading::new(fields[KEY_ID], timestamp, value, is_debug)
        .ok_or_else(|| unparsable(KEY_VALUE, raw_value))
}

fn unparsable(key: &'static str, value: &str) -> InterpretError {
    InterpretError::UnparsableValue {
        key,
        value: value.to_string(),
    }
}
