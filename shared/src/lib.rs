//! IOW Shared Types
//!
//! This crate provides the reading model, the line codec, the message
//! interpreter and the SQLite storage shared by the monitor and the dashboard.

pub mod codec;
pub mod interpreter;
pub mod state_machine;
pub mod storage;

use chrono::NaiveDateTime;

pub use interpreter::{InterpretError, Interpreter, Message};
pub use storage::{ChartPoint, Storage, StorageError, StoredRow};

/// Device line protocol constants
pub mod protocol {
    /// Substring marking a time-sync request
    pub const TIME_REQUEST_MARKER: &str = "R001";

    /// Substring marking a data report
    pub const DATA_REPORT_MARKER: &str = "D001";

    /// Keys every data report must carry
    pub const KEY_ID: &str = "ID";
    pub const KEY_TIME: &str = "Time";
    pub const KEY_VALUE: &str = "Value";
    pub const KEY_DEBUG: &str = "Debug";

    pub const REQUIRED_KEYS: [&str; 4] = [KEY_ID, KEY_TIME, KEY_VALUE, KEY_DEBUG];

    /// Pattern of the `Time` field sent by the device
    pub const DEVICE_TIME_FORMAT: &str = "%H:%M:%S %d/%m/%Y";

    /// Pattern of the time response written back: `T` + HHMMSSDDMMYYYY
    pub const TIME_RESPONSE_FORMAT: &str = "T%H%M%S%d%m%Y";

    /// Length of a time response line (without terminator)
    pub const TIME_RESPONSE_LEN: usize = 15;

    /// Pattern used for the `Time` column in storage
    pub const STORAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
}

/// A typed, validated sensor reading
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub sensor_id: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub is_debug: bool,
}

impl Reading {
    /// Create a reading, rejecting non-finite values
    pub fn new(
        sensor_id: impl Into<String>,
        timestamp: NaiveDateTime,
        value: f64,
        is_debug: bool,
    ) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Some(Self {
            sensor_id: sensor_id.into(),
            timestamp,
            value,
            is_debug,
        })
    }

    /// Timestamp rendered the way it is stored
    pub fn storage_time(&self) -> String {
        self.timestamp
            .format(protocol::STORAGE_TIME_FORMAT)
            .to_string()
    }
}

/// Current local wall-clock time
pub fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}
