//! Client contract for the RTDB test platform.
//!
//! The harness never talks to the platform directly; it goes through the
//! engine traits below. Each call is attempted exactly once and either
//! succeeds or returns the engine's [`EngineError`] unchanged. [`sim`] provides
//! an in-process loopback implementation.

pub mod sim;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topology::{CvtType, MappingRecord, PointAttributes, RawType};

/// Error reported by the platform: a negative status code plus its text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct EngineError {
    pub code: i32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.code == NOT_FOUND
    }
}

/// Status code the platform uses for a missing database, test, session or
/// point.
pub const NOT_FOUND: i32 = -2;

pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A live point value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Number(_) => None,
            Value::Text(s) => Some(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Converted and alternate value of a point, as returned by `get_values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointValue {
    pub value: Value,
    pub alt_value: Value,
}

// ---------------------------------------------------------------------------
// Sessions and generators
// ---------------------------------------------------------------------------

/// How a running session is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    Normal,
    UserAbort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

/// When a generator stops emitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndCondition {
    /// After `duration` seconds.
    Duration,
    /// Until the session stops.
    Continuous,
}

/// Shape parameters handed to `add_generator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub end: EndCondition,
    pub waveform: Waveform,
    pub amplitude: f64,
    /// Hz.
    pub frequency: f64,
    /// Degrees.
    pub phase: f64,
    pub offset: f64,
    /// Duty cycle / shape percentage.
    pub duty: f64,
    /// Seconds.
    pub start_delay: f64,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GeneratorHandle(pub u32);

// ---------------------------------------------------------------------------
// Data logger
// ---------------------------------------------------------------------------

/// Which logged samples `get_records` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSelector {
    #[default]
    AllSamples,
    /// Every n-th record, starting at index 0.
    EveryNth(u32),
}

/// One logged record exactly as the logger delivers it.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub index: u64,
    pub t_sec: i64,
    pub t_nsec: u32,
    pub primary: f64,
    pub alternate: f64,
    pub raw: f64,
    pub dl_flags: u32,
    pub rt_flags: u32,
}

/// Destination of pushed log records. The caller picks the sink for each
/// `get_records` call; nothing in the record identifies its destination.
pub trait RecordSink: Send {
    fn accept(&mut self, record: LogRecord);
}

impl RecordSink for Vec<LogRecord> {
    fn accept(&mut self, record: LogRecord) {
        self.push(record);
    }
}

/// Result of `query_test`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestInfo {
    pub test: String,
    pub session: String,
    pub record_count: u64,
    pub points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaColumn {
    pub point: String,
    pub cvt_type: CvtType,
    pub raw_type: RawType,
}

/// Column layout of the logged session; must be fetched before records.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MetaTable {
    pub columns: Vec<MetaColumn>,
}

impl MetaTable {
    pub fn column(&self, point: &str) -> Option<&MetaColumn> {
        self.columns.iter().find(|c| c.point == point)
    }
}

// ---------------------------------------------------------------------------
// Engine traits
// ---------------------------------------------------------------------------

/// RTDB storage: databases, items, mapping records and remote files.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn delete_database(&self, name: &str) -> EngineResult<()>;

    async fn create_database(&self, name: &str) -> EngineResult<()>;

    /// Select `name` as the current database.
    async fn load_database(&self, name: &str) -> EngineResult<()>;

    async fn upsert_items(&self, items: &BTreeMap<String, PointAttributes>, persist: bool) -> EngineResult<()>;

    async fn upsert_mapping_records(&self, records: &BTreeMap<String, MappingRecord>) -> EngineResult<()>;

    async fn save_database(&self, name: &str) -> EngineResult<()>;

    async fn write_remote_file(&self, lines: &[String], dir: &str, file: &str) -> EngineResult<()>;
}

/// Test definitions and their sessions.
#[async_trait]
pub trait TestEngine: Send + Sync {
    async fn delete_test(&self, name: &str) -> EngineResult<()>;

    async fn create_test(&self, name: &str, database: &str, description: &str, fixed_step_ms: u32) -> EngineResult<()>;

    async fn create_session(
        &self,
        test: &str,
        session: &str,
        description: &str,
        schedule_type: u32,
        no_logging: bool,
    ) -> EngineResult<()>;

    async fn start_session(&self, test: &str, session: &str) -> EngineResult<()>;

    /// Stop whichever session is running.
    async fn stop_session(&self, mode: StopMode) -> EngineResult<()>;

    async fn delete_session(&self, test: &str, session: &str) -> EngineResult<()>;
}

/// Live point values of the running session.
#[async_trait]
pub trait PointEngine: Send + Sync {
    async fn set_value(&self, point: &str, value: Value) -> EngineResult<()>;

    async fn get_values(&self, points: &[String]) -> EngineResult<BTreeMap<String, PointValue>>;
}

/// Engine-side waveform generators.
#[async_trait]
pub trait GeneratorEngine: Send + Sync {
    async fn add_generator(&self, point: &str, spec: &GeneratorSpec) -> EngineResult<GeneratorHandle>;

    async fn start_all_generators(&self) -> EngineResult<()>;
}

/// Post-run access to logged samples.
#[async_trait]
pub trait DataLogger: Send + Sync {
    async fn connect(&self, host: &str) -> EngineResult<()>;

    async fn select_project(&self, project: &str) -> EngineResult<()>;

    /// Select a logged run by `test/session` path.
    async fn select_session(&self, path: &str) -> EngineResult<()>;

    async fn query_test(&self) -> EngineResult<TestInfo>;

    async fn meta_table(&self) -> EngineResult<MetaTable>;

    /// Push up to `max_records` records of `point` into `sink`, returning how
    /// many were delivered. Fewer than requested is not an error.
    async fn get_records(
        &self,
        point: &str,
        max_records: usize,
        selector: SampleSelector,
        sink: &mut dyn RecordSink,
    ) -> EngineResult<usize>;
}

/// Everything a campaign needs from the platform.
pub trait Platform: StorageEngine + TestEngine + PointEngine + GeneratorEngine + DataLogger {}

impl<T> Platform for T where T: StorageEngine + TestEngine + PointEngine + GeneratorEngine + DataLogger {}
