//! Post-run sample retrieval from the data logger, plus live snapshots.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::platform::{DataLogger, EngineError, LogRecord, PointEngine, PointValue, RecordSink, SampleSelector, TestInfo};

/// Records requested per point unless configured otherwise.
pub const DEFAULT_RECORD_CAP: usize = 1100;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("failed to connect to data logger at {host}")]
    Connect {
        host: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to select project {project}")]
    Project {
        project: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to select logged session {path}")]
    SessionSelect {
        path: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to query logged test {path}")]
    Query {
        path: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to fetch meta table for {path}")]
    MetaTable {
        path: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to retrieve records of {point}")]
    Records {
        point: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to read live value of {point}")]
    Snapshot {
        point: String,
        #[source]
        source: EngineError,
    },

    #[error("engine returned no value for {0}")]
    MissingValue(String),
}

/// One logged sample; seconds and nanoseconds merged into `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub index: u64,
    pub timestamp: f64,
    pub primary: f64,
    pub alternate: f64,
    pub raw: f64,
    pub dl_flags: u32,
    pub rt_flags: u32,
}

impl From<LogRecord> for Sample {
    fn from(r: LogRecord) -> Self {
        Self {
            index: r.index,
            timestamp: r.t_sec as f64 + f64::from(r.t_nsec) * 1e-9,
            primary: r.primary,
            alternate: r.alternate,
            raw: r.raw,
            dl_flags: r.dl_flags,
            rt_flags: r.rt_flags,
        }
    }
}

/// Samples of one point, in delivery order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSeries {
    pub point: String,
    pub samples: Vec<Sample>,
}

impl SampleSeries {
    pub fn new(point: &str) -> Self {
        Self {
            point: point.to_string(),
            samples: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn primaries(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.primary).collect()
    }

    pub fn alternates(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.alternate).collect()
    }

    pub fn timestamps(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    pub fn first_timestamp(&self) -> Option<f64> {
        self.samples.first().map(|s| s.timestamp)
    }
}

impl RecordSink for SampleSeries {
    fn accept(&mut self, record: LogRecord) {
        self.samples.push(Sample::from(record));
    }
}

/// Input and output buffers of one point pair, aligned by record index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectedPair {
    pub input: SampleSeries,
    pub output: SampleSeries,
    /// Timestamp of the first record delivered, the zero for relative times.
    pub first_timestamp: Option<f64>,
    pub info: TestInfo,
}

pub struct SampleCollector<'a, E: DataLogger + PointEngine + ?Sized> {
    engine: &'a E,
    host: String,
    project: String,
}

impl<'a, E: DataLogger + PointEngine + ?Sized> SampleCollector<'a, E> {
    pub fn new(engine: &'a E, host: &str, project: &str) -> Self {
        Self {
            engine,
            host: host.to_string(),
            project: project.to_string(),
        }
    }

    /// Pull up to `max_records` logged samples of `input` and `output` from
    /// the run at `test_path` (`test/session`).
    pub async fn collect(
        &self,
        test_path: &str,
        input: &str,
        output: &str,
        max_records: usize,
        selector: SampleSelector,
    ) -> Result<CollectedPair, CollectError> {
        self.engine
            .connect(&self.host)
            .await
            .map_err(|source| CollectError::Connect {
                host: self.host.clone(),
                source,
            })?;
        self.engine
            .select_project(&self.project)
            .await
            .map_err(|source| CollectError::Project {
                project: self.project.clone(),
                source,
            })?;
        self.engine
            .select_session(test_path)
            .await
            .map_err(|source| CollectError::SessionSelect {
                path: test_path.to_string(),
                source,
            })?;

        let info = self
            .engine
            .query_test()
            .await
            .map_err(|source| CollectError::Query {
                path: test_path.to_string(),
                source,
            })?;
        let meta = self
            .engine
            .meta_table()
            .await
            .map_err(|source| CollectError::MetaTable {
                path: test_path.to_string(),
                source,
            })?;
        debug!(path = test_path, records = info.record_count, columns = meta.columns.len(), "logged run selected");

        let mut input_series = SampleSeries::new(input);
        self.records_into(input, max_records, selector, &mut input_series).await?;
        let mut output_series = SampleSeries::new(output);
        self.records_into(output, max_records, selector, &mut output_series).await?;

        let first_timestamp = input_series
            .first_timestamp()
            .or_else(|| output_series.first_timestamp());

        info!(
            path = test_path,
            input,
            output,
            input_samples = input_series.len(),
            output_samples = output_series.len(),
            "samples collected"
        );

        Ok(CollectedPair {
            input: input_series,
            output: output_series,
            first_timestamp,
            info,
        })
    }

    async fn records_into(
        &self,
        point: &str,
        max_records: usize,
        selector: SampleSelector,
        sink: &mut SampleSeries,
    ) -> Result<(), CollectError> {
        let delivered = self
            .engine
            .get_records(point, max_records, selector, sink)
            .await
            .map_err(|source| CollectError::Records {
                point: point.to_string(),
                source,
            })?;
        if delivered < max_records {
            debug!(point, delivered, max_records, "fewer records than requested");
        }
        Ok(())
    }

    /// Current value of a single live point.
    pub async fn snapshot(&self, point: &str) -> Result<PointValue, CollectError> {
        let mut values = self
            .engine
            .get_values(&[point.to_string()])
            .await
            .map_err(|source| CollectError::Snapshot {
                point: point.to_string(),
                source,
            })?;
        values
            .remove(point)
            .ok_or_else(|| CollectError::MissingValue(point.to_string()))
    }
}
