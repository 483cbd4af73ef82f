//! Stimulus: engine-side generators on output points, or discrete writes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::pacing;
use crate::platform::{
    EndCondition, EngineError, GeneratorEngine, GeneratorHandle, GeneratorSpec, PointEngine, Value, Waveform,
};
use crate::topology::CvtType;

#[derive(Debug, Error)]
pub enum StimulusError {
    #[error("failed to attach generator to {point}")]
    GeneratorFailed {
        point: String,
        #[source]
        source: EngineError,
    },

    #[error("failed to start generators")]
    StartFailed(#[source] EngineError),

    #[error("failed to write {value} to {point}")]
    WriteFailed {
        point: String,
        value: Value,
        #[source]
        source: EngineError,
    },

    #[error("generator profile has no waveforms")]
    NoWaveforms,
}

/// Shape shared by every generator of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorProfile {
    /// Assigned to output points round-robin.
    pub waveforms: Vec<Waveform>,
    pub amplitude: f64,
    pub frequency: f64,
    pub phase: f64,
    pub duty: f64,
    pub start_delay: f64,
    pub duration: f64,
    /// Offset for unsigned and `llong` points, keeping the signal positive.
    pub unsigned_offset: f64,
}

impl Default for GeneratorProfile {
    fn default() -> Self {
        Self {
            waveforms: vec![Waveform::Sine, Waveform::Triangle],
            amplitude: 1.0,
            frequency: 30.0,
            phase: 0.0,
            duty: 100.0,
            start_delay: 0.0,
            duration: 30.0,
            unsigned_offset: 100.0,
        }
    }
}

impl GeneratorProfile {
    pub fn offset_for(&self, cvt: CvtType) -> f64 {
        if cvt.needs_positive_offset() {
            self.unsigned_offset
        } else {
            0.0
        }
    }

    /// Generator for the `index`-th output point.
    pub fn spec_for(&self, index: usize, cvt: CvtType) -> Option<GeneratorSpec> {
        if self.waveforms.is_empty() {
            return None;
        }
        Some(GeneratorSpec {
            end: EndCondition::Duration,
            waveform: self.waveforms[index % self.waveforms.len()],
            amplitude: self.amplitude,
            frequency: self.frequency,
            phase: self.phase,
            offset: self.offset_for(cvt),
            duty: self.duty,
            start_delay: self.start_delay,
            duration: self.duration,
        })
    }
}

/// Cycles through a fixed candidate list.
#[derive(Debug, Clone)]
pub struct Rotation<T> {
    items: Vec<T>,
    next: usize,
}

impl<T> Rotation<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, next: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn next_item(&mut self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let item = &self.items[self.next];
        self.next = (self.next + 1) % self.items.len();
        Some(item)
    }
}

pub struct StimulusDriver<'a, E: PointEngine + GeneratorEngine + ?Sized> {
    engine: &'a E,
}

impl<'a, E: PointEngine + GeneratorEngine + ?Sized> StimulusDriver<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Attach one generator per output point, then start them all together.
    pub async fn attach_generators(
        &self,
        outputs: &[String],
        cvt: CvtType,
        profile: &GeneratorProfile,
    ) -> Result<Vec<GeneratorHandle>, StimulusError> {
        let mut handles = Vec::with_capacity(outputs.len());
        for (index, point) in outputs.iter().enumerate() {
            let spec = profile.spec_for(index, cvt).ok_or(StimulusError::NoWaveforms)?;
            let handle = self
                .engine
                .add_generator(point, &spec)
                .await
                .map_err(|source| StimulusError::GeneratorFailed {
                    point: point.clone(),
                    source,
                })?;
            debug!(%point, waveform = ?spec.waveform, offset = spec.offset, "generator attached");
            handles.push(handle);
        }

        self.engine
            .start_all_generators()
            .await
            .map_err(StimulusError::StartFailed)?;
        info!(count = handles.len(), "generators started");
        Ok(handles)
    }

    /// Write a discrete value, then wait `settle`.
    pub async fn write(&self, point: &str, value: Value, settle: Duration) -> Result<(), StimulusError> {
        self.engine
            .set_value(point, value.clone())
            .await
            .map_err(|source| StimulusError::WriteFailed {
                point: point.to_string(),
                value: value.clone(),
                source,
            })?;
        debug!(point, %value, "value written");
        pacing::settle("write", settle).await;
        Ok(())
    }
}
