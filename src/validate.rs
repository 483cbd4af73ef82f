//! Comparison of observed against expected values.
//!
//! Validation failures are data, not errors: every check returns a
//! [`ValidationResult`] and the caller decides what a failure costs.

use serde::Serialize;
use thiserror::Error;

use crate::collect::CollectedPair;
use crate::topology::CvtType;

/// Allowed |input - output| for numeric series.
pub const DEFAULT_TOLERANCE: f64 = 3.0;

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    #[error(
        "difference {difference} exceeds tolerance {tolerance} at sample {index} \
         (t={at_secs:.3}s, input {input}, output {output})"
    )]
    ToleranceExceeded {
        index: usize,
        input: f64,
        output: f64,
        difference: f64,
        tolerance: f64,
        /// Seconds since the first collected sample.
        at_secs: f64,
    },

    #[error("no samples logged on either channel")]
    NoSamples,

    #[error("sample count mismatch: {input_len} input vs {output_len} output")]
    LengthMismatch { input_len: usize, output_len: usize },

    #[error("expected {expected:?}, observed {observed:?}")]
    StringMismatch { expected: String, observed: String },

    #[error("expected {expected}, observed {observed}")]
    ConstantMismatch { expected: f64, observed: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub input_point: String,
    pub output_point: String,
    pub label: String,
    pub failure: Option<Failure>,
}

impl ValidationResult {
    fn new(input_point: &str, output_point: &str, failure: Option<Failure>) -> Self {
        Self {
            input_point: input_point.to_string(),
            output_point: output_point.to_string(),
            label: format!("{output_point} -> {input_point}"),
            failure,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }

    pub fn diagnostic(&self) -> String {
        match &self.failure {
            None => "ok".to_string(),
            Some(f) => format!("{} -> {}: {f}", self.output_point, self.input_point),
        }
    }
}

/// The first index where two series differ by more than the tolerance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub index: usize,
    pub input: f64,
    pub output: f64,
    pub difference: f64,
}

/// Scan paired values in order. Equal to the tolerance passes; NaN on either
/// side fails.
pub fn first_breach(input: &[f64], output: &[f64], tolerance: f64) -> Option<Breach> {
    input
        .iter()
        .zip(output)
        .enumerate()
        .find_map(|(index, (&i, &o))| {
            let difference = (i - o).abs();
            (!(difference <= tolerance)).then_some(Breach {
                index,
                input: i,
                output: o,
                difference,
            })
        })
}

/// Compare the input's primary values with the output's alternate values.
/// Two empty series fail.
pub fn check_series(pair: &CollectedPair, tolerance: f64) -> ValidationResult {
    let input_point = &pair.input.point;
    let output_point = &pair.output.point;

    if pair.input.len() != pair.output.len() {
        let failure = Failure::LengthMismatch {
            input_len: pair.input.len(),
            output_len: pair.output.len(),
        };
        return ValidationResult::new(input_point, output_point, Some(failure));
    }
    if pair.input.is_empty() {
        return ValidationResult::new(input_point, output_point, Some(Failure::NoSamples));
    }

    let failure = first_breach(&pair.input.primaries(), &pair.output.alternates(), tolerance).map(|b| {
        let t0 = pair.first_timestamp.unwrap_or(0.0);
        Failure::ToleranceExceeded {
            index: b.index,
            input: b.input,
            output: b.output,
            difference: b.difference,
            tolerance,
            at_secs: pair.input.samples[b.index].timestamp - t0,
        }
    });
    ValidationResult::new(input_point, output_point, failure)
}

fn is_printable(c: char) -> bool {
    c.is_ascii_graphic() || matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Keep printable ASCII only: letters, digits, punctuation and whitespace.
pub fn printable(s: &str) -> String {
    s.chars().filter(|&c| is_printable(c)).collect()
}

/// Exact match after filtering the observed string to printable characters.
pub fn check_string(input_point: &str, output_point: &str, expected: &str, observed: &str) -> ValidationResult {
    let filtered = printable(observed);
    let failure = (filtered != expected).then(|| Failure::StringMismatch {
        expected: expected.to_string(),
        observed: filtered,
    });
    ValidationResult::new(input_point, output_point, failure)
}

/// Exact match against `expected` as representable in `cvt`.
pub fn check_constant(
    input_point: &str,
    output_point: &str,
    cvt: CvtType,
    expected: f64,
    observed: f64,
) -> ValidationResult {
    let expected = cvt.quantize(expected);
    let failure = (observed != expected).then_some(Failure::ConstantMismatch { expected, observed });
    ValidationResult::new(input_point, output_point, failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::{Sample, SampleSeries};
    use crate::platform::TestInfo;

    fn series(point: &str, values: &[f64], alternate: bool) -> SampleSeries {
        SampleSeries {
            point: point.to_string(),
            samples: values
                .iter()
                .enumerate()
                .map(|(i, &v)| Sample {
                    index: i as u64,
                    timestamp: 100.0 + i as f64 * 0.5,
                    primary: if alternate { 0.0 } else { v },
                    alternate: if alternate { v } else { 0.0 },
                    raw: v,
                    dl_flags: 0,
                    rt_flags: 0,
                })
                .collect(),
        }
    }

    fn pair(input: &[f64], output: &[f64]) -> CollectedPair {
        let input = series("In.point1", input, false);
        CollectedPair {
            first_timestamp: input.first_timestamp(),
            input,
            output: series("Out.point2", output, true),
            info: TestInfo {
                test: "t".into(),
                session: "s".into(),
                record_count: 0,
                points: Vec::new(),
            },
        }
    }

    #[test]
    fn test_tolerance_boundary() {
        let result = check_series(&pair(&[5.0, 5.0], &[2.0, 8.0]), 3.0);
        assert!(result.passed(), "{}", result.diagnostic());

        let result = check_series(&pair(&[5.0, 5.0, 5.0], &[5.0, 1.9, 0.0]), 3.0);
        match result.failure {
            Some(Failure::ToleranceExceeded { index, at_secs, .. }) => {
                assert_eq!(index, 1);
                assert_eq!(at_secs, 0.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_first_breach_reports_first_index() {
        let breach = first_breach(&[0.0, 10.0, 20.0], &[0.0, 0.0, 0.0], 3.0).unwrap();
        assert_eq!(breach.index, 1);
        assert_eq!(breach.difference, 10.0);
        assert!(first_breach(&[], &[], 3.0).is_none());
    }

    #[test]
    fn test_nan_fails() {
        assert!(first_breach(&[f64::NAN], &[0.0], 3.0).is_some());
    }

    #[test]
    fn test_length_mismatch() {
        let result = check_series(&pair(&[1.0, 2.0], &[1.0]), 3.0);
        assert_eq!(
            result.failure,
            Some(Failure::LengthMismatch {
                input_len: 2,
                output_len: 1
            })
        );
    }

    #[test]
    fn test_empty_series_fail() {
        let result = check_series(&pair(&[], &[]), 3.0);
        assert!(!result.passed());
        assert_eq!(result.failure, Some(Failure::NoSamples));
        assert!(result.diagnostic().contains("no samples"));
    }

    #[test]
    fn test_printable_filter() {
        assert_eq!(printable("abc\0"), "abc");
        assert_eq!(printable("a\u{7f}b\tc"), "ab\tc");
        assert!(check_string("In.point01", "Out.point02", "abc", "abc\0").passed());

        let result = check_string("In.point01", "Out.point02", "abc", "abd");
        assert!(!result.passed());
        assert!(result.diagnostic().contains("\"abd\""));
    }

    #[test]
    fn test_constant_check() {
        assert!(check_constant("In.point1", "Out.point2", CvtType::Llong, 9e10, 9e10).passed());
        assert!(check_constant("In.point1", "Out.point2", CvtType::Float, 1.1e38, 1.1e38_f32 as f64).passed());
        assert!(!check_constant("In.point1", "Out.point2", CvtType::Int, 7.0, 6.0).passed());
    }

    #[test]
    fn test_failure_serializes_with_kind() {
        let json = serde_json::to_value(Failure::ConstantMismatch {
            expected: 1.0,
            observed: 2.0,
        })
        .unwrap();
        assert_eq!(json["kind"], "constant_mismatch");
    }
}
