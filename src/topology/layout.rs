//! Parametrized I/O topologies: paired output -> input points plus the
//! messages that carry them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::{Message, Protocol};
use super::{build_point, BuiltPoint, CvtType, Direction, MappingRecord, PointAttributes, PointSpec, RawType};

/// Default message length for analog topologies (bytes).
pub const ANALOG_MESSAGE_LENGTH: u32 = 18;

/// Converted/raw type combination under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePair {
    pub cvt: CvtType,
    pub raw: RawType,
}

impl TypePair {
    pub fn new(cvt: CvtType, raw: RawType) -> Self {
        Self { cvt, raw }
    }
}

/// An output point whose value is expected to reappear on an input point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointPair {
    pub input: String,
    pub output: String,
}

/// A named point together with the spec it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyPoint {
    pub name: String,
    pub spec: PointSpec,
    pub built: BuiltPoint,
}

impl TopologyPoint {
    fn new(name: String, spec: PointSpec) -> Self {
        let built = build_point(&spec);
        Self { name, spec, built }
    }
}

/// Points, pairs and messages making up one provisioning generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub points: Vec<TopologyPoint>,
    pub pairs: Vec<PointPair>,
    pub messages: Vec<Message>,
}

impl Topology {
    /// Point attributes keyed by point name.
    pub fn items(&self) -> BTreeMap<String, PointAttributes> {
        self.points
            .iter()
            .map(|p| (p.name.clone(), p.built.attributes.clone()))
            .collect()
    }

    /// Mapping records keyed by record name.
    pub fn mappings(&self) -> BTreeMap<String, MappingRecord> {
        self.points
            .iter()
            .map(|p| (p.built.record_name.clone(), p.built.mapping.clone()))
            .collect()
    }

    pub fn message_lines(&self) -> Vec<String> {
        self.messages.iter().map(Message::to_line).collect()
    }

    pub fn point(&self, name: &str) -> Option<&TopologyPoint> {
        self.points.iter().find(|p| p.name == name)
    }

    pub fn outputs(&self) -> Vec<String> {
        self.pairs.iter().map(|p| p.output.clone()).collect()
    }
}

fn point_name(prefix: &str, index: usize, width: usize) -> String {
    format!("{prefix}.point{index:0width$}")
}

/// `pair_count` independent analog loops. Loop `i` (1-based) maps
/// `Out.point{2i}` onto message `out{i}` and `In.point{2i-1}` onto `in{i}`,
/// both with message id `i - 1`.
pub fn analog_topology(types: TypePair, protocol: Protocol, pair_count: usize, message_length: u32) -> Topology {
    let mut points = Vec::with_capacity(pair_count * 2);
    let mut pairs = Vec::with_capacity(pair_count);
    let mut messages = Vec::with_capacity(pair_count * 2);

    for i in 1..=pair_count {
        let in_msg = format!("in{i}");
        let out_msg = format!("out{i}");
        let input = point_name("In", 2 * i - 1, 1);
        let output = point_name("Out", 2 * i, 1);

        points.push(TopologyPoint::new(
            input.clone(),
            PointSpec::analog(Direction::In, types.cvt, types.raw, &in_msg),
        ));
        points.push(TopologyPoint::new(
            output.clone(),
            PointSpec::analog(Direction::Out, types.cvt, types.raw, &out_msg),
        ));
        pairs.push(PointPair { input, output });

        let id = (i - 1) as u32;
        messages.push(Message::loopback(&in_msg, Direction::In, id, protocol, message_length));
        messages.push(Message::loopback(&out_msg, Direction::Out, id, protocol, message_length));
    }

    Topology {
        points,
        pairs,
        messages,
    }
}

/// Shape of a packed string topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringShape {
    /// Number of string channels packed into the message pair.
    pub channels: usize,
    /// Length of each input string in bytes.
    pub string_length: u32,
    /// Byte distance between consecutive channels.
    pub stride: u32,
    pub message_length: u32,
}

impl Default for StringShape {
    fn default() -> Self {
        Self {
            channels: 5,
            string_length: 3,
            stride: 4,
            message_length: 30,
        }
    }
}

/// String channels packed into a single `in1`/`out1` message pair. Channel
/// `c` (0-based) sits at byte `c * stride`; inputs are named
/// `In.point{2c+1:02}`, outputs `Out.point{2c+2:02}`. Output channels carry no
/// fixed length.
pub fn string_topology(shape: &StringShape, protocol: Protocol) -> Topology {
    let mut inputs = Vec::with_capacity(shape.channels);
    let mut outputs = Vec::with_capacity(shape.channels);
    let mut pairs = Vec::with_capacity(shape.channels);

    for c in 0..shape.channels {
        let start = c as u32 * shape.stride;
        let input = point_name("In", 2 * c + 1, 2);
        let output = point_name("Out", 2 * c + 2, 2);

        inputs.push(TopologyPoint::new(
            input.clone(),
            PointSpec::string(Direction::In, "in1", start, shape.string_length),
        ));
        outputs.push(TopologyPoint::new(
            output.clone(),
            PointSpec::string(Direction::Out, "out1", start, 0),
        ));
        pairs.push(PointPair { input, output });
    }

    let mut points = inputs;
    points.extend(outputs);

    Topology {
        points,
        pairs,
        messages: vec![
            Message::loopback("in1", Direction::In, 0, protocol, shape.message_length),
            Message::loopback("out1", Direction::Out, 0, protocol, shape.message_length),
        ],
    }
}
