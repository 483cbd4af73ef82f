//! Point specifications and the NET-IO record naming scheme.
//!
//! Every point provisioned into an RTDB is described by a [`PointSpec`].
//! [`build_point`] turns a spec into the three artefacts the platform needs:
//! the mapping record name, the point attributes, and the I/O mapping record.
//! The function is pure; identical specs always produce identical output, which
//! is what makes reprovisioning an overwrite instead of a duplication.

pub mod layout;
pub mod message;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Board identifier used in every mapping record.
pub const BOARD_ID: &str = "NET-IO";
/// Board instance number.
pub const BOARD_NUM: u32 = 1;
/// Width of every mapped channel in bits.
pub const NUM_BITS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} type '{value}'")]
pub struct UnknownType {
    pub kind: &'static str,
    pub value: String,
}

// ---------------------------------------------------------------------------
// Direction / role
// ---------------------------------------------------------------------------

/// Data direction as seen from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of point, as understood by the RTDB `pointtype` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointRole {
    AnalogIn,
    AnalogOut,
    StringIn,
    StringOut,
}

impl PointRole {
    /// Attribute code (`AI`, `AO`, `STRI`, `STRO`).
    pub fn code(&self) -> &'static str {
        match self {
            PointRole::AnalogIn => "AI",
            PointRole::AnalogOut => "AO",
            PointRole::StringIn => "STRI",
            PointRole::StringOut => "STRO",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            PointRole::AnalogIn | PointRole::StringIn => Direction::In,
            PointRole::AnalogOut | PointRole::StringOut => Direction::Out,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, PointRole::StringIn | PointRole::StringOut)
    }
}

impl fmt::Display for PointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Wire-level encoding of a mapped channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawType {
    Char,
    Short,
    Int,
    Llong,
    Float,
    Double,
    String,
}

impl RawType {
    /// Numeric raw type code embedded in record names (`Rt<code>`).
    pub fn code(&self) -> u8 {
        match self {
            RawType::Char => 1,
            RawType::Short => 2,
            RawType::Int => 3,
            RawType::Llong => 4,
            RawType::String => 8,
            RawType::Float => 9,
            RawType::Double => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RawType::Char => "char",
            RawType::Short => "short",
            RawType::Int => "int",
            RawType::Llong => "llong",
            RawType::Float => "float",
            RawType::Double => "double",
            RawType::String => "string",
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, RawType::String)
    }

    /// Value as it survives encoding into this raw type.
    ///
    /// Integer conversions saturate and truncate toward zero.
    pub fn quantize(&self, value: f64) -> f64 {
        match self {
            RawType::Char => value as i8 as f64,
            RawType::Short => value as i16 as f64,
            RawType::Int => value as i32 as f64,
            RawType::Llong => value as i64 as f64,
            RawType::Float => value as f32 as f64,
            RawType::Double | RawType::String => value,
        }
    }
}

impl fmt::Display for RawType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RawType {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "char" => Ok(RawType::Char),
            "short" => Ok(RawType::Short),
            "int" => Ok(RawType::Int),
            "llong" => Ok(RawType::Llong),
            "float" => Ok(RawType::Float),
            "double" => Ok(RawType::Double),
            "string" => Ok(RawType::String),
            other => Err(UnknownType {
                kind: "raw",
                value: other.to_string(),
            }),
        }
    }
}

/// Semantic ("converted") type of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CvtType {
    Char,
    Short,
    Int,
    Llong,
    Float,
    Double,
    Uchar,
    Ushort,
    Uint,
    String,
}

impl CvtType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CvtType::Char => "char",
            CvtType::Short => "short",
            CvtType::Int => "int",
            CvtType::Llong => "llong",
            CvtType::Float => "float",
            CvtType::Double => "double",
            CvtType::Uchar => "uchar",
            CvtType::Ushort => "ushort",
            CvtType::Uint => "uint",
            CvtType::String => "string",
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, CvtType::Uchar | CvtType::Ushort | CvtType::Uint)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, CvtType::String)
    }

    /// Whether a bipolar waveform must be lifted above zero to stay
    /// representable (unsigned types and `llong`).
    pub fn needs_positive_offset(&self) -> bool {
        self.is_unsigned() || matches!(self, CvtType::Llong)
    }

    /// Value as stored in a point of this type.
    pub fn quantize(&self, value: f64) -> f64 {
        match self {
            CvtType::Char => value as i8 as f64,
            CvtType::Short => value as i16 as f64,
            CvtType::Int => value as i32 as f64,
            CvtType::Llong => value as i64 as f64,
            CvtType::Uchar => value as u8 as f64,
            CvtType::Ushort => value as u16 as f64,
            CvtType::Uint => value as u32 as f64,
            CvtType::Float => value as f32 as f64,
            CvtType::Double | CvtType::String => value,
        }
    }
}

impl fmt::Display for CvtType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CvtType {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "char" => Ok(CvtType::Char),
            "short" => Ok(CvtType::Short),
            "int" => Ok(CvtType::Int),
            "llong" => Ok(CvtType::Llong),
            "float" => Ok(CvtType::Float),
            "double" => Ok(CvtType::Double),
            "uchar" => Ok(CvtType::Uchar),
            "ushort" => Ok(CvtType::Ushort),
            "uint" => Ok(CvtType::Uint),
            "string" => Ok(CvtType::String),
            other => Err(UnknownType {
                kind: "cvt",
                value: other.to_string(),
            }),
        }
    }
}

/// RTDB meta flags bitmask, rendered as `0x<hex>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaFlags(pub u16);

impl MetaFlags {
    /// Flags applied to numeric points: `int` channels get `0x48`, everything
    /// else `0x8`. String points carry none.
    pub fn for_raw_type(raw: RawType) -> Option<MetaFlags> {
        match raw {
            RawType::String => None,
            RawType::Int => Some(MetaFlags(0x48)),
            _ => Some(MetaFlags(0x8)),
        }
    }
}

impl fmt::Display for MetaFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PointSpec and builder output
// ---------------------------------------------------------------------------

/// Everything needed to derive a point's record name, attributes and mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointSpec {
    pub role: PointRole,
    pub cvt_type: CvtType,
    pub raw_type: RawType,
    /// Message tag the channel is packed into (`in1`, `out2`, ...).
    pub message: String,
    pub start_byte: u32,
    /// String length in bytes; zero for numeric points.
    pub string_length: u32,
    pub meta_flags: Option<MetaFlags>,
}

impl PointSpec {
    /// A 64-bit numeric channel at byte 0 of `message`.
    pub fn analog(direction: Direction, cvt_type: CvtType, raw_type: RawType, message: &str) -> Self {
        let role = match direction {
            Direction::In => PointRole::AnalogIn,
            Direction::Out => PointRole::AnalogOut,
        };
        Self {
            role,
            cvt_type,
            raw_type,
            message: message.to_string(),
            start_byte: 0,
            string_length: 0,
            meta_flags: MetaFlags::for_raw_type(raw_type),
        }
    }

    /// A string channel at `start_byte` of `message`.
    pub fn string(direction: Direction, message: &str, start_byte: u32, string_length: u32) -> Self {
        let role = match direction {
            Direction::In => PointRole::StringIn,
            Direction::Out => PointRole::StringOut,
        };
        Self {
            role,
            cvt_type: CvtType::String,
            raw_type: RawType::String,
            message: message.to_string(),
            start_byte,
            string_length,
            meta_flags: None,
        }
    }
}

/// Attributes written to the RTDB for a single point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointAttributes {
    pub point_type: PointRole,
    pub cvt_type: CvtType,
    /// Name of the mapping record bound to this point.
    pub mapping_record: String,
    pub meta_flags: Option<MetaFlags>,
}

impl PointAttributes {
    /// Attribute fields in the platform's vocabulary.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("pointtype", self.point_type.code().to_string()),
            ("cvttype", self.cvt_type.to_string()),
            ("mappingrecords", self.mapping_record.clone()),
        ];
        if let Some(flags) = self.meta_flags {
            fields.push(("metaflags", flags.to_string()));
        }
        fields
    }
}

/// Board/byte/bit addressing for one point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub board_id: String,
    pub board_num: u32,
    pub direction: Direction,
    pub start_byte: u32,
    pub start_bit: u32,
    pub num_bits: u32,
    pub raw_type: RawType,
    pub string_length: u32,
    pub io_flags: u16,
    pub control_type: u32,
    pub message: String,
}

impl MappingRecord {
    /// Mapping fields in the platform's vocabulary.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("boardid", self.board_id.clone()),
            ("boardnum", self.board_num.to_string()),
            ("type", self.direction.to_string()),
            ("startbyte", self.start_byte.to_string()),
            ("startbit", self.start_bit.to_string()),
            ("numbits", self.num_bits.to_string()),
            ("rawtype", self.raw_type.to_string()),
            ("stringlength", self.string_length.to_string()),
            ("ioflags", format!("0x{:04x}", self.io_flags)),
            ("controltype", self.control_type.to_string()),
            ("message", self.message.clone()),
        ]
    }
}

/// Output of [`build_point`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPoint {
    pub record_name: String,
    pub attributes: PointAttributes,
    pub mapping: MappingRecord,
}

/// Deterministic mapping record name for a channel.
pub fn record_name(role: PointRole, start_byte: u32, raw_type: RawType, message: &str) -> String {
    let direction = role.direction();
    let module = match direction {
        Direction::In => "in",
        Direction::Out => "out",
    };
    format!(
        "{BOARD_ID}_{BOARD_NUM}_M{module}_S{start_byte}s0n{NUM_BITS}_Rt{code}_{direction}__ctrl0_{message}",
        code = raw_type.code(),
    )
}

/// Derive the record name, attributes and mapping for `spec`.
///
/// Analog roles always map at byte 0 with no string length, whatever `spec`
/// says; string roles honour both.
pub fn build_point(spec: &PointSpec) -> BuiltPoint {
    let (start_byte, string_length) = if spec.role.is_string() {
        (spec.start_byte, spec.string_length)
    } else {
        (0, 0)
    };

    let name = record_name(spec.role, start_byte, spec.raw_type, &spec.message);

    let attributes = PointAttributes {
        point_type: spec.role,
        cvt_type: spec.cvt_type,
        mapping_record: name.clone(),
        meta_flags: spec.meta_flags,
    };

    let mapping = MappingRecord {
        board_id: BOARD_ID.to_string(),
        board_num: BOARD_NUM,
        direction: spec.role.direction(),
        start_byte,
        start_bit: 0,
        num_bits: NUM_BITS,
        raw_type: spec.raw_type,
        string_length,
        io_flags: 0,
        control_type: 0,
        message: spec.message.clone(),
    };

    BuiltPoint {
        record_name: name,
        attributes,
        mapping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analog_in_int_name() {
        let spec = PointSpec::analog(Direction::In, CvtType::Int, RawType::Int, "in1");
        let built = build_point(&spec);
        assert_eq!(built.record_name, "NET-IO_1_Min_S0s0n64_Rt3_IN__ctrl0_in1");
        assert_eq!(built.attributes.mapping_record, built.record_name);
        assert_eq!(built.mapping.start_byte, 0);
        assert_eq!(built.mapping.num_bits, 64);
        assert_eq!(built.mapping.message, "in1");
    }

    #[test]
    fn test_analog_out_name() {
        let spec = PointSpec::analog(Direction::Out, CvtType::Uint, RawType::Llong, "out2");
        let built = build_point(&spec);
        assert_eq!(built.record_name, "NET-IO_1_Mout_S0s0n64_Rt4_OUT__ctrl0_out2");
        assert_eq!(built.attributes.point_type, PointRole::AnalogOut);
        assert_eq!(built.mapping.direction, Direction::Out);
    }

    #[test]
    fn test_build_point_is_deterministic() {
        for raw in [RawType::Char, RawType::Int, RawType::Double, RawType::String] {
            let spec = PointSpec {
                role: PointRole::AnalogIn,
                cvt_type: CvtType::Double,
                raw_type: raw,
                message: "in1".into(),
                start_byte: 0,
                string_length: 0,
                meta_flags: MetaFlags::for_raw_type(raw),
            };
            assert_eq!(build_point(&spec), build_point(&spec.clone()));
        }
    }

    #[test]
    fn test_analog_ignores_offset_and_length() {
        let mut spec = PointSpec::analog(Direction::In, CvtType::Short, RawType::Short, "in1");
        spec.start_byte = 12;
        spec.string_length = 9;
        let built = build_point(&spec);
        assert_eq!(built.mapping.start_byte, 0);
        assert_eq!(built.mapping.string_length, 0);
        assert!(built.record_name.contains("_S0s0n64_"));
    }

    #[test]
    fn test_string_channels_are_independently_addressed() {
        let a = build_point(&PointSpec::string(Direction::In, "in1", 0, 3));
        let b = build_point(&PointSpec::string(Direction::In, "in1", 8, 3));
        assert_eq!(a.record_name, "NET-IO_1_Min_S0s0n64_Rt8_IN__ctrl0_in1");
        assert_eq!(b.record_name, "NET-IO_1_Min_S8s0n64_Rt8_IN__ctrl0_in1");
        assert_eq!(b.mapping.string_length, 3);
        assert!(b.attributes.meta_flags.is_none());
    }

    #[test]
    fn test_meta_flags_policy() {
        assert_eq!(MetaFlags::for_raw_type(RawType::Int), Some(MetaFlags(0x48)));
        assert_eq!(MetaFlags::for_raw_type(RawType::Float), Some(MetaFlags(0x8)));
        assert_eq!(MetaFlags::for_raw_type(RawType::String), None);
        assert_eq!(MetaFlags(0x48).to_string(), "0x48");
        assert_eq!(MetaFlags(0x8).to_string(), "0x8");
    }

    #[test]
    fn test_attribute_fields() {
        let built = build_point(&PointSpec::analog(Direction::Out, CvtType::Int, RawType::Int, "out1"));
        let fields = built.attributes.fields();
        assert!(fields.contains(&("pointtype", "AO".to_string())));
        assert!(fields.contains(&("metaflags", "0x48".to_string())));
        let mapping = built.mapping.fields();
        assert!(mapping.contains(&("ioflags", "0x0000".to_string())));
        assert!(mapping.contains(&("type", "OUT".to_string())));
    }

    #[test]
    fn test_quantize_saturates() {
        assert_eq!(CvtType::Char.quantize(300.0), 127.0);
        assert_eq!(CvtType::Uchar.quantize(-5.0), 0.0);
        assert_eq!(CvtType::Int.quantize(2.1e9), 2_100_000_000.0);
        assert_eq!(CvtType::Llong.quantize(9e10), 9e10);
        assert_eq!(RawType::Short.quantize(1.9), 1.0);
        assert_ne!(CvtType::Float.quantize(1.1e38), 1.1e38);
    }

    #[test]
    fn test_type_names_parse() {
        assert_eq!("ushort".parse::<CvtType>().unwrap(), CvtType::Ushort);
        assert_eq!("llong".parse::<RawType>().unwrap(), RawType::Llong);
        assert!("uint".parse::<RawType>().is_err());
        assert!(CvtType::Llong.needs_positive_offset());
        assert!(CvtType::Uchar.needs_positive_offset());
        assert!(!CvtType::Int.needs_positive_offset());
    }
}
