//! Message routing descriptors and the flat line-record file format.
//!
//! Each line of `NET-IO.msgs.1` describes one message:
//!
//! ```text
//! name=in1,type=IN,messageid=0,protocol=tcp,messagelength=18,srcport=1,destip=127.0.0.1,destport=1000,samplingrate=10,msgflags=0x0000
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Direction, UnknownType};

/// Remote file name holding the message definitions.
pub const MESSAGE_FILE: &str = "NET-IO.msgs.1";

/// Remote directory holding the message file of `rtdb`.
pub fn message_dir(rtdb: &str) -> String {
    format!("RTDB/{rtdb}")
}

/// Transport used by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(UnknownType {
                kind: "protocol",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageParseError {
    #[error("malformed field '{0}', expected key=value")]
    Malformed(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value '{value}' for field '{field}'")]
    InvalidField { field: &'static str, value: String },
}

/// One message routing descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub direction: Direction,
    pub id: u32,
    pub protocol: Protocol,
    pub length: u32,
    pub src_port: u16,
    pub dest_ip: Ipv4Addr,
    pub dest_port: u16,
    pub sampling_rate: u32,
    pub flags: u16,
}

impl Message {
    /// A message on the local loopback: IN messages are received on port 1000
    /// from port 1, OUT messages are sent from port 1000 to port 1.
    pub fn loopback(name: &str, direction: Direction, id: u32, protocol: Protocol, length: u32) -> Self {
        let (src_port, dest_port) = match direction {
            Direction::In => (1, 1000),
            Direction::Out => (1000, 1),
        };
        Self {
            name: name.to_string(),
            direction,
            id,
            protocol,
            length,
            src_port,
            dest_ip: Ipv4Addr::LOCALHOST,
            dest_port,
            sampling_rate: 10,
            flags: 0,
        }
    }

    /// Render as a single line record (no trailing newline).
    pub fn to_line(&self) -> String {
        format!(
            "name={},type={},messageid={},protocol={},messagelength={},srcport={},destip={},destport={},samplingrate={},msgflags=0x{:04x}",
            self.name,
            self.direction,
            self.id,
            self.protocol,
            self.length,
            self.src_port,
            self.dest_ip,
            self.dest_port,
            self.sampling_rate,
            self.flags,
        )
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn field<'a>(fields: &HashMap<&str, &'a str>, key: &'static str) -> Result<&'a str, MessageParseError> {
    fields
        .get(key)
        .copied()
        .ok_or(MessageParseError::MissingField(key))
}

fn parse_field<T: FromStr>(fields: &HashMap<&str, &str>, key: &'static str) -> Result<T, MessageParseError> {
    let raw = field(fields, key)?;
    raw.parse().map_err(|_| MessageParseError::InvalidField {
        field: key,
        value: raw.to_string(),
    })
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = HashMap::new();
        for part in line.trim().split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| MessageParseError::Malformed(part.to_string()))?;
            fields.insert(key.trim(), value.trim());
        }

        let direction = match field(&fields, "type")? {
            "IN" => Direction::In,
            "OUT" => Direction::Out,
            other => {
                return Err(MessageParseError::InvalidField {
                    field: "type",
                    value: other.to_string(),
                })
            }
        };

        let flags_raw = field(&fields, "msgflags")?;
        let flags = u16::from_str_radix(flags_raw.trim_start_matches("0x"), 16).map_err(|_| {
            MessageParseError::InvalidField {
                field: "msgflags",
                value: flags_raw.to_string(),
            }
        })?;

        Ok(Message {
            name: field(&fields, "name")?.to_string(),
            direction,
            id: parse_field(&fields, "messageid")?,
            protocol: parse_field(&fields, "protocol")?,
            length: parse_field(&fields, "messagelength")?,
            src_port: parse_field(&fields, "srcport")?,
            dest_ip: parse_field(&fields, "destip")?,
            dest_port: parse_field(&fields, "destport")?,
            sampling_rate: parse_field(&fields, "samplingrate")?,
            flags,
        })
    }
}
