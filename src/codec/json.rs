// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt::Write as _;
use std::io::Cursor;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Number, Value};

use super::{Codec, CodecError, ScratchBuffer};
use crate::message::{ElementDef, ElementRegistry, ElementType, FieldSpec, Record};
use crate::service::{FormatConfig, ProtocolFormat, TcpFlagsFormat, TimestampFormat};

const ID_PROTOCOL: u16 = 4;
const ID_TCP_FLAGS: u16 = 6;

const TCP_FLAGS: [(u64, char); 6] = [
    (0x20, 'U'),
    (0x10, 'A'),
    (0x08, 'P'),
    (0x04, 'R'),
    (0x02, 'S'),
    (0x01, 'F'),
];

/// Switches that shape the JSON output, derived from `[format]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatFlags {
    pub tcp_flags: bool,
    pub timestamp: bool,
    pub protocol: bool,
    pub ignore_unknown: bool,
    pub non_printable: bool,
    pub numeric_names: bool,
    pub octets_as_uint: bool,
    pub skip_reverse: bool,
}

impl From<&FormatConfig> for FormatFlags {
    fn from(format: &FormatConfig) -> Self {
        Self {
            tcp_flags: format.tcp_flags == TcpFlagsFormat::Formatted,
            timestamp: format.timestamp == TimestampFormat::Formatted,
            protocol: format.protocol == ProtocolFormat::Formatted,
            ignore_unknown: format.ignore_unknown,
            non_printable: format.non_printable_char,
            numeric_names: format.numeric_names,
            octets_as_uint: format.octet_array_as_uint,
            skip_reverse: format.split_biflow,
        }
    }
}

impl Default for FormatFlags {
    fn default() -> Self {
        Self::from(&FormatConfig::default())
    }
}

/// Fields in template order; repeated names collapse into an array.
struct Document {
    kind: &'static str,
    fields: Vec<(String, Value)>,
}

impl Document {
    fn push(&mut self, name: String, value: Value) {
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some((_, Value::Array(values))) => values.push(value),
            Some((_, existing)) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => self.fields.push((name, value)),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("@type", self.kind)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Renders a record as one JSON object.
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    flags: FormatFlags,
}

impl JsonCodec {
    pub fn new(flags: FormatFlags) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> FormatFlags {
        self.flags
    }

    fn document(
        &self,
        record: &Record,
        elements: &ElementRegistry,
    ) -> Result<Document, CodecError> {
        let kind = if record.is_options() {
            "ipfix.optionsEntry"
        } else {
            "ipfix.entry"
        };
        let mut document = Document {
            kind,
            fields: Vec::with_capacity(record.template.fields.len()),
        };
        for field in record.fields() {
            let (spec, raw) = field?;
            if spec.is_reverse() && self.flags.skip_reverse {
                continue;
            }
            let def = elements.lookup(spec.enterprise, spec.id);
            if def.is_none() && self.flags.ignore_unknown {
                continue;
            }
            let name = self.field_name(spec, def, elements);
            let value = self.field_value(spec, def, raw)?;
            document.push(name, value);
        }
        Ok(document)
    }

    fn field_name(
        &self,
        spec: &FieldSpec,
        def: Option<&ElementDef>,
        elements: &ElementRegistry,
    ) -> String {
        if !self.flags.numeric_names {
            if let (Some(def), Some(scope)) = (def, elements.scope_name(spec.enterprise)) {
                return format!("{scope}:{}", def.name);
            }
        }
        format!("en{}:id{}", spec.enterprise, spec.id)
    }

    fn field_value(
        &self,
        spec: &FieldSpec,
        def: Option<&ElementDef>,
        raw: &[u8],
    ) -> Result<Value, CodecError> {
        let Some(def) = def else {
            return Ok(self.octets(raw));
        };
        let unsupported = || {
            CodecError::Unsupported(format!(
                "{} ({:?}) with {} bytes",
                def.name,
                def.data_type,
                raw.len()
            ))
        };
        let is_iana = spec.enterprise == 0 || spec.is_reverse();

        let value = match def.data_type {
            ElementType::Unsigned => {
                let value = unsigned(raw).ok_or_else(unsupported)?;
                match spec.id {
                    ID_TCP_FLAGS if is_iana && self.flags.tcp_flags => {
                        Value::String(tcp_flags(value))
                    }
                    ID_PROTOCOL if is_iana && self.flags.protocol => {
                        protocol_name(value).map_or_else(|| Value::from(value), Value::from)
                    }
                    _ => Value::from(value),
                }
            }
            ElementType::Signed => Value::from(signed(raw).ok_or_else(unsupported)?),
            ElementType::Float => {
                let value = match raw.len() {
                    4 => f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
                    8 => {
                        let mut bytes = [0u8; 8];
                        bytes.copy_from_slice(raw);
                        f64::from_be_bytes(bytes)
                    }
                    _ => return Err(unsupported()),
                };
                Number::from_f64(value).map_or(Value::Null, Value::Number)
            }
            ElementType::Boolean => match raw {
                [1] => Value::Bool(true),
                [2] => Value::Bool(false),
                _ => return Err(unsupported()),
            },
            ElementType::MacAddress => {
                if raw.len() != 6 {
                    return Err(unsupported());
                }
                let mac: Vec<String> = raw.iter().map(|byte| format!("{byte:02x}")).collect();
                Value::String(mac.join(":"))
            }
            ElementType::OctetArray => self.octets(raw),
            ElementType::String => Value::String(self.string(raw)),
            ElementType::DateTimeSeconds => {
                let seconds = unsigned(raw).ok_or_else(unsupported)?;
                self.timestamp(seconds.saturating_mul(1000))
            }
            ElementType::DateTimeMilliseconds => {
                self.timestamp(unsigned(raw).ok_or_else(unsupported)?)
            }
            ElementType::Ipv4Address => {
                let octets: [u8; 4] = raw.try_into().map_err(|_| unsupported())?;
                Value::String(Ipv4Addr::from(octets).to_string())
            }
            ElementType::Ipv6Address => {
                let octets: [u8; 16] = raw.try_into().map_err(|_| unsupported())?;
                Value::String(Ipv6Addr::from(octets).to_string())
            }
        };
        Ok(value)
    }

    fn octets(&self, raw: &[u8]) -> Value {
        if self.flags.octets_as_uint {
            if let Some(value) = unsigned(raw) {
                return Value::from(value);
            }
        }
        if raw.is_empty() {
            return Value::String(String::new());
        }
        let mut hex = String::with_capacity(2 + raw.len() * 2);
        hex.push_str("0x");
        for byte in raw {
            let _ = write!(hex, "{byte:02x}");
        }
        Value::String(hex)
    }

    fn string(&self, raw: &[u8]) -> String {
        let text = String::from_utf8_lossy(raw);
        if self.flags.non_printable {
            text.into_owned()
        } else {
            text.chars().filter(|c| !c.is_control()).collect()
        }
    }

    fn timestamp(&self, millis: u64) -> Value {
        if self.flags.timestamp {
            let formatted = i64::try_from(millis)
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true));
            if let Some(formatted) = formatted {
                return Value::String(formatted);
            }
        }
        Value::from(millis)
    }
}

impl Codec for JsonCodec {
    fn convert(
        &self,
        record: &Record,
        elements: &ElementRegistry,
        out: &mut ScratchBuffer,
    ) -> Result<usize, CodecError> {
        let document = self.document(record, elements)?;
        let mut cursor = Cursor::new(out.as_mut_slice());
        match serde_json::to_writer(&mut cursor, &document) {
            Ok(()) => Ok(cursor.position() as usize),
            Err(err) if err.is_io() => {
                let required = serde_json::to_vec(&document).map(|json| json.len()).ok();
                Err(CodecError::BufferTooSmall { required })
            }
            Err(err) => Err(CodecError::Unsupported(err.to_string())),
        }
    }
}

/// Big-endian unsigned of 1 to 8 bytes (reduced-size encoding).
fn unsigned(raw: &[u8]) -> Option<u64> {
    if raw.is_empty() || raw.len() > 8 {
        return None;
    }
    Some(raw.iter().fold(0u64, |acc, byte| (acc << 8) | *byte as u64))
}

fn signed(raw: &[u8]) -> Option<i64> {
    let value = unsigned(raw)?;
    let shift = 64 - raw.len() as u32 * 8;
    Some(((value << shift) as i64) >> shift)
}

fn tcp_flags(value: u64) -> String {
    TCP_FLAGS
        .iter()
        .map(|(bit, name)| if value & bit != 0 { *name } else { '.' })
        .collect()
}

fn protocol_name(value: u64) -> Option<&'static str> {
    let name = match value {
        1 => "ICMP",
        2 => "IGMP",
        6 => "TCP",
        17 => "UDP",
        41 => "IPv6",
        47 => "GRE",
        50 => "ESP",
        51 => "AH",
        58 => "IPv6-ICMP",
        89 => "OSPF",
        132 => "SCTP",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::message::{Template, TemplateKind, REVERSE_PEN, VARIABLE_LENGTH};

    const JAN_1_2023_MS: u64 = 1_672_531_200_000;

    fn flow_record(kind: TemplateKind) -> Record {
        let template = Template::new(
            256,
            kind,
            vec![
                FieldSpec::iana(8, 4),
                FieldSpec::iana(12, 4),
                FieldSpec::iana(7, 2),
                FieldSpec::iana(11, 2),
                FieldSpec::iana(4, 1),
                FieldSpec::iana(6, 1),
                FieldSpec::iana(1, 8),
                FieldSpec::iana(152, 8),
            ],
        );
        let mut data = vec![192, 168, 0, 1, 10, 0, 0, 2, 0xc3, 0x50, 0x01, 0xbb, 6, 0x12];
        data.extend_from_slice(&1500u64.to_be_bytes());
        data.extend_from_slice(&JAN_1_2023_MS.to_be_bytes());
        Record::new(Arc::new(template), data)
    }

    fn to_json(codec: &JsonCodec, record: &Record) -> Value {
        let elements = ElementRegistry::with_iana_defaults();
        let mut scratch = ScratchBuffer::with_capacity(1024);
        let len = codec.convert(record, &elements, &mut scratch).unwrap();
        serde_json::from_slice(scratch.filled(len)).unwrap()
    }

    #[test]
    fn test_formatted_output() {
        let json = to_json(&JsonCodec::default(), &flow_record(TemplateKind::Data));
        assert_eq!(json["@type"], "ipfix.entry");
        assert_eq!(json["iana:sourceIPv4Address"], "192.168.0.1");
        assert_eq!(json["iana:destinationIPv4Address"], "10.0.0.2");
        assert_eq!(json["iana:sourceTransportPort"], 50000);
        assert_eq!(json["iana:destinationTransportPort"], 443);
        assert_eq!(json["iana:protocolIdentifier"], "TCP");
        assert_eq!(json["iana:tcpControlBits"], ".A..S.");
        assert_eq!(json["iana:octetDeltaCount"], 1500);
        assert_eq!(json["iana:flowStartMilliseconds"], "2023-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_raw_output() {
        let codec = JsonCodec::new(FormatFlags {
            tcp_flags: false,
            timestamp: false,
            protocol: false,
            ..FormatFlags::default()
        });
        let json = to_json(&codec, &flow_record(TemplateKind::Data));
        assert_eq!(json["iana:protocolIdentifier"], 6);
        assert_eq!(json["iana:tcpControlBits"], 0x12);
        assert_eq!(json["iana:flowStartMilliseconds"], JAN_1_2023_MS);
    }

    #[test]
    fn test_options_record_type() {
        let json = to_json(&JsonCodec::default(), &flow_record(TemplateKind::Options));
        assert_eq!(json["@type"], "ipfix.optionsEntry");
    }

    #[test]
    fn test_numeric_names() {
        let codec = JsonCodec::new(FormatFlags {
            numeric_names: true,
            ..FormatFlags::default()
        });
        let json = to_json(&codec, &flow_record(TemplateKind::Data));
        assert_eq!(json["en0:id8"], "192.168.0.1");
        assert!(json.get("iana:sourceIPv4Address").is_none());
    }

    #[test]
    fn test_unknown_fields() {
        let template = Arc::new(Template::new(
            257,
            TemplateKind::Data,
            vec![FieldSpec::new(8057, 5, 2), FieldSpec::new(8057, 6, 10)],
        ));
        let mut data = vec![0x01, 0x02];
        data.extend_from_slice(&[0xab; 10]);
        let record = Record::new(template, data);

        let json = to_json(&JsonCodec::default(), &record);
        assert!(json.get("en8057:id5").is_none());

        let codec = JsonCodec::new(FormatFlags {
            ignore_unknown: false,
            ..FormatFlags::default()
        });
        let json = to_json(&codec, &record);
        assert_eq!(json["en8057:id5"], 0x0102);
        assert_eq!(json["en8057:id6"], "0xabababababababababab");

        let codec = JsonCodec::new(FormatFlags {
            ignore_unknown: false,
            octets_as_uint: false,
            ..FormatFlags::default()
        });
        let json = to_json(&codec, &record);
        assert_eq!(json["en8057:id5"], "0x0102");
    }

    #[test]
    fn test_biflow_split() {
        let template = Arc::new(Template::new(
            258,
            TemplateKind::Data,
            vec![FieldSpec::iana(1, 4), FieldSpec::new(REVERSE_PEN, 1, 4)],
        ));
        let record = Record::new(template, vec![0, 0, 0, 10, 0, 0, 0, 20]);

        let json = to_json(&JsonCodec::default(), &record);
        assert_eq!(json["iana:octetDeltaCount"], 10);
        assert_eq!(json["iana@reverse:octetDeltaCount"], 20);

        let codec = JsonCodec::new(FormatFlags {
            skip_reverse: true,
            ..FormatFlags::default()
        });
        let json = to_json(&codec, &record);
        assert!(json.get("iana@reverse:octetDeltaCount").is_none());
    }

    #[test]
    fn test_strings_and_repeated_fields() {
        let template = Arc::new(Template::new(
            259,
            TemplateKind::Data,
            vec![
                FieldSpec::iana(82, VARIABLE_LENGTH),
                FieldSpec::iana(4, 1),
                FieldSpec::iana(4, 1),
            ],
        ));
        let record = Record::new(template, vec![4, b'e', 0x07, b't', b'h', 17, 6]);

        let json = to_json(&JsonCodec::default(), &record);
        assert_eq!(json["iana:interfaceName"], "e\u{7}th");
        assert_eq!(json["iana:protocolIdentifier"], serde_json::json!(["UDP", "TCP"]));

        let codec = JsonCodec::new(FormatFlags {
            non_printable: false,
            ..FormatFlags::default()
        });
        let json = to_json(&codec, &record);
        assert_eq!(json["iana:interfaceName"], "eth");
    }

    #[test]
    fn test_buffer_too_small_reports_required_length() {
        let codec = JsonCodec::default();
        let elements = ElementRegistry::with_iana_defaults();
        let record = flow_record(TemplateKind::Data);
        let mut scratch = ScratchBuffer::with_capacity(8);

        let required = match codec.convert(&record, &elements, &mut scratch) {
            Err(CodecError::BufferTooSmall {
                required: Some(required),
            }) => required,
            other => panic!("unexpected result: {other:?}"),
        };
        assert!(required > 8);

        assert!(scratch.grow(Some(required), 4096));
        let len = codec.convert(&record, &elements, &mut scratch).unwrap();
        assert_eq!(len, required);
    }

    #[test]
    fn test_truncated_record_is_malformed() {
        let template = Arc::new(Template::new(
            260,
            TemplateKind::Data,
            vec![FieldSpec::iana(8, 4)],
        ));
        let record = Record::new(template, vec![1, 2]);
        let elements = ElementRegistry::with_iana_defaults();
        let mut scratch = ScratchBuffer::with_capacity(256);
        assert!(matches!(
            JsonCodec::default().convert(&record, &elements, &mut scratch),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_template_produces_type_only() {
        let record = Record::new(
            Arc::new(Template::new(261, TemplateKind::Data, Vec::new())),
            Vec::new(),
        );
        let json = to_json(&JsonCodec::default(), &record);
        assert_eq!(json, serde_json::json!({"@type": "ipfix.entry"}));
    }

    #[test]
    fn test_signed_sign_extension() {
        assert_eq!(signed(&[0xff]), Some(-1));
        assert_eq!(signed(&[0x80, 0x00]), Some(-32768));
        assert_eq!(signed(&[0x7f]), Some(127));
        assert_eq!(unsigned(&[]), None);
    }
}
