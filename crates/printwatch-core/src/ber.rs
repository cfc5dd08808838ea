use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_IP_ADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_OPAQUE: u8 = 0x44;
pub const TAG_COUNTER64: u8 = 0x46;
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

pub const PDU_GET_REQUEST: u8 = 0xA0;
pub const PDU_RESPONSE: u8 = 0xA2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BerError {
    #[error("truncated input")]
    Truncated,
    #[error("unexpected tag 0x{found:02X}, expected 0x{expected:02X}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("invalid length encoding")]
    BadLength,
    #[error("integer does not fit")]
    IntegerOverflow,
    #[error("invalid object identifier: {0}")]
    BadOid(String),
    #[error("unsupported pdu 0x{0:02X}")]
    UnsupportedPdu(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn from_arcs(arcs: Vec<u32>) -> Result<Self, BerError> {
        if arcs.len() < 2 {
            return Err(BerError::BadOid("needs at least two arcs".to_string()));
        }
        if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
            return Err(BerError::BadOid(format!("{}.{} is not a valid root", arcs[0], arcs[1])));
        }
        Ok(Self(arcs))
    }

    pub fn from_static(arcs: &[u32]) -> Self {
        Self(arcs.to_vec())
    }
}

impl FromStr for Oid {
    type Err = BerError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let arcs = text
            .trim_start_matches('.')
            .split('.')
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| BerError::BadOid(text.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Oid::from_arcs(arcs)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .0
            .iter()
            .map(|arc| arc.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    Other { tag: u8, bytes: Vec<u8> },
}

impl Value {
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(i64::from(*v)),
            Value::Counter64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(v) => u64::try_from(*v).ok(),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Some(u64::from(*v)),
            Value::Counter64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::OctetString(bytes) | Value::Opaque(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        self.as_bytes().map(|bytes| {
            String::from_utf8_lossy(bytes)
                .trim_end_matches('\0')
                .trim()
                .to_string()
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub kind: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    pub fn get_request(version: i64, community: &str, request_id: i32, oids: &[Oid]) -> Self {
        Self {
            version,
            community: community.as_bytes().to_vec(),
            pdu: Pdu {
                kind: PDU_GET_REQUEST,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds: oids
                    .iter()
                    .map(|oid| VarBind {
                        oid: oid.clone(),
                        value: Value::Null,
                    })
                    .collect(),
            },
        }
    }

    pub fn response(version: i64, community: &[u8], request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            version,
            community: community.to_vec(),
            pdu: Pdu {
                kind: PDU_RESPONSE,
                request_id,
                error_status: 0,
                error_index: 0,
                varbinds,
            },
        }
    }
}

pub fn encode_message(message: &Message) -> Vec<u8> {
    let mut varbinds = Vec::new();
    for varbind in &message.pdu.varbinds {
        let mut entry = Vec::new();
        push_tlv(&mut entry, TAG_OID, &encode_oid(&varbind.oid));
        push_value(&mut entry, &varbind.value);
        push_tlv(&mut varbinds, TAG_SEQUENCE, &entry);
    }

    let mut pdu = Vec::new();
    push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(i64::from(message.pdu.request_id)));
    push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(message.pdu.error_status));
    push_tlv(&mut pdu, TAG_INTEGER, &encode_integer(message.pdu.error_index));
    push_tlv(&mut pdu, TAG_SEQUENCE, &varbinds);

    let mut body = Vec::new();
    push_tlv(&mut body, TAG_INTEGER, &encode_integer(message.version));
    push_tlv(&mut body, TAG_OCTET_STRING, &message.community);
    push_tlv(&mut body, message.pdu.kind, &pdu);

    let mut out = Vec::with_capacity(body.len() + 4);
    push_tlv(&mut out, TAG_SEQUENCE, &body);
    out
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, BerError> {
    let mut outer = Reader::new(bytes);
    let body = outer.expect(TAG_SEQUENCE)?;

    let mut reader = Reader::new(body);
    let version = decode_integer(reader.expect(TAG_INTEGER)?)?;
    let community = reader.expect(TAG_OCTET_STRING)?.to_vec();
    let (kind, pdu_body) = reader.read_tlv()?;
    if !(0xA0..=0xA3).contains(&kind) && kind != 0xA5 && kind != 0xA7 && kind != 0xA8 {
        return Err(BerError::UnsupportedPdu(kind));
    }

    let mut pdu = Reader::new(pdu_body);
    let request_id = decode_integer(pdu.expect(TAG_INTEGER)?)?;
    let request_id = i32::try_from(request_id).map_err(|_| BerError::IntegerOverflow)?;
    let error_status = decode_integer(pdu.expect(TAG_INTEGER)?)?;
    let error_index = decode_integer(pdu.expect(TAG_INTEGER)?)?;

    let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut entry = Reader::new(list.expect(TAG_SEQUENCE)?);
        let oid = decode_oid(entry.expect(TAG_OID)?)?;
        let (tag, content) = entry.read_tlv()?;
        varbinds.push(VarBind {
            oid,
            value: decode_value(tag, content)?,
        });
    }

    Ok(Message {
        version,
        community,
        pdu: Pdu {
            kind,
            request_id,
            error_status,
            error_index,
            varbinds,
        },
    })
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    push_length(out, content.len());
    out.extend_from_slice(content);
}

fn push_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(v) => push_tlv(out, TAG_INTEGER, &encode_integer(*v)),
        Value::OctetString(bytes) => push_tlv(out, TAG_OCTET_STRING, bytes),
        Value::Null => push_tlv(out, TAG_NULL, &[]),
        Value::ObjectId(oid) => push_tlv(out, TAG_OID, &encode_oid(oid)),
        Value::IpAddress(octets) => push_tlv(out, TAG_IP_ADDRESS, octets),
        Value::Counter32(v) => push_tlv(out, TAG_COUNTER32, &encode_unsigned(u64::from(*v))),
        Value::Gauge32(v) => push_tlv(out, TAG_GAUGE32, &encode_unsigned(u64::from(*v))),
        Value::TimeTicks(v) => push_tlv(out, TAG_TIMETICKS, &encode_unsigned(u64::from(*v))),
        Value::Opaque(bytes) => push_tlv(out, TAG_OPAQUE, bytes),
        Value::Counter64(v) => push_tlv(out, TAG_COUNTER64, &encode_unsigned(*v)),
        Value::NoSuchObject => push_tlv(out, TAG_NO_SUCH_OBJECT, &[]),
        Value::NoSuchInstance => push_tlv(out, TAG_NO_SUCH_INSTANCE, &[]),
        Value::EndOfMibView => push_tlv(out, TAG_END_OF_MIB_VIEW, &[]),
        Value::Other { tag, bytes } => push_tlv(out, *tag, bytes),
    }
}

fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0;
        if !(redundant_zero || redundant_ones) {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn encode_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let skip = bytes
        .iter()
        .take_while(|b| **b == 0)
        .count()
        .min(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[skip..]);
    out
}

fn encode_oid(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut out = Vec::new();
    push_base128(&mut out, arcs[0] * 40 + arcs[1]);
    for arc in &arcs[2..] {
        push_base128(&mut out, *arc);
    }
    out
}

fn push_base128(out: &mut Vec<u8>, mut value: u32) {
    let mut groups = [0_u8; 5];
    let mut idx = groups.len();
    loop {
        idx -= 1;
        groups[idx] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (pos, group) in groups.iter().enumerate().skip(idx) {
        out.push(if pos == last { *group } else { group | 0x80 });
    }
}

fn decode_integer(content: &[u8]) -> Result<i64, BerError> {
    if content.is_empty() {
        return Err(BerError::BadLength);
    }
    if content.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in content {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> Result<u64, BerError> {
    if content.is_empty() {
        return Err(BerError::BadLength);
    }
    let skip = content.iter().take_while(|b| **b == 0).count();
    let significant = &content[skip..];
    if significant.len() > 8 {
        return Err(BerError::IntegerOverflow);
    }
    Ok(significant
        .iter()
        .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte)))
}

fn decode_u32(content: &[u8]) -> Result<u32, BerError> {
    u32::try_from(decode_unsigned(content)?).map_err(|_| BerError::IntegerOverflow)
}

fn decode_oid(content: &[u8]) -> Result<Oid, BerError> {
    let mut subids = Vec::new();
    let mut current: u32 = 0;
    let mut pending = false;
    for byte in content {
        if current > (u32::MAX >> 7) {
            return Err(BerError::IntegerOverflow);
        }
        current = (current << 7) | u32::from(byte & 0x7F);
        pending = true;
        if byte & 0x80 == 0 {
            subids.push(current);
            current = 0;
            pending = false;
        }
    }
    if pending || subids.is_empty() {
        return Err(BerError::BadOid("unterminated sub-identifier".to_string()));
    }

    let first = subids[0];
    let (root, second) = match first {
        0..=39 => (0, first),
        40..=79 => (1, first - 40),
        _ => (2, first - 80),
    };
    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(root);
    arcs.push(second);
    arcs.extend_from_slice(&subids[1..]);
    Ok(Oid(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> Result<Value, BerError> {
    Ok(match tag {
        TAG_INTEGER => Value::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => Value::OctetString(content.to_vec()),
        TAG_NULL => Value::Null,
        TAG_OID => Value::ObjectId(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let octets: [u8; 4] = content.try_into().map_err(|_| BerError::BadLength)?;
            Value::IpAddress(octets)
        }
        TAG_COUNTER32 => Value::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => Value::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => Value::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => Value::Opaque(content.to_vec()),
        TAG_COUNTER64 => Value::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
        other => Value::Other {
            tag: other,
            bytes: content.to_vec(),
        },
    })
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn next_byte(&mut self) -> Result<u8, BerError> {
        let byte = *self.buf.get(self.pos).ok_or(BerError::Truncated)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), BerError> {
        let tag = self.next_byte()?;
        let first = self.next_byte()?;
        let len = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let count = usize::from(first & 0x7F);
            if count == 0 || count > 4 {
                return Err(BerError::BadLength);
            }
            let mut len = 0_usize;
            for _ in 0..count {
                len = (len << 8) | usize::from(self.next_byte()?);
            }
            len
        };

        let end = self.pos.checked_add(len).ok_or(BerError::BadLength)?;
        if end > self.buf.len() {
            return Err(BerError::Truncated);
        }
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> Result<&'a [u8], BerError> {
        let (found, content) = self.read_tlv()?;
        if found != expected {
            return Err(BerError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }
}
