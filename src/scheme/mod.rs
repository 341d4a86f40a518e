// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Scheme model: the structural description of the messages a channel
// emits or accepts. A scheme is a graph rooted at a list of messages;
// message-typed fields reference other messages by index into the same
// arena, so self-referential schemes need no special casing and the
// whole graph is resolved in a second pass once all names are known.
//
// Records are byte-packed: a field's offset is the sum of the sizes
// before it. Variable-length data lives in the record tail behind
// self-relative offset pointers.

pub mod convert;
pub mod dump;
pub mod format;
pub mod merge;
pub mod optr;
pub mod parse;

pub use convert::Converter;
pub use optr::{OffsetPtr, PointerVersion};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

pub type Options = BTreeMap<String, String>;

/// Time base of a time-point or duration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeResolution {
    Ns,
    Us,
    Ms,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeResolution {
    /// Ratio of this resolution to one second as `(mul, div)`.
    pub fn ratio(self) -> (u64, u64) {
        match self {
            TimeResolution::Ns => (1, 1_000_000_000),
            TimeResolution::Us => (1, 1_000_000),
            TimeResolution::Ms => (1, 1_000),
            TimeResolution::Second => (1, 1),
            TimeResolution::Minute => (60, 1),
            TimeResolution::Hour => (3600, 1),
            TimeResolution::Day => (86400, 1),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ns" => Some(TimeResolution::Ns),
            "us" => Some(TimeResolution::Us),
            "ms" => Some(TimeResolution::Ms),
            "s" | "sec" | "second" => Some(TimeResolution::Second),
            "m" | "min" | "minute" => Some(TimeResolution::Minute),
            "h" | "hour" => Some(TimeResolution::Hour),
            "d" | "day" => Some(TimeResolution::Day),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeResolution::Ns => "ns",
            TimeResolution::Us => "us",
            TimeResolution::Ms => "ms",
            TimeResolution::Second => "s",
            TimeResolution::Minute => "min",
            TimeResolution::Hour => "hour",
            TimeResolution::Day => "day",
        }
    }
}

/// Integer enum attached to a scalar field.
#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub type_: FieldType,
    /// Declaration order is preserved.
    pub values: Vec<(String, i64)>,
}

impl EnumDef {
    pub fn lookup_name(&self, name: &str) -> Option<i64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn lookup_value(&self, value: i64) -> Option<&str> {
        self.values.iter().find(|(_, v)| *v == value).map(|(n, _)| n.as_str())
    }
}

/// Single- or multi-bit member of a bits field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitFieldDef {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Tagged sum: a scalar tag followed by a fixed region sized to the
/// largest arm. Arms all start right after the tag.
#[derive(Debug, Clone)]
pub struct UnionDef {
    pub name: String,
    pub tag: Field,
    pub fields: Vec<Field>,
    /// Size of the arm region, excluding the tag.
    pub union_size: usize,
}

#[derive(Debug, Clone)]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Double,
    Decimal128,
    /// Fixed-length byte region.
    Bytes(usize),
    /// Inlined sub-record, index into [`Scheme::messages`].
    Message(usize),
    /// Fixed-capacity inline list with a sibling count field.
    Array { capacity: usize, count: Box<Field>, element: Box<Field> },
    /// Variable-length tail-allocated list.
    Pointer { version: PointerVersion, element: Box<Field> },
    Union(Box<UnionDef>),
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int8
                | FieldType::Int16
                | FieldType::Int32
                | FieldType::Int64
                | FieldType::UInt8
                | FieldType::UInt16
                | FieldType::UInt32
                | FieldType::UInt64
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, FieldType::Double)
    }

    /// Discriminant equality, ignoring payload.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldType::Int8 => "int8",
            FieldType::Int16 => "int16",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::UInt8 => "uint8",
            FieldType::UInt16 => "uint16",
            FieldType::UInt32 => "uint32",
            FieldType::UInt64 => "uint64",
            FieldType::Double => "double",
            FieldType::Decimal128 => "decimal128",
            FieldType::Bytes(_) => "bytes",
            FieldType::Message(_) => "message",
            FieldType::Array { .. } => "array",
            FieldType::Pointer { .. } => "pointer",
            FieldType::Union(_) => "union",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum SubType {
    #[default]
    None,
    Enum(Arc<EnumDef>),
    ByteString,
    /// Fixed-point decimal with the given precision.
    Fixed(u32),
    TimePoint(TimeResolution),
    Duration(TimeResolution),
    Bits(Vec<BitFieldDef>),
}

impl SubType {
    pub fn kind(&self) -> &'static str {
        match self {
            SubType::None => "none",
            SubType::Enum(_) => "enum",
            SubType::ByteString => "bytestring",
            SubType::Fixed(_) => "fixed",
            SubType::TimePoint(_) => "time_point",
            SubType::Duration(_) => "duration",
            SubType::Bits(_) => "bits",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub type_: FieldType,
    pub sub_type: SubType,
    pub size: usize,
    /// Byte offset within the containing record (or array/union region).
    pub offset: usize,
    /// Presence-map bit, negative when the field is not optional.
    pub index: i32,
    pub options: Options,
}

impl Field {
    pub fn is_optional(&self) -> bool {
        self.index >= 0
    }
}

#[derive(Debug, Clone)]
pub struct MessageDef {
    pub name: String,
    pub msgid: i32,
    pub size: usize,
    pub fields: Vec<Field>,
    /// Index of the presence-map field in `fields`.
    pub pmap: Option<usize>,
    pub options: Options,
}

impl MessageDef {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Parsed scheme. Shared between channels and cache entries as
/// `Arc<Scheme>`.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    pub messages: Vec<MessageDef>,
    /// Global enums, kept for merge checking; fields hold their own refs.
    pub enums: Vec<Arc<EnumDef>>,
    /// Global unions, kept for merge checking.
    pub unions: Vec<UnionDef>,
    pub options: Options,
}

pub type SchemeRef = Arc<Scheme>;

impl Scheme {
    /// Load a scheme from a URL-style source: `yamls://` inline text,
    /// `yamls+gz://` base64 of gzipped text or `yaml://` file path.
    /// `channel://` and `sha256://` forms are resolved by the channel
    /// context, not here.
    pub fn load(url: &str) -> Result<Scheme> {
        if let Some(body) = url.strip_prefix("yamls://") {
            parse::parse(body)
        } else if let Some(body) = url.strip_prefix("yamls+gz://") {
            parse::parse(&parse::inflate(body)?)
        } else if let Some(path) = url.strip_prefix("yaml://") {
            let text = std::fs::read_to_string(path)
                .map_err(|e| Error::InvalidArgument(format!("failed to read '{path}': {e}")))?;
            parse::parse(&text)
        } else {
            Err(Error::InvalidArgument(format!("unknown scheme source '{url}'")))
        }
    }

    /// Serialize: `yamls` (canonical text), `yamls+gz` (base64 gzip) or
    /// `sha256` (content hash usable as a cache key). All forms carry
    /// their `proto://` prefix so the output is loadable as a source.
    pub fn dump(&self, format: &str) -> Result<String> {
        dump::dump(self, format)
    }

    pub fn lookup(&self, name: &str) -> Option<(usize, &MessageDef)> {
        self.messages.iter().enumerate().find(|(_, m)| m.name == name)
    }

    pub fn lookup_id(&self, msgid: i32) -> Option<(usize, &MessageDef)> {
        self.messages.iter().enumerate().find(|(_, m)| m.msgid == msgid && m.msgid != 0)
    }

    pub fn message(&self, idx: usize) -> &MessageDef {
        &self.messages[idx]
    }
}

/// Read a presence-map bit.
pub fn pmap_get(pmap: &[u8], index: i32) -> bool {
    if index < 0 {
        return true;
    }
    let idx = index as usize;
    match pmap.get(idx / 8) {
        Some(byte) => byte & (1 << (idx % 8)) != 0,
        None => false,
    }
}

/// Set a presence-map bit.
pub fn pmap_set(pmap: &mut [u8], index: i32) {
    if index < 0 {
        return;
    }
    let idx = index as usize;
    if let Some(byte) = pmap.get_mut(idx / 8) {
        *byte |= 1 << (idx % 8);
    }
}
