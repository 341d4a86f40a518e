// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Render a message buffer to the canonical YAML-subset text: scalar
// lists inline, message lists as nested blocks, byte strings quoted with
// \xNN escapes, fixed-point as plain decimals. Output shape:
//
//   f0: 123
//   f4: "bytestring"
//   f5: [101, 111, 121]
//   f6:
//     - s0: 120
//       s1: [120.1, 120.2]
//   f7: ["offset string"]
//   f8: 12.345

use std::fmt::Write as _;

use crate::error::ConvertError;
use crate::scheme::optr::{entity_size, read_count, read_ptr};
use crate::scheme::{Field, FieldType, MessageDef, Scheme, SubType};

type FResult<T> = std::result::Result<T, ConvertError>;

/// Render `data` as an instance of `msg`.
pub fn to_string(scheme: &Scheme, msg: &MessageDef, data: &[u8]) -> FResult<String> {
    if data.len() < msg.size {
        return Err(ConvertError::new(format!(
            "data size {} below message size {}",
            data.len(),
            msg.size
        )));
    }
    let lines = message_lines(scheme, msg, data, 0)
        .map_err(|e| ConvertError::new(format!("Failed to format field {}: {}", e.path(), e.message)))?;
    Ok(lines.join("\n"))
}

/// One formatted field: either a single inline value or an indented
/// block of lines (used for message lists).
enum Rendered {
    Inline(String),
    Block(Vec<String>),
}

fn message_lines(
    scheme: &Scheme,
    msg: &MessageDef,
    data: &[u8],
    offset: usize,
) -> FResult<Vec<String>> {
    let mut out = Vec::new();
    for field in &msg.fields {
        match format_field(scheme, field, data, offset + field.offset, false)
            .map_err(|e| e.field(&field.name))?
        {
            Rendered::Inline(v) => out.push(format!("{}: {v}", field.name)),
            Rendered::Block(lines) => {
                out.push(format!("{}:", field.name));
                out.extend(lines);
            }
        }
    }
    Ok(out)
}

fn message_inline(
    scheme: &Scheme,
    msg: &MessageDef,
    data: &[u8],
    offset: usize,
) -> FResult<String> {
    let mut parts = Vec::new();
    for field in &msg.fields {
        let v = match format_field(scheme, field, data, offset + field.offset, true)
            .map_err(|e| e.field(&field.name))?
        {
            Rendered::Inline(v) => v,
            Rendered::Block(_) => unreachable!("inline rendering never yields blocks"),
        };
        parts.push(format!("{}: {v}", field.name));
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

fn check_range(data: &[u8], offset: usize, size: usize) -> FResult<()> {
    if offset + size > data.len() {
        return Err(ConvertError::new(format!(
            "field range {offset}+{size} over data size {}",
            data.len()
        )));
    }
    Ok(())
}

fn format_field(
    scheme: &Scheme,
    field: &Field,
    data: &[u8],
    off: usize,
    inline: bool,
) -> FResult<Rendered> {
    match &field.type_ {
        FieldType::Message(idx) => {
            let msg = scheme.message(*idx);
            check_range(data, off, msg.size)?;
            Ok(Rendered::Inline(message_inline(scheme, msg, data, off)?))
        }
        FieldType::Array { capacity, count, element } => {
            check_range(data, off, field.size)?;
            let size = read_count(count, &data[off + count.offset..])
                .map_err(|e| ConvertError::new(e.to_string()))?;
            if size < 0 || size as usize > *capacity {
                return Err(ConvertError::new(format!(
                    "array count {size} over capacity {capacity}"
                )));
            }
            format_list(
                scheme,
                element,
                data,
                off + element.offset,
                element.size,
                size as usize,
                inline,
            )
        }
        FieldType::Pointer { version, element } => {
            check_range(data, off, field.size)?;
            let ptr = read_ptr(*version, &data[off..], entity_size(field))
                .map_err(|e| ConvertError::new(e.to_string()))?;
            if ptr.offset as usize > data.len() - off {
                return Err(ConvertError::new(format!(
                    "Offset out of bounds: offset {} > data size {}",
                    ptr.offset,
                    data.len() - off
                )));
            }
            let data_off = off + ptr.offset as usize;
            let entity = ptr.entity as usize;
            if data_off + ptr.size as usize * entity > data.len() {
                return Err(ConvertError::new(format!(
                    "Offset data out of bounds: offset {} + data {} * entity {} > data size {}",
                    ptr.offset,
                    ptr.size,
                    ptr.entity,
                    data.len() - off
                )));
            }
            if matches!(field.sub_type, SubType::ByteString) {
                if ptr.size == 0 {
                    return Ok(Rendered::Inline("\"\"".into()));
                }
                // Size counts the trailing NUL.
                let bytes = &data[data_off..data_off + ptr.size as usize - 1];
                return Ok(Rendered::Inline(quote_bytes(bytes)));
            }
            format_list(scheme, element, data, data_off, entity, ptr.size as usize, inline)
        }
        FieldType::Union(def) => {
            check_range(data, off, field.size)?;
            let tag = data[off] as usize;
            let arm = def.fields.get(tag).ok_or_else(|| {
                ConvertError::new(format!("unknown union tag {tag}"))
            })?;
            let value = match format_field(scheme, arm, data, off + arm.offset, true)
                .map_err(|e| e.field(&arm.name))?
            {
                Rendered::Inline(v) => v,
                Rendered::Block(_) => unreachable!("union arms render inline"),
            };
            Ok(Rendered::Inline(format!("{{{}: {value}}}", arm.name)))
        }
        FieldType::Bytes(n) => {
            check_range(data, off, *n)?;
            let bytes = &data[off..off + n];
            let bytes = match field.sub_type {
                SubType::ByteString => {
                    let len = bytes.iter().position(|&b| b == 0).unwrap_or(*n);
                    &bytes[..len]
                }
                _ => bytes,
            };
            Ok(Rendered::Inline(quote_bytes(bytes)))
        }
        FieldType::Decimal128 => {
            check_range(data, off, 16)?;
            Ok(Rendered::Inline(format_decimal128(&data[off..off + 16])))
        }
        _ => {
            check_range(data, off, field.size)?;
            Ok(Rendered::Inline(format_scalar(field, data, off)?))
        }
    }
}

fn format_list(
    scheme: &Scheme,
    element: &Field,
    data: &[u8],
    off: usize,
    entity: usize,
    count: usize,
    inline: bool,
) -> FResult<Rendered> {
    if count == 0 {
        return Ok(Rendered::Inline("[]".into()));
    }
    // Message elements read best as a block list, unless the list is
    // embedded in an already-inline rendering.
    if let FieldType::Message(idx) = element.type_ {
        let msg = scheme.message(idx);
        if !inline {
            let mut out = Vec::new();
            for i in 0..count {
                let lines = message_lines(scheme, msg, data, off + entity * i)
                    .map_err(|e| e.index(i))?;
                for (n, line) in lines.iter().enumerate() {
                    if n == 0 {
                        out.push(format!("  - {line}"));
                    } else {
                        out.push(format!("    {line}"));
                    }
                }
            }
            return Ok(Rendered::Block(out));
        }
        let mut parts = Vec::new();
        for i in 0..count {
            parts.push(
                message_inline(scheme, msg, data, off + entity * i).map_err(|e| e.index(i))?,
            );
        }
        return Ok(Rendered::Inline(format!("[{}]", parts.join(", "))));
    }
    let mut parts = Vec::new();
    for i in 0..count {
        let v = match format_field(scheme, element, data, off + entity * i, true)
            .map_err(|e| e.index(i))?
        {
            Rendered::Inline(v) => v,
            Rendered::Block(_) => unreachable!(),
        };
        parts.push(v);
    }
    Ok(Rendered::Inline(format!("[{}]", parts.join(", "))))
}

pub(crate) fn format_scalar(field: &Field, data: &[u8], off: usize) -> FResult<String> {
    let raw = read_raw(field, data, off)?;
    match &field.sub_type {
        SubType::Fixed(prec) => match raw {
            Raw::I(v) => Ok(format_fixed(v, *prec)),
            Raw::U(v) => Ok(format_fixed(v as i64, *prec)),
            Raw::F(v) => Ok(format!("{v}")),
        },
        SubType::Enum(def) => {
            let v = match raw {
                Raw::I(v) => v,
                Raw::U(v) => v as i64,
                Raw::F(_) => return Err(ConvertError::new("enum on floating field")),
            };
            match def.lookup_value(v) {
                Some(name) => Ok(name.to_string()),
                None => Ok(v.to_string()),
            }
        }
        SubType::Bits(bits) => {
            let v = match raw {
                Raw::I(v) => v as u64,
                Raw::U(v) => v,
                Raw::F(_) => return Err(ConvertError::new("bits on floating field")),
            };
            let mut set = Vec::new();
            for b in bits {
                let mask = if b.size >= 64 { u64::MAX } else { (1u64 << b.size) - 1 };
                let got = (v >> b.offset) & mask;
                if b.size == 1 {
                    if got != 0 {
                        set.push(b.name.clone());
                    }
                } else if got != 0 {
                    set.push(format!("{}: {got}", b.name));
                }
            }
            Ok(format!("[{}]", set.join(", ")))
        }
        _ => match raw {
            Raw::I(v) => Ok(v.to_string()),
            Raw::U(v) => Ok(v.to_string()),
            Raw::F(v) => Ok(format!("{v}")),
        },
    }
}

pub(crate) enum Raw {
    I(i64),
    U(u64),
    F(f64),
}

pub(crate) fn read_raw(field: &Field, data: &[u8], off: usize) -> FResult<Raw> {
    if off + field.size > data.len() {
        return Err(ConvertError::new(format!(
            "field range {off}+{} over data size {}",
            field.size,
            data.len()
        )));
    }
    let d = &data[off..];
    let r = match field.type_ {
        FieldType::Int8 => Raw::I(d[0] as i8 as i64),
        FieldType::Int16 => Raw::I(i16::from_le_bytes([d[0], d[1]]) as i64),
        FieldType::Int32 => Raw::I(i32::from_le_bytes([d[0], d[1], d[2], d[3]]) as i64),
        FieldType::Int64 => Raw::I(i64::from_le_bytes(d[..8].try_into().unwrap())),
        FieldType::UInt8 => Raw::U(d[0] as u64),
        FieldType::UInt16 => Raw::U(u16::from_le_bytes([d[0], d[1]]) as u64),
        FieldType::UInt32 => Raw::U(u32::from_le_bytes([d[0], d[1], d[2], d[3]]) as u64),
        FieldType::UInt64 => Raw::U(u64::from_le_bytes(d[..8].try_into().unwrap())),
        FieldType::Double => Raw::F(f64::from_le_bytes(d[..8].try_into().unwrap())),
        FieldType::Decimal128 => return Err(ConvertError::new("decimal128 is not a scalar")),
        _ => return Err(ConvertError::new(format!("field '{}' is not a scalar", field.name))),
    };
    Ok(r)
}

/// Fixed-point rendering: `12345` with precision 3 becomes `12.345`,
/// trailing zeros trimmed.
fn format_fixed(value: i64, prec: u32) -> String {
    if prec == 0 {
        return value.to_string();
    }
    let div = 10i64.pow(prec);
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.unsigned_abs();
    let int = abs / div as u64;
    let mut frac = format!("{:0width$}", abs % div as u64, width = prec as usize);
    while frac.ends_with('0') {
        frac.pop();
    }
    if frac.is_empty() {
        format!("{sign}{int}")
    } else {
        format!("{sign}{int}.{frac}")
    }
}

/// Quote bytes with `\xNN` escapes for everything non-printable.
pub(crate) fn quote_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out.push('"');
    out
}

/// Decimal128 rendered as sign, coefficient and decimal exponent. The
/// value itself stays opaque to the rest of the crate.
pub(crate) fn format_decimal128(bytes: &[u8]) -> String {
    let lo = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    let hi = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
    let sign = if hi >> 63 != 0 { "-" } else { "" };
    if (hi >> 58) & 0x1f == 0x1f {
        return format!("{sign}nan");
    }
    if (hi >> 58) & 0x1f == 0x1e {
        return format!("{sign}inf");
    }
    let (exp, coeff_hi) = if (hi >> 61) & 0x3 == 0x3 {
        (((hi >> 47) & 0x3fff) as i64, (8 << 46) | (hi & 0x7fff_ffff_ffff))
    } else {
        (((hi >> 49) & 0x3fff) as i64, hi & 0x0001_ffff_ffff_ffff)
    };
    let coeff = ((coeff_hi as u128) << 64) | lo as u128;
    format!("{sign}{coeff}E{}", exp - 6176)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rendering() {
        assert_eq!(format_fixed(12345, 3), "12.345");
        assert_eq!(format_fixed(12000, 3), "12");
        assert_eq!(format_fixed(-1500, 2), "-15");
        assert_eq!(format_fixed(-1501, 2), "-15.01");
        assert_eq!(format_fixed(5, 3), "0.005");
    }

    #[test]
    fn byte_quoting() {
        assert_eq!(quote_bytes(b"abc"), "\"abc\"");
        assert_eq!(quote_bytes(b"a\x01\x00"), "\"a\\x01\\x00\"");
        assert_eq!(quote_bytes(b"q\"\\"), "\"q\\\"\\\\\"");
    }

    #[test]
    fn decimal128_zero() {
        let mut bytes = [0u8; 16];
        // Exponent bias with zero coefficient.
        bytes[14] = 0x40;
        bytes[15] = 0x30;
        assert_eq!(format_decimal128(&bytes), "0E0");
    }
}
