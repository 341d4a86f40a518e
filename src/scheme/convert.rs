// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Message conversion between two scheme versions. The plan is built once
// at init: every destination field is matched to the like-named source
// field and classified as trivial (same layout, memcpy), copy (widened,
// zero-extend) or complex (sub-type specific routine). Conversion then
// reuses the plan for every message and allocates only when a pointer
// field has to grow the destination tail.
//
// Failures carry a field/index stack, so an error deep inside a nested
// record reads `root.field[3].leaf: source value out of range`.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use crate::error::{ConvertError, Error, Result};
use crate::scheme::format::{self, Raw};
use crate::scheme::optr::{self, entity_size, read_count, write_count};
use crate::scheme::{
    pmap_get, pmap_set, Field, FieldType, Scheme, SchemeRef, SubType, TimeResolution,
};

type CResult<T> = std::result::Result<T, ConvertError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mode {
    Trivial,
    Copy,
    #[default]
    Complex,
}

#[derive(Debug, Clone, Default)]
struct FieldConv {
    mode: Mode,
    /// Source enum value -> destination value. Doubles as a validation
    /// map when the source is a plain integer.
    enum_map: BTreeMap<i64, i64>,
    /// Array/pointer element conversion.
    element: Option<Box<FieldConv>>,
    /// Plan index for message-typed fields.
    message: Option<usize>,
    /// Source union arm index -> (destination arm index, arm conversion).
    arms: BTreeMap<usize, (usize, FieldConv)>,
}

struct FieldPlan {
    into: usize,
    from: usize,
    conv: FieldConv,
}

struct MessagePlan {
    from: usize,
    into: usize,
    fields: Vec<FieldPlan>,
}

/// Conversion plan between a source and a destination scheme.
pub struct Converter {
    from: SchemeRef,
    into: SchemeRef,
    plans: Vec<MessagePlan>,
    by_msgid: HashMap<i32, Option<usize>>,
    by_pair: HashMap<(usize, usize), usize>,
}

impl Converter {
    /// Build the plan. Fails when a shared message has a field pair with
    /// no defined conversion.
    pub fn new(from: &SchemeRef, into: &SchemeRef) -> Result<Converter> {
        let mut c = Converter {
            from: from.clone(),
            into: into.clone(),
            plans: Vec::new(),
            by_msgid: HashMap::new(),
            by_pair: HashMap::new(),
        };
        let from_s = from.clone();
        let into_s = into.clone();
        for (fidx, fmsg) in from_s.messages.iter().enumerate() {
            match into_s.lookup(&fmsg.name) {
                Some((iidx, _)) => {
                    let plan = c.build_message(&from_s, &into_s, fidx, iidx).map_err(|e| {
                        Error::InvalidArgument(format!(
                            "message '{}' can not be converted: {e}",
                            fmsg.name
                        ))
                    })?;
                    if fmsg.msgid != 0 {
                        c.by_msgid.insert(fmsg.msgid, Some(plan));
                    }
                }
                None => {
                    if fmsg.msgid != 0 {
                        c.by_msgid.insert(fmsg.msgid, None);
                    }
                }
            }
        }
        Ok(c)
    }

    pub fn scheme_from(&self) -> &SchemeRef {
        &self.from
    }

    pub fn scheme_into(&self) -> &SchemeRef {
        &self.into
    }

    fn build_message(
        &mut self,
        from_s: &Scheme,
        into_s: &Scheme,
        fidx: usize,
        iidx: usize,
    ) -> CResult<usize> {
        if let Some(plan) = self.by_pair.get(&(fidx, iidx)) {
            return Ok(*plan);
        }
        let plan_idx = self.plans.len();
        self.plans.push(MessagePlan { from: fidx, into: iidx, fields: Vec::new() });
        self.by_pair.insert((fidx, iidx), plan_idx);

        let fmsg = &from_s.messages[fidx];
        let imsg = &into_s.messages[iidx];
        let mut fields = Vec::new();
        for (into_idx, finto) in imsg.fields.iter().enumerate() {
            let Some(from_idx) = fmsg.fields.iter().position(|f| f.name == finto.name) else {
                // Missing source field stays at the destination zero.
                continue;
            };
            let ffrom = &fmsg.fields[from_idx];
            let conv = self
                .convertible(from_s, into_s, finto, ffrom)
                .map_err(|e| e.field(&finto.name))?;
            fields.push(FieldPlan { into: into_idx, from: from_idx, conv });
        }
        self.plans[plan_idx].fields = fields;
        Ok(plan_idx)
    }

    fn convertible(
        &mut self,
        from_s: &Scheme,
        into_s: &Scheme,
        finto: &Field,
        ffrom: &Field,
    ) -> CResult<FieldConv> {
        use FieldType as T;
        match &finto.type_ {
            t if t.is_numeric() => convertible_numeric(finto, ffrom),
            T::Decimal128 => match ffrom.type_ {
                T::Decimal128 => Ok(FieldConv { mode: copy_mode(finto, ffrom), ..Default::default() }),
                _ => Err(ConvertError::new(format!(
                    "can not convert {} to decimal128",
                    ffrom.type_.kind()
                ))),
            },
            T::Bytes(_) => {
                if matches!(finto.sub_type, SubType::ByteString) {
                    match &ffrom.type_ {
                        T::Array { .. } | T::Message(_) | T::Union(_) => Err(ConvertError::new(
                            format!("can not convert {} to string", ffrom.type_.kind()),
                        )),
                        T::Pointer { .. } => {
                            if matches!(ffrom.sub_type, SubType::ByteString) {
                                Ok(FieldConv::default())
                            } else {
                                Err(ConvertError::new("can not convert pointer to string"))
                            }
                        }
                        T::Bytes(_) => {
                            Ok(FieldConv { mode: copy_mode(finto, ffrom), ..Default::default() })
                        }
                        _ => Ok(FieldConv::default()),
                    }
                } else {
                    match ffrom.type_ {
                        T::Bytes(_) => {
                            Ok(FieldConv { mode: copy_mode(finto, ffrom), ..Default::default() })
                        }
                        _ => Err(ConvertError::new(format!(
                            "can not convert {} to bytes",
                            ffrom.type_.kind()
                        ))),
                    }
                }
            }
            T::Message(iidx) => match ffrom.type_ {
                T::Message(fidx) => {
                    let plan = self.build_message(from_s, into_s, fidx, *iidx)?;
                    Ok(FieldConv { message: Some(plan), ..Default::default() })
                }
                _ => Err(ConvertError::new(format!(
                    "can not convert {} to message",
                    ffrom.type_.kind()
                ))),
            },
            T::Array { capacity, count, element } => match &ffrom.type_ {
                T::Array { capacity: fcap, count: fcount, element: felem } => {
                    let count_conv = self.convertible(from_s, into_s, count, fcount)?;
                    let elem = self.convertible(from_s, into_s, element, felem)?;
                    let mode = if count_conv.mode == Mode::Trivial && elem.mode == Mode::Trivial {
                        if capacity == fcap {
                            Mode::Trivial
                        } else if capacity > fcap {
                            Mode::Copy
                        } else {
                            Mode::Complex
                        }
                    } else {
                        Mode::Complex
                    };
                    Ok(FieldConv { mode, element: Some(Box::new(elem)), ..Default::default() })
                }
                T::Pointer { element: felem, .. } => {
                    if matches!(ffrom.sub_type, SubType::ByteString) {
                        return Err(ConvertError::new("can not convert string to array"));
                    }
                    let elem = self.convertible(from_s, into_s, element, felem)?;
                    Ok(FieldConv { element: Some(Box::new(elem)), ..Default::default() })
                }
                _ => Err(ConvertError::new(format!(
                    "can not convert {} to array",
                    ffrom.type_.kind()
                ))),
            },
            T::Pointer { element, .. } => {
                if matches!(finto.sub_type, SubType::ByteString) {
                    return match &ffrom.type_ {
                        T::Array { .. } | T::Message(_) | T::Union(_) => Err(ConvertError::new(
                            format!("can not convert {} to string", ffrom.type_.kind()),
                        )),
                        T::Pointer { .. } => {
                            if matches!(ffrom.sub_type, SubType::ByteString) {
                                Ok(FieldConv::default())
                            } else {
                                Err(ConvertError::new("can not convert pointer to string"))
                            }
                        }
                        _ => Ok(FieldConv::default()),
                    };
                }
                match &ffrom.type_ {
                    T::Array { element: felem, .. } => {
                        let elem = self.convertible(from_s, into_s, element, felem)?;
                        Ok(FieldConv { element: Some(Box::new(elem)), ..Default::default() })
                    }
                    T::Pointer { element: felem, .. } => {
                        if matches!(ffrom.sub_type, SubType::ByteString) {
                            return Err(ConvertError::new("can not convert string to pointer"));
                        }
                        let elem = self.convertible(from_s, into_s, element, felem)?;
                        Ok(FieldConv { element: Some(Box::new(elem)), ..Default::default() })
                    }
                    _ => Err(ConvertError::new(format!(
                        "can not convert {} to pointer",
                        ffrom.type_.kind()
                    ))),
                }
            }
            T::Union(idef) => match &ffrom.type_ {
                T::Union(fdef) => {
                    let mut arms = BTreeMap::new();
                    for (fai, farm) in fdef.fields.iter().enumerate() {
                        let Some(iai) = idef.fields.iter().position(|a| a.name == farm.name)
                        else {
                            continue;
                        };
                        let conv = self
                            .convertible(from_s, into_s, &idef.fields[iai], farm)
                            .map_err(|e| e.field(&farm.name))?;
                        arms.insert(fai, (iai, conv));
                    }
                    Ok(FieldConv { arms, ..Default::default() })
                }
                _ => Err(ConvertError::new(format!(
                    "can not convert {} to union",
                    ffrom.type_.kind()
                ))),
            },
            _ => Err(ConvertError::new(format!(
                "unsupported destination type {}",
                finto.type_.kind()
            ))),
        }
    }

    /// Convert one message. `buf` is reset to the destination layout;
    /// returns the destination message index within the target scheme.
    pub fn convert(&self, buf: &mut Vec<u8>, msgid: i32, data: &[u8]) -> CResult<usize> {
        let plan = match self.by_msgid.get(&msgid) {
            Some(Some(plan)) => *plan,
            Some(None) => {
                return Err(ConvertError::new(format!(
                    "message {msgid} not found in destination scheme"
                )))
            }
            None => return Err(ConvertError::new(format!("unknown message {msgid}"))),
        };
        buf.clear();
        buf.resize(self.into.messages[self.plans[plan].into].size, 0);
        self.convert_message(plan, buf, 0, data, 0)?;
        Ok(self.plans[plan].into)
    }

    fn convert_message(
        &self,
        plan_idx: usize,
        buf: &mut Vec<u8>,
        dst_off: usize,
        src: &[u8],
        src_off: usize,
    ) -> CResult<()> {
        let plan = &self.plans[plan_idx];
        let fmsg = self.from.message(plan.from);
        let imsg = self.into.message(plan.into);
        if src_off + fmsg.size > src.len() {
            return Err(ConvertError::new(format!(
                "source data {} below message size {}",
                src.len() - src_off,
                fmsg.size
            )));
        }
        let fpmap = fmsg.pmap.map(|i| {
            let f = &fmsg.fields[i];
            (src_off + f.offset, f.size)
        });
        let ipmap = imsg.pmap.map(|i| {
            let f = &imsg.fields[i];
            (dst_off + f.offset, f.size)
        });
        for fp in &plan.fields {
            let ffrom = &fmsg.fields[fp.from];
            let finto = &imsg.fields[fp.into];
            if let Some((off, size)) = fpmap {
                if ffrom.index >= 0 && !pmap_get(&src[off..off + size], ffrom.index) {
                    continue;
                }
            }
            if let Some(pmap_idx) = imsg.pmap {
                if fp.into == pmap_idx {
                    continue;
                }
                if let Some((off, size)) = ipmap {
                    pmap_set(&mut buf[off..off + size], finto.index);
                }
            }
            self.convert_field(
                buf,
                dst_off + finto.offset,
                finto,
                src,
                src_off + ffrom.offset,
                ffrom,
                &fp.conv,
            )
            .map_err(|e| e.field(&ffrom.name))?;
        }
        Ok(())
    }

    fn convert_field(
        &self,
        buf: &mut Vec<u8>,
        off: usize,
        finto: &Field,
        src: &[u8],
        soff: usize,
        ffrom: &Field,
        conv: &FieldConv,
    ) -> CResult<()> {
        if matches!(conv.mode, Mode::Trivial | Mode::Copy) {
            if soff + ffrom.size > src.len() {
                return Err(ConvertError::new(format!(
                    "source field range {soff}+{} over data size {}",
                    ffrom.size,
                    src.len()
                )));
            }
            buf[off..off + ffrom.size].copy_from_slice(&src[soff..soff + ffrom.size]);
            return Ok(());
        }
        use FieldType as T;
        match &finto.type_ {
            t if t.is_numeric() => self.convert_numeric(buf, off, finto, src, soff, ffrom, conv),
            T::Decimal128 => match ffrom.type_ {
                T::Decimal128 => {
                    buf[off..off + 16].copy_from_slice(&src[soff..soff + 16]);
                    Ok(())
                }
                _ => Err(ConvertError::new(format!(
                    "can not convert non-decimal128 {}",
                    ffrom.type_.kind()
                ))),
            },
            T::Bytes(n) => {
                if matches!(finto.sub_type, SubType::ByteString) {
                    let s = self.source_string(src, soff, ffrom)?;
                    if s.len() > *n {
                        return Err(ConvertError::new(format!(
                            "string result is too long: {} > max {n}",
                            s.len()
                        )));
                    }
                    buf[off..off + s.len()].copy_from_slice(&s);
                    Ok(())
                } else {
                    match ffrom.type_ {
                        T::Bytes(fn_) => {
                            let copy = fn_.min(*n);
                            buf[off..off + copy].copy_from_slice(&src[soff..soff + copy]);
                            Ok(())
                        }
                        _ => Err(ConvertError::new(format!(
                            "can not convert bytes from {}",
                            ffrom.type_.kind()
                        ))),
                    }
                }
            }
            T::Message(_) => {
                let plan = conv
                    .message
                    .ok_or_else(|| ConvertError::new("message field without plan"))?;
                self.convert_message(plan, buf, off, src, soff)
            }
            T::Array { .. } => self.convert_array(buf, off, finto, src, soff, ffrom, conv),
            T::Pointer { .. } => {
                if matches!(finto.sub_type, SubType::ByteString) {
                    self.convert_vstring(buf, off, finto, src, soff, ffrom)
                } else {
                    self.convert_pointer(buf, off, finto, src, soff, ffrom, conv)
                }
            }
            T::Union(idef) => {
                let T::Union(fdef) = &ffrom.type_ else {
                    return Err(ConvertError::new(format!(
                        "can not convert {} to union",
                        ffrom.type_.kind()
                    )));
                };
                let tag = src[soff + fdef.tag.offset] as usize;
                let Some((iai, arm_conv)) = conv.arms.get(&tag) else {
                    return Err(ConvertError::new(format!(
                        "union arm {tag} has no destination counterpart"
                    )));
                };
                let farm = &fdef.fields[tag];
                let iarm = &idef.fields[*iai];
                buf[off + idef.tag.offset] = *iai as u8;
                self.convert_field(
                    buf,
                    off + iarm.offset,
                    iarm,
                    src,
                    soff + farm.offset,
                    farm,
                    arm_conv,
                )
                .map_err(|e| e.field(&farm.name))
            }
            _ => Err(ConvertError::new(format!(
                "unsupported field type {}",
                finto.type_.kind()
            ))),
        }
    }

    /// Count and absolute element region offset of a source list.
    fn source_list(
        &self,
        src: &[u8],
        soff: usize,
        ffrom: &Field,
    ) -> CResult<(usize, usize, usize)> {
        match &ffrom.type_ {
            FieldType::Array { capacity, count, element } => {
                let n = read_count(count, &src[soff + count.offset..])
                    .map_err(|e| ConvertError::new(e.to_string()))?;
                if n < 0 || n as usize > *capacity {
                    return Err(ConvertError::new(format!(
                        "source count {n} over capacity {capacity}"
                    )));
                }
                Ok((n as usize, soff + element.offset, element.size))
            }
            FieldType::Pointer { version, .. } => {
                let view = src.len() - soff;
                let ptr = read_ptr_checked(*version, src, soff, entity_size(ffrom))?;
                if ptr.offset as usize > view {
                    return Err(ConvertError::new(format!(
                        "offset out of bounds: offset {} > data size {view}",
                        ptr.offset
                    )));
                }
                if ptr.offset as usize + ptr.size as usize * ptr.entity as usize > view {
                    return Err(ConvertError::new(format!(
                        "offset data out of bounds: offset {} + data {} * entity {} > data size {view}",
                        ptr.offset, ptr.size, ptr.entity
                    )));
                }
                Ok((ptr.size as usize, soff + ptr.offset as usize, ptr.entity as usize))
            }
            _ => Err(ConvertError::new(format!(
                "can not convert {} to a list",
                ffrom.type_.kind()
            ))),
        }
    }

    fn convert_array(
        &self,
        buf: &mut Vec<u8>,
        off: usize,
        finto: &Field,
        src: &[u8],
        soff: usize,
        ffrom: &Field,
        conv: &FieldConv,
    ) -> CResult<()> {
        let FieldType::Array { capacity, count, element } = &finto.type_ else {
            unreachable!();
        };
        let from_elem = source_element(ffrom)?;
        let (n, src_elem_off, fentity) = self.source_list(src, soff, ffrom)?;
        if n == 0 {
            return Ok(());
        }
        if n > *capacity {
            return Err(ConvertError::new(format!(
                "source list size too large: {n} > maximum {capacity}"
            )));
        }
        write_count(count, &mut buf[off + count.offset..], n)
            .map_err(|e| ConvertError::new(e.to_string()))?;

        let elem_conv = conv
            .element
            .as_ref()
            .ok_or_else(|| ConvertError::new("list field without element plan"))?;
        if elem_conv.mode == Mode::Trivial {
            let total = n * fentity;
            buf[off + element.offset..off + element.offset + total]
                .copy_from_slice(&src[src_elem_off..src_elem_off + total]);
            return Ok(());
        }
        for i in 0..n {
            self.convert_field(
                buf,
                off + element.offset + element.size * i,
                element,
                src,
                src_elem_off + fentity * i,
                from_elem,
                elem_conv,
            )
            .map_err(|e| e.index(i))?;
        }
        Ok(())
    }

    fn convert_pointer(
        &self,
        buf: &mut Vec<u8>,
        off: usize,
        finto: &Field,
        src: &[u8],
        soff: usize,
        ffrom: &Field,
        conv: &FieldConv,
    ) -> CResult<()> {
        let FieldType::Pointer { element, .. } = &finto.type_ else {
            unreachable!();
        };
        let from_elem = source_element(ffrom)?;
        let (n, src_elem_off, fentity) = self.source_list(src, soff, ffrom)?;
        if n == 0 {
            return Ok(());
        }
        let data_off = optr::alloc(finto, buf, off, n as u32)
            .map_err(|e| ConvertError::new(format!("offset pointer out of range: {e}")))?;
        let elem_conv = conv
            .element
            .as_ref()
            .ok_or_else(|| ConvertError::new("list field without element plan"))?;
        for i in 0..n {
            self.convert_field(
                buf,
                data_off + element.size * i,
                element,
                src,
                src_elem_off + fentity * i,
                from_elem,
                elem_conv,
            )
            .map_err(|e| e.index(i))?;
        }
        Ok(())
    }

    fn convert_vstring(
        &self,
        buf: &mut Vec<u8>,
        off: usize,
        finto: &Field,
        src: &[u8],
        soff: usize,
        ffrom: &Field,
    ) -> CResult<()> {
        let s = self.source_string(src, soff, ffrom)?;
        let data_off = optr::alloc(finto, buf, off, s.len() as u32 + 1)
            .map_err(|e| ConvertError::new(format!("offset string out of range: {e}")))?;
        buf[data_off..data_off + s.len()].copy_from_slice(&s);
        // Trailing NUL is already zero from the tail allocation.
        Ok(())
    }

    /// Source bytes for a string destination: fixed or variable byte
    /// strings pass through, primitives go through text formatting.
    fn source_string<'a>(
        &self,
        src: &'a [u8],
        soff: usize,
        ffrom: &Field,
    ) -> CResult<Cow<'a, [u8]>> {
        match &ffrom.type_ {
            FieldType::Bytes(n) => {
                if !matches!(ffrom.sub_type, SubType::ByteString) {
                    return Err(ConvertError::new("can not convert bytes to string"));
                }
                let bytes = &src[soff..soff + n];
                let len = bytes.iter().position(|&b| b == 0).unwrap_or(*n);
                Ok(Cow::Borrowed(&bytes[..len]))
            }
            FieldType::Pointer { .. } => {
                if !matches!(ffrom.sub_type, SubType::ByteString) {
                    return Err(ConvertError::new("can not convert pointer to string"));
                }
                let (n, data_off, _) = self.source_list(src, soff, ffrom)?;
                if n == 0 {
                    return Ok(Cow::Borrowed(&[]));
                }
                // Size counts the trailing NUL.
                Ok(Cow::Borrowed(&src[data_off..data_off + n - 1]))
            }
            FieldType::Decimal128 => {
                Ok(Cow::Owned(format::format_decimal128(&src[soff..soff + 16]).into_bytes()))
            }
            t if t.is_numeric() => {
                let s = format::format_scalar(ffrom, src, soff)?;
                Ok(Cow::Owned(s.into_bytes()))
            }
            other => Err(ConvertError::new(format!(
                "can not convert {} to string",
                other.kind()
            ))),
        }
    }

    fn convert_numeric(
        &self,
        buf: &mut Vec<u8>,
        off: usize,
        finto: &Field,
        src: &[u8],
        soff: usize,
        ffrom: &Field,
        conv: &FieldConv,
    ) -> CResult<()> {
        if !ffrom.type_.is_numeric() {
            return Err(ConvertError::new(format!(
                "can not convert {} into {}",
                ffrom.type_.kind(),
                finto.type_.kind()
            )));
        }
        let raw = format::read_raw(ffrom, src, soff)?;
        let value = match raw {
            Raw::I(v) => Num::Int(v as i128),
            Raw::U(v) => Num::Int(v as i128),
            Raw::F(v) => Num::Float(v),
        };

        if matches!(finto.type_, FieldType::Double) {
            let v = self.to_double(finto, ffrom, value)?;
            buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
            return Ok(());
        }

        let v = match &finto.sub_type {
            SubType::Fixed(prec) => fixed_numeric(*prec, value, ffrom)?,
            SubType::TimePoint(res) | SubType::Duration(res) => time_numeric(*res, value, ffrom)?,
            SubType::Enum(_) => {
                let v = match value {
                    Num::Int(v) => v,
                    Num::Float(_) => {
                        return Err(ConvertError::new("can not convert double to enum"))
                    }
                };
                if conv.enum_map.is_empty() {
                    v
                } else {
                    match conv.enum_map.get(&(v as i64)) {
                        Some(mapped) => *mapped as i128,
                        None => {
                            return Err(ConvertError::new(format!("unknown enum value {v}")))
                        }
                    }
                }
            }
            _ => match ffrom.sub_type {
                // Plain integer target from fixed point drops the scale.
                SubType::Fixed(prec) => match value {
                    Num::Int(v) => v / 10i128.pow(prec),
                    Num::Float(v) => float_to_int(v / 10f64.powi(prec as i32))?,
                },
                _ => match value {
                    Num::Int(v) => v,
                    Num::Float(v) => float_to_int(v)?,
                },
            },
        };
        write_int(buf, off, finto, v)
    }

    fn to_double(&self, finto: &Field, ffrom: &Field, value: Num) -> CResult<f64> {
        let v = match value {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        };
        match (&finto.sub_type, &ffrom.sub_type) {
            (_, SubType::Fixed(prec)) => Ok(v / 10f64.powi(*prec as i32)),
            (
                SubType::TimePoint(ir) | SubType::Duration(ir),
                SubType::TimePoint(fr) | SubType::Duration(fr),
            ) => {
                let (imul, idiv) = ir.ratio();
                let (fmul, fdiv) = fr.ratio();
                Ok(v * (fmul as f64 / fdiv as f64) * (idiv as f64 / imul as f64))
            }
            _ => Ok(v),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
}

fn source_element(ffrom: &Field) -> CResult<&Field> {
    match &ffrom.type_ {
        FieldType::Array { element, .. } => Ok(element),
        FieldType::Pointer { element, .. } => Ok(element),
        other => Err(ConvertError::new(format!("can not convert {} to a list", other.kind()))),
    }
}

fn read_ptr_checked(
    version: crate::scheme::PointerVersion,
    src: &[u8],
    soff: usize,
    entity: usize,
) -> CResult<crate::scheme::OffsetPtr> {
    optr::read_ptr(version, &src[soff..], entity).map_err(|e| ConvertError::new(e.to_string()))
}

fn float_to_int(v: f64) -> CResult<i128> {
    if v.is_nan() {
        return Err(ConvertError::new("source value is not a number"));
    }
    if !(-(2f64.powi(100))..2f64.powi(100)).contains(&v) {
        return Err(ConvertError::new(format!("source value {v} out of range")));
    }
    Ok(v.trunc() as i128)
}

/// Rescale into a fixed-point destination with precision `prec`.
fn fixed_numeric(prec: u32, value: Num, ffrom: &Field) -> CResult<i128> {
    match &ffrom.sub_type {
        SubType::Fixed(fprec) => {
            let delta = prec as i32 - *fprec as i32;
            match value {
                Num::Int(v) => {
                    if delta == 0 {
                        Ok(v)
                    } else if delta > 0 {
                        v.checked_mul(10i128.pow(delta as u32)).ok_or_else(|| {
                            ConvertError::new(format!("source value {v} out of range"))
                        })
                    } else {
                        Ok(v / 10i128.pow((-delta) as u32))
                    }
                }
                Num::Float(v) => float_to_int(v * 10f64.powi(delta)),
            }
        }
        SubType::None => match value {
            Num::Int(v) => v
                .checked_mul(10i128.pow(prec))
                .ok_or_else(|| ConvertError::new(format!("source value {v} out of range"))),
            Num::Float(v) => float_to_int(v * 10f64.powi(prec as i32)),
        },
        other => Err(ConvertError::new(format!(
            "can not convert non-fixed {} to fixed point",
            other.kind()
        ))),
    }
}

/// Rescale into a time destination with resolution `res` by the ratio of
/// the source and destination resolutions. Narrowing divides (integer
/// truncation, loss accepted), widening multiplies with overflow
/// detection.
fn time_numeric(res: TimeResolution, value: Num, ffrom: &Field) -> CResult<i128> {
    let (fmul, fdiv) = match &ffrom.sub_type {
        SubType::TimePoint(fr) | SubType::Duration(fr) => fr.ratio(),
        SubType::None => return num_to_int(value),
        other => {
            return Err(ConvertError::new(format!(
                "can not convert non-time {} to time",
                other.kind()
            )))
        }
    };
    let (imul, idiv) = res.ratio();
    // into = from * (fmul/fdiv) / (imul/idiv); both legs stay integral
    // because every resolution pair divides cleanly.
    let (mut mul, mut div) = (fmul as i128 * idiv as i128, fdiv as i128 * imul as i128);
    if mul >= div {
        mul /= div;
        div = 1;
    } else {
        div /= mul;
        mul = 1;
    }
    match value {
        Num::Int(v) => {
            let v = v / div;
            v.checked_mul(mul)
                .ok_or_else(|| ConvertError::new(format!("source value {v} out of range")))
        }
        Num::Float(v) => float_to_int(v / div as f64 * mul as f64),
    }
}

fn num_to_int(value: Num) -> CResult<i128> {
    match value {
        Num::Int(v) => Ok(v),
        Num::Float(v) => float_to_int(v),
    }
}

fn write_int(buf: &mut [u8], off: usize, finto: &Field, v: i128) -> CResult<()> {
    fn check(v: i128, min: i128, max: i128) -> CResult<()> {
        if v < min {
            return Err(ConvertError::new(format!(
                "source value out of range: min {min}, got {v}"
            )));
        }
        if v > max {
            return Err(ConvertError::new(format!(
                "source value out of range: max {max}, got {v}"
            )));
        }
        Ok(())
    }
    match finto.type_ {
        FieldType::Int8 => {
            check(v, i8::MIN as i128, i8::MAX as i128)?;
            buf[off] = v as i8 as u8;
        }
        FieldType::Int16 => {
            check(v, i16::MIN as i128, i16::MAX as i128)?;
            buf[off..off + 2].copy_from_slice(&(v as i16).to_le_bytes());
        }
        FieldType::Int32 => {
            check(v, i32::MIN as i128, i32::MAX as i128)?;
            buf[off..off + 4].copy_from_slice(&(v as i32).to_le_bytes());
        }
        FieldType::Int64 => {
            check(v, i64::MIN as i128, i64::MAX as i128)?;
            buf[off..off + 8].copy_from_slice(&(v as i64).to_le_bytes());
        }
        FieldType::UInt8 => {
            check(v, 0, u8::MAX as i128)?;
            buf[off] = v as u8;
        }
        FieldType::UInt16 => {
            check(v, 0, u16::MAX as i128)?;
            buf[off..off + 2].copy_from_slice(&(v as u16).to_le_bytes());
        }
        FieldType::UInt32 => {
            check(v, 0, u32::MAX as i128)?;
            buf[off..off + 4].copy_from_slice(&(v as u32).to_le_bytes());
        }
        FieldType::UInt64 => {
            check(v, 0, u64::MAX as i128)?;
            buf[off..off + 8].copy_from_slice(&(v as u64).to_le_bytes());
        }
        _ => return Err(ConvertError::new("destination is not an integer")),
    }
    Ok(())
}

/// Whether a plain memory copy of the source field produces a correct
/// destination value: identical scalars, widening within the same
/// signedness family, bytes that fit.
fn movable(finto: &Field, ffrom: &Field) -> bool {
    use FieldType as T;
    match (&finto.type_, &ffrom.type_) {
        (T::Int8, T::Int8) => true,
        (T::Int16, T::Int8 | T::Int16) => true,
        (T::Int32, T::Int8 | T::Int16 | T::Int32) => true,
        (T::Int64, T::Int8 | T::Int16 | T::Int32 | T::Int64) => true,
        (T::UInt8, T::UInt8) => true,
        (T::UInt16, T::UInt8 | T::UInt16) => true,
        (T::UInt32, T::UInt8 | T::UInt16 | T::UInt32) => true,
        (T::UInt64, T::UInt8 | T::UInt16 | T::UInt32 | T::UInt64) => true,
        (T::Double, T::Double) => true,
        (T::Decimal128, T::Decimal128) => true,
        (T::Bytes(into), T::Bytes(from)) => from <= into,
        _ => false,
    }
}

fn copy_mode(finto: &Field, ffrom: &Field) -> Mode {
    if !movable(finto, ffrom) {
        return Mode::Complex;
    }
    if finto.type_.kind() == ffrom.type_.kind() && finto.size == ffrom.size {
        Mode::Trivial
    } else {
        Mode::Copy
    }
}

fn convertible_numeric(finto: &Field, ffrom: &Field) -> CResult<FieldConv> {
    match &ffrom.type_ {
        t if t.is_integer() => {}
        FieldType::Double => {
            if matches!(finto.sub_type, SubType::Enum(_)) {
                return Err(ConvertError::new("can not convert double to enum"));
            }
        }
        other => {
            return Err(ConvertError::new(format!(
                "can not convert {} into {}",
                other.kind(),
                finto.type_.kind()
            )))
        }
    }

    let mut conv = FieldConv::default();
    match (&finto.sub_type, &ffrom.sub_type) {
        (SubType::Enum(idef), SubType::Enum(fdef)) => {
            let extended = fdef
                .values
                .iter()
                .all(|(name, value)| idef.lookup_name(name) == Some(*value));
            if extended {
                // Same or extended enum: plain copy works.
                conv.mode = copy_mode(finto, ffrom);
            } else {
                for (name, value) in &fdef.values {
                    if let Some(mapped) = idef.lookup_name(name) {
                        conv.enum_map.insert(*value, mapped);
                    }
                }
            }
        }
        (SubType::Enum(idef), _) => {
            // Validation map: plain integers must land on a known value.
            for (_, value) in &idef.values {
                conv.enum_map.insert(*value, *value);
            }
        }
        (SubType::TimePoint(ir), SubType::TimePoint(fr))
        | (SubType::Duration(ir), SubType::Duration(fr)) => {
            if ir == fr {
                conv.mode = copy_mode(finto, ffrom);
            }
        }
        (SubType::TimePoint(_) | SubType::Duration(_), SubType::None) => {
            conv.mode = copy_mode(finto, ffrom);
        }
        (SubType::TimePoint(_) | SubType::Duration(_), other) => {
            return Err(ConvertError::new(format!(
                "can not convert {} to time",
                other.kind()
            )));
        }
        (SubType::Fixed(ip), SubType::Fixed(fp)) => {
            if ip == fp {
                conv.mode = copy_mode(finto, ffrom);
            }
        }
        (SubType::Fixed(_), SubType::None) => {}
        (SubType::Fixed(_), other) => {
            return Err(ConvertError::new(format!(
                "can not convert {} to fixed point",
                other.kind()
            )));
        }
        (SubType::None, SubType::Fixed(_)) => {}
        (SubType::None, _) => {
            conv.mode = copy_mode(finto, ffrom);
        }
        _ => {}
    }
    Ok(conv)
}
