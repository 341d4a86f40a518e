// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Structural scheme comparison and N-way merge. Two schemes are
// equivalent when their messages match by name, msgid, size and
// pairwise field structure (declared types, sub-types, resolutions,
// precisions, enum value sets, bit layouts). Merge unions global
// enums/unions (duplicates must be identical) and moves messages with
// their transitive dependencies, rejecting msgid clashes.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::scheme::{EnumDef, Field, FieldType, MessageDef, Scheme, SubType, UnionDef};

pub fn compare_enum(lhs: &EnumDef, rhs: &EnumDef) -> bool {
    if lhs.type_.kind() != rhs.type_.kind() {
        return false;
    }
    let l: BTreeSet<(&str, i64)> = lhs.values.iter().map(|(n, v)| (n.as_str(), *v)).collect();
    let r: BTreeSet<(&str, i64)> = rhs.values.iter().map(|(n, v)| (n.as_str(), *v)).collect();
    l == r
}

pub fn compare_union(ls: &Scheme, lhs: &UnionDef, rs: &Scheme, rhs: &UnionDef) -> bool {
    if lhs.name != rhs.name || lhs.union_size != rhs.union_size {
        return false;
    }
    if !compare_field(ls, &lhs.tag, rs, &rhs.tag) {
        return false;
    }
    if lhs.fields.len() != rhs.fields.len() {
        return false;
    }
    lhs.fields.iter().zip(&rhs.fields).all(|(l, r)| compare_field(ls, l, rs, r))
}

pub fn compare_field(ls: &Scheme, lhs: &Field, rs: &Scheme, rhs: &Field) -> bool {
    if lhs.name != rhs.name || lhs.size != rhs.size || lhs.offset != rhs.offset {
        return false;
    }
    if lhs.index != rhs.index {
        return false;
    }
    let types = match (&lhs.type_, &rhs.type_) {
        (FieldType::Bytes(l), FieldType::Bytes(r)) => l == r,
        (FieldType::Message(l), FieldType::Message(r)) => {
            compare_message(ls, ls.message(*l), rs, rs.message(*r))
        }
        (
            FieldType::Array { capacity: lc, count: lcnt, element: le },
            FieldType::Array { capacity: rc, count: rcnt, element: re },
        ) => lc == rc && compare_field(ls, lcnt, rs, rcnt) && compare_field(ls, le, rs, re),
        (
            FieldType::Pointer { version: lv, element: le },
            FieldType::Pointer { version: rv, element: re },
        ) => lv == rv && compare_field(ls, le, rs, re),
        (FieldType::Union(l), FieldType::Union(r)) => compare_union(ls, l, rs, r),
        (l, r) => l.kind() == r.kind(),
    };
    if !types {
        return false;
    }
    match (&lhs.sub_type, &rhs.sub_type) {
        (SubType::None, SubType::None) => true,
        (SubType::ByteString, SubType::ByteString) => true,
        (SubType::Fixed(l), SubType::Fixed(r)) => l == r,
        (SubType::TimePoint(l), SubType::TimePoint(r)) => l == r,
        (SubType::Duration(l), SubType::Duration(r)) => l == r,
        (SubType::Enum(l), SubType::Enum(r)) => compare_enum(l, r),
        (SubType::Bits(l), SubType::Bits(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| a == b)
        }
        _ => false,
    }
}

pub fn compare_message(ls: &Scheme, lhs: &MessageDef, rs: &Scheme, rhs: &MessageDef) -> bool {
    if lhs.name != rhs.name || lhs.msgid != rhs.msgid || lhs.size != rhs.size {
        return false;
    }
    if lhs.fields.len() != rhs.fields.len() {
        return false;
    }
    lhs.fields.iter().zip(&rhs.fields).all(|(l, r)| compare_field(ls, l, rs, r))
}

/// Structural equivalence of whole schemes.
pub fn compare(lhs: &Scheme, rhs: &Scheme) -> bool {
    if lhs.messages.len() != rhs.messages.len() {
        return false;
    }
    lhs.messages.iter().all(|lm| match rhs.lookup(&lm.name) {
        Some((_, rm)) => compare_message(lhs, lm, rhs, rm),
        None => false,
    })
}

/// Indices of every message reachable from `msg` through Message, Array,
/// Pointer and Union fields, including `idx` itself.
fn depends(scheme: &Scheme, idx: usize, deps: &mut BTreeSet<usize>) {
    if !deps.insert(idx) {
        return;
    }
    for field in &scheme.messages[idx].fields {
        field_depends(scheme, field, deps);
    }
}

fn field_depends(scheme: &Scheme, field: &Field, deps: &mut BTreeSet<usize>) {
    match &field.type_ {
        FieldType::Message(idx) => depends(scheme, *idx, deps),
        FieldType::Array { element, .. } => field_depends(scheme, element, deps),
        FieldType::Pointer { element, .. } => field_depends(scheme, element, deps),
        FieldType::Union(def) => {
            for arm in &def.fields {
                field_depends(scheme, arm, deps);
            }
        }
        _ => {}
    }
}

/// Rewrite message indices in a field copied between arenas.
fn remap_field(field: &mut Field, map: &dyn Fn(usize) -> usize) {
    match &mut field.type_ {
        FieldType::Message(idx) => *idx = map(*idx),
        FieldType::Array { element, .. } => remap_field(element, map),
        FieldType::Pointer { element, .. } => remap_field(element, map),
        FieldType::Union(def) => {
            for arm in &mut def.fields {
                remap_field(arm, map);
            }
        }
        _ => {}
    }
}

/// Merge schemes left to right. `None` entries are skipped; the result
/// is `None` only when every input is.
pub fn merge(list: &[&Scheme]) -> Result<Scheme> {
    let mut result = Scheme::default();
    let mut first = true;

    for scheme in list {
        if first {
            result = (*scheme).clone();
            first = false;
            continue;
        }
        // Global enums: duplicates allowed only when identical.
        for e in &scheme.enums {
            match result.enums.iter().find(|r| r.name == e.name) {
                Some(r) if compare_enum(r, e) => {}
                Some(_) => {
                    return Err(Error::AlreadyExists(format!(
                        "global enum '{}' differs between schemes",
                        e.name
                    )))
                }
                None => result.enums.push(e.clone()),
            }
        }
        for u in &scheme.unions {
            match result.unions.iter().find(|r| r.name == u.name) {
                Some(r) if compare_union(&result, r, scheme, u) => {}
                Some(_) => {
                    return Err(Error::AlreadyExists(format!(
                        "global union '{}' differs between schemes",
                        u.name
                    )))
                }
                None => result.unions.push(u.clone()),
            }
        }

        // Pick messages with ids, plus everything they depend on.
        let mut move_set = BTreeSet::new();
        for (idx, msg) in scheme.messages.iter().enumerate() {
            if msg.msgid == 0 {
                continue;
            }
            if let Some((_, existing)) = result.lookup(&msg.name) {
                if !compare_message(&result, existing, scheme, msg) {
                    return Err(Error::AlreadyExists(format!(
                        "message '{}' differs between schemes",
                        msg.name
                    )));
                }
                continue;
            }
            if let Some((_, existing)) = result.lookup_id(msg.msgid) {
                return Err(Error::AlreadyExists(format!(
                    "msgid {} used by '{}' and '{}'",
                    msg.msgid, existing.name, msg.name
                )));
            }
            depends(scheme, idx, &mut move_set);
        }

        // Copy in source order, remapping arena indices. Dependencies
        // already present by name are reused when identical.
        let mut index_map = vec![usize::MAX; scheme.messages.len()];
        let mut to_copy = Vec::new();
        for idx in &move_set {
            let msg = &scheme.messages[*idx];
            match result.lookup(&msg.name) {
                Some((ridx, existing)) => {
                    if !compare_message(&result, existing, scheme, msg) {
                        return Err(Error::AlreadyExists(format!(
                            "message '{}' differs between schemes",
                            msg.name
                        )));
                    }
                    index_map[*idx] = ridx;
                }
                None => {
                    index_map[*idx] = result.messages.len() + to_copy.len();
                    to_copy.push(*idx);
                }
            }
        }
        for idx in to_copy {
            let mut msg = scheme.messages[idx].clone();
            let map = |i: usize| index_map[i];
            for field in &mut msg.fields {
                remap_field(field, &map);
            }
            result.messages.push(msg);
        }
    }
    Ok(result)
}
