// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Scheme source parser. The source is a YAML list of message blocks:
//
//   - name: sub
//     fields:
//       - {name: s0, type: int32}
//       - {name: s1, type: 'double[4]'}
//   - name: test
//     id: 1
//     fields:
//       - {name: f1, type: int64, options.type: enum, enum: {A: 1}}
//       - {name: f7, type: '*string'}
//
// A block with an empty name holds scheme-level options, enums, unions
// and aliases. Parsing runs in passes: collect message shells, resolve
// field types against the full name table, compute sizes (detecting
// inline cycles), assign packed offsets and presence-map bits.

use std::io::Read;
use std::sync::Arc;

use serde_yaml::Value;

use crate::error::{Error, Result};
use crate::scheme::optr::PointerVersion;
use crate::scheme::{
    BitFieldDef, EnumDef, Field, FieldType, MessageDef, Options, Scheme, SubType, TimeResolution,
    UnionDef,
};

/// Decode the `yamls+gz://` body: base64 of gzip-compressed text.
pub fn inflate(body: &str) -> Result<String> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .map_err(|e| Error::InvalidArgument(format!("invalid base64 scheme: {e}")))?;
    let mut text = String::new();
    flate2::read::GzDecoder::new(raw.as_slice())
        .read_to_string(&mut text)
        .map_err(|e| Error::InvalidArgument(format!("invalid gzip scheme: {e}")))?;
    Ok(text)
}

pub fn parse(text: &str) -> Result<Scheme> {
    let root: Value = serde_yaml::from_str(text)
        .map_err(|e| Error::InvalidArgument(format!("invalid scheme yaml: {e}")))?;
    let list = root
        .as_sequence()
        .ok_or_else(|| Error::InvalidArgument("scheme source is not a list".into()))?;

    let mut parser = Parser::default();

    // Pass 1: shells and global declarations.
    for item in list {
        let map = item
            .as_mapping()
            .ok_or_else(|| Error::InvalidArgument("scheme entry is not a map".into()))?;
        let name = str_key(map, "name").unwrap_or_default();
        if name.is_empty() {
            parser.parse_globals(map)?;
        } else {
            parser.add_shell(&name, map)?;
        }
    }

    // Pass 2: fields, with all message names known.
    for i in 0..parser.raw.len() {
        parser.parse_message(i)?;
    }

    // Pass 3: sizes, offsets, pmap.
    parser.finish()
}

#[derive(Default)]
struct Parser {
    scheme: Scheme,
    raw: Vec<Value>,
    enums: Vec<Arc<EnumDef>>,
    unions: Vec<UnionDef>,
    aliases: Vec<Field>,
}

fn str_key(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(Value::from(key)).map(value_to_string)
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim_end().to_string(),
    }
}

fn value_to_i64(v: &Value) -> Result<i64> {
    match v {
        Value::Number(n) => {
            n.as_i64().ok_or_else(|| Error::InvalidArgument(format!("invalid integer {n}")))
        }
        Value::String(s) => s
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("invalid integer '{s}'"))),
        other => Err(Error::InvalidArgument(format!("invalid integer {other:?}"))),
    }
}

/// Flatten `options: {a: 1}` submaps and dotted `options.a: 1` keys into
/// one `a -> 1` map.
fn collect_options(map: &serde_yaml::Mapping, prefix: &str) -> Options {
    let mut out = Options::new();
    if let Some(sub) = map.get(Value::from(prefix)).and_then(|v| v.as_mapping()) {
        collect_into(sub, "", &mut out);
    }
    let dotted = format!("{prefix}.");
    for (k, v) in map {
        if let Value::String(key) = k {
            if let Some(rest) = key.strip_prefix(&dotted) {
                match v.as_mapping() {
                    Some(sub) => collect_into(sub, rest, &mut out),
                    None => {
                        out.insert(rest.to_string(), value_to_string(v));
                    }
                }
            }
        }
    }
    out
}

fn collect_into(map: &serde_yaml::Mapping, prefix: &str, out: &mut Options) {
    for (k, v) in map {
        let key = value_to_string(k);
        let key = if prefix.is_empty() { key } else { format!("{prefix}.{key}") };
        match v.as_mapping() {
            Some(sub) => collect_into(sub, &key, out),
            None => {
                out.insert(key, value_to_string(v));
            }
        }
    }
}

impl Parser {
    fn parse_globals(&mut self, map: &serde_yaml::Mapping) -> Result<()> {
        let options = collect_options(map, "options");
        self.scheme.options.extend(options);
        if let Some(enums) = map.get(Value::from("enums")) {
            self.parse_enums(enums)?;
        }
        if let Some(unions) = map.get(Value::from("unions")) {
            self.parse_unions(unions)?;
        }
        if let Some(aliases) = map.get(Value::from("aliases")) {
            let list = aliases
                .as_sequence()
                .ok_or_else(|| Error::InvalidArgument("aliases is not a list".into()))?;
            for item in list {
                let map = item
                    .as_mapping()
                    .ok_or_else(|| Error::InvalidArgument("alias entry is not a map".into()))?;
                let field = self.parse_field(map)?;
                if self.aliases.iter().any(|a| a.name == field.name) {
                    return Err(Error::AlreadyExists(format!("alias '{}'", field.name)));
                }
                self.aliases.push(field);
            }
        }
        Ok(())
    }

    fn parse_enums(&mut self, enums: &Value) -> Result<()> {
        let map = enums
            .as_mapping()
            .ok_or_else(|| Error::InvalidArgument("enums is not a map".into()))?;
        for (name, body) in map {
            let name = value_to_string(name);
            let body = body
                .as_mapping()
                .ok_or_else(|| Error::InvalidArgument(format!("enum '{name}' is not a map")))?;
            let type_str = str_key(body, "type").unwrap_or_else(|| "int32".into());
            let type_ = scalar_type(&type_str)
                .filter(FieldType::is_integer)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("enum '{name}': invalid type '{type_str}'"))
                })?;
            let values = body
                .get(Value::from("enum"))
                .ok_or_else(|| Error::InvalidArgument(format!("enum '{name}': no values")))?;
            let def = build_enum(&name, type_, values)?;
            if self.enums.iter().any(|e| e.name == name) {
                return Err(Error::AlreadyExists(format!("enum '{name}'")));
            }
            let def = Arc::new(def);
            self.enums.push(def.clone());
            self.scheme.enums.push(def);
        }
        Ok(())
    }

    fn parse_unions(&mut self, unions: &Value) -> Result<()> {
        let map = unions
            .as_mapping()
            .ok_or_else(|| Error::InvalidArgument("unions is not a map".into()))?;
        // Union arms may reference messages, resolved later; globals are
        // restricted to message-free arms to keep the arena immutable
        // after pass 2.
        for (name, body) in map {
            let name = value_to_string(name);
            let body = body
                .as_mapping()
                .ok_or_else(|| Error::InvalidArgument(format!("union '{name}' is not a map")))?;
            let arms = body
                .get(Value::from("union"))
                .ok_or_else(|| Error::InvalidArgument(format!("union '{name}': no arms")))?;
            let def = self.build_union(&name, arms)?;
            if self.unions.iter().any(|u| u.name == name) {
                return Err(Error::AlreadyExists(format!("union '{name}'")));
            }
            self.unions.push(def.clone());
            self.scheme.unions.push(def);
        }
        Ok(())
    }

    fn build_union(&mut self, name: &str, arms: &Value) -> Result<UnionDef> {
        let list = arms
            .as_sequence()
            .ok_or_else(|| Error::InvalidArgument(format!("union '{name}' arms is not a list")))?;
        let mut fields = Vec::new();
        for item in list {
            let map = item
                .as_mapping()
                .ok_or_else(|| Error::InvalidArgument("union arm is not a map".into()))?;
            let mut field = self.parse_field(map)?;
            field.offset = 1;
            if fields.iter().any(|f: &Field| f.name == field.name) {
                return Err(Error::AlreadyExists(format!("union arm '{}'", field.name)));
            }
            fields.push(field);
        }
        if fields.is_empty() {
            return Err(Error::InvalidArgument(format!("union '{name}' has no arms")));
        }
        let tag = Field {
            name: format!("{name}_type"),
            type_: FieldType::UInt8,
            sub_type: SubType::None,
            size: 1,
            offset: 0,
            index: -1,
            options: Options::new(),
        };
        Ok(UnionDef { name: name.to_string(), tag, fields, union_size: 0 })
    }

    fn add_shell(&mut self, name: &str, map: &serde_yaml::Mapping) -> Result<()> {
        if self.scheme.messages.iter().any(|m| m.name == name) {
            return Err(Error::AlreadyExists(format!("message '{name}'")));
        }
        let msgid = match map.get(Value::from("id")) {
            Some(v) => value_to_i64(v)? as i32,
            None => 0,
        };
        if msgid != 0 {
            if let Some((_, m)) = self.scheme.lookup_id(msgid) {
                return Err(Error::AlreadyExists(format!(
                    "msgid {msgid} in '{name}' and '{}'",
                    m.name
                )));
            }
        }
        self.scheme.messages.push(MessageDef {
            name: name.to_string(),
            msgid,
            size: 0,
            fields: Vec::new(),
            pmap: None,
            options: collect_options(map, "options"),
        });
        self.raw.push(Value::Mapping(map.clone()));
        Ok(())
    }

    fn parse_message(&mut self, idx: usize) -> Result<()> {
        let raw = self.raw[idx].clone();
        let map = raw.as_mapping().unwrap();
        if let Some(enums) = map.get(Value::from("enums")) {
            self.parse_enums(enums)?;
        }
        let mut fields = Vec::new();
        if let Some(list) = map.get(Value::from("fields")) {
            let list = list
                .as_sequence()
                .ok_or_else(|| Error::InvalidArgument("fields is not a list".into()))?;
            for item in list {
                let fmap = item
                    .as_mapping()
                    .ok_or_else(|| Error::InvalidArgument("field entry is not a map".into()))?;
                let field = self.parse_field(fmap).map_err(|e| {
                    Error::InvalidArgument(format!(
                        "message '{}': {e}",
                        self.scheme.messages[idx].name
                    ))
                })?;
                if fields.iter().any(|f: &Field| f.name == field.name) {
                    return Err(Error::AlreadyExists(format!(
                        "field '{}' in message '{}'",
                        field.name, self.scheme.messages[idx].name
                    )));
                }
                fields.push(field);
            }
        }
        self.scheme.messages[idx].fields = fields;
        Ok(())
    }

    fn parse_field(&mut self, map: &serde_yaml::Mapping) -> Result<Field> {
        let name = str_key(map, "name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidArgument("field without name".into()))?;
        let type_str = str_key(map, "type")
            .ok_or_else(|| Error::InvalidArgument(format!("field '{name}' without type")))?;
        let mut options = collect_options(map, "options");
        let list_options = collect_options(map, "list-options");

        let mut field = self.parse_type(&name, &type_str, &list_options, map)?;
        field.name = name.clone();

        // Sub-typing from options.
        if let Some(sub) = options.remove("type") {
            match sub.as_str() {
                "string" => match field.type_ {
                    FieldType::Bytes(_) => field.sub_type = SubType::ByteString,
                    _ => {
                        return Err(Error::InvalidArgument(format!(
                            "field '{name}': string sub-type needs byte storage"
                        )))
                    }
                },
                "enum" => {
                    let values = map.get(Value::from("enum")).ok_or_else(|| {
                        Error::InvalidArgument(format!("field '{name}': enum without values"))
                    })?;
                    if !field.type_.is_integer() {
                        return Err(Error::InvalidArgument(format!(
                            "field '{name}': enum needs integer storage"
                        )));
                    }
                    let def = build_enum(&name, field.type_.clone(), values)?;
                    field.sub_type = SubType::Enum(Arc::new(def));
                }
                "bits" => {
                    let bits = map.get(Value::from("bits")).ok_or_else(|| {
                        Error::InvalidArgument(format!("field '{name}': bits without members"))
                    })?;
                    if !field.type_.is_integer() {
                        return Err(Error::InvalidArgument(format!(
                            "field '{name}': bits needs integer storage"
                        )));
                    }
                    field.sub_type = SubType::Bits(parse_bits(&name, bits, field.size * 8)?);
                }
                "time_point" | "duration" => {
                    let res = options.remove("resolution").ok_or_else(|| {
                        Error::InvalidArgument(format!("field '{name}': time without resolution"))
                    })?;
                    let res = TimeResolution::parse(&res).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "field '{name}': invalid resolution '{res}'"
                        ))
                    })?;
                    if !field.type_.is_numeric() {
                        return Err(Error::InvalidArgument(format!(
                            "field '{name}': time needs numeric storage"
                        )));
                    }
                    field.sub_type = if sub == "duration" {
                        SubType::Duration(res)
                    } else {
                        SubType::TimePoint(res)
                    };
                }
                other => {
                    let prec = other.strip_prefix("fixed").and_then(|p| p.parse::<u32>().ok());
                    match prec {
                        Some(prec) if field.type_.is_integer() => {
                            field.sub_type = SubType::Fixed(prec)
                        }
                        Some(_) => {
                            return Err(Error::InvalidArgument(format!(
                                "field '{name}': fixed point needs integer storage"
                            )))
                        }
                        None => {
                            return Err(Error::InvalidArgument(format!(
                                "field '{name}': unknown sub-type '{other}'"
                            )))
                        }
                    }
                }
            }
        }

        field.options = options;
        Ok(field)
    }

    fn parse_type(
        &mut self,
        name: &str,
        type_str: &str,
        list_options: &Options,
        map: &serde_yaml::Mapping,
    ) -> Result<Field> {
        let make = |type_: FieldType, sub_type: SubType, size: usize| Field {
            name: name.to_string(),
            type_,
            sub_type,
            size,
            offset: 0,
            index: -1,
            options: Options::new(),
        };

        if let Some((type_, size)) = scalar_type_size(type_str) {
            return Ok(make(type_, SubType::None, size));
        }
        if let Some(n) = type_str.strip_prefix("byte") {
            if let Ok(n) = n.parse::<usize>() {
                if n == 0 {
                    return Err(Error::InvalidArgument(format!("field '{name}': empty bytes")));
                }
                return Ok(make(FieldType::Bytes(n), SubType::None, n));
            }
        }
        if type_str == "string" {
            let element = Box::new(make(FieldType::Int8, SubType::None, 1));
            let version = pointer_version(name, list_options)?;
            return Ok(make(
                FieldType::Pointer { version, element },
                SubType::ByteString,
                version.size(),
            ));
        }
        if let Some(inner) = type_str.strip_prefix('*') {
            let element = Box::new(self.parse_type(name, inner, &Options::new(), map)?);
            let version = pointer_version(name, list_options)?;
            return Ok(make(FieldType::Pointer { version, element }, SubType::None, version.size()));
        }
        if let Some(open) = type_str.find('[') {
            if !type_str.ends_with(']') {
                return Err(Error::InvalidArgument(format!(
                    "field '{name}': malformed array type '{type_str}'"
                )));
            }
            let capacity: usize = type_str[open + 1..type_str.len() - 1].parse().map_err(|_| {
                Error::InvalidArgument(format!("field '{name}': invalid array size '{type_str}'"))
            })?;
            if capacity == 0 {
                return Err(Error::InvalidArgument(format!("field '{name}': empty array")));
            }
            let mut element = self.parse_type(name, &type_str[..open], &Options::new(), map)?;
            let (count_type, count_size) = match list_options.get("count-type") {
                Some(t) => scalar_type_size(t).ok_or_else(|| {
                    Error::InvalidArgument(format!("field '{name}': invalid count type '{t}'"))
                })?,
                None => default_count_type(capacity),
            };
            let count = Box::new(Field {
                name: format!("{name}_count"),
                type_: count_type,
                sub_type: SubType::None,
                size: count_size,
                offset: 0,
                index: -1,
                options: Options::new(),
            });
            element.offset = count_size;
            // Element and count sizes are known here except for message
            // elements, fixed up in the size pass.
            return Ok(make(
                FieldType::Array { capacity, count, element: Box::new(element) },
                SubType::None,
                0,
            ));
        }
        if type_str == "union" {
            let arms = map.get(Value::from("union")).ok_or_else(|| {
                Error::InvalidArgument(format!("field '{name}': union without arms"))
            })?;
            let def = self.build_union(name, arms)?;
            return Ok(make(FieldType::Union(Box::new(def)), SubType::None, 0));
        }
        if let Some(def) = self.enums.iter().find(|e| e.name == type_str) {
            let (type_, size) = scalar_type_size(def.type_.kind()).unwrap();
            return Ok(make(type_, SubType::Enum(def.clone()), size));
        }
        if let Some(def) = self.unions.iter().find(|u| u.name == type_str) {
            return Ok(make(FieldType::Union(Box::new(def.clone())), SubType::None, 0));
        }
        if let Some(alias) = self.aliases.iter().find(|a| a.name == type_str) {
            let mut field = alias.clone();
            rename(&mut field, name);
            return Ok(field);
        }
        if let Some((idx, _)) = self.scheme.lookup(type_str) {
            return Ok(make(FieldType::Message(idx), SubType::None, 0));
        }
        Err(Error::InvalidArgument(format!("field '{name}': unknown type '{type_str}'")))
    }

    fn finish(mut self) -> Result<Scheme> {
        // Sizes with inline-cycle detection.
        let mut sizes: Vec<Option<usize>> = vec![None; self.scheme.messages.len()];
        for i in 0..self.scheme.messages.len() {
            let mut visiting = vec![false; self.scheme.messages.len()];
            message_size(&mut self.scheme, i, &mut sizes, &mut visiting)?;
        }
        // Offsets and pmap bits.
        for msg in &mut self.scheme.messages {
            let mut offset = 0usize;
            let mut pmap = None;
            let mut index = 0i32;
            for (i, field) in msg.fields.iter_mut().enumerate() {
                field.offset = offset;
                offset += field.size;
                if field.options.remove("pmap").map(|v| v == "yes" || v == "true") == Some(true) {
                    if pmap.is_some() {
                        return Err(Error::InvalidArgument(format!(
                            "message '{}': duplicate pmap field '{}'",
                            msg.name, field.name
                        )));
                    }
                    pmap = Some(i);
                }
                if field.options.remove("optional").map(|v| v == "yes" || v == "true") == Some(true)
                {
                    field.index = index;
                    index += 1;
                }
            }
            msg.size = offset;
            msg.pmap = pmap;
            if index > 0 {
                let pmap_idx = pmap.ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "message '{}': optional fields without pmap",
                        msg.name
                    ))
                })?;
                let bits = msg.fields[pmap_idx].size * 8;
                if index as usize > bits {
                    return Err(Error::RangeOverflow(format!(
                        "message '{}': {index} optional fields over pmap capacity {bits}",
                        msg.name
                    )));
                }
            }
        }
        Ok(self.scheme)
    }
}

/// Resolve sizes of message `idx` and every field inside it.
fn message_size(
    scheme: &mut Scheme,
    idx: usize,
    sizes: &mut Vec<Option<usize>>,
    visiting: &mut Vec<bool>,
) -> Result<usize> {
    if let Some(size) = sizes[idx] {
        return Ok(size);
    }
    if visiting[idx] {
        return Err(Error::InvalidArgument(format!(
            "message '{}': recursive inline reference",
            scheme.messages[idx].name
        )));
    }
    visiting[idx] = true;
    let mut fields = std::mem::take(&mut scheme.messages[idx].fields);
    let mut total = 0usize;
    for field in &mut fields {
        field_size(scheme, field, sizes, visiting)?;
        total += field.size;
    }
    scheme.messages[idx].fields = fields;
    scheme.messages[idx].size = total;
    sizes[idx] = Some(total);
    visiting[idx] = false;
    Ok(total)
}

fn field_size(
    scheme: &mut Scheme,
    field: &mut Field,
    sizes: &mut Vec<Option<usize>>,
    visiting: &mut Vec<bool>,
) -> Result<()> {
    match &mut field.type_ {
        FieldType::Message(idx) => {
            let idx = *idx;
            field.size = message_size(scheme, idx, sizes, visiting)?;
        }
        FieldType::Array { capacity, count, element } => {
            field_size(scheme, element, sizes, visiting)?;
            field.size = count.size + *capacity * element.size;
        }
        FieldType::Pointer { version, element } => {
            // Pointer size is fixed; the element still needs its own size
            // for entity accounting.
            field_size(scheme, element, sizes, visiting)?;
            field.size = version.size();
        }
        FieldType::Union(def) => {
            let mut arms = std::mem::take(&mut def.fields);
            let mut max = 0usize;
            for arm in &mut arms {
                field_size(scheme, arm, sizes, visiting)?;
                max = max.max(arm.size);
            }
            def.fields = arms;
            def.union_size = max;
            field.size = def.tag.size + max;
        }
        _ => {}
    }
    Ok(())
}

/// Rename an alias-expanded field (and its inner element fields created
/// from the alias name) to the declaring field's name.
fn rename(field: &mut Field, name: &str) {
    let old = field.name.clone();
    field.name = name.to_string();
    match &mut field.type_ {
        FieldType::Pointer { element, .. } => {
            if element.name == old {
                rename(element, name);
            }
        }
        FieldType::Array { count, element, .. } => {
            if element.name == old {
                rename(element, name);
            }
            count.name = format!("{name}_count");
        }
        _ => {}
    }
}

fn build_enum(name: &str, type_: FieldType, values: &Value) -> Result<EnumDef> {
    let map = values
        .as_mapping()
        .ok_or_else(|| Error::InvalidArgument(format!("enum '{name}': values is not a map")))?;
    let mut out: Vec<(String, i64)> = Vec::new();
    for (k, v) in map {
        let key = value_to_string(k);
        let value = value_to_i64(v)?;
        if out.iter().any(|(n, _)| *n == key) {
            return Err(Error::AlreadyExists(format!("enum '{name}' value '{key}'")));
        }
        if out.iter().any(|(_, x)| *x == value) {
            return Err(Error::AlreadyExists(format!("enum '{name}' value {value}")));
        }
        out.push((key, value));
    }
    if out.is_empty() {
        return Err(Error::InvalidArgument(format!("enum '{name}' has no values")));
    }
    Ok(EnumDef { name: name.to_string(), type_, values: out })
}

fn parse_bits(name: &str, bits: &Value, capacity: usize) -> Result<Vec<BitFieldDef>> {
    let mut out: Vec<BitFieldDef> = Vec::new();
    match bits {
        Value::Sequence(list) => {
            for item in list {
                let next_free = out.iter().map(|b| b.offset + b.size).max().unwrap_or(0);
                match item {
                    Value::String(bname) => {
                        out.push(BitFieldDef { name: bname.clone(), offset: next_free, size: 1 });
                    }
                    Value::Mapping(map) => {
                        let bname = str_key(map, "name").ok_or_else(|| {
                            Error::InvalidArgument(format!("field '{name}': bit without name"))
                        })?;
                        let offset = match map.get(Value::from("offset")) {
                            Some(v) => value_to_i64(v)? as u32,
                            None => next_free,
                        };
                        let size = match map.get(Value::from("size")) {
                            Some(v) => value_to_i64(v)? as u32,
                            None => 1,
                        };
                        out.push(BitFieldDef { name: bname, offset, size });
                    }
                    _ => {
                        return Err(Error::InvalidArgument(format!(
                            "field '{name}': invalid bit entry"
                        )))
                    }
                }
            }
        }
        _ => return Err(Error::InvalidArgument(format!("field '{name}': bits is not a list"))),
    }
    for b in &out {
        if b.size == 0 {
            return Err(Error::InvalidArgument(format!("field '{name}': empty bit '{}'", b.name)));
        }
        if (b.offset + b.size) as usize > capacity {
            return Err(Error::RangeOverflow(format!(
                "field '{name}': bit '{}' over storage width {capacity}",
                b.name
            )));
        }
    }
    // Overlap check.
    for (i, a) in out.iter().enumerate() {
        for b in &out[i + 1..] {
            if a.name == b.name {
                return Err(Error::AlreadyExists(format!("field '{name}': bit '{}'", a.name)));
            }
            if a.offset < b.offset + b.size && b.offset < a.offset + a.size {
                return Err(Error::InvalidArgument(format!(
                    "field '{name}': overlapping bits '{}' and '{}'",
                    a.name, b.name
                )));
            }
        }
    }
    Ok(out)
}

fn default_count_type(capacity: usize) -> (FieldType, usize) {
    if capacity <= i8::MAX as usize {
        (FieldType::Int8, 1)
    } else if capacity <= i16::MAX as usize {
        (FieldType::Int16, 2)
    } else {
        (FieldType::Int32, 4)
    }
}

fn pointer_version(name: &str, list_options: &Options) -> Result<PointerVersion> {
    match list_options.get("offset-ptr-type") {
        Some(v) => PointerVersion::parse(v).ok_or_else(|| {
            Error::InvalidArgument(format!("field '{name}': invalid offset-ptr-type '{v}'"))
        }),
        None => Ok(PointerVersion::Default),
    }
}

fn scalar_type(s: &str) -> Option<FieldType> {
    scalar_type_size(s).map(|(t, _)| t)
}

fn scalar_type_size(s: &str) -> Option<(FieldType, usize)> {
    match s {
        "int8" => Some((FieldType::Int8, 1)),
        "int16" => Some((FieldType::Int16, 2)),
        "int32" => Some((FieldType::Int32, 4)),
        "int64" => Some((FieldType::Int64, 8)),
        "uint8" => Some((FieldType::UInt8, 1)),
        "uint16" => Some((FieldType::UInt16, 2)),
        "uint32" => Some((FieldType::UInt32, 4)),
        "uint64" => Some((FieldType::UInt64, 8)),
        "double" => Some((FieldType::Double, 8)),
        "decimal128" => Some((FieldType::Decimal128, 16)),
        _ => None,
    }
}
