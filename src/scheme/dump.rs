// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Canonical scheme serialization. The `yamls` form is a YAML subset the
// parser reads back into an equivalent scheme; `yamls+gz` wraps it in
// gzip + base64 for embedding in configs; `sha256` is the content hash
// used as a cache key. All outputs carry their source prefix so they
// can be fed straight back into `Scheme::load`.

use std::fmt::Write as _;
use std::io::Write as _;

use sha2::Digest;

use crate::error::{Error, Result};
use crate::scheme::optr::PointerVersion;
use crate::scheme::{Field, FieldType, Options, Scheme, SubType};

pub fn dump(scheme: &Scheme, format: &str) -> Result<String> {
    let text = to_yaml(scheme);
    match format {
        "yamls" => Ok(format!("yamls://{text}")),
        "yamls+gz" => {
            use base64::Engine;
            let mut gz =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            gz.write_all(text.as_bytes())
                .and_then(|_| gz.finish())
                .map(|raw| {
                    format!(
                        "yamls+gz://{}",
                        base64::engine::general_purpose::STANDARD.encode(raw)
                    )
                })
                .map_err(Error::Io)
        }
        "sha256" => {
            let hash = sha2::Sha256::digest(text.as_bytes());
            Ok(format!("sha256://{}", hex::encode(hash)))
        }
        other => Err(Error::InvalidArgument(format!("unknown dump format '{other}'"))),
    }
}

fn to_yaml(scheme: &Scheme) -> String {
    let mut out = String::new();
    if !scheme.options.is_empty() {
        out.push_str("- name: ''\n");
        let _ = writeln!(out, "  options: {}", options_map(&scheme.options));
    }
    for msg in &scheme.messages {
        let _ = writeln!(out, "- name: {}", msg.name);
        if msg.msgid != 0 {
            let _ = writeln!(out, "  id: {}", msg.msgid);
        }
        if !msg.options.is_empty() {
            let _ = writeln!(out, "  options: {}", options_map(&msg.options));
        }
        if msg.fields.is_empty() {
            out.push_str("  fields: []\n");
        } else {
            out.push_str("  fields:\n");
            for (idx, field) in msg.fields.iter().enumerate() {
                let _ =
                    writeln!(out, "    - {}", field_map(scheme, field, msg.pmap == Some(idx)));
            }
        }
    }
    out
}

fn field_map(scheme: &Scheme, field: &Field, pmap: bool) -> String {
    let mut entries: Vec<(String, String)> = Vec::new();
    entries.push(("name".into(), field.name.clone()));
    entries.push(("type".into(), quote(&type_string(scheme, field))));

    match &field.type_ {
        FieldType::Array { count, .. } => {
            entries.push(("list-options.count-type".into(), count.type_.kind().into()));
        }
        FieldType::Pointer { version, .. } if *version != PointerVersion::Default => {
            entries.push(("list-options.offset-ptr-type".into(), version.name().into()));
        }
        FieldType::Union(def) => {
            let arms: Vec<String> =
                def.fields.iter().map(|arm| field_map(scheme, arm, false)).collect();
            entries.push(("union".into(), format!("[{}]", arms.join(", "))));
        }
        _ => {}
    }

    match &field.sub_type {
        SubType::None => {}
        SubType::ByteString => {
            if matches!(field.type_, FieldType::Bytes(_)) {
                entries.push(("options.type".into(), "string".into()));
            }
        }
        SubType::Fixed(prec) => entries.push(("options.type".into(), format!("fixed{prec}"))),
        SubType::TimePoint(res) => {
            entries.push(("options.type".into(), "time_point".into()));
            entries.push(("options.resolution".into(), res.name().into()));
        }
        SubType::Duration(res) => {
            entries.push(("options.type".into(), "duration".into()));
            entries.push(("options.resolution".into(), res.name().into()));
        }
        SubType::Enum(def) => {
            entries.push(("options.type".into(), "enum".into()));
            let values: Vec<String> =
                def.values.iter().map(|(n, v)| format!("{n}: {v}")).collect();
            entries.push(("enum".into(), format!("{{{}}}", values.join(", "))));
        }
        SubType::Bits(bits) => {
            entries.push(("options.type".into(), "bits".into()));
            let values: Vec<String> = bits
                .iter()
                .map(|b| format!("{{name: {}, offset: {}, size: {}}}", b.name, b.offset, b.size))
                .collect();
            entries.push(("bits".into(), format!("[{}]", values.join(", "))));
        }
    }

    let mut options = field.options.clone();
    if pmap {
        options.insert("pmap".into(), "yes".into());
    }
    if field.index >= 0 {
        options.insert("optional".into(), "yes".into());
    }
    for (k, v) in &options {
        entries.push((format!("options.{k}"), quote(v)));
    }

    let body: Vec<String> = entries.into_iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{{{}}}", body.join(", "))
}

fn type_string(scheme: &Scheme, field: &Field) -> String {
    match &field.type_ {
        FieldType::Bytes(n) => format!("byte{n}"),
        FieldType::Message(idx) => scheme.message(*idx).name.clone(),
        FieldType::Array { capacity, element, .. } => {
            format!("{}[{capacity}]", type_string(scheme, element))
        }
        FieldType::Pointer { element, .. } => {
            if matches!(field.sub_type, SubType::ByteString) {
                "string".into()
            } else {
                format!("*{}", type_string(scheme, element))
            }
        }
        FieldType::Union(_) => "union".into(),
        other => other.kind().into(),
    }
}

fn options_map(options: &Options) -> String {
    let body: Vec<String> = options.iter().map(|(k, v)| format!("{k}: {}", quote(v))).collect();
    format!("{{{}}}", body.join(", "))
}

/// Single-quote values that YAML would otherwise mangle.
fn quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "_-.".contains(c))
        && !s.chars().next().unwrap().is_ascii_digit();
    let numeric = !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if plain || numeric {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "''"))
    }
}
