// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

use libtll::scheme::merge::{compare, merge};
use libtll::scheme::optr::{self, OffsetPtr, PointerVersion};
use libtll::scheme::{format, FieldType, Scheme, SubType, TimeResolution};

const SCHEME: &str = "yamls://
- name: sub
  fields:
    - {name: s0, type: int32}
    - {name: s1, type: 'double[4]'}
- name: test
  id: 1
  fields:
    - {name: f0, type: int8}
    - {name: f1, type: int64}
    - {name: f2, type: double}
    - {name: f3, type: decimal128}
    - {name: f4, type: byte32}
    - {name: f5, type: '*int16'}
    - {name: f6, type: 'sub[4]', list-options.count-type: int16}
    - {name: f7, type: string}
    - {name: f8, type: '*string'}
- name: enums
  id: 10
  fields:
    - {name: e0, type: int8, options.type: enum, enum: {A: 0, B: 1}}
    - {name: e1, type: int64, options.type: enum, enum: {A: 123, B: 456}}
- name: time
  id: 20
  fields:
    - {name: t0, type: double, options.type: duration, options.resolution: day}
    - {name: t1, type: int16, options.type: duration, options.resolution: s}
    - {name: t2, type: int64, options.type: time_point, options.resolution: ns}
- name: bits
  id: 30
  fields:
    - {name: b0, type: int8, options.type: bits, bits: [a, b]}
    - {name: b1, type: uint32, options.type: bits, bits: [c, d]}
";

fn field<'a>(
    scheme: &'a Scheme,
    msg: &str,
    name: &str,
) -> &'a libtll::scheme::Field {
    let (_, m) = scheme.lookup(msg).expect(msg);
    m.field(name).expect(name)
}

#[test]
fn sizes_and_offsets() {
    let scheme = Scheme::load(SCHEME).unwrap();

    let (_, sub) = scheme.lookup("sub").unwrap();
    assert_eq!(sub.msgid, 0);
    let sub_size = 4 + 1 + 4 * 8;
    assert_eq!(sub.size, sub_size);

    let s0 = field(&scheme, "sub", "s0");
    assert_eq!((s0.size, s0.offset), (4, 0));
    let s1 = field(&scheme, "sub", "s1");
    assert_eq!((s1.size, s1.offset), (1 + 4 * 8, 4));
    let FieldType::Array { capacity, count, element } = &s1.type_ else {
        panic!("s1 is not an array");
    };
    assert_eq!(*capacity, 4);
    assert_eq!(count.name, "s1_count");
    assert_eq!((count.size, count.offset), (1, 0));
    assert_eq!((element.size, element.offset), (8, 1));

    let (_, test) = scheme.lookup("test").unwrap();
    assert_eq!(test.msgid, 1);
    let expect = [
        ("f0", 1usize, 0usize),
        ("f1", 8, 1),
        ("f2", 8, 9),
        ("f3", 16, 17),
        ("f4", 32, 33),
        ("f5", 8, 65),
        ("f6", 2 + 4 * sub_size, 73),
        ("f7", 8, 75 + 4 * sub_size),
        ("f8", 8, 83 + 4 * sub_size),
    ];
    for (name, size, offset) in expect {
        let f = field(&scheme, "test", name);
        assert_eq!((f.size, f.offset), (size, offset), "field {name}");
    }
    assert_eq!(test.size, 91 + 4 * sub_size);

    // f7 is a byte-string pointer over int8 entities.
    let f7 = field(&scheme, "test", "f7");
    assert!(matches!(f7.sub_type, SubType::ByteString));
    let FieldType::Pointer { element, .. } = &f7.type_ else {
        panic!("f7 is not a pointer");
    };
    assert_eq!(element.size, 1);

    // f8 is a plain pointer whose element is itself a byte-string.
    let f8 = field(&scheme, "test", "f8");
    assert!(matches!(f8.sub_type, SubType::None));
    let FieldType::Pointer { element, .. } = &f8.type_ else {
        panic!("f8 is not a pointer");
    };
    assert!(matches!(element.sub_type, SubType::ByteString));

    // f6 elements reference the sub message.
    let f6 = field(&scheme, "test", "f6");
    let FieldType::Array { count, element, .. } = &f6.type_ else {
        panic!("f6 is not an array");
    };
    assert_eq!(count.size, 2);
    let FieldType::Message(idx) = element.type_ else {
        panic!("f6 element is not a message");
    };
    assert_eq!(scheme.message(idx).name, "sub");
}

#[test]
fn sub_types() {
    let scheme = Scheme::load(SCHEME).unwrap();

    let e1 = field(&scheme, "enums", "e1");
    let SubType::Enum(def) = &e1.sub_type else {
        panic!("e1 is not an enum");
    };
    assert_eq!(def.lookup_name("A"), Some(123));
    assert_eq!(def.lookup_value(456), Some("B"));

    let t0 = field(&scheme, "time", "t0");
    assert!(matches!(t0.sub_type, SubType::Duration(TimeResolution::Day)));
    let t2 = field(&scheme, "time", "t2");
    assert!(matches!(t2.sub_type, SubType::TimePoint(TimeResolution::Ns)));

    let b0 = field(&scheme, "bits", "b0");
    let SubType::Bits(bits) = &b0.sub_type else {
        panic!("b0 is not bits");
    };
    assert_eq!(bits.len(), 2);
    assert_eq!((bits[0].name.as_str(), bits[0].offset, bits[0].size), ("a", 0, 1));
    assert_eq!((bits[1].name.as_str(), bits[1].offset, bits[1].size), ("b", 1, 1));
}

#[test]
fn dump_round_trip() {
    let scheme = Scheme::load(SCHEME).unwrap();

    let dumped = scheme.dump("yamls").unwrap();
    assert!(dumped.starts_with("yamls://"));
    let reparsed = Scheme::load(&dumped).unwrap();
    assert!(compare(&scheme, &reparsed), "dump:\n{dumped}");

    let gz = scheme.dump("yamls+gz").unwrap();
    assert!(gz.starts_with("yamls+gz://"));
    let reparsed = Scheme::load(&gz).unwrap();
    assert!(compare(&scheme, &reparsed));

    let hash = scheme.dump("sha256").unwrap();
    assert!(hash.starts_with("sha256://"));
    assert_eq!(hash, reparsed.dump("sha256").unwrap());
}

#[test]
fn load_failures() {
    // Duplicate message name.
    assert!(Scheme::load(
        "yamls://[{name: msg, fields: [{name: s0, type: int32}]}, {name: msg, fields: [{name: s0, type: int32}]}]"
    )
    .is_err());
    // Duplicate field name.
    assert!(Scheme::load(
        "yamls://[{name: msg, fields: [{name: s0, type: int32}, {name: s0, type: int64}]}]"
    )
    .is_err());
    // Duplicate msgid.
    assert!(Scheme::load("yamls://[{name: a, id: 1}, {name: b, id: 1}]").is_err());
    // Unknown type.
    assert!(Scheme::load("yamls://[{name: a, fields: [{name: f, type: int17}]}]").is_err());
    // Duplicate enum value.
    assert!(Scheme::load(
        "yamls://[{name: a, fields: [{name: f, type: int8, options.type: enum, enum: {A: 1, B: 1}}]}]"
    )
    .is_err());
    // Recursive inline message.
    assert!(Scheme::load("yamls://
- name: a
  fields:
    - {name: f, type: b}
- name: b
  fields:
    - {name: f, type: a}
")
    .is_err());
    // Self reference through a pointer is fine.
    assert!(Scheme::load("yamls://
- name: node
  fields:
    - {name: items, type: '*node'}
")
    .is_ok());
}

#[test]
fn global_enums_and_aliases() {
    let scheme = Scheme::load(
        "yamls://
- name: ''
  options: {version: '2'}
  enums:
    state: {type: int8, enum: {Idle: 0, Busy: 1}}
  aliases:
    - {name: shortstr, type: byte8, options.type: string}
- name: msg
  id: 5
  fields:
    - {name: s, type: state}
    - {name: label, type: shortstr}
",
    )
    .unwrap();
    assert_eq!(scheme.options.get("version").map(String::as_str), Some("2"));
    let s = field(&scheme, "msg", "s");
    assert!(matches!(&s.sub_type, SubType::Enum(def) if def.name == "state"));
    assert_eq!(s.size, 1);
    let label = field(&scheme, "msg", "label");
    assert!(matches!(label.type_, FieldType::Bytes(8)));
    assert!(matches!(label.sub_type, SubType::ByteString));
}

#[test]
fn pmap_indices() {
    let scheme = Scheme::load(
        "yamls://
- name: msg
  id: 2
  fields:
    - {name: flags, type: byte1, options.pmap: yes}
    - {name: a, type: int32, options.optional: yes}
    - {name: b, type: int32}
    - {name: c, type: int64, options.optional: yes}
",
    )
    .unwrap();
    let (_, msg) = scheme.lookup("msg").unwrap();
    assert_eq!(msg.pmap, Some(0));
    assert_eq!(field(&scheme, "msg", "a").index, 0);
    assert_eq!(field(&scheme, "msg", "b").index, -1);
    assert_eq!(field(&scheme, "msg", "c").index, 1);

    // Optional fields demand a pmap.
    assert!(Scheme::load(
        "yamls://[{name: m, fields: [{name: a, type: int32, options.optional: yes}]}]"
    )
    .is_err());
}

#[test]
fn merge_schemes() {
    let a = Scheme::load("yamls://
- name: common
  fields:
    - {name: value, type: int32}
- name: first
  id: 1
  fields:
    - {name: body, type: common}
")
    .unwrap();
    let b = Scheme::load("yamls://
- name: second
  id: 2
  fields:
    - {name: x, type: double}
")
    .unwrap();
    let c = Scheme::load("yamls://
- name: third
  id: 3
  fields:
    - {name: y, type: string}
")
    .unwrap();

    let ab = merge(&[&a, &b]).unwrap();
    assert!(ab.lookup("common").is_some());
    assert!(ab.lookup("first").is_some());
    assert!(ab.lookup("second").is_some());

    // Associativity on a defined triple.
    let left = merge(&[&merge(&[&a, &b]).unwrap(), &c]).unwrap();
    let right = merge(&[&a, &merge(&[&b, &c]).unwrap()]).unwrap();
    assert!(compare(&left, &right));

    // Same name requires identical structure.
    let conflict = Scheme::load("yamls://
- name: first
  id: 1
  fields:
    - {name: other, type: int8}
")
    .unwrap();
    assert!(merge(&[&a, &conflict]).is_err());

    // Same msgid with a different name is rejected.
    let dup_id = Scheme::load("yamls://
- name: not-first
  id: 1
  fields:
    - {name: x, type: int8}
")
    .unwrap();
    assert!(merge(&[&a, &dup_id]).is_err());
}

#[test]
fn merged_message_refs_survive() {
    // The dependency lands at a different arena index after the merge;
    // the message reference must follow it.
    let filler = Scheme::load("yamls://
- name: pad1
  id: 7
  fields:
    - {name: x, type: int8}
")
    .unwrap();
    let a = Scheme::load("yamls://
- name: inner
  fields:
    - {name: value, type: int64}
- name: outer
  id: 9
  fields:
    - {name: body, type: inner}
")
    .unwrap();
    let merged = merge(&[&filler, &a]).unwrap();
    let body = field(&merged, "outer", "body");
    let FieldType::Message(idx) = body.type_ else {
        panic!("body is not a message");
    };
    assert_eq!(merged.message(idx).name, "inner");
}

#[test]
fn offset_pointer_alloc() {
    let scheme = Scheme::load(
        "yamls://[{name: m, id: 1, fields: [{name: x, type: int32}, {name: y, type: '*int16'}]}]",
    )
    .unwrap();
    let (_, m) = scheme.lookup("m").unwrap();
    assert_eq!(m.size, 12);
    let y = field(&scheme, "m", "y");
    assert_eq!(y.offset, 4);

    let mut buf = vec![0u8; m.size];
    let data_off = optr::alloc(y, &mut buf, y.offset, 3).unwrap();
    assert_eq!(data_off, 12);
    assert_eq!(buf.len(), 12 + 3 * 2);

    let ptr = optr::read_ptr(PointerVersion::Default, &buf[4..], 2).unwrap();
    assert_eq!(ptr, OffsetPtr { offset: 8, size: 3, entity: 2 });

    // Extending shifts nothing here (the region is last), it just grows.
    let next = optr::extend(&scheme, y, &mut buf, y.offset, 2).unwrap();
    assert_eq!(next, 18);
    let ptr = optr::read_ptr(PointerVersion::Default, &buf[4..], 2).unwrap();
    assert_eq!(ptr.size, 5);
}

#[test]
fn format_message() {
    let scheme = Scheme::load(
        "yamls://
- name: sub
  fields:
    - {name: s0, type: int32}
    - {name: s1, type: 'double[4]'}
- name: test
  id: 1
  fields:
    - {name: f0, type: int8}
    - {name: f1, type: int64, options.type: enum, enum: {A: 123, B: 456}}
    - {name: f2, type: double}
    - {name: f3, type: byte16}
    - {name: f4, type: byte16, options.type: string}
    - {name: f5, type: '*int16'}
    - {name: f6, type: 'sub[4]', list-options.count-type: int16}
    - {name: f7, type: '*string'}
    - {name: f8, type: int64, options.type: fixed3}
",
    )
    .unwrap();

    let (_, sub) = scheme.lookup("sub").unwrap();
    assert_eq!(sub.size, 37);
    let mut buf = vec![0u8; sub.size];
    buf[0..4].copy_from_slice(&123456i32.to_le_bytes());
    buf[4] = 2;
    buf[5..13].copy_from_slice(&123.456f64.to_le_bytes());
    buf[13..21].copy_from_slice(&1.5f64.to_le_bytes());
    let text = format::to_string(&scheme, sub, &buf).unwrap();
    assert_eq!(text, "s0: 123456\ns1: [123.456, 1.5]");

    let (_, test) = scheme.lookup("test").unwrap();
    assert_eq!(test.size, 223);
    let mut buf = vec![0u8; test.size];
    buf[0] = 123;
    buf[1..9].copy_from_slice(&1234567890123i64.to_le_bytes());
    buf[9..17].copy_from_slice(&123.456f64.to_le_bytes());
    buf[17..27].copy_from_slice(b"bytes\x01\x02\x03\x04\x05");
    buf[33..43].copy_from_slice(b"bytestring");

    // f6: two sub elements.
    buf[57..59].copy_from_slice(&2i16.to_le_bytes());
    buf[59..63].copy_from_slice(&120i32.to_le_bytes());
    buf[63] = 2;
    buf[64..72].copy_from_slice(&120.1f64.to_le_bytes());
    buf[72..80].copy_from_slice(&120.2f64.to_le_bytes());
    buf[96..100].copy_from_slice(&220i32.to_le_bytes());

    // f8: 12.345 with three digits of precision.
    buf[215..223].copy_from_slice(&12345i64.to_le_bytes());

    // f5 tail: three int16 entries.
    let f5 = field(&scheme, "test", "f5");
    let data_off = optr::alloc(f5, &mut buf, f5.offset, 3).unwrap();
    for (i, v) in [101i16, 111, 121].iter().enumerate() {
        buf[data_off + 2 * i..data_off + 2 * i + 2].copy_from_slice(&v.to_le_bytes());
    }

    // f7 tail: one string entry, itself a pointer into the tail.
    let f7 = field(&scheme, "test", "f7");
    let outer = optr::alloc(f7, &mut buf, f7.offset, 1).unwrap();
    let FieldType::Pointer { element, .. } = &f7.type_ else {
        panic!("f7 is not a pointer");
    };
    let inner = optr::alloc(element, &mut buf, outer, b"offset string".len() as u32 + 1).unwrap();
    buf[inner..inner + 13].copy_from_slice(b"offset string");

    let text = format::to_string(&scheme, test, &buf).unwrap();
    assert_eq!(
        text,
        concat!(
            "f0: 123\n",
            "f1: 1234567890123\n",
            "f2: 123.456\n",
            "f3: \"bytes\\x01\\x02\\x03\\x04\\x05\\x00\\x00\\x00\\x00\\x00\\x00\"\n",
            "f4: \"bytestring\"\n",
            "f5: [101, 111, 121]\n",
            "f6:\n",
            "  - s0: 120\n",
            "    s1: [120.1, 120.2]\n",
            "  - s0: 220\n",
            "    s1: []\n",
            "f7: [\"offset string\"]\n",
            "f8: 12.345"
        )
    );

    // Truncated data is rejected up front.
    assert!(format::to_string(&scheme, test, &buf[..10]).is_err());

    // Pointer running past the record end is caught with its path.
    let mut broken = buf.clone();
    let bad = optr::OffsetPtr { offset: 5000, size: 1, entity: 8 };
    optr::write_ptr(PointerVersion::Default, &mut broken[f7.offset..], bad).unwrap();
    let err = format::to_string(&scheme, test, &broken).unwrap_err();
    assert!(err.message.contains("f7"), "unexpected error: {err}");
    assert!(err.message.contains("Offset out of bounds"), "unexpected error: {err}");
}

#[test]
fn legacy_pointer_layouts() {
    let scheme = Scheme::load(
        "yamls://
- name: m
  id: 1
  fields:
    - {name: a, type: '*int32', list-options.offset-ptr-type: legacy-short}
    - {name: b, type: '*int32', list-options.offset-ptr-type: legacy-long}
    - {name: c, type: '*int32'}
",
    )
    .unwrap();
    let (_, m) = scheme.lookup("m").unwrap();
    assert_eq!(field(&scheme, "m", "a").size, 4);
    assert_eq!(field(&scheme, "m", "b").size, 8);
    assert_eq!(field(&scheme, "m", "c").size, 8);
    assert_eq!(m.size, 20);

    // Round trip through dump keeps the layout selection.
    let reparsed = Scheme::load(&scheme.dump("yamls").unwrap()).unwrap();
    assert!(compare(&scheme, &reparsed));
}

#[test]
fn union_layout() {
    let scheme = Scheme::load(
        "yamls://
- name: m
  id: 1
  fields:
    - {name: u, type: union, union: [{name: i, type: int32}, {name: d, type: double}]}
    - {name: tail, type: int8}
",
    )
    .unwrap();
    let u = field(&scheme, "m", "u");
    // Tag byte plus the largest arm.
    assert_eq!(u.size, 1 + 8);
    let FieldType::Union(def) = &u.type_ else {
        panic!("u is not a union");
    };
    assert_eq!(def.fields.len(), 2);
    assert_eq!(def.fields[0].offset, 1);
    assert_eq!(def.union_size, 8);
    assert_eq!(field(&scheme, "m", "tail").offset, 9);

    let reparsed = Scheme::load(&scheme.dump("yamls").unwrap()).unwrap();
    assert!(compare(&scheme, &reparsed));
}
