//! Byte-exact tests for the pod codec.

use graphwire::pod::{self, Builder, PodObject};
use graphwire::types::{TypeMap, TypeRegistry};
use graphwire::ProtocolError;

// Hand-built records for comparing against the encoder, layout per the wire
// grammar: u32 size, u32 tag, payload, pad to 4.
fn record(tag: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(payload);
    while out.len() % 4 != 0 {
        out.push(0);
    }
    out
}

fn rec_i32(v: i32) -> Vec<u8> {
    record(1, &v.to_le_bytes())
}

fn rec_i64(v: i64) -> Vec<u8> {
    record(2, &v.to_le_bytes())
}

fn rec_string(s: &str) -> Vec<u8> {
    let mut payload = s.as_bytes().to_vec();
    payload.push(0);
    record(3, &payload)
}

fn rec_object(type_id: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = type_id.to_le_bytes().to_vec();
    payload.extend_from_slice(body);
    record(4, &payload)
}

fn top_struct(children: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = children.iter().flatten().copied().collect();
    record(5, &body)
}

#[test]
fn sync_payload_layout() {
    // core.sync(seq=7) payload: a struct holding one Int32(7)
    let mut b = Builder::new();
    let f = b.open_struct();
    b.int32(7);
    b.close_struct(f);
    assert_eq!(b.as_slice(), top_struct(&[rec_i32(7)]).as_slice());
    assert_eq!(b.offset() % 4, 0);
}

#[test]
fn client_update_payload_layout() {
    // a one-item prop dict: Int32(1), then the key/value strings
    let mut b = Builder::new();
    let f = b.open_struct();
    b.int32(1);
    b.string("app.name");
    b.string("poppy");
    b.close_struct(f);
    let expected = top_struct(&[rec_i32(1), rec_string("app.name"), rec_string("poppy")]);
    assert_eq!(b.as_slice(), expected.as_slice());
}

#[test]
fn int64_round_trip() {
    let mut b = Builder::new();
    let f = b.open_struct();
    b.int64(i64::MIN);
    b.int64(-1);
    b.int64(i64::MAX);
    b.close_struct(f);
    assert_eq!(
        b.as_slice(),
        top_struct(&[rec_i64(i64::MIN), rec_i64(-1), rec_i64(i64::MAX)]).as_slice()
    );
    let mut it = pod::struct_iter(b.as_slice()).unwrap();
    assert_eq!(it.int64().unwrap(), i64::MIN);
    assert_eq!(it.int64().unwrap(), -1);
    assert_eq!(it.int64().unwrap(), i64::MAX);
    assert!(!it.has_next());
}

#[test]
fn strings_at_alignment_boundaries() {
    // lengths 3 and 4: one lands exactly on the boundary with the NUL, one
    // needs 3 bytes of padding
    let mut b = Builder::new();
    let f = b.open_struct();
    b.string("abc");
    b.string("abcd");
    b.string("");
    b.close_struct(f);
    let mut it = pod::struct_iter(b.as_slice()).unwrap();
    assert_eq!(it.string().unwrap(), "abc");
    assert_eq!(it.string().unwrap(), "abcd");
    assert_eq!(it.string().unwrap(), "");
    assert!(!it.has_next());
}

#[test]
fn decode_rejects_truncated_buffer() {
    let mut b = Builder::new();
    let f = b.open_struct();
    b.int32(1);
    b.string("hello");
    b.close_struct(f);
    let bytes = b.as_slice();
    // any prefix that cuts into a record must fail somewhere
    let cut = &bytes[..bytes.len() - 4];
    let err = pod::struct_iter(cut).err();
    assert!(matches!(err, Some(ProtocolError::PodDecode(_))));
}

#[test]
fn decode_rejects_tag_mismatch() {
    let payload = top_struct(&[rec_string("x")]);
    let mut it = pod::struct_iter(&payload).unwrap();
    assert!(matches!(it.int32(), Err(ProtocolError::PodDecode(_))));
    // the mismatching record was not consumed
    assert_eq!(it.string().unwrap(), "x");
}

#[test]
fn decode_rejects_missing_field() {
    let payload = top_struct(&[rec_i32(1)]);
    let mut it = pod::struct_iter(&payload).unwrap();
    assert_eq!(it.int32().unwrap(), 1);
    assert!(matches!(it.int32(), Err(ProtocolError::PodDecode(_))));
}

#[test]
fn decode_rejects_unpadded_string() {
    // a 2-byte string record whose payload is not padded out to 4 bytes
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&10u32.to_le_bytes()); // struct size
    bytes.extend_from_slice(&5u32.to_le_bytes());
    bytes.extend_from_slice(&2u32.to_le_bytes()); // string size ("a\0")
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.extend_from_slice(b"a\0");
    let mut it = pod::struct_iter(&bytes).unwrap();
    assert!(matches!(it.string(), Err(ProtocolError::PodDecode(_))));
}

#[test]
fn decode_rejects_bad_top_level_tag() {
    let payload = rec_i32(7);
    assert!(matches!(
        pod::struct_iter(&payload),
        Err(ProtocolError::PodDecode(_))
    ));
}

#[test]
fn decode_rejects_non_utf8_string() {
    let payload = top_struct(&[record(3, &[0xff, 0xfe, 0x00])]);
    let mut it = pod::struct_iter(&payload).unwrap();
    assert!(matches!(it.string(), Err(ProtocolError::PodDecode(_))));
}

#[test]
fn unknown_tag_skips_by_length() {
    let payload = top_struct(&[record(9, &[1, 2, 3, 4]), rec_i32(5)]);
    let mut it = pod::struct_iter(&payload).unwrap();
    it.skip().unwrap();
    assert_eq!(it.int32().unwrap(), 5);
}

#[test]
fn optional_object_absent_consumes_nothing() {
    let payload = top_struct(&[rec_i32(3)]);
    let mut it = pod::struct_iter(&payload).unwrap();
    assert_eq!(it.opt_object().unwrap(), None);
    assert_eq!(it.int32().unwrap(), 3);
    // at the end of the struct the optional is also absent
    assert_eq!(it.opt_object().unwrap(), None);
}

#[test]
fn optional_object_present_is_consumed() {
    let payload = top_struct(&[rec_object(1, &rec_i32(44100)), rec_i32(0)]);
    let mut it = pod::struct_iter(&payload).unwrap();
    let obj = it.opt_object().unwrap().expect("object present");
    assert_eq!(obj.type_id, 1);
    assert_eq!(it.int32().unwrap(), 0);
}

#[test]
fn object_encoding_matches_wire_grammar() {
    let body = rec_i32(44100);
    let mut b = Builder::new();
    let f = b.open_struct();
    b.object(PodObject {
        type_id: 3,
        body: &body,
    });
    b.close_struct(f);
    assert_eq!(b.as_slice(), top_struct(&[rec_object(3, &body)]).as_slice());
}

#[test]
fn remap_rewrites_nested_object_ids() {
    // receiving side already interned two unrelated types, so wire ids and
    // local ids diverge
    let registry = TypeRegistry::new();
    registry.intern("A");
    registry.intern("B");
    let mut map = TypeMap::new();
    map.apply_update(0, &["Fmt:Outer", "Fmt:Inner"], &registry)
        .unwrap();

    let inner = rec_object(1, &rec_i32(2));
    let mut outer_body = rec_i32(48000);
    outer_body.extend_from_slice(&inner);
    let mut payload = top_struct(&[rec_object(0, &outer_body)]);

    pod::remap_embedded_ids(&mut payload, &map).unwrap();

    let mut it = pod::struct_iter(&payload).unwrap();
    let outer = it.object().unwrap();
    assert_eq!(outer.type_id, registry.id_of("Fmt:Outer").unwrap());
    // walk the remapped body: the int is untouched, the inner id translated
    let inner_payload = top_struct(&[outer.body.to_vec()]);
    let mut inner_it = pod::struct_iter(&inner_payload).unwrap();
    assert_eq!(inner_it.int32().unwrap(), 48000);
    let inner_obj = inner_it.object().unwrap();
    assert_eq!(inner_obj.type_id, registry.id_of("Fmt:Inner").unwrap());
}

#[test]
fn remap_rejects_unannounced_id() {
    let map = TypeMap::new();
    let mut payload = top_struct(&[rec_object(7, &[])]);
    assert!(matches!(
        pod::remap_embedded_ids(&mut payload, &map),
        Err(ProtocolError::PodDecode(_))
    ));
}

#[test]
fn builder_offset_tracks_payload_length() {
    let mut b = Builder::new();
    assert_eq!(b.offset(), 0);
    let f = b.open_struct();
    b.int32(1);
    b.close_struct(f);
    assert_eq!(b.offset(), b.as_slice().len());
    assert_eq!(b.offset(), 8 + 12);
}
