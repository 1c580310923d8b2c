//! Type registry and per-connection type map synchronization tests.

use graphwire::types::{TypeMap, TypeRegistry};
use graphwire::ProtocolError;

#[test]
fn intern_is_idempotent_and_dense() {
    let registry = TypeRegistry::new();
    let a = registry.intern("GraphWire:Format:Audio");
    let b = registry.intern("GraphWire:Format:Video");
    assert_eq!(a, 0);
    assert_eq!(b, 1);
    assert_eq!(registry.intern("GraphWire:Format:Audio"), a);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.uri_of(a).as_deref(), Some("GraphWire:Format:Audio"));
    assert_eq!(registry.id_of("GraphWire:Format:Video"), Some(b));
    assert_eq!(registry.uri_of(9), None);
}

#[test]
fn pending_update_covers_exactly_the_new_range() {
    let registry = TypeRegistry::new();
    let mut map = TypeMap::new();
    assert!(map.pending_update(&registry).is_none());

    registry.intern("a");
    registry.intern("b");
    let update = map.pending_update(&registry).expect("registry grew");
    assert_eq!(update.first_id, 0);
    assert_eq!(update.uris.len(), 2);
    assert_eq!(map.sent(), 2);
    // high-water agreement: nothing further to announce
    assert!(map.pending_update(&registry).is_none());

    registry.intern("c");
    let update = map.pending_update(&registry).expect("registry grew again");
    assert_eq!(update.first_id, 2);
    assert_eq!(update.uris.len(), 1);
    assert_eq!(update.uris[0].as_ref(), "c");
    assert_eq!(map.sent(), registry.len());
}

#[test]
fn apply_update_requires_contiguous_ranges() {
    let registry = TypeRegistry::new();
    let mut map = TypeMap::new();
    map.apply_update(0, &["a", "b"], &registry).unwrap();
    assert_eq!(map.installed(), 2);

    // a gap and an overlap are both fatal
    assert!(matches!(
        map.apply_update(5, &["c"], &registry),
        Err(ProtocolError::TypeMapGap {
            expected: 2,
            got: 5
        })
    ));
    assert!(matches!(
        map.apply_update(1, &["c"], &registry),
        Err(ProtocolError::TypeMapGap {
            expected: 2,
            got: 1
        })
    ));

    map.apply_update(2, &["c"], &registry).unwrap();
    assert_eq!(map.installed(), 3);
}

#[test]
fn local_of_translates_through_the_receiving_registry() {
    let registry = TypeRegistry::new();
    // the receiving side has its own earlier entries, so wire and local ids
    // diverge
    registry.intern("x");
    registry.intern("y");

    let mut map = TypeMap::new();
    map.apply_update(0, &["a", "y"], &registry).unwrap();
    assert_eq!(map.local_of(0).unwrap(), registry.id_of("a").unwrap());
    // a peer announcement of an already-known uri maps onto the existing id
    assert_eq!(map.local_of(1).unwrap(), registry.id_of("y").unwrap());
    assert!(matches!(
        map.local_of(9),
        Err(ProtocolError::PodDecode(_))
    ));
}

#[test]
fn wire_of_is_identity_within_the_announced_range() {
    let registry = TypeRegistry::new();
    registry.intern("a");
    registry.intern("b");
    let mut map = TypeMap::new();
    map.pending_update(&registry);
    assert_eq!(map.wire_of(0), Some(0));
    assert_eq!(map.wire_of(1), Some(1));
    assert_eq!(map.wire_of(2), None);
}
