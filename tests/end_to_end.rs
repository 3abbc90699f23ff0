use proptest::prelude::*;

use tobytes::{Custom, Engine, NamespaceIdMode, Object, Policy, Registry, UnknownNamespacePolicy};

fn arb_leaf() -> impl Strategy<Value = Object> {
    prop_oneof![
        Just(Object::Nil),
        any::<bool>().prop_map(Object::Bool),
        // `Int` models msgpack's negative-integer family; non-negative
        // values are always `UInt` on this wire (positive fixint makes no
        // distinction), so only generate values that round-trip as-is.
        (i64::MIN..0i64).prop_map(Object::Int),
        any::<u32>().prop_map(|v| Object::UInt(v as u64)),
        "[a-z]{0,8}".prop_map(Object::str),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Object::Bin),
    ]
}

fn arb_object() -> impl Strategy<Value = Object> {
    arb_leaf().prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Object::array),
            prop::collection::vec((inner.clone(), inner), 0..4).prop_map(Object::Map),
        ]
    })
}

proptest! {
    // Testable property 2 (spec §8): intern round-trip for arbitrary object graphs.
    #[test]
    fn interning_round_trips_arbitrary_objects(object in arb_object()) {
        let engine = Engine::new(Registry::new(), Policy::default().enable_interning(true));
        let bytes = engine.encode(&object).unwrap();
        let decoded = engine.decode(&bytes).unwrap();
        prop_assert_eq!(decoded, object);
    }

    // Testable property 1 (spec §8): pure pass-through with no extensions in use.
    #[test]
    fn plain_objects_round_trip_without_interning(object in arb_object()) {
        let engine = Engine::new(Registry::new(), Policy::default());
        let bytes = engine.encode(&object).unwrap();
        let decoded = engine.decode(&bytes).unwrap();
        prop_assert_eq!(decoded, object);
    }
}

/// S1 — primitive pass-through.
#[test]
fn scenario_s1_primitive_pass_through() {
    let engine = Engine::new(Registry::new(), Policy::default());
    let bytes = engine.encode(&Object::UInt(42)).unwrap();
    assert_eq!(bytes, vec![0x2a]);
    assert_eq!(engine.decode(&bytes).unwrap(), Object::UInt(42));
}

/// S2 — intern of two identical strings.
#[test]
fn scenario_s2_intern_of_two_identical_strings() {
    let engine = Engine::new(Registry::new(), Policy::default().enable_interning(true));
    let input = Object::array([Object::str("hi"), Object::str("hi")]);
    let bytes = engine.encode(&input).unwrap();
    assert_eq!(engine.decode(&bytes).unwrap(), input);
}

#[derive(Debug, Clone, PartialEq)]
struct Meters(f64);

/// S5 — custom type whose payload is itself a nested tobytes message,
/// with the outer intern state not leaking into the inner decode.
#[test]
fn scenario_s5_custom_type_with_nested_tobytes_payload() {
    let mut registry = Registry::new();
    registry
        .register::<Meters, _, _>(
            "x",
            0,
            |meters, handle| {
                handle
                    .encode_message(&Object::array([Object::str("a"), Object::F64(meters.0)]))
                    .map_err(Into::into)
            },
            |bytes, handle| {
                let decoded = handle.decode_message(bytes)?;
                match decoded {
                    Object::Array(items) => match items.as_slice() {
                        [_, Object::F64(v)] => Ok(Meters(*v)),
                        _ => Err("unexpected nested shape".into()),
                    },
                    _ => Err("expected a nested array".into()),
                }
            },
        )
        .unwrap();

    let engine = Engine::new(registry, Policy::default().enable_interning(true));
    let outer = Object::array([
        Object::Custom(Custom::new("x", 0, Meters(3.5))),
        Object::str("a"),
        Object::str("a"),
    ]);
    let bytes = engine.encode(&outer).unwrap();
    let decoded = engine.decode(&bytes).unwrap();
    match decoded {
        Object::Array(items) => {
            match &items[0] {
                Object::Custom(c) => assert_eq!(c.downcast_ref::<Meters>(), Some(&Meters(3.5))),
                other => panic!("expected Object::Custom, got {other:?}"),
            }
            assert_eq!(items[1], Object::str("a"));
            assert_eq!(items[2], Object::str("a"));
        }
        other => panic!("expected Object::Array, got {other:?}"),
    }
}

/// S6 — unknown namespace opaque round-trip.
#[test]
fn scenario_s6_unknown_namespace_opaque_round_trip() {
    let engine = Engine::new(
        Registry::new(),
        Policy::default().on_unknown_namespace(UnknownNamespacePolicy::AsRaw),
    );

    // Build an ext-0x08 custom-type message by hand: namespace "unseen",
    // type-id 5, payload [0x01, 0x02].
    let mut registry = Registry::new();
    registry
        .register::<u8, _, _>("unseen", 5, |v, _| Ok(vec![*v]), |b, _| Ok(b[0]))
        .unwrap();
    let source_bytes = Engine::new(registry, Policy::default())
        .encode(&Object::Custom(Custom::new("unseen", 5, 1u8)))
        .unwrap();

    let decoded = engine.decode(&source_bytes).unwrap();
    assert!(matches!(decoded, Object::Raw(_)));
    let re_encoded = engine.encode(&decoded).unwrap();
    assert_eq!(re_encoded, source_bytes);
}

/// Testable property 7 (spec §8): any ext id outside {0x06, 0x07, 0x08}
/// fails the whole message.
#[test]
fn disallowed_extension_id_rejects_the_message() {
    use tobytes::Error;
    let engine = Engine::new(Registry::new(), Policy::default());
    // fixext1 (0xd4) with ext id 0x09 and one payload byte.
    let bytes = vec![0xd4, 0x09, 0x00];
    let err = engine.decode(&bytes).unwrap_err();
    assert!(matches!(err, Error::DisallowedExtension(0x09)));
}

/// Testable property 8 (spec §8): registry reflection is exact.
#[test]
fn list_namespaces_reflects_exactly_what_was_registered() {
    let mut registry = Registry::new();
    registry
        .register::<u8, _, _>("a/v1", 0, |v, _| Ok(vec![*v]), |b, _| Ok(b[0]))
        .unwrap();
    registry
        .register::<u16, _, _>("b/v1", 0, |v, _| Ok(v.to_le_bytes().to_vec()), |b, _| {
            Ok(u16::from_le_bytes(b.try_into().unwrap()))
        })
        .unwrap();
    let namespaces = registry.list_namespaces();
    assert_eq!(namespaces.len(), 2);
    assert!(namespaces.contains("a/v1"));
    assert!(namespaces.contains("b/v1"));
}

/// Namespace-id substitution end to end: configuring a threshold makes
/// repeated custom-type namespaces travel as integers instead of strings,
/// transparently to the caller.
#[test]
fn namespace_id_substitution_is_transparent_to_the_caller() {
    let mut registry = Registry::new();
    registry
        .register::<u8, _, _>("hot/v1", 0, |v, _| Ok(vec![*v]), |b, _| Ok(b[0]))
        .unwrap();
    let engine = Engine::new(
        registry,
        Policy::default().namespace_id_substitution(NamespaceIdMode::Threshold(2)),
    );

    let input = Object::array((0..4).map(|i| Object::Custom(Custom::new("hot/v1", 0, i as u8))).collect::<Vec<_>>());
    let bytes = engine.encode(&input).unwrap();
    let decoded = engine.decode(&bytes).unwrap();
    assert_eq!(decoded, input);
}
