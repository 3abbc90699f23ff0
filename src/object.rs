//! The polymorphic value model a `tobytes` user actually works with.
//!
//! Objects are drawn from msgpack primitives, ordered sequences, ordered
//! mappings, opaque user-defined custom-type instances, and — when a
//! policy elects not to fail on an unresolvable custom type — an opaque
//! raw value that can be re-emitted byte-for-byte (spec §3, §9).

use std::any::Any;
use std::fmt;

/// A single tobytes value.
///
/// Maps are represented as an ordered `Vec` of pairs rather than a
/// `HashMap`: msgpack maps are themselves ordered key/value sequences on
/// the wire, keys may be any `Object` (including non-`Hash` floats), and
/// the engine never needs map lookup, only traversal.
#[derive(Debug, Clone)]
pub enum Object {
    /// msgpack `nil`.
    Nil,
    /// msgpack `bool`.
    Bool(bool),
    /// A signed integer. Used for any msgpack integer that does not fit
    /// in the unsigned family's natural range.
    Int(i64),
    /// An unsigned integer.
    UInt(u64),
    /// A 32-bit float.
    F32(f32),
    /// A 64-bit float.
    F64(f64),
    /// A UTF-8 string.
    Str(String),
    /// Opaque bytes (msgpack `bin`).
    Bin(Vec<u8>),
    /// An ordered sequence of objects.
    Array(Vec<Object>),
    /// An ordered mapping from object to object.
    Map(Vec<(Object, Object)>),
    /// An instance of a registered custom type, already decoded into its
    /// concrete Rust type by the registry (spec §4.2).
    Custom(Custom),
    /// A custom-type envelope the engine could not resolve, kept verbatim
    /// so it can be re-encoded byte-for-byte (spec §7).
    Raw(Raw),
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Nil, Object::Nil) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::UInt(a), Object::UInt(b)) => a == b,
            (Object::F32(a), Object::F32(b)) => a == b,
            (Object::F64(a), Object::F64(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Bin(a), Object::Bin(b)) => a == b,
            (Object::Array(a), Object::Array(b)) => a == b,
            (Object::Map(a), Object::Map(b)) => a == b,
            (Object::Custom(a), Object::Custom(b)) => a == b,
            (Object::Raw(a), Object::Raw(b)) => a == b,
            _ => false,
        }
    }
}

impl Object {
    /// Convenience constructor for a UTF-8 string object.
    pub fn str(s: impl Into<String>) -> Self {
        Object::Str(s.into())
    }

    /// Convenience constructor for an array object.
    pub fn array(items: impl IntoIterator<Item = Object>) -> Self {
        Object::Array(items.into_iter().collect())
    }

    /// Whether this object could be a candidate for intern-table
    /// eligibility (spec §9 open question (a) treats interning as
    /// operating on whole sub-trees; anything is eligible).
    pub fn is_composite(&self) -> bool {
        matches!(self, Object::Array(_) | Object::Map(_) | Object::Str(_) | Object::Bin(_))
    }
}

/// A decoded instance of a registered custom type.
///
/// The concrete Rust type is erased behind [`CustomPayload`]; callers get
/// it back with [`Custom::downcast_ref`].
pub struct Custom {
    /// The namespace this instance was registered under.
    pub namespace: String,
    /// The type-id this instance was registered under.
    pub type_id: u64,
    /// The type-erased decoded value.
    pub value: Box<dyn CustomPayload>,
}

impl Custom {
    /// Build a `Custom` from a concrete, already-decoded value.
    pub fn new(namespace: impl Into<String>, type_id: u64, value: impl CustomPayload) -> Self {
        Custom {
            namespace: namespace.into(),
            type_id,
            value: Box::new(value),
        }
    }

    /// Downcast the erased payload back to its concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for Custom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Custom")
            .field("namespace", &self.namespace)
            .field("type_id", &self.type_id)
            .field("value", &self.value)
            .finish()
    }
}

impl Clone for Custom {
    fn clone(&self) -> Self {
        Custom {
            namespace: self.namespace.clone(),
            type_id: self.type_id,
            value: self.value.clone_box(),
        }
    }
}

impl PartialEq for Custom {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.type_id == other.type_id
            && self.value.eq_dyn(other.value.as_ref())
    }
}

/// A type that can be carried inside a [`Custom`].
///
/// Any `T: Any + Debug + PartialEq + Clone + Send + Sync` gets this for
/// free via the blanket impl below; user types normally don't implement
/// it directly.
pub trait CustomPayload: Any + fmt::Debug + Send + Sync {
    /// View this value as `dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
    /// Type-erased equality, used by `Custom`'s `PartialEq`.
    fn eq_dyn(&self, other: &dyn CustomPayload) -> bool;
    /// Type-erased clone, used by `Custom`'s `Clone`.
    fn clone_box(&self) -> Box<dyn CustomPayload>;
}

impl<T> CustomPayload for T
where
    T: Any + fmt::Debug + PartialEq + Clone + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_dyn(&self, other: &dyn CustomPayload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|o| self == o)
    }

    fn clone_box(&self) -> Box<dyn CustomPayload> {
        Box::new(self.clone())
    }
}

/// How a `0x08` envelope named its namespace on the wire: by string, or by
/// an id resolved against the namespace-id stack (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceRef {
    /// The envelope carried the namespace string directly.
    Name(String),
    /// The envelope carried a namespace id, resolved via the innermost
    /// `0x07` binding in scope at decode time.
    Id(u64),
}

/// A custom-type envelope the engine declined to resolve into a
/// `Custom`, kept verbatim. Re-encoding a `Raw` MUST reproduce the
/// original bytes exactly (spec §7, scenario S6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw {
    /// How the namespace was named on the wire.
    pub namespace: NamespaceRef,
    /// The type-id carried by the envelope.
    pub type_id: u64,
    /// The opaque payload bytes, untouched.
    pub bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn custom_round_trips_through_any() {
        let custom = Custom::new("geo/v1", 0, Point { x: 1, y: 2 });
        assert_eq!(custom.downcast_ref::<Point>(), Some(&Point { x: 1, y: 2 }));
        assert_eq!(custom.downcast_ref::<u8>(), None);
    }

    #[test]
    fn custom_equality_is_type_erased_but_exact() {
        let a = Custom::new("geo/v1", 0, Point { x: 1, y: 2 });
        let b = Custom::new("geo/v1", 0, Point { x: 1, y: 2 });
        let c = Custom::new("geo/v1", 0, Point { x: 9, y: 9 });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn custom_clone_preserves_value() {
        let a = Custom::new("geo/v1", 0, Point { x: 3, y: 4 });
        let cloned = a.clone();
        assert_eq!(a, cloned);
    }

    #[test]
    fn object_equality_is_structural() {
        let a = Object::array([Object::UInt(1), Object::str("hi")]);
        let b = Object::array([Object::UInt(1), Object::str("hi")]);
        assert_eq!(a, b);
    }
}
