//! The Custom-Type Registry (spec §4.2).
//!
//! A process- or encoder-scoped catalog of registered namespaces; each
//! namespace holds type-id → codec mappings plus an optional
//! namespace-wide fallback. Read-mostly: spec §5 recommends freezing the
//! registry before use, so `Engine` takes ownership of one at
//! construction and shares it behind an `Arc` for concurrent decodes.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::engine::EngineHandle;
use crate::error::{Error, Result};
use crate::object::CustomPayload;

/// The error type a registered codec closure returns. Boxed rather than
/// `crate::error::Error` so user codecs aren't forced into this crate's
/// own taxonomy; the decoder/encoder wrap it in [`Error::CodecFault`] with
/// namespace/type-id context once it surfaces.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type DecodeFn =
    Arc<dyn Fn(&[u8], &EngineHandle<'_>) -> std::result::Result<Box<dyn CustomPayload>, BoxError> + Send + Sync>;
type FallbackDecodeFn = Arc<
    dyn Fn(u64, &[u8], &EngineHandle<'_>) -> std::result::Result<Box<dyn CustomPayload>, BoxError>
        + Send
        + Sync,
>;
type EncodeFn =
    Arc<dyn Fn(&dyn Any, &EngineHandle<'_>) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync>;

pub(crate) struct EncodeEntry {
    pub(crate) namespace: String,
    pub(crate) type_id: u64,
    pub(crate) encode: EncodeFn,
}

/// Catalog of registered namespaces and their type codecs.
#[derive(Default)]
pub struct Registry {
    decode_codecs: HashMap<(String, u64), DecodeFn>,
    namespace_fallback: HashMap<String, FallbackDecodeFn>,
    encode_codecs: HashMap<TypeId, EncodeEntry>,
    namespaces: HashSet<String>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a codec pair for `(namespace, type_id)`.
    ///
    /// Fails with [`Error::AlreadyRegistered`] if that pair already has a
    /// codec (spec §4.2).
    pub fn register<T, Enc, Dec>(
        &mut self,
        namespace: impl Into<String>,
        type_id: u64,
        encode: Enc,
        decode: Dec,
    ) -> Result<()>
    where
        T: CustomPayload + 'static,
        Enc: Fn(&T, &EngineHandle<'_>) -> std::result::Result<Vec<u8>, BoxError> + Send + Sync + 'static,
        Dec: Fn(&[u8], &EngineHandle<'_>) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let namespace = namespace.into();
        let key = (namespace.clone(), type_id);
        if self.decode_codecs.contains_key(&key) {
            return Err(Error::AlreadyRegistered { namespace, type_id });
        }
        self.decode_codecs.insert(
            key,
            Arc::new(move |bytes, engine| {
                decode(bytes, engine).map(|v| Box::new(v) as Box<dyn CustomPayload>)
            }),
        );
        self.encode_codecs.insert(
            TypeId::of::<T>(),
            EncodeEntry {
                namespace: namespace.clone(),
                type_id,
                encode: Arc::new(move |any, engine| {
                    let value = any
                        .downcast_ref::<T>()
                        .expect("registry invariant: encode_codecs keyed by T's own TypeId");
                    encode(value, engine)
                }),
            },
        );
        self.namespaces.insert(namespace);
        Ok(())
    }

    /// Register a handler that dispatches every type-id in `namespace`
    /// itself, for the "one function covers the whole namespace" case
    /// (spec §4.2).
    pub fn register_namespace_fallback<F>(&mut self, namespace: impl Into<String>, handler: F)
    where
        F: Fn(u64, &[u8], &EngineHandle<'_>) -> std::result::Result<Box<dyn CustomPayload>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let namespace = namespace.into();
        self.namespace_fallback
            .insert(namespace.clone(), Arc::new(handler));
        self.namespaces.insert(namespace);
    }

    /// The set of namespaces with at least one registration (explicit or
    /// fallback) — a reflective accessor (spec §4.2).
    pub fn list_namespaces(&self) -> HashSet<String> {
        self.namespaces.clone()
    }

    pub(crate) fn lookup_decode(&self, namespace: &str, type_id: u64) -> Option<&DecodeFn> {
        self.decode_codecs
            .get(&(namespace.to_string(), type_id))
    }

    pub(crate) fn lookup_fallback(&self, namespace: &str) -> Option<&FallbackDecodeFn> {
        self.namespace_fallback.get(namespace)
    }

    pub(crate) fn knows_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    pub(crate) fn lookup_encode(&self, type_id: TypeId) -> Option<&EncodeEntry> {
        self.encode_codecs.get(&type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Meters(f64);

    #[test]
    fn duplicate_registration_fails() {
        let mut reg = Registry::new();
        reg.register::<Meters, _, _>(
            "units/v1",
            0,
            |v, _| Ok(v.0.to_le_bytes().to_vec()),
            |b, _| Ok(Meters(f64::from_le_bytes(b.try_into().unwrap()))),
        )
        .unwrap();
        let err = reg
            .register::<Meters, _, _>(
                "units/v1",
                0,
                |v, _| Ok(v.0.to_le_bytes().to_vec()),
                |b, _| Ok(Meters(f64::from_le_bytes(b.try_into().unwrap()))),
            )
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
    }

    #[test]
    fn list_namespaces_reflects_registrations() {
        let mut reg = Registry::new();
        reg.register::<Meters, _, _>(
            "units/v1",
            0,
            |v, _| Ok(v.0.to_le_bytes().to_vec()),
            |b, _| Ok(Meters(f64::from_le_bytes(b.try_into().unwrap()))),
        )
        .unwrap();
        reg.register_namespace_fallback("scratch/v1", |_, bytes, _| {
            Ok(Box::new(bytes.to_vec()) as Box<dyn CustomPayload>)
        });
        let mut expected = HashSet::new();
        expected.insert("units/v1".to_string());
        expected.insert("scratch/v1".to_string());
        assert_eq!(reg.list_namespaces(), expected);
    }
}
