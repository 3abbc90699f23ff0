//! The Decoder Engine (spec §4.4).
//!
//! Drives the [`adapter`](crate::adapter) token stream, recognizes the
//! three reserved ext ids, maintains the two scoping stacks, dispatches
//! custom-type payloads to the registry, and applies [`Policy`] to
//! unknown namespaces/types. Structural violations (disallowed
//! extension, nested intern table, forward reference, unbound namespace
//! id) are never recovered here; they propagate straight to the caller
//! (spec §7).

use tracing::{debug, trace, warn};

use crate::adapter::{Reader, Token};
use crate::engine::EngineHandle;
use crate::error::{Error, Result};
use crate::ext::ExtId;
use crate::object::{NamespaceRef, Object, Raw};
use crate::policy::{Policy, UnknownNamespacePolicy, UnknownTypePolicy};
use crate::registry::Registry;
use crate::scoping::{InternStack, NamespaceIdStack};

/// Decode one top-level tobytes message.
///
/// Starts with empty scoping stacks: every call — top-level or, via
/// [`EngineHandle::decode_message`], nested inside a custom-type payload
/// — is its own independent decoding context (spec §4.3).
pub(crate) fn decode(bytes: &[u8], registry: &Registry, policy: &Policy) -> Result<Object> {
    let span = tracing::trace_span!("tobytes::decode", len = bytes.len());
    let _guard = span.enter();

    let mut reader = Reader::new(bytes);
    let mut state = Decoder::new(registry, policy);
    let object = state.decode_object(&mut reader)?;
    if !reader.is_at_end() {
        return Err(Error::MalformedMsgPack(
            "trailing bytes after top-level value".into(),
        ));
    }
    Ok(object)
}

struct Decoder<'r> {
    intern: InternStack,
    namespaces: NamespaceIdStack,
    registry: &'r Registry,
    policy: &'r Policy,
}

impl<'r> Decoder<'r> {
    fn new(registry: &'r Registry, policy: &'r Policy) -> Self {
        Decoder {
            intern: InternStack::new(),
            namespaces: NamespaceIdStack::new(),
            registry,
            policy,
        }
    }

    fn decode_object(&mut self, reader: &mut Reader<'_>) -> Result<Object> {
        let token = reader.read_next()?;
        self.decode_from_token(reader, token)
    }

    fn decode_from_token(&mut self, reader: &mut Reader<'_>, token: Token) -> Result<Object> {
        match token {
            Token::Nil => Ok(Object::Nil),
            Token::Bool(b) => Ok(Object::Bool(b)),
            Token::Int(i) => Ok(Object::Int(i)),
            Token::UInt(u) => Ok(Object::UInt(u)),
            Token::F32(f) => Ok(Object::F32(f)),
            Token::F64(f) => Ok(Object::F64(f)),
            Token::Str(s) => Ok(Object::Str(s)),
            Token::Bin(b) => Ok(Object::Bin(b)),
            Token::ArrayLen(len) => {
                // `len` is a peer-controlled header; reserving it up front
                // would let a few truncated bytes claim a multi-gigabyte
                // allocation. Grow incrementally so a truncated body surfaces
                // as a decode error instead of an allocator abort.
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(self.decode_object(reader)?);
                }
                Ok(Object::Array(items))
            }
            Token::MapLen(len) => {
                let mut pairs = Vec::new();
                for _ in 0..len {
                    let key = self.decode_object(reader)?;
                    let value = self.decode_object(reader)?;
                    pairs.push((key, value));
                }
                Ok(Object::Map(pairs))
            }
            Token::Ext { id, payload } => self.decode_ext(id, payload),
        }
    }

    fn decode_ext(&mut self, id: i8, payload: Vec<u8>) -> Result<Object> {
        let ext_id = ExtId::from_wire(id)?;
        trace!(ext = ?ext_id, payload_len = payload.len(), "dispatching extension envelope");
        let mut inner = Reader::new(&payload);
        match ext_id {
            ExtId::InternTableOrRef => self.decode_intern(&mut inner),
            ExtId::NamespaceId => self.decode_namespace_id(&mut inner),
            ExtId::CustomType => self.decode_custom_type(&mut inner),
        }
    }

    fn decode_intern(&mut self, reader: &mut Reader<'_>) -> Result<Object> {
        let head = reader.read_next()?;
        let object = match head {
            Token::ArrayLen(2) => {
                trace!("entering intern table");
                self.intern.push()?;
                let body = self.decode_intern_table_body(reader);
                self.intern.pop();
                body?
            }
            Token::UInt(index) => {
                trace!(index, "resolving intern reference");
                self.intern.resolve(index)?.clone()
            }
            _ => return Err(Error::MalformedInternEnvelope),
        };
        if !reader.is_at_end() {
            return Err(Error::MalformedMsgPack(
                "trailing bytes in ext 0x06 payload".into(),
            ));
        }
        Ok(object)
    }

    fn decode_intern_table_body(&mut self, reader: &mut Reader<'_>) -> Result<Object> {
        let entries_len = match reader.read_next()? {
            Token::ArrayLen(n) => n,
            _ => return Err(Error::MalformedInternEnvelope),
        };
        for i in 0..entries_len {
            let entry = self.decode_object(reader)?;
            trace!(index = i, "decoded intern entry");
            self.intern
                .current_mut()
                .expect("frame pushed by decode_intern")
                .push_entry(entry);
        }
        self.decode_object(reader)
    }

    fn decode_namespace_id(&mut self, reader: &mut Reader<'_>) -> Result<Object> {
        match reader.read_next()? {
            Token::ArrayLen(3) => {
                let name = match reader.read_next()? {
                    Token::Str(s) => s,
                    _ => {
                        return Err(Error::MalformedMsgPack(
                            "ext 0x07 namespace must be a str".into(),
                        ))
                    }
                };
                let id = match reader.read_next()? {
                    Token::UInt(id) => id,
                    _ => {
                        return Err(Error::MalformedMsgPack(
                            "ext 0x07 id must be a uint".into(),
                        ))
                    }
                };
                trace!(name = %name, id, "entering namespace-id binding");
                self.namespaces.push(name, id);
                let body = self.decode_object(reader);
                self.namespaces.pop();
                let body = body?;
                if !reader.is_at_end() {
                    return Err(Error::MalformedMsgPack(
                        "trailing bytes in ext 0x07 payload".into(),
                    ));
                }
                Ok(body)
            }
            _ => Err(Error::MalformedMsgPack(
                "ext 0x07 payload must be [str, uint, any]".into(),
            )),
        }
    }

    fn decode_custom_type(&mut self, reader: &mut Reader<'_>) -> Result<Object> {
        match reader.read_next()? {
            Token::ArrayLen(3) => {
                let namespace_ref = match reader.read_next()? {
                    Token::Str(s) => NamespaceRef::Name(s),
                    Token::UInt(id) => NamespaceRef::Id(id),
                    _ => {
                        return Err(Error::MalformedMsgPack(
                            "ext 0x08 namespace_or_id must be str or uint".into(),
                        ))
                    }
                };
                let type_id = match reader.read_next()? {
                    Token::UInt(id) => id,
                    _ => {
                        return Err(Error::MalformedMsgPack(
                            "ext 0x08 type_id must be a uint".into(),
                        ))
                    }
                };
                let payload = match reader.read_next()? {
                    Token::Bin(bytes) => bytes,
                    _ => {
                        return Err(Error::MalformedMsgPack(
                            "ext 0x08 payload must be bin".into(),
                        ))
                    }
                };
                if !reader.is_at_end() {
                    return Err(Error::MalformedMsgPack(
                        "trailing bytes in ext 0x08 payload".into(),
                    ));
                }
                self.resolve_custom_type(namespace_ref, type_id, payload)
            }
            _ => Err(Error::MalformedMsgPack(
                "ext 0x08 payload must be [str|uint, uint, bin]".into(),
            )),
        }
    }

    fn resolve_custom_type(
        &mut self,
        namespace_ref: NamespaceRef,
        type_id: u64,
        payload: Vec<u8>,
    ) -> Result<Object> {
        let namespace = match &namespace_ref {
            NamespaceRef::Name(name) => name.clone(),
            NamespaceRef::Id(id) => self
                .namespaces
                .resolve(*id)
                .map(str::to_string)
                .ok_or(Error::UnknownNamespaceId(*id))?,
        };

        if !self.registry.knows_namespace(&namespace) {
            debug!(namespace = %namespace, type_id, "unknown namespace, consulting policy");
            return self.apply_unknown_namespace(namespace, namespace_ref, type_id, payload);
        }

        let handle = EngineHandle::new(self.registry, self.policy);

        if let Some(decode_fn) = self.registry.lookup_decode(&namespace, type_id) {
            trace!(namespace = %namespace, type_id, "dispatching to registered codec");
            let value = decode_fn(&payload, &handle).map_err(|source| Error::CodecFault {
                namespace: namespace.clone(),
                type_id,
                source,
            })?;
            return Ok(Object::Custom(crate::object::Custom {
                namespace,
                type_id,
                value,
            }));
        }

        if let Some(fallback) = self.registry.lookup_fallback(&namespace) {
            trace!(namespace = %namespace, type_id, "dispatching to namespace fallback");
            let value = fallback(type_id, &payload, &handle).map_err(|source| Error::CodecFault {
                namespace: namespace.clone(),
                type_id,
                source,
            })?;
            return Ok(Object::Custom(crate::object::Custom {
                namespace,
                type_id,
                value,
            }));
        }

        debug!(namespace = %namespace, type_id, "unregistered type-id, consulting policy");
        self.apply_unknown_type(namespace, namespace_ref, type_id, payload)
    }

    /// `namespace` is the resolved name (already looked up through the
    /// namespace-id stack if `namespace_ref` was an `Id`); `namespace_ref`
    /// is the wire form, kept verbatim so `AsRaw` can reproduce it exactly
    /// (spec §7, scenario S6).
    fn apply_unknown_namespace(
        &self,
        namespace: String,
        namespace_ref: NamespaceRef,
        type_id: u64,
        payload: Vec<u8>,
    ) -> Result<Object> {
        match self.policy.unknown_namespace() {
            UnknownNamespacePolicy::Error => Err(Error::UnknownNamespace(namespace)),
            UnknownNamespacePolicy::AsRaw => Ok(Object::Raw(Raw {
                namespace: namespace_ref,
                type_id,
                bytes: payload,
            })),
            UnknownNamespacePolicy::Custom(handler) => handler(namespace_ref, type_id, &payload),
        }
    }

    fn apply_unknown_type(
        &self,
        namespace: String,
        namespace_ref: NamespaceRef,
        type_id: u64,
        payload: Vec<u8>,
    ) -> Result<Object> {
        match self.policy.unknown_type() {
            UnknownTypePolicy::Error => {
                warn!(namespace = %namespace, type_id, "unregistered type-id rejected by policy");
                Err(Error::UnknownTypeId { namespace, type_id })
            }
            UnknownTypePolicy::AsRaw => Ok(Object::Raw(Raw {
                namespace: namespace_ref,
                type_id,
                bytes: payload,
            })),
            UnknownTypePolicy::Custom(handler) => handler(&namespace, type_id, &payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Writer;
    use crate::object::Object;
    use crate::policy::Policy;

    fn write_ext(id: i8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        Writer::new(&mut buf)
            .write(&Token::Ext {
                id,
                payload: payload.to_vec(),
            })
            .unwrap();
        buf
    }

    fn msgpack_of(token: &Token) -> Vec<u8> {
        let mut buf = Vec::new();
        Writer::new(&mut buf).write(token).unwrap();
        buf
    }

    #[test]
    fn primitive_pass_through() {
        let registry = Registry::new();
        let policy = Policy::default();
        let object = decode(&[0x2a], &registry, &policy).unwrap();
        assert_eq!(object, Object::UInt(42));
    }

    #[test]
    fn intern_round_trip_of_two_identical_strings() {
        let registry = Registry::new();
        let policy = Policy::default();

        let mut entries_buf = Vec::new();
        entries_buf.extend(msgpack_of(&Token::ArrayLen(1)));
        entries_buf.extend(msgpack_of(&Token::Str("hi".into())));

        let ref_token = write_ext(ExtId::InternTableOrRef.wire(), &msgpack_of(&Token::UInt(0)));

        let mut body_buf = Vec::new();
        body_buf.extend(msgpack_of(&Token::ArrayLen(2)));
        body_buf.extend(&ref_token);
        body_buf.extend(&ref_token);

        let mut payload = Vec::new();
        payload.extend(msgpack_of(&Token::ArrayLen(2)));
        payload.extend(entries_buf);
        payload.extend(body_buf);

        let message = write_ext(ExtId::InternTableOrRef.wire(), &payload);
        let object = decode(&message, &registry, &policy).unwrap();
        assert_eq!(object, Object::array([Object::str("hi"), Object::str("hi")]));
    }

    #[test]
    fn forward_reference_is_rejected() {
        let registry = Registry::new();
        let policy = Policy::default();

        let forward_ref = write_ext(ExtId::InternTableOrRef.wire(), &msgpack_of(&Token::UInt(1)));
        let mut entries_buf = Vec::new();
        entries_buf.extend(msgpack_of(&Token::ArrayLen(2)));
        entries_buf.extend(&forward_ref);
        entries_buf.extend(msgpack_of(&Token::Str("x".into())));

        let mut payload = Vec::new();
        payload.extend(msgpack_of(&Token::ArrayLen(2)));
        payload.extend(entries_buf);
        payload.extend(msgpack_of(&Token::Nil));

        let message = write_ext(ExtId::InternTableOrRef.wire(), &payload);
        let err = decode(&message, &registry, &policy).unwrap_err();
        assert!(matches!(
            err,
            Error::ForwardInternRef {
                index: 1,
                available: 1
            }
        ));
    }

    #[test]
    fn nested_intern_tables_are_rejected() {
        let registry = Registry::new();
        let policy = Policy::default();

        let mut inner_payload = Vec::new();
        inner_payload.extend(msgpack_of(&Token::ArrayLen(2)));
        inner_payload.extend(msgpack_of(&Token::ArrayLen(0)));
        inner_payload.extend(msgpack_of(&Token::Nil));
        let inner_table = write_ext(ExtId::InternTableOrRef.wire(), &inner_payload);

        let mut outer_payload = Vec::new();
        outer_payload.extend(msgpack_of(&Token::ArrayLen(2)));
        outer_payload.extend(msgpack_of(&Token::ArrayLen(0)));
        outer_payload.extend(&inner_table);

        let message = write_ext(ExtId::InternTableOrRef.wire(), &outer_payload);
        let err = decode(&message, &registry, &policy).unwrap_err();
        assert!(matches!(err, Error::NestedInternTable));
    }

    #[test]
    fn namespace_id_scoping_uses_innermost_binding() {
        let registry = Registry::new();
        let policy = Policy::default().on_unknown_namespace(UnknownNamespacePolicy::AsRaw);

        let custom_ref = write_ext(
            ExtId::CustomType.wire(),
            &{
                let mut buf = Vec::new();
                buf.extend(msgpack_of(&Token::ArrayLen(3)));
                buf.extend(msgpack_of(&Token::UInt(2)));
                buf.extend(msgpack_of(&Token::UInt(0)));
                buf.extend(msgpack_of(&Token::Bin(vec![0xaa])));
                buf
            },
        );

        let mut inner_payload = Vec::new();
        inner_payload.extend(msgpack_of(&Token::ArrayLen(3)));
        inner_payload.extend(msgpack_of(&Token::Str("ns".into())));
        inner_payload.extend(msgpack_of(&Token::UInt(2)));
        inner_payload.extend(&custom_ref);
        let inner = write_ext(ExtId::NamespaceId.wire(), &inner_payload);

        let mut outer_payload = Vec::new();
        outer_payload.extend(msgpack_of(&Token::ArrayLen(3)));
        outer_payload.extend(msgpack_of(&Token::Str("ns".into())));
        outer_payload.extend(msgpack_of(&Token::UInt(1)));
        outer_payload.extend(&inner);
        let message = write_ext(ExtId::NamespaceId.wire(), &outer_payload);

        let object = decode(&message, &registry, &policy).unwrap();
        match object {
            Object::Raw(raw) => {
                // The innermost binding (id 2 -> "ns") is what resolves the
                // reference; `AsRaw` keeps the wire form verbatim so the
                // message can still re-encode byte-for-byte, so the captured
                // namespace is the id, not the resolved name.
                assert_eq!(raw.namespace, NamespaceRef::Id(2));
                assert_eq!(raw.type_id, 0);
            }
            other => panic!("expected a raw fallback object, got {other:?}"),
        }
    }

    #[test]
    fn unknown_namespace_as_raw_round_trips_exact_bytes() {
        let registry = Registry::new();
        let policy = Policy::default().on_unknown_namespace(UnknownNamespacePolicy::AsRaw);

        let mut payload = Vec::new();
        payload.extend(msgpack_of(&Token::ArrayLen(3)));
        payload.extend(msgpack_of(&Token::Str("unseen".into())));
        payload.extend(msgpack_of(&Token::UInt(5)));
        payload.extend(msgpack_of(&Token::Bin(vec![0x01, 0x02])));

        let message = write_ext(ExtId::CustomType.wire(), &payload);
        let object = decode(&message, &registry, &policy).unwrap();
        let bytes = crate::encoder::encode(&object, &registry, &policy).unwrap();
        assert_eq!(bytes, message);
    }

    #[test]
    fn disallowed_extension_id_is_rejected() {
        let registry = Registry::new();
        let policy = Policy::default();
        let message = write_ext(0x09, &[]);
        let err = decode(&message, &registry, &policy).unwrap_err();
        assert!(matches!(err, Error::DisallowedExtension(0x09)));
    }
}
