//! The `Engine` facade and the recursive capability handle passed into
//! every registered codec (spec §9 design note; SPEC_FULL §11).
//!
//! An `Engine` owns a frozen [`Registry`] and a [`Policy`] and is the
//! top-level entry point for `encode`/`decode`. Codec closures don't see
//! the `Engine` itself — they see an [`EngineHandle`], a borrow that lets
//! a custom type's payload recursively contain another whole tobytes
//! message without giving the codec access to the outer decode's scoping
//! state (spec §4.2, §4.3: a custom-type payload is an independent
//! message; nested decode starts with empty intern/namespace-id stacks).

use std::sync::Arc;

use crate::error::Result;
use crate::object::Object;
use crate::policy::Policy;
use crate::registry::Registry;

/// Top-level entry point: owns a registry and a policy, and drives whole
/// encode/decode operations.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    policy: Policy,
}

impl Engine {
    /// Build an engine from a (recommended: frozen, see spec §5) registry
    /// and a policy.
    pub fn new(registry: Registry, policy: Policy) -> Self {
        Engine {
            registry: Arc::new(registry),
            policy,
        }
    }

    /// Encode a top-level object into a tobytes message.
    pub fn encode(&self, object: &Object) -> Result<Vec<u8>> {
        crate::encoder::encode(object, &self.registry, &self.policy)
    }

    /// Decode a tobytes message into a top-level object.
    pub fn decode(&self, bytes: &[u8]) -> Result<Object> {
        crate::decoder::decode(bytes, &self.registry, &self.policy)
    }

    /// The registry this engine was built with.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The policy this engine was built with.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }
}

/// The capability object handed to registered codec closures.
///
/// Borrowed, not owned: a codec can call [`EngineHandle::encode_message`]
/// or [`EngineHandle::decode_message`] to treat its own payload bytes as a
/// nested tobytes message, each such call starting a fresh top-level
/// operation with its own scoping stacks (spec §4.3).
pub struct EngineHandle<'a> {
    registry: &'a Registry,
    policy: &'a Policy,
}

impl<'a> EngineHandle<'a> {
    pub(crate) fn new(registry: &'a Registry, policy: &'a Policy) -> Self {
        EngineHandle { registry, policy }
    }

    /// Encode `object` as a standalone nested tobytes message.
    pub fn encode_message(&self, object: &Object) -> Result<Vec<u8>> {
        crate::encoder::encode(object, self.registry, self.policy)
    }

    /// Decode `bytes` as a standalone nested tobytes message.
    pub fn decode_message(&self, bytes: &[u8]) -> Result<Object> {
        crate::decoder::decode(bytes, self.registry, self.policy)
    }

    pub(crate) fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub(crate) fn policy(&self) -> &'a Policy {
        self.policy
    }
}
