//! Policy & Error Surface (spec §4.6), and the ambient configuration
//! surface for the engine (SPEC_FULL §10.3).
//!
//! `Policy` is a cheaply-cloneable, fluently-built value — the same
//! shape as a transaction builder in this pack — handed to [`crate::engine::Engine`]
//! at construction and consulted by the decoder whenever it meets a
//! namespace or type-id it can't resolve.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::object::{NamespaceRef, Object};

/// What to do when a `0x08` envelope names a namespace the registry has
/// never heard of.
#[derive(Clone)]
pub enum UnknownNamespacePolicy {
    /// Fail with [`crate::error::Error::UnknownNamespace`] (the default).
    Error,
    /// Produce an [`Object::Raw`] carrying enough to re-encode verbatim.
    AsRaw,
    /// Hand the `(namespace, type_id, bytes)` triple to a user callback.
    Custom(Arc<dyn Fn(NamespaceRef, u64, &[u8]) -> Result<Object> + Send + Sync>),
}

/// What to do when a `0x08` envelope names a known namespace but an
/// unregistered type-id within it.
#[derive(Clone)]
pub enum UnknownTypePolicy {
    /// Fail with [`crate::error::Error::UnknownTypeId`] (the default; may
    /// be treated as unconditional by never overriding it).
    Error,
    /// Produce an [`Object::Raw`] carrying enough to re-encode verbatim.
    AsRaw,
    /// Hand the `(namespace, type_id, bytes)` triple to a user callback.
    Custom(Arc<dyn Fn(&str, u64, &[u8]) -> Result<Object> + Send + Sync>),
}

/// Whether, and how aggressively, the encoder should wrap sub-trees in
/// `0x07` namespace-id envelopes (spec §4.5).
#[derive(Clone)]
pub enum NamespaceIdMode {
    /// Never substitute; always emit the namespace string inline.
    Disabled,
    /// Substitute once a namespace appears at least `threshold` times.
    Threshold(usize),
    /// A distinct threshold per namespace; namespaces absent from the map
    /// fall back to `default`.
    PerNamespace {
        /// Threshold used for namespaces not named in `overrides`.
        default: usize,
        /// Per-namespace threshold overrides.
        overrides: HashMap<String, usize>,
    },
}

impl NamespaceIdMode {
    pub(crate) fn threshold_for(&self, namespace: &str) -> Option<usize> {
        match self {
            NamespaceIdMode::Disabled => None,
            NamespaceIdMode::Threshold(n) => Some(*n),
            NamespaceIdMode::PerNamespace { default, overrides } => {
                Some(*overrides.get(namespace).unwrap_or(default))
            }
        }
    }
}

type InternEquality = Arc<dyn Fn(&Object, &Object) -> bool + Send + Sync>;

/// Programmatic engine configuration (spec §4.6; SPEC_FULL §10.3).
#[derive(Clone)]
pub struct Policy {
    on_unknown_namespace: UnknownNamespacePolicy,
    on_unknown_type: UnknownTypePolicy,
    intern_equality: InternEquality,
    enable_interning: bool,
    namespace_id_mode: NamespaceIdMode,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("enable_interning", &self.enable_interning)
            .finish_non_exhaustive()
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            on_unknown_namespace: UnknownNamespacePolicy::Error,
            on_unknown_type: UnknownTypePolicy::Error,
            intern_equality: Arc::new(Self::default_intern_equality),
            enable_interning: false,
            namespace_id_mode: NamespaceIdMode::Disabled,
        }
    }
}

impl Policy {
    /// The default policy: every fallback errors, interning and
    /// namespace-id substitution are both off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the unknown-namespace fallback.
    pub fn on_unknown_namespace(mut self, policy: UnknownNamespacePolicy) -> Self {
        self.on_unknown_namespace = policy;
        self
    }

    /// Set the unknown-type-in-known-namespace fallback.
    pub fn on_unknown_type(mut self, policy: UnknownTypePolicy) -> Self {
        self.on_unknown_type = policy;
        self
    }

    /// Enable or disable the encoder's interning pre-pass.
    pub fn enable_interning(mut self, enabled: bool) -> Self {
        self.enable_interning = enabled;
        self
    }

    /// Configure namespace-id substitution.
    pub fn namespace_id_substitution(mut self, mode: NamespaceIdMode) -> Self {
        self.namespace_id_mode = mode;
        self
    }

    /// Supply a custom intern-eligibility equality predicate.
    pub fn intern_equality<F>(mut self, equality: F) -> Self
    where
        F: Fn(&Object, &Object) -> bool + Send + Sync + 'static,
    {
        self.intern_equality = Arc::new(equality);
        self
    }

    /// The default intern-equality predicate: structural equality of the
    /// decoded `Object` tree.
    ///
    /// This is equivalent in spirit to comparing canonical msgpack bytes
    /// of the two candidate sub-trees (spec §9 design note on intern
    /// equality) — `Object`'s own `PartialEq` already walks maps in
    /// insertion order and compares custom payloads by downcasted value,
    /// so there is no separate canonicalization step to get wrong.
    pub fn default_intern_equality(a: &Object, b: &Object) -> bool {
        a == b
    }

    pub(crate) fn unknown_namespace(&self) -> &UnknownNamespacePolicy {
        &self.on_unknown_namespace
    }

    pub(crate) fn unknown_type(&self) -> &UnknownTypePolicy {
        &self.on_unknown_type
    }

    pub(crate) fn interning_enabled(&self) -> bool {
        self.enable_interning
    }

    pub(crate) fn namespace_id_mode(&self) -> &NamespaceIdMode {
        &self.namespace_id_mode
    }

    pub(crate) fn intern_eq(&self, a: &Object, b: &Object) -> bool {
        (self.intern_equality)(a, b)
    }
}
