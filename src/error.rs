use std::{error, fmt, io};

use crate::ext::ExtId;

/// Everything that can go wrong while encoding or decoding a tobytes
/// message, or while using the custom-type registry.
///
/// Structural violations (anything up to and including
/// [`Error::ForwardInternRef`]) are never recovered inside the engine;
/// [`Error::UnknownNamespace`] and [`Error::UnknownTypeId`] are
/// policy-mediated and may be rewritten to an opaque [`crate::object::Object::Raw`]
/// before they ever reach the caller. See spec §7.
#[derive(Debug)]
pub enum Error {
    /// The underlying msgpack framing was broken or truncated.
    MalformedMsgPack(String),
    /// An ext id outside {0x06, 0x07, 0x08} appeared in the stream.
    DisallowedExtension(u8),
    /// A `0x06` payload was neither an array-headed table nor a uint-headed
    /// reference.
    MalformedInternEnvelope,
    /// A `0x06` table was opened while another was already active on this
    /// decoding path.
    NestedInternTable,
    /// A `0x06` reference was read with no enclosing intern table.
    NoInternFrame,
    /// An intern reference's index was not less than the number of entries
    /// available at the point it was read.
    ForwardInternRef {
        /// The index that was referenced.
        index: u64,
        /// The number of entries visible at the time.
        available: usize,
    },
    /// The encoder's interning pre-pass found a cycle in the eligibility
    /// graph.
    CyclicInternGraph,
    /// A `0x08` envelope named a namespace id with no enclosing `0x07`
    /// binding. Always fatal (spec §4.6).
    UnknownNamespaceId(u64),
    /// A `0x08` envelope named a namespace string or id that the registry
    /// has no entry for. Policy-mediated.
    UnknownNamespace(String),
    /// A `0x08` envelope named a known namespace but an unregistered
    /// type-id within it. Policy-mediated.
    UnknownTypeId {
        /// The namespace the type-id was looked up in.
        namespace: String,
        /// The type-id that had no codec.
        type_id: u64,
    },
    /// The encoder was given an object with no registered codec and no
    /// fallback policy to rewrite it.
    UnregisteredType,
    /// A registered codec returned an error while encoding or decoding.
    CodecFault {
        /// The namespace the failing codec was registered under.
        namespace: String,
        /// The type-id the failing codec was registered under.
        type_id: u64,
        /// The underlying failure.
        source: Box<dyn error::Error + Send + Sync>,
    },
    /// `register` was called twice for the same `(namespace, type_id)`.
    AlreadyRegistered {
        /// The namespace of the duplicate registration.
        namespace: String,
        /// The type-id of the duplicate registration.
        type_id: u64,
    },
    /// I/O failure from the byte source/sink underlying the adapter.
    Io(io::Error),
}

impl Error {
    pub(crate) fn disallowed(id: i8) -> Self {
        Error::DisallowedExtension(id as u8)
    }

    pub(crate) fn reserved_name(id: ExtId) -> &'static str {
        match id {
            ExtId::InternTableOrRef => "intern table/reference",
            ExtId::NamespaceId => "namespace-id mapping",
            ExtId::CustomType => "custom type",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedMsgPack(msg) => write!(f, "malformed msgpack: {msg}"),
            Self::DisallowedExtension(id) => {
                write!(f, "disallowed extension id 0x{id:02x}")
            }
            Self::MalformedInternEnvelope => {
                f.write_str("ext 0x06 payload is neither a table nor a reference")
            }
            Self::NestedInternTable => {
                f.write_str("intern table opened while another is already active")
            }
            Self::NoInternFrame => f.write_str("intern reference with no enclosing table"),
            Self::ForwardInternRef { index, available } => write!(
                f,
                "intern reference {index} is not less than the {available} entries available"
            ),
            Self::CyclicInternGraph => f.write_str("cycle detected in intern eligibility graph"),
            Self::UnknownNamespaceId(id) => write!(f, "unbound namespace id {id}"),
            Self::UnknownNamespace(ns) => write!(f, "unknown namespace `{ns}`"),
            Self::UnknownTypeId { namespace, type_id } => {
                write!(f, "unknown type id {type_id} in namespace `{namespace}`")
            }
            Self::UnregisteredType => f.write_str("no codec registered for this object's type"),
            Self::CodecFault {
                namespace,
                type_id,
                source,
            } => write!(
                f,
                "codec fault in `{namespace}`/{type_id}: {source}"
            ),
            Self::AlreadyRegistered { namespace, type_id } => write!(
                f,
                "type-id {type_id} already registered in namespace `{namespace}`"
            ),
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::CodecFault { source, .. } => Some(source.as_ref()),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// Crate-wide result alias; every public `tobytes` function returns this.
pub type Result<T> = std::result::Result<T, Error>;
