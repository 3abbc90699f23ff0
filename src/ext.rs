//! The three reserved msgpack ext ids and the grammars of their payloads.
//!
//! Nothing in this module interprets payload bytes; it only names the
//! reserved ids so the decoder and encoder agree on what's legal (spec §6).

use crate::error::{Error, Result};

/// A reserved tobytes extension id. Any other ext id in a message is
/// [`Error::DisallowedExtension`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtId {
    /// `0x06` — intern table (payload `[array, any]`) or intern reference
    /// (payload `uint`), disambiguated by the head of the payload.
    InternTableOrRef,
    /// `0x07` — namespace-id mapping, payload `[str, uint, any]`.
    NamespaceId,
    /// `0x08` — custom type, payload `[str|uint, uint, bin]`.
    CustomType,
}

impl ExtId {
    /// Raw wire value of this ext id.
    pub const fn wire(self) -> i8 {
        match self {
            ExtId::InternTableOrRef => 0x06,
            ExtId::NamespaceId => 0x07,
            ExtId::CustomType => 0x08,
        }
    }

    /// Recognize a raw ext id, failing with [`Error::DisallowedExtension`]
    /// for anything outside {0x06, 0x07, 0x08}.
    pub fn from_wire(id: i8) -> Result<Self> {
        match id {
            0x06 => Ok(ExtId::InternTableOrRef),
            0x07 => Ok(ExtId::NamespaceId),
            0x08 => Ok(ExtId::CustomType),
            other => Err(Error::disallowed(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_reserved_ids() {
        for id in [ExtId::InternTableOrRef, ExtId::NamespaceId, ExtId::CustomType] {
            assert_eq!(ExtId::from_wire(id.wire()).unwrap(), id);
        }
    }

    #[test]
    fn rejects_other_ids() {
        for id in [0x00, 0x01, 0x05, 0x09, 0x7f, -1] {
            assert!(matches!(
                ExtId::from_wire(id),
                Err(Error::DisallowedExtension(_))
            ));
        }
    }
}
