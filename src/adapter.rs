//! The MsgPack Codec Adapter (spec §4.1).
//!
//! A thin bidirectional bridge to `rmp`'s primitive encode/decode
//! functions. [`Reader`] hands back one [`Token`] at a time; [`Writer`]
//! accepts one at a time. Neither validates ext ids against tobytes
//! semantics — that's the decoder/encoder engines' job — this module
//! only knows the shape of the msgpack primitive family, the way the
//! donor crate's `Cursor` only knows the shape of a VBR/bit field and
//! leaves block semantics to the reader built on top of it.

use std::io::Write;

use crate::error::{Error, Result};

/// One msgpack primitive, read or about to be written.
///
/// `ArrayLen`/`MapLen` are headers: the caller is responsible for then
/// reading (or writing) exactly that many further tokens (twice that many
/// for a map, alternating key/value).
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// msgpack `nil`.
    Nil,
    /// msgpack `bool`.
    Bool(bool),
    /// A negative or large-magnitude signed integer.
    Int(i64),
    /// A non-negative integer.
    UInt(u64),
    /// A 32-bit float.
    F32(f32),
    /// A 64-bit float.
    F64(f64),
    /// A UTF-8 string.
    Str(String),
    /// Opaque bytes.
    Bin(Vec<u8>),
    /// Header for an array of `len` following tokens.
    ArrayLen(u32),
    /// Header for a map of `len` following key/value token pairs.
    MapLen(u32),
    /// A raw extension envelope: id and payload, uninterpreted.
    Ext {
        /// The ext type byte, signed per the msgpack spec.
        id: i8,
        /// The opaque payload bytes.
        payload: Vec<u8>,
    },
}

fn framing_err<E: std::fmt::Display>(err: E) -> Error {
    Error::MalformedMsgPack(err.to_string())
}

/// Reads [`Token`]s out of an in-memory msgpack buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    total_len: usize,
}

impl<'a> Reader<'a> {
    /// Wrap a byte slice for token-at-a-time reading.
    pub fn new(buf: &'a [u8]) -> Self {
        Reader {
            buf,
            total_len: buf.len(),
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.total_len - self.buf.len()
    }

    /// Whether every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.buf.is_empty()
    }

    /// Read the next primitive token. Errors surface the underlying
    /// msgpack framing problem verbatim (spec §4.1).
    pub fn read_next(&mut self) -> Result<Token> {
        use rmp::Marker;

        let marker = rmp::decode::read_marker(&mut self.buf).map_err(framing_err)?;
        Ok(match marker {
            Marker::Null => Token::Nil,
            Marker::True => Token::Bool(true),
            Marker::False => Token::Bool(false),
            Marker::FixPos(v) => Token::UInt(v as u64),
            Marker::FixNeg(v) => Token::Int(v as i64),
            Marker::U8 => Token::UInt(rmp::decode::read_data_u8(&mut self.buf).map_err(framing_err)? as u64),
            Marker::U16 => Token::UInt(rmp::decode::read_data_u16(&mut self.buf).map_err(framing_err)? as u64),
            Marker::U32 => Token::UInt(rmp::decode::read_data_u32(&mut self.buf).map_err(framing_err)? as u64),
            Marker::U64 => Token::UInt(rmp::decode::read_data_u64(&mut self.buf).map_err(framing_err)?),
            Marker::I8 => Token::Int(rmp::decode::read_data_i8(&mut self.buf).map_err(framing_err)? as i64),
            Marker::I16 => Token::Int(rmp::decode::read_data_i16(&mut self.buf).map_err(framing_err)? as i64),
            Marker::I32 => Token::Int(rmp::decode::read_data_i32(&mut self.buf).map_err(framing_err)? as i64),
            Marker::I64 => Token::Int(rmp::decode::read_data_i64(&mut self.buf).map_err(framing_err)?),
            Marker::F32 => Token::F32(rmp::decode::read_data_f32(&mut self.buf).map_err(framing_err)?),
            Marker::F64 => Token::F64(rmp::decode::read_data_f64(&mut self.buf).map_err(framing_err)?),
            Marker::FixStr(len) => self.read_str(len as u32)?,
            Marker::Str8 => {
                let len = rmp::decode::read_data_u8(&mut self.buf).map_err(framing_err)? as u32;
                self.read_str(len)?
            }
            Marker::Str16 => {
                let len = rmp::decode::read_data_u16(&mut self.buf).map_err(framing_err)? as u32;
                self.read_str(len)?
            }
            Marker::Str32 => {
                let len = rmp::decode::read_data_u32(&mut self.buf).map_err(framing_err)?;
                self.read_str(len)?
            }
            Marker::Bin8 => {
                let len = rmp::decode::read_data_u8(&mut self.buf).map_err(framing_err)? as u32;
                Token::Bin(self.read_bytes(len)?)
            }
            Marker::Bin16 => {
                let len = rmp::decode::read_data_u16(&mut self.buf).map_err(framing_err)? as u32;
                Token::Bin(self.read_bytes(len)?)
            }
            Marker::Bin32 => {
                let len = rmp::decode::read_data_u32(&mut self.buf).map_err(framing_err)?;
                Token::Bin(self.read_bytes(len)?)
            }
            Marker::FixArray(len) => Token::ArrayLen(len as u32),
            Marker::Array16 => {
                Token::ArrayLen(rmp::decode::read_data_u16(&mut self.buf).map_err(framing_err)? as u32)
            }
            Marker::Array32 => {
                Token::ArrayLen(rmp::decode::read_data_u32(&mut self.buf).map_err(framing_err)?)
            }
            Marker::FixMap(len) => Token::MapLen(len as u32),
            Marker::Map16 => {
                Token::MapLen(rmp::decode::read_data_u16(&mut self.buf).map_err(framing_err)? as u32)
            }
            Marker::Map32 => {
                Token::MapLen(rmp::decode::read_data_u32(&mut self.buf).map_err(framing_err)?)
            }
            Marker::FixExt1 => self.read_ext(1)?,
            Marker::FixExt2 => self.read_ext(2)?,
            Marker::FixExt4 => self.read_ext(4)?,
            Marker::FixExt8 => self.read_ext(8)?,
            Marker::FixExt16 => self.read_ext(16)?,
            Marker::Ext8 => {
                let len = rmp::decode::read_data_u8(&mut self.buf).map_err(framing_err)? as u32;
                self.read_ext(len)?
            }
            Marker::Ext16 => {
                let len = rmp::decode::read_data_u16(&mut self.buf).map_err(framing_err)? as u32;
                self.read_ext(len)?
            }
            Marker::Ext32 => {
                let len = rmp::decode::read_data_u32(&mut self.buf).map_err(framing_err)?;
                self.read_ext(len)?
            }
            Marker::Reserved => {
                return Err(Error::MalformedMsgPack("reserved marker 0xc1".into()));
            }
        })
    }

    fn read_bytes(&mut self, len: u32) -> Result<Vec<u8>> {
        let len = len as usize;
        if self.buf.len() < len {
            return Err(Error::MalformedMsgPack("truncated input".into()));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head.to_vec())
    }

    fn read_str(&mut self, len: u32) -> Result<Token> {
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes)
            .map(Token::Str)
            .map_err(|e| Error::MalformedMsgPack(e.to_string()))
    }

    fn read_ext(&mut self, len: u32) -> Result<Token> {
        let id = rmp::decode::read_data_i8(&mut self.buf).map_err(framing_err)?;
        let payload = self.read_bytes(len)?;
        Ok(Token::Ext { id, payload })
    }
}

/// Writes [`Token`]s into any [`Write`] sink.
pub struct Writer<W: Write> {
    inner: W,
}

impl<W: Write> Writer<W> {
    /// Wrap a byte sink for token-at-a-time writing.
    pub fn new(inner: W) -> Self {
        Writer { inner }
    }

    /// Consume the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Write one primitive token.
    pub fn write(&mut self, token: &Token) -> Result<()> {
        match token {
            Token::Nil => rmp::encode::write_nil(&mut self.inner).map_err(framing_err)?,
            Token::Bool(v) => {
                rmp::encode::write_bool(&mut self.inner, *v).map_err(framing_err)?
            }
            Token::Int(v) => {
                rmp::encode::write_sint(&mut self.inner, *v).map_err(framing_err)?;
            }
            Token::UInt(v) => {
                rmp::encode::write_uint(&mut self.inner, *v).map_err(framing_err)?;
            }
            Token::F32(v) => rmp::encode::write_f32(&mut self.inner, *v).map_err(framing_err)?,
            Token::F64(v) => rmp::encode::write_f64(&mut self.inner, *v).map_err(framing_err)?,
            Token::Str(s) => {
                rmp::encode::write_str(&mut self.inner, s).map_err(framing_err)?;
            }
            Token::Bin(bytes) => {
                rmp::encode::write_bin(&mut self.inner, bytes).map_err(framing_err)?;
            }
            Token::ArrayLen(len) => {
                rmp::encode::write_array_len(&mut self.inner, *len).map_err(framing_err)?;
            }
            Token::MapLen(len) => {
                rmp::encode::write_map_len(&mut self.inner, *len).map_err(framing_err)?;
            }
            Token::Ext { id, payload } => {
                rmp::encode::write_ext_meta(&mut self.inner, payload.len() as u32, *id)
                    .map_err(framing_err)?;
                self.inner.write_all(payload).map_err(Error::from)?;
            }
        }
        Ok(())
    }
}
