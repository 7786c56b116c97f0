//! The Bowler typed value codec.
//!
//! Every RPC body is a concatenation of typed values. Each type has a
//! single-byte wire code, a fixed or value-dependent width, and big-endian
//! byte order for multi-byte integers.

use std::io::{Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::Error;

const CODE_UINT8: u8 = 8;
const CODE_INT16: u8 = 16;
const CODE_INT32: u8 = 32;
const CODE_BYTE_BUFFER: u8 = 37;
const CODE_INT32_ARRAY: u8 = 38;
const CODE_STRING: u8 = 39;
const CODE_FIXED_TWO: u8 = 41;
const CODE_FIXED_THREE: u8 = 42;
const CODE_BOOL: u8 = 43;

/// String encodings accepted when decoding wire bytes into text.
///
/// The protocol's default is ASCII; UTF-8 is accepted for hosts that store
/// wider identifiers in string payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Strict 7-bit ASCII (the protocol default).
    #[default]
    Ascii,
    /// UTF-8.
    Utf8,
}

impl Encoding {
    /// Decode `bytes` into an owned string, validating them against this
    /// encoding.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, Error> {
        match self {
            Self::Ascii => {
                if let Some(b) = bytes.iter().find(|b| !b.is_ascii()) {
                    return Err(Error::InvalidEncoding(format!(
                        "byte {b:#04x} is not ascii"
                    )));
                }
                // All bytes are 7-bit, so this cannot fail.
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| Error::InvalidEncoding(e.to_string())),
        }
    }
}

/// The wire type codes of the Bowler typed value set.
///
/// `UInt8Array` shares wire code 37 with `ByteBuffer`; decoding code 37
/// always yields [`TypeCode::ByteBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    /// One byte, zero is false.
    Bool,
    /// One unsigned byte.
    UInt8,
    /// Two-byte big-endian signed integer.
    Int16,
    /// Four-byte big-endian signed integer.
    Int32,
    /// `Int32` divided by 100.
    FixedPointTwoPlaces,
    /// `Int32` divided by 1000.
    FixedPointThreePlaces,
    /// One-byte length prefix followed by that many bytes (max 255).
    ByteBuffer,
    /// Alias of [`TypeCode::ByteBuffer`] on the wire.
    UInt8Array,
    /// One-byte element count followed by that many big-endian `Int32`s.
    Int32Array,
    /// Bytes up to and including a 0x00 terminator.
    NullTerminatedString,
}

impl TypeCode {
    /// Map a wire code onto a `TypeCode`.
    pub fn from_code(code: u8) -> Result<Self, Error> {
        match code {
            CODE_BOOL => Ok(Self::Bool),
            CODE_UINT8 => Ok(Self::UInt8),
            CODE_INT16 => Ok(Self::Int16),
            CODE_INT32 => Ok(Self::Int32),
            CODE_BYTE_BUFFER => Ok(Self::ByteBuffer),
            CODE_INT32_ARRAY => Ok(Self::Int32Array),
            CODE_STRING => Ok(Self::NullTerminatedString),
            CODE_FIXED_TWO => Ok(Self::FixedPointTwoPlaces),
            CODE_FIXED_THREE => Ok(Self::FixedPointThreePlaces),
            v => Err(Error::UnknownTypeCode(v)),
        }
    }

    /// Returns the wire code for this type.
    pub fn as_code(&self) -> u8 {
        match self {
            Self::Bool => CODE_BOOL,
            Self::UInt8 => CODE_UINT8,
            Self::Int16 => CODE_INT16,
            Self::Int32 => CODE_INT32,
            Self::FixedPointTwoPlaces => CODE_FIXED_TWO,
            Self::FixedPointThreePlaces => CODE_FIXED_THREE,
            Self::ByteBuffer | Self::UInt8Array => CODE_BYTE_BUFFER,
            Self::Int32Array => CODE_INT32_ARRAY,
            Self::NullTerminatedString => CODE_STRING,
        }
    }
}

/// A single Bowler typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// One byte, zero is false.
    Bool(bool),
    /// One unsigned byte.
    UInt8(u8),
    /// Two-byte big-endian signed integer.
    Int16(i16),
    /// Four-byte big-endian signed integer.
    Int32(i32),
    /// Scaled by 100 on the wire, truncated toward zero.
    FixedPoint2(f64),
    /// Scaled by 1000 on the wire, truncated toward zero.
    FixedPoint3(f64),
    /// Length-prefixed opaque bytes (max 255).
    ByteBuffer(Vec<u8>),
    /// Length-prefixed unsigned bytes; identical to `ByteBuffer` on the
    /// wire.
    UInt8Array(Vec<u8>),
    /// Count-prefixed big-endian `Int32`s (max 255 elements).
    Int32Array(Vec<i32>),
    /// Null-terminated string.
    Str(String),
}

impl Value {
    /// Returns the `TypeCode` this value serialises as.
    pub fn type_code(&self) -> TypeCode {
        match self {
            Self::Bool(_) => TypeCode::Bool,
            Self::UInt8(_) => TypeCode::UInt8,
            Self::Int16(_) => TypeCode::Int16,
            Self::Int32(_) => TypeCode::Int32,
            Self::FixedPoint2(_) => TypeCode::FixedPointTwoPlaces,
            Self::FixedPoint3(_) => TypeCode::FixedPointThreePlaces,
            Self::ByteBuffer(_) => TypeCode::ByteBuffer,
            Self::UInt8Array(_) => TypeCode::UInt8Array,
            Self::Int32Array(_) => TypeCode::Int32Array,
            Self::Str(_) => TypeCode::NullTerminatedString,
        }
    }

    /// Short human-readable name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::UInt8(_) => "uint8",
            Self::Int16(_) => "int16",
            Self::Int32(_) => "int32",
            Self::FixedPoint2(_) => "fixed-point-2",
            Self::FixedPoint3(_) => "fixed-point-3",
            Self::ByteBuffer(_) => "byte-buffer",
            Self::UInt8Array(_) => "uint8-array",
            Self::Int32Array(_) => "int32-array",
            Self::Str(_) => "string",
        }
    }

    /// Returns the on-wire length of this value once serialised.
    ///
    /// Length-prefixed types include their prefix byte; strings include
    /// their terminator.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Bool(_) | Self::UInt8(_) => 1,
            Self::Int16(_) => 2,
            Self::Int32(_) | Self::FixedPoint2(_) | Self::FixedPoint3(_) => 4,
            Self::ByteBuffer(b) | Self::UInt8Array(b) => 1 + b.len(),
            Self::Int32Array(v) => 1 + 4 * v.len(),
            Self::Str(s) => s.len() + 1,
        }
    }

    /// Serialises this value into `buf`, writing exactly
    /// [`wire_len`](Value::wire_len) bytes.
    pub fn serialise_into<W: Write>(&self, mut buf: W) -> Result<(), Error> {
        match self {
            Self::Bool(v) => buf.write_u8(u8::from(*v))?,
            Self::UInt8(v) => buf.write_u8(*v)?,
            Self::Int16(v) => buf.write_i16::<BigEndian>(*v)?,
            Self::Int32(v) => buf.write_i32::<BigEndian>(*v)?,
            Self::FixedPoint2(v) => buf.write_i32::<BigEndian>(scale_fixed(*v, 100.0)?)?,
            Self::FixedPoint3(v) => buf.write_i32::<BigEndian>(scale_fixed(*v, 1000.0)?)?,
            Self::ByteBuffer(b) | Self::UInt8Array(b) => {
                buf.write_u8(length_prefix(b.len())?)?;
                buf.write_all(b)?;
            }
            Self::Int32Array(v) => {
                buf.write_u8(length_prefix(v.len())?)?;
                for n in v {
                    buf.write_i32::<BigEndian>(*n)?;
                }
            }
            Self::Str(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(Error::InvalidEncoding(
                        "string contains an interior nul byte".to_owned(),
                    ));
                }
                buf.write_all(s.as_bytes())?;
                buf.write_u8(0)?;
            }
        }

        Ok(())
    }

    /// Constructs a `Value` of type `code` by parsing the wire format read
    /// from `r`.
    ///
    /// `from_cursor` advances the position of `r` by exactly the value's
    /// wire width.
    pub fn from_cursor(
        code: TypeCode,
        r: &mut Cursor<&[u8]>,
        encoding: Encoding,
    ) -> Result<Self, Error> {
        let v = match code {
            TypeCode::Bool => Self::Bool(read_u8(r)? != 0),
            TypeCode::UInt8 => Self::UInt8(read_u8(r)?),
            TypeCode::Int16 => {
                ensure_remaining(r, 2)?;
                Self::Int16(r.read_i16::<BigEndian>()?)
            }
            TypeCode::Int32 => Self::Int32(read_i32(r)?),
            TypeCode::FixedPointTwoPlaces => Self::FixedPoint2(f64::from(read_i32(r)?) / 100.0),
            TypeCode::FixedPointThreePlaces => Self::FixedPoint3(f64::from(read_i32(r)?) / 1000.0),
            // Code 37 always decodes as a ByteBuffer; UInt8Array is a
            // host-side alias with the same wire shape.
            TypeCode::ByteBuffer | TypeCode::UInt8Array => {
                let len = read_u8(r)? as usize;
                ensure_remaining(r, len)?;
                let mut b = vec![0; len];
                std::io::Read::read_exact(r, &mut b)?;
                Self::ByteBuffer(b)
            }
            TypeCode::Int32Array => {
                let count = read_u8(r)? as usize;
                ensure_remaining(r, 4 * count)?;
                let mut v = Vec::with_capacity(count);
                for _ in 0..count {
                    v.push(r.read_i32::<BigEndian>()?);
                }
                Self::Int32Array(v)
            }
            TypeCode::NullTerminatedString => {
                let data = *r.get_ref();
                let start = r.position() as usize;
                let nul = data[start..].iter().position(|&b| b == 0).ok_or(
                    Error::TruncatedInput {
                        wanted: 1,
                        available: 0,
                    },
                )?;
                let s = encoding.decode(&data[start..start + nul])?;
                r.set_position((start + nul + 1) as u64);
                Self::Str(s)
            }
        };

        Ok(v)
    }

    /// Serialise this value into a new [`Vec`] sized exactly to its wire
    /// length.
    pub fn serialise(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.serialise_into(&mut buf)?;
        Ok(buf)
    }
}

/// Scale a fixed-point host value onto its `i32` wire form.
///
/// Excess decimal precision truncates toward zero (1.239 scales to 123,
/// not 124). A product within a few ulps of an integer snaps to it first:
/// a wire value divided by the factor does not survive the float round
/// trip exactly, and truncating its raw product would shift it by one.
fn scale_fixed(v: f64, factor: f64) -> Result<i32, Error> {
    let product = v * factor;
    let nearest = product.round();
    let scaled = if (product - nearest).abs() < 1e-4 {
        nearest
    } else {
        product.trunc()
    };
    if scaled < f64::from(i32::MIN) || scaled > f64::from(i32::MAX) {
        return Err(Error::ValueOutOfRange(
            "fixed-point value exceeds the i32 wire range",
        ));
    }
    Ok(scaled as i32)
}

fn length_prefix(len: usize) -> Result<u8, Error> {
    u8::try_from(len).map_err(|_| Error::ValueOutOfRange("length prefix exceeds 255"))
}

fn ensure_remaining(r: &Cursor<&[u8]>, wanted: usize) -> Result<(), Error> {
    let available = r.get_ref().len().saturating_sub(r.position() as usize);
    if available < wanted {
        return Err(Error::TruncatedInput { wanted, available });
    }
    Ok(())
}

fn read_u8(r: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    ensure_remaining(r, 1)?;
    Ok(r.read_u8()?)
}

fn read_i32(r: &mut Cursor<&[u8]>) -> Result<i32, Error> {
    ensure_remaining(r, 4)?;
    Ok(r.read_i32::<BigEndian>()?)
}
