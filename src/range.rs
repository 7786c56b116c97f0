//! Windowed reads over packet bodies and deferred writes for packet
//! assembly.
//!
//! Body parsers work through [`ByteRange`], a borrowed window with typed
//! read operations at named offsets; body builders work through
//! [`PacketAssembler`], an append-only list of deferred writes that is
//! materialised once the final packet length is known.

use std::collections::BTreeMap;
use std::io::Cursor;

use crate::{Encoding, Error, Value};

/// A borrowed window over a byte buffer with typed, non-destructive read
/// operations.
///
/// A range is addressed by `(start, end)` with an *inclusive* end offset.
/// Offsets passed to the reader methods are relative to the range start.
/// Variable-width readers return the number of bytes they consumed so a
/// caller can chain reads at a running offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange<'a> {
    buf: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> ByteRange<'a> {
    /// A range covering the whole of `buf` (possibly empty).
    pub fn of(buf: &'a [u8]) -> Self {
        Self {
            buf,
            start: 0,
            len: buf.len(),
        }
    }

    /// A range over `buf[start..=end]`.
    pub fn new(buf: &'a [u8], start: usize, end: usize) -> Result<Self, Error> {
        if end < start || end >= buf.len() {
            return Err(Error::TruncatedInput {
                wanted: end + 1,
                available: buf.len(),
            });
        }
        Ok(Self {
            buf,
            start,
            len: end - start + 1,
        })
    }

    /// The number of bytes in this range.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the range is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The bytes of this range as a slice.
    pub fn as_slice(&self) -> &'a [u8] {
        &self.buf[self.start..self.start + self.len]
    }

    fn want(&self, wanted: usize) -> Result<(), Error> {
        if self.len < wanted {
            return Err(Error::TruncatedInput {
                wanted,
                available: self.len,
            });
        }
        Ok(())
    }

    /// The byte at relative offset `i`.
    pub fn byte(&self, i: usize) -> Result<u8, Error> {
        self.want(i + 1)?;
        Ok(self.buf[self.start + i])
    }

    /// The sub-range `a..=b` (relative, inclusive).
    pub fn sub(&self, a: usize, b: usize) -> Result<Self, Error> {
        if b < a {
            return Err(Error::TruncatedInput {
                wanted: a + 1,
                available: self.len,
            });
        }
        self.want(b + 1)?;
        Ok(Self {
            buf: self.buf,
            start: self.start + a,
            len: b - a + 1,
        })
    }

    /// The suffix of this range starting at relative offset `a`.
    ///
    /// `a` equal to the range length yields an empty range, so a chain of
    /// variable-width reads can consume the window exactly.
    pub fn from(&self, a: usize) -> Result<Self, Error> {
        self.want(a)?;
        Ok(Self {
            buf: self.buf,
            start: self.start + a,
            len: self.len - a,
        })
    }

    /// Extend this range to the end of the owning buffer.
    pub fn to_end(&self) -> Self {
        Self {
            buf: self.buf,
            start: self.start,
            len: self.buf.len() - self.start,
        }
    }

    /// The prefix of this range ending at the first 0x00 byte, and the
    /// number of bytes consumed (always including the terminator).
    ///
    /// With `include_null` set the terminator is part of the returned
    /// range; otherwise the range ends just before it.
    pub fn to_null(&self, include_null: bool) -> Result<(Self, usize), Error> {
        let slice = self.as_slice();
        let nul = slice
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::TruncatedInput {
                wanted: self.len + 1,
                available: self.len,
            })?;

        let len = if include_null { nul + 1 } else { nul };
        Ok((
            Self {
                buf: self.buf,
                start: self.start,
                len,
            },
            nul + 1,
        ))
    }

    /// The bytes of this range ANDed with `mask`.
    pub fn masked_with(&self, mask: u8) -> Vec<u8> {
        self.as_slice().iter().map(|b| b & mask).collect()
    }

    /// Pass the raw bytes of this range to `f` and return its result.
    pub fn format<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(self.as_slice())
    }

    /// Partition this range into equal `n`-byte sub-ranges and apply `f`
    /// to each.
    pub fn map_every<T>(
        &self,
        n: usize,
        mut f: impl FnMut(Self) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        if n == 0 || self.len % n != 0 {
            return Err(Error::ValueOutOfRange(
                "range does not divide into equal sub-ranges",
            ));
        }

        (0..self.len / n)
            .map(|i| {
                f(Self {
                    buf: self.buf,
                    start: self.start + i * n,
                    len: n,
                })
            })
            .collect()
    }

    /// Interpret the whole range as an integer by its width: 1, 2 or 4
    /// bytes map onto `UInt8`, `Int16` and `Int32` respectively.
    pub fn to_int(&self) -> Result<Value, Error> {
        let code = match self.len {
            1 => crate::TypeCode::UInt8,
            2 => crate::TypeCode::Int16,
            4 => crate::TypeCode::Int32,
            _ => {
                return Err(Error::ValueOutOfRange(
                    "auto-width integer must be 1, 2 or 4 bytes",
                ))
            }
        };
        let mut c = Cursor::new(self.as_slice());
        Value::from_cursor(code, &mut c, Encoding::Ascii)
    }

    /// Decode the range as text, stopping at the first 0x00 byte if one is
    /// present.
    pub fn to_string(&self, encoding: Encoding) -> Result<String, Error> {
        let slice = self.as_slice();
        let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        encoding.decode(&slice[..end])
    }

    /// Decode every byte of the range as text, 0x00 bytes included.
    pub fn to_raw_string(&self, encoding: Encoding) -> Result<String, Error> {
        encoding.decode(self.as_slice())
    }

    /// Copy the range into an owned buffer.
    pub fn to_buffer(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Copy the range into an owned byte array.
    pub fn to_uint8_array(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Interpret the range as packed big-endian `Int32`s.
    pub fn to_int32_array(&self) -> Result<Vec<i32>, Error> {
        self.map_every(4, |r| match r.to_int()? {
            Value::Int32(v) => Ok(v),
            _ => unreachable!("4-byte sub-range always decodes as Int32"),
        })
    }

    /// Interpret the first byte of the range as a boolean.
    pub fn to_bool(&self) -> Result<bool, Error> {
        Ok(self.byte(0)? != 0)
    }

    /// Use the first byte of the range as a key into `table`.
    pub fn lookup_in<'t, V>(&self, table: &'t BTreeMap<u8, V>) -> Result<Option<&'t V>, Error> {
        Ok(table.get(&self.byte(0)?))
    }
}

/// An append-only list of deferred writes keyed by start offset.
///
/// Builders record what they will write without owning a destination
/// buffer; [`assemble`](PacketAssembler::assemble) materialises the final
/// buffer once every instruction is known. The assembler's `len` tracks
/// the high-water mark of all instructions, and an optional base offset
/// shifts every write (packet bodies build at the body offset without
/// knowing the header layout).
#[derive(Debug, Clone, Default)]
pub struct PacketAssembler {
    instructions: Vec<(usize, Vec<u8>)>,
    len: usize,
    offset: usize,
}

impl PacketAssembler {
    /// An empty assembler writing at offset 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty assembler whose writes are all shifted by `offset`.
    pub fn with_offset(offset: usize) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    /// The length of the assembled buffer: one past the highest written
    /// byte.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether any instruction has been recorded.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Record `bytes` for writing at relative offset `at`.
    pub fn put(&mut self, at: usize, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        let start = self.offset + at;
        self.len = self.len.max(start + bytes.len());
        self.instructions.push((start, bytes));
    }

    /// Record a single byte at relative offset `at`.
    pub fn put_u8(&mut self, at: usize, v: u8) {
        self.put(at, [v]);
    }

    /// Serialise `v` at relative offset `at`, returning its wire length.
    pub fn put_value(&mut self, at: usize, v: &Value) -> Result<usize, Error> {
        self.put(at, v.serialise()?);
        Ok(v.wire_len())
    }

    /// Serialise `v` immediately after the highest instruction so far.
    pub fn push_value(&mut self, v: &Value) -> Result<usize, Error> {
        let at = self.len.saturating_sub(self.offset);
        self.put_value(at, v)
    }

    /// Concatenate `other`'s instructions onto this assembler, lifting the
    /// length to the larger of the two.
    pub fn append(&mut self, other: Self) {
        self.instructions.extend(other.instructions);
        self.len = self.len.max(other.len);
    }

    /// Allocate a buffer of the final length and apply every instruction
    /// in insertion order.
    ///
    /// Assembly does not consume the assembler and yields the same bytes
    /// every time.
    pub fn assemble(&self) -> Vec<u8> {
        let mut buf = vec![0; self.len];
        for (start, bytes) in &self.instructions {
            buf[*start..*start + bytes.len()].copy_from_slice(bytes);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn test_byte_and_sub() {
        let raw = hex!("00 11 22 33 44");
        let r = ByteRange::new(&raw, 1, 3).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.byte(0).unwrap(), 0x11);
        assert_eq!(r.byte(2).unwrap(), 0x33);
        assert!(matches!(r.byte(3), Err(Error::TruncatedInput { .. })));

        let s = r.sub(1, 2).unwrap();
        assert_eq!(s.as_slice(), &hex!("22 33"));

        // Reads are windowed views; the parent range is untouched.
        assert_eq!(r.as_slice(), &hex!("11 22 33"));
    }

    #[test]
    fn test_to_end_extends_past_the_range() {
        let raw = hex!("00 11 22 33 44");
        let r = ByteRange::new(&raw, 1, 2).unwrap();
        assert_eq!(r.to_end().as_slice(), &hex!("11 22 33 44"));
    }

    #[test]
    fn test_to_null_excludes_terminator_by_default() {
        let raw = hex!("61 62 63 00 FF");
        let r = ByteRange::of(&raw);

        let (s, consumed) = r.to_null(false).unwrap();
        assert_eq!(s.as_slice(), b"abc");
        assert_eq!(consumed, 4);

        let (s, consumed) = r.to_null(true).unwrap();
        assert_eq!(s.as_slice(), &hex!("61 62 63 00"));
        assert_eq!(consumed, 4);

        // The consumed count lets the caller chain past the terminator.
        assert_eq!(r.from(consumed).unwrap().byte(0).unwrap(), 0xFF);
    }

    #[test]
    fn test_to_null_requires_a_terminator() {
        let raw = hex!("61 62");
        assert!(ByteRange::of(&raw).to_null(false).is_err());
    }

    #[test]
    fn test_masked_and_format() {
        let raw = hex!("8F 81");
        let r = ByteRange::of(&raw);
        assert_eq!(r.masked_with(0x7F), vec![0x0F, 0x01]);
        assert_eq!(r.format(|b| b.len()), 2);
    }

    #[test]
    fn test_map_every() {
        let raw = hex!("00 01 00 02 00 03");
        let r = ByteRange::of(&raw);
        let v = r
            .map_every(2, |s| match s.to_int()? {
                Value::Int16(v) => Ok(v),
                _ => unreachable!(),
            })
            .unwrap();
        assert_eq!(v, vec![1, 2, 3]);

        assert!(r.map_every(4, |_| Ok(())).is_err());
    }

    #[test]
    fn test_to_int_widths() {
        assert_eq!(
            ByteRange::of(&hex!("7F")).to_int().unwrap(),
            Value::UInt8(0x7F)
        );
        assert_eq!(
            ByteRange::of(&hex!("FF FE")).to_int().unwrap(),
            Value::Int16(-2)
        );
        assert_eq!(
            ByteRange::of(&hex!("00 00 00 2A")).to_int().unwrap(),
            Value::Int32(42)
        );
        assert!(ByteRange::of(&hex!("00 00 00")).to_int().is_err());
    }

    #[test]
    fn test_int32_array_and_bool() {
        let raw = hex!("00 00 00 01 FF FF FF FE");
        assert_eq!(
            ByteRange::of(&raw).to_int32_array().unwrap(),
            vec![1, -2]
        );
        assert!(ByteRange::of(&hex!("01")).to_bool().unwrap());
        assert!(!ByteRange::of(&hex!("00")).to_bool().unwrap());
    }

    #[test]
    fn test_strings() {
        let raw = hex!("61 62 00 63");
        let r = ByteRange::of(&raw);
        assert_eq!(r.to_string(Encoding::Ascii).unwrap(), "ab");
        // Raw decoding keeps every byte, nul included.
        assert_eq!(
            r.to_raw_string(Encoding::Ascii).unwrap(),
            "ab\0c"
        );
    }

    #[test]
    fn test_lookup_in() {
        let mut table = BTreeMap::new();
        table.insert(2u8, "two");

        let raw = hex!("02");
        assert_eq!(
            ByteRange::of(&raw).lookup_in(&table).unwrap(),
            Some(&"two")
        );
        let raw = hex!("03");
        assert_eq!(ByteRange::of(&raw).lookup_in(&table).unwrap(), None);
    }

    #[test]
    fn test_assembler_high_water_mark() {
        let mut a = PacketAssembler::new();
        a.put_u8(4, 0xAA);
        a.put(0, hex!("01 02"));
        assert_eq!(a.len(), 5);
        assert_eq!(a.assemble(), hex!("01 02 00 00 AA"));
    }

    #[test]
    fn test_assembler_insertion_order_wins() {
        let mut a = PacketAssembler::new();
        a.put(0, hex!("01 02 03"));
        a.put(1, hex!("FF"));
        assert_eq!(a.assemble(), hex!("01 FF 03"));
    }

    #[test]
    fn test_assembler_offset_and_append() {
        let mut body = PacketAssembler::with_offset(3);
        body.push_value(&Value::UInt8(0x11)).unwrap();
        body.push_value(&Value::Int16(0x2233)).unwrap();
        assert_eq!(body.len(), 6);

        let mut packet = PacketAssembler::new();
        packet.put(0, hex!("AA BB CC"));
        packet.append(body);
        assert_eq!(packet.len(), 6);
        assert_eq!(packet.assemble(), hex!("AA BB CC 11 22 33"));

        // Assembly is pure; a second call yields the same bytes.
        assert_eq!(packet.assemble(), hex!("AA BB CC 11 22 33"));
    }

    #[test]
    fn test_empty_body_assembler() {
        let body = PacketAssembler::with_offset(15);
        assert_eq!(body.len(), 0);
        assert!(body.assemble().is_empty());
    }
}
