//! The Bowler packet codec.
//!
//! A packet is an 11-byte header, a 4-byte ASCII RPC name and an optional
//! body:
//!
//! | Offset   | Size | Field                                        |
//! |----------|------|----------------------------------------------|
//! | 0        | 1    | protocol version (3)                         |
//! | 1        | 6    | MAC address                                  |
//! | 7        | 1    | method byte                                  |
//! | 8        | 1    | direction (bit 7) \| namespace id (low 7)    |
//! | 9        | 1    | payload length (RPC name bytes + body)       |
//! | 10       | 1    | checksum over bytes 0..=9                    |
//! | 11..=14  | 4    | RPC name, ASCII, zero-padded                 |
//! | 15..     | ...  | body                                         |

use std::{fmt, str::FromStr};

use bytes::Bytes;

use crate::{Encoding, Error, NamespaceIdTable, PacketAssembler};

/// The only protocol version this crate speaks.
pub const PROTOCOL_VERSION: u8 = 3;

const METHOD_STATUS: u8 = 0x00;
const METHOD_GET: u8 = 0x10;
const METHOD_POST: u8 = 0x20;
const METHOD_CRITICAL: u8 = 0x30;
const METHOD_ASYNC: u8 = 0x40;

pub(crate) const HEADER_LEN: usize = 11;
pub(crate) const RPC_NAME_LEN: usize = 4;
pub(crate) const BODY_OFFSET: usize = HEADER_LEN + RPC_NAME_LEN;
pub(crate) const SIZE_OFFSET: usize = 9;
const CHECKSUM_OFFSET: usize = 10;
const MAC_OFFSET: usize = 1;
const METHOD_OFFSET: usize = 7;
const NAMESPACE_OFFSET: usize = 8;
const NAMESPACE_ID_MASK: u8 = 0x7F;

/// The Bowler method verbs, analogous to HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Method {
    /// Unsolicited device status.
    Status,
    /// Read a value.
    Get,
    /// Write a value.
    Post,
    /// Write a value that must be acknowledged.
    Critical,
    /// Unsolicited device push.
    Async,
}

impl Method {
    /// Map a wire method byte onto a `Method`.
    pub fn from_wire(v: u8) -> Result<Self, Error> {
        match v {
            METHOD_STATUS => Ok(Self::Status),
            METHOD_GET => Ok(Self::Get),
            METHOD_POST => Ok(Self::Post),
            METHOD_CRITICAL => Ok(Self::Critical),
            METHOD_ASYNC => Ok(Self::Async),
            v => Err(Error::UnknownMethod(v)),
        }
    }

    /// The wire byte for this method.
    pub fn as_wire(&self) -> u8 {
        match self {
            Self::Status => METHOD_STATUS,
            Self::Get => METHOD_GET,
            Self::Post => METHOD_POST,
            Self::Critical => METHOD_CRITICAL,
            Self::Async => METHOD_ASYNC,
        }
    }

    /// The lower-case name used in event keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Get => "get",
            Self::Post => "post",
            Self::Critical => "critical",
            Self::Async => "async",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A six-byte device MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The broadcast address, accepted by every device on the bus.
    pub const BROADCAST: Self = Self([0xFF; 6]);

    /// Construct from raw bytes.
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The address bytes.
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    /// Parse a colon-separated upper-hex address, e.g.
    /// `74:F7:26:00:00:01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for b in &mut bytes {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidMacAddress(s.to_owned()))?;
            *b = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidMacAddress(s.to_owned()))?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidMacAddress(s.to_owned()));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// The low byte of the sum of the ten header bytes before the checksum.
pub(crate) fn checksum(header: &[u8]) -> u8 {
    header[..CHECKSUM_OFFSET]
        .iter()
        .fold(0u32, |acc, &b| acc + u32::from(b)) as u8
}

/// A parsed Bowler packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    version: u8,
    mac: MacAddress,
    method: Method,
    namespace_id: u8,
    direction: u8,
    size: u8,
    crc: u8,
    rpc: String,
    namespace: String,
    body: Bytes,
}

impl Packet {
    /// Parse one complete framed packet.
    ///
    /// `frame` must contain exactly one packet (the framing parser emits
    /// these). The namespace id is resolved against `table`; packets
    /// naming an unknown id are rejected.
    pub fn parse(frame: &Bytes, table: &NamespaceIdTable) -> Result<Self, Error> {
        if frame.len() < BODY_OFFSET {
            return Err(Error::TruncatedPacket {
                buffer_len: frame.len(),
                expected: BODY_OFFSET,
            });
        }

        let version = frame[0];
        if version != PROTOCOL_VERSION {
            return Err(Error::BadVersion(version));
        }

        let size = frame[SIZE_OFFSET];
        if (size as usize) < RPC_NAME_LEN {
            return Err(Error::TruncatedPacket {
                buffer_len: frame.len(),
                expected: BODY_OFFSET,
            });
        }
        let expected = HEADER_LEN + size as usize;
        if frame.len() != expected {
            return Err(Error::TruncatedPacket {
                buffer_len: frame.len(),
                expected,
            });
        }

        let wanted = checksum(frame);
        let got = frame[CHECKSUM_OFFSET];
        if wanted != got {
            return Err(Error::BadChecksum { wanted, got });
        }

        let method = Method::from_wire(frame[METHOD_OFFSET])?;

        // Bit 7 of the namespace byte flags direction; the low seven bits
        // carry the id.
        let namespace_byte = frame[NAMESPACE_OFFSET];
        let direction = namespace_byte >> 7;
        let namespace_id = namespace_byte & NAMESPACE_ID_MASK;
        let namespace = table
            .name_of(namespace_id)
            .ok_or(Error::UnknownNamespaceId(namespace_id))?
            .to_owned();

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&frame[MAC_OFFSET..MAC_OFFSET + 6]);

        let name = &frame[HEADER_LEN..BODY_OFFSET];
        let name_len = name.iter().position(|&b| b == 0).unwrap_or(RPC_NAME_LEN);
        let rpc = Encoding::Ascii.decode(&name[..name_len])?;

        Ok(Self {
            version,
            mac: MacAddress(mac),
            method,
            namespace_id,
            direction,
            size,
            crc: got,
            rpc,
            namespace,
            body: frame.slice(BODY_OFFSET..),
        })
    }

    /// The protocol version byte (always 3).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// The device MAC address the packet names.
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// The method verb.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The namespace id (low seven bits of the namespace byte).
    pub fn namespace_id(&self) -> u8 {
        self.namespace_id
    }

    /// The direction flag (bit 7 of the namespace byte).
    pub fn direction(&self) -> u8 {
        self.direction
    }

    /// The payload length byte: RPC name bytes plus body length.
    pub fn size(&self) -> u8 {
        self.size
    }

    /// The checksum byte the packet carried.
    pub fn crc(&self) -> u8 {
        self.crc
    }

    /// The RPC name with trailing padding removed.
    pub fn rpc(&self) -> &str {
        &self.rpc
    }

    /// The dotted namespace name the id resolved to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The body bytes (possibly empty).
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Assemble a complete outbound packet.
///
/// `body` is the body builder's assembler, based at the body offset (15);
/// an empty assembler produces a bodiless packet. The direction bit is
/// zero for host-to-device traffic.
pub fn assemble(
    mac: MacAddress,
    method: Method,
    namespace_id: u8,
    rpc: &str,
    body: &PacketAssembler,
) -> Result<Vec<u8>, Error> {
    if rpc.is_empty() || rpc.len() > RPC_NAME_LEN || !rpc.is_ascii() {
        return Err(Error::BadRpcName(rpc.to_owned()));
    }

    let body_len = body.len().saturating_sub(BODY_OFFSET);
    let size = RPC_NAME_LEN + body_len;
    let size = u8::try_from(size)
        .map_err(|_| Error::ValueOutOfRange("packet payload exceeds 255 bytes"))?;

    let namespace_byte = namespace_id & NAMESPACE_ID_MASK;

    let mut packet = PacketAssembler::new();
    packet.put_u8(0, PROTOCOL_VERSION);
    packet.put(MAC_OFFSET, mac.0);
    packet.put_u8(METHOD_OFFSET, method.as_wire());
    packet.put_u8(NAMESPACE_OFFSET, namespace_byte);
    packet.put_u8(SIZE_OFFSET, size);

    // The checksum covers bytes 0..=9, all of which are now known.
    let sum = u32::from(PROTOCOL_VERSION)
        + mac.0.iter().map(|&b| u32::from(b)).sum::<u32>()
        + u32::from(method.as_wire())
        + u32::from(namespace_byte)
        + u32::from(size);
    packet.put_u8(CHECKSUM_OFFSET, sum as u8);

    let mut name = [0u8; RPC_NAME_LEN];
    name[..rpc.len()].copy_from_slice(rpc.as_bytes());
    packet.put(HEADER_LEN, name);

    packet.append(body.clone());
    Ok(packet.assemble())
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::Value;

    // A broadcast `bcs.core._png` get request. The checksum is the low
    // byte of 0x03 + 6 * 0xFF + 0x10 + 0x00 + 0x04 = 0x611.
    const PING: [u8; 15] = hex!("03 FFFFFFFFFFFF 10 00 04 11 5F706E67");

    #[test]
    fn test_parse_ping() {
        let table = NamespaceIdTable::new();
        let p = Packet::parse(&Bytes::copy_from_slice(&PING), &table).unwrap();

        assert_eq!(p.version(), 3);
        assert_eq!(p.mac(), MacAddress::BROADCAST);
        assert_eq!(p.method(), Method::Get);
        assert_eq!(p.namespace_id(), 0);
        assert_eq!(p.direction(), 0);
        assert_eq!(p.namespace(), "bcs.core");
        assert_eq!(p.size(), 4);
        assert_eq!(p.rpc(), "_png");
        assert!(p.body().is_empty());
    }

    #[test]
    fn test_assemble_ping() {
        let body = PacketAssembler::with_offset(BODY_OFFSET);
        let buf = assemble(MacAddress::BROADCAST, Method::Get, 0, "_png", &body).unwrap();
        assert_eq!(buf.as_slice(), PING.as_ref());
    }

    #[test]
    fn test_assemble_with_body() {
        let mut body = PacketAssembler::with_offset(BODY_OFFSET);
        body.push_value(&Value::Bool(true)).unwrap();

        let buf = assemble(MacAddress::BROADCAST, Method::Critical, 5, "_pwr", &body).unwrap();
        assert_eq!(buf[7], 0x30);
        assert_eq!(buf[8], 5);
        assert_eq!(buf[9], 5); // 4 name bytes + 1 body byte
        assert_eq!(buf[15], 0x01);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[10], checksum(&buf));
    }

    #[test]
    fn test_short_rpc_name_is_zero_padded() {
        let table = NamespaceIdTable::new();
        let body = PacketAssembler::with_offset(BODY_OFFSET);
        let buf = assemble(MacAddress::BROADCAST, Method::Get, 0, "io", &body).unwrap();
        assert_eq!(&buf[11..15], &hex!("69 6F 00 00"));

        let p = Packet::parse(&Bytes::from(buf), &table).unwrap();
        assert_eq!(p.rpc(), "io");
    }

    #[test]
    fn test_overlong_rpc_name_rejected() {
        let body = PacketAssembler::with_offset(BODY_OFFSET);
        let err =
            assemble(MacAddress::BROADCAST, Method::Get, 0, "_pingx", &body).unwrap_err();
        assert_eq!(err, Error::BadRpcName("_pingx".to_owned()));
    }

    #[test]
    fn test_parse_rejects_bad_version() {
        let mut raw = PING;
        raw[0] = 2;
        let err = Packet::parse(&Bytes::copy_from_slice(&raw), &NamespaceIdTable::new())
            .unwrap_err();
        assert_eq!(err, Error::BadVersion(2));
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut raw = PING;
        raw[10] = raw[10].wrapping_add(1);
        let err = Packet::parse(&Bytes::copy_from_slice(&raw), &NamespaceIdTable::new())
            .unwrap_err();
        assert_eq!(
            err,
            Error::BadChecksum {
                wanted: 0x11,
                got: 0x12
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_namespace_id() {
        let body = PacketAssembler::with_offset(BODY_OFFSET);
        let buf = assemble(MacAddress::BROADCAST, Method::Get, 9, "_png", &body).unwrap();
        let err =
            Packet::parse(&Bytes::from(buf), &NamespaceIdTable::new()).unwrap_err();
        assert_eq!(err, Error::UnknownNamespaceId(9));
    }

    #[test]
    fn test_parse_rejects_truncated_packet() {
        let err = Packet::parse(
            &Bytes::copy_from_slice(&PING[..12]),
            &NamespaceIdTable::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            Error::TruncatedPacket {
                buffer_len: 12,
                expected: 15
            }
        );
    }

    #[test]
    fn test_direction_bit() {
        let mut raw = PING;
        raw[8] = 0x80;
        raw[10] = checksum(&raw);
        let p = Packet::parse(&Bytes::copy_from_slice(&raw), &NamespaceIdTable::new())
            .unwrap();
        assert_eq!(p.direction(), 1);
        assert_eq!(p.namespace_id(), 0);
    }

    #[test]
    fn test_mac_address_string_form() {
        let mac: MacAddress = "74:F7:26:00:00:01".parse().unwrap();
        assert_eq!(mac.as_bytes(), &[0x74, 0xF7, 0x26, 0x00, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "74:F7:26:00:00:01");
        assert_eq!(MacAddress::BROADCAST.to_string(), "FF:FF:FF:FF:FF:FF");

        assert!("74:F7:26".parse::<MacAddress>().is_err());
        assert!("74:F7:26:00:00:01:02".parse::<MacAddress>().is_err());
        assert!("74:F7:26:00:00:GG".parse::<MacAddress>().is_err());
    }

    #[test]
    fn test_parse_assemble_idempotence() {
        let table = NamespaceIdTable::new();

        let mut body = PacketAssembler::with_offset(BODY_OFFSET);
        body.push_value(&Value::UInt8(7)).unwrap();
        let buf = assemble(MacAddress::BROADCAST, Method::Get, 0, "_nms", &body).unwrap();

        let first = Packet::parse(&Bytes::from(buf), &table).unwrap();

        let mut rebuilt_body = PacketAssembler::with_offset(BODY_OFFSET);
        rebuilt_body.put(0, first.body().to_vec());
        let rebuilt = assemble(
            first.mac(),
            first.method(),
            first.namespace_id(),
            first.rpc(),
            &rebuilt_body,
        )
        .unwrap();

        let second = Packet::parse(&Bytes::from(rebuilt), &table).unwrap();
        assert_eq!(first, second);
    }
}
