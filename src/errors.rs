use thiserror::Error;

use crate::{Method, TypeCode};

/// Error types returned by this crate.
#[non_exhaustive]
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// A wire type code that is not part of the Bowler type set.
    #[error("unknown bowler type code {0}")]
    UnknownTypeCode(u8),

    /// The method byte is not one of the five Bowler methods.
    #[error("unknown bowler method byte {0:#04x}")]
    UnknownMethod(u8),

    /// A read ran past the end of the available bytes.
    ///
    /// `wanted` is the number of bytes the decoder needed, `available` the
    /// number it had left.
    #[error("truncated input (wanted {wanted} bytes, {available} available)")]
    TruncatedInput {
        /// Bytes the decoder needed to make progress.
        wanted: usize,

        /// Bytes remaining in the buffer.
        available: usize,
    },

    /// A value cannot be represented on the wire.
    ///
    /// Returned for length prefixes that would exceed 255, fixed-point
    /// values that scale outside the `i32` range, and byte regions whose
    /// width does not fit the requested conversion.
    #[error("value out of range: {0}")]
    ValueOutOfRange(&'static str),

    /// A positional argument does not match the type declared for it.
    #[error("type mismatch (wanted {wanted:?}, got {got})")]
    TypeMismatch {
        /// The wire type the builder declared for this position.
        wanted: TypeCode,

        /// Short name of the value variant actually supplied.
        got: &'static str,
    },

    /// String bytes are not valid in the requested encoding.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// The packet carries a protocol version other than 3.
    #[error("unsupported bowler protocol version {0}")]
    BadVersion(u8),

    /// The packet checksum does not match the header bytes.
    #[error("bad checksum (computed {wanted:#04x}, packet carries {got:#04x})")]
    BadChecksum {
        /// Checksum computed over the header bytes.
        wanted: u8,

        /// Checksum byte found in the packet.
        got: u8,
    },

    /// The namespace id in the packet header is not present in the id
    /// table.
    #[error("unknown namespace id {0}")]
    UnknownNamespaceId(u8),

    /// The buffer is shorter than the packet header claims.
    #[error("truncated packet (got {buffer_len} bytes, expected {expected})")]
    TruncatedPacket {
        /// The length of the buffer provided.
        buffer_len: usize,

        /// The length the header's size byte implies.
        expected: usize,
    },

    /// An RPC name is not exactly 1 to 4 ASCII bytes.
    #[error("bad rpc name {0:?}")]
    BadRpcName(String),

    /// A MAC address string is not six colon-separated hex octets.
    #[error("invalid mac address {0:?}")]
    InvalidMacAddress(String),

    /// A dotted namespace path does not resolve to a registry node.
    #[error("undefined namespace {0:?}")]
    UndefinedNamespace(String),

    /// The namespace exists but does not define the named RPC.
    #[error("undefined rpc {namespace}#{rpc}")]
    UndefinedRpc {
        /// The namespace that was resolved.
        namespace: String,

        /// The RPC name that was not found in it.
        rpc: String,
    },

    /// The RPC does not accept the requested send method.
    #[error("rpc {rpc:?} does not support method {method}")]
    UnsupportedMethod {
        /// The RPC name.
        rpc: String,

        /// The method the caller asked for.
        method: Method,
    },

    /// The RPC entry binds no methods at all and cannot be called.
    #[error("rpc {0:?} binds no methods")]
    EmptyRpcEntry(String),

    /// The number of positional arguments does not match the builder.
    #[error("rpc {rpc:?} takes {wanted} arguments, got {got}")]
    ArityMismatch {
        /// The RPC name.
        rpc: String,

        /// Arity declared by the body builder.
        wanted: usize,

        /// Number of arguments supplied.
        got: usize,
    },

    /// No response arrived for a correlated call before its deadline.
    #[error("timed out waiting for {key}")]
    Timeout {
        /// The event key the call was waiting on.
        key: String,
    },

    /// The transport failed; the device is unusable.
    #[error("transport closed")]
    TransportClosed,

    /// RPC discovery was requested but the device never advertised the
    /// `bcs.rpc` namespace.
    #[error("device does not support rpc introspection")]
    IntrospectionUnsupported,

    /// An introspection run was started while another was in flight.
    #[error("introspection already in flight")]
    IntrospectionBusy,

    /// An I/O error occurred when trying to parse the buffer.
    #[error("i/o error ({0:?}): {1}")]
    IOError(std::io::ErrorKind, String),
}

impl From<std::io::Error> for Error {
    fn from(v: std::io::Error) -> Self {
        Self::IOError(v.kind(), v.to_string())
    }
}
