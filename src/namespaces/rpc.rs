//! The `bcs.rpc` namespace: the device's RPC catalog meta-RPCs.

use std::{io::Cursor, rc::Rc};

use crate::registry::{generic_builder, BodyParser};
use crate::{
    Encoding, Method, NamespaceContribution, RpcEntry, RpcValueMap, TypeCode, Value,
};

/// The `bcs.rpc` contribution: `_rpc` (name enumeration) and `args`
/// (argument schema enumeration). Both take a namespace index and an RPC
/// index.
pub fn contribution() -> NamespaceContribution {
    NamespaceContribution::new("bcs.rpc")
        .rpc(
            "_rpc",
            RpcEntry::single(
                Method::Get,
                Method::Get,
                2,
                generic_builder(vec![TypeCode::UInt8, TypeCode::UInt8]),
                rpc_parser(),
            ),
        )
        .rpc(
            "args",
            RpcEntry::single(
                Method::Get,
                Method::Get,
                2,
                generic_builder(vec![TypeCode::UInt8, TypeCode::UInt8]),
                args_parser(),
            ),
        )
}

/// Reply body: namespace index, RPC index, the namespace's RPC count,
/// and the zero-padded four byte RPC name.
fn rpc_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("namespace_index", Value::UInt8(body.byte(0)?));
        map.insert("rpc_index", Value::UInt8(body.byte(1)?));
        map.insert("num_rpcs", Value::UInt8(body.byte(2)?));
        map.insert(
            "rpc_name",
            Value::Str(body.sub(3, 6)?.to_string(Encoding::Ascii)?),
        );
        Ok(map)
    })
}

/// Reply body: send method byte, length-prefixed send type codes, receive
/// method byte, length-prefixed receive type codes.
fn args_parser() -> BodyParser {
    Rc::new(|body| {
        let slice = body.as_slice();
        let mut c = Cursor::new(slice);

        let mut map = RpcValueMap::new();
        map.insert(
            "send_method",
            Value::from_cursor(TypeCode::UInt8, &mut c, Encoding::Ascii)?,
        );
        map.insert(
            "send_types",
            Value::from_cursor(TypeCode::ByteBuffer, &mut c, Encoding::Ascii)?,
        );
        map.insert(
            "recv_method",
            Value::from_cursor(TypeCode::UInt8, &mut c, Encoding::Ascii)?,
        );
        map.insert(
            "recv_types",
            Value::from_cursor(TypeCode::ByteBuffer, &mut c, Encoding::Ascii)?,
        );
        Ok(map)
    })
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::ByteRange;

    #[test]
    fn test_rpc_reply_parse() {
        let mut body = vec![2, 1, 5];
        body.extend_from_slice(b"_png");
        let map = rpc_parser()(ByteRange::of(&body)).unwrap();

        assert_eq!(map.get("namespace_index"), Some(&Value::UInt8(2)));
        assert_eq!(map.get("rpc_index"), Some(&Value::UInt8(1)));
        assert_eq!(map.get("num_rpcs"), Some(&Value::UInt8(5)));
        assert_eq!(map.get("rpc_name"), Some(&Value::Str("_png".to_owned())));
    }

    #[test]
    fn test_rpc_reply_strips_name_padding() {
        let body = hex!("00 00 01 69 6F 00 00");
        let map = rpc_parser()(ByteRange::of(&body)).unwrap();
        assert_eq!(map.get("rpc_name"), Some(&Value::Str("io".to_owned())));
    }

    #[test]
    fn test_args_reply_parse() {
        // get(uint8, int32) answered by post(bool).
        let body = hex!("10 02 08 20 20 01 2B");
        let map = args_parser()(ByteRange::of(&body)).unwrap();

        assert_eq!(map.get("send_method"), Some(&Value::UInt8(0x10)));
        assert_eq!(
            map.get("send_types"),
            Some(&Value::ByteBuffer(vec![8, 32]))
        );
        assert_eq!(map.get("recv_method"), Some(&Value::UInt8(0x20)));
        assert_eq!(map.get("recv_types"), Some(&Value::ByteBuffer(vec![43])));
    }

    #[test]
    fn test_args_reply_truncation() {
        let body = hex!("10 02 08");
        assert!(args_parser()(ByteRange::of(&body)).is_err());
    }
}
