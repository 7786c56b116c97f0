//! The `bcs.io` namespace: channel values and modes.

use std::rc::Rc;

use crate::registry::{empty_builder, generic_builder, BodyParser, MethodEntry};
use crate::{Method, NamespaceContribution, RpcEntry, RpcValueMap, TypeCode, Value};

/// The `bcs.io` contribution.
///
/// `gchv` is multi-method: a `get` polls a channel, and the same parser
/// decodes the device's unsolicited `async` pushes for channels in an
/// async mode. `schv` writes a channel value as either `post` or
/// `critical`.
pub fn contribution() -> NamespaceContribution {
    NamespaceContribution::new("bcs.io")
        .rpc(
            "gchc",
            RpcEntry::single(
                Method::Get,
                Method::Get,
                0,
                empty_builder(),
                channel_count_parser(),
            ),
        )
        .rpc(
            "gchm",
            RpcEntry::single(
                Method::Get,
                Method::Get,
                1,
                generic_builder(vec![TypeCode::UInt8]),
                channel_mode_parser(),
            ),
        )
        .rpc(
            "gchv",
            RpcEntry::multi(
                (
                    Method::Get,
                    MethodEntry::new(
                        Method::Get,
                        1,
                        generic_builder(vec![TypeCode::UInt8]),
                        channel_value_parser(),
                    ),
                ),
                [(
                    Method::Async,
                    MethodEntry::new(
                        Method::Async,
                        1,
                        generic_builder(vec![TypeCode::UInt8]),
                        channel_value_parser(),
                    ),
                )],
            ),
        )
        .rpc(
            "schv",
            RpcEntry::multi(
                (
                    Method::Post,
                    MethodEntry::new(
                        Method::Post,
                        2,
                        generic_builder(vec![TypeCode::UInt8, TypeCode::Int32]),
                        set_value_parser(),
                    ),
                ),
                [(
                    Method::Critical,
                    MethodEntry::new(
                        Method::Critical,
                        2,
                        generic_builder(vec![TypeCode::UInt8, TypeCode::Int32]),
                        set_value_parser(),
                    ),
                )],
            ),
        )
}

/// Reply body: the channel count as a big-endian `Int32`.
fn channel_count_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("channel_count", body.sub(0, 3)?.to_int()?);
        Ok(map)
    })
}

/// Reply body: channel number, mode byte.
fn channel_mode_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("channel", Value::UInt8(body.byte(0)?));
        map.insert("mode", Value::UInt8(body.byte(1)?));
        Ok(map)
    })
}

/// Reply body: channel number, then the value as a big-endian `Int32`.
fn channel_value_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("channel", Value::UInt8(body.byte(0)?));
        map.insert("value", body.sub(1, 4)?.to_int()?);
        Ok(map)
    })
}

/// A set acknowledgement echoes the channel and value; some firmware
/// revisions acknowledge with an empty body.
fn set_value_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        if !body.is_empty() {
            map.insert("channel", Value::UInt8(body.byte(0)?));
            map.insert("value", body.sub(1, 4)?.to_int()?);
        }
        Ok(map)
    })
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::ByteRange;

    #[test]
    fn test_channel_value_parse() {
        let body = hex!("03 00 00 01 00");
        let map = channel_value_parser()(ByteRange::of(&body)).unwrap();
        assert_eq!(map.get("channel"), Some(&Value::UInt8(3)));
        assert_eq!(map.get("value"), Some(&Value::Int32(256)));
    }

    #[test]
    fn test_set_value_tolerates_an_empty_ack() {
        let map = set_value_parser()(ByteRange::of(&[])).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_gchv_is_multi_method() {
        let mut reg = crate::NamespaceRegistry::new();
        reg.import_namespace(contribution());

        let gchv = reg.rpc("bcs.io", "gchv").unwrap();
        assert!(gchv.is_multi());
        assert_eq!(gchv.send_methods(), vec![Method::Get, Method::Async]);

        let schv = reg.rpc("bcs.io", "schv").unwrap();
        assert_eq!(schv.send_methods(), vec![Method::Post, Method::Critical]);
    }

    #[test]
    fn test_channel_count_parse() {
        let body = hex!("00 00 00 18");
        let map = channel_count_parser()(ByteRange::of(&body)).unwrap();
        assert_eq!(map.get("channel_count"), Some(&Value::Int32(24)));
    }
}
