//! The `neuronrobotics.dyio` namespace: DyIO device state.

use std::rc::Rc;

use crate::registry::{empty_builder, empty_parser, generic_builder, BodyParser, MethodEntry};
use crate::{Encoding, Method, NamespaceContribution, RpcEntry, RpcValueMap, TypeCode, Value};

/// The `neuronrobotics.dyio` contribution.
///
/// `_pwr` is multi-method: a `get` reads the power state of both banks,
/// a `critical` with a single boolean forces the brown-out override.
pub fn contribution() -> NamespaceContribution {
    NamespaceContribution::new("neuronrobotics.dyio")
        .rpc(
            "_pwr",
            RpcEntry::multi(
                (
                    Method::Get,
                    MethodEntry::new(Method::Get, 0, empty_builder(), power_parser()),
                ),
                [(
                    Method::Critical,
                    MethodEntry::new(
                        Method::Critical,
                        1,
                        generic_builder(vec![TypeCode::Bool]),
                        empty_parser(),
                    ),
                )],
            ),
        )
        .rpc(
            "_rev",
            RpcEntry::single(Method::Get, Method::Get, 0, empty_builder(), revision_parser()),
        )
        .rpc(
            "info",
            RpcEntry::single(Method::Get, Method::Get, 0, empty_builder(), info_parser()),
        )
}

/// Reply body: bank A state, bank B state, brown-out override flag.
fn power_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("bank_a", Value::UInt8(body.byte(0)?));
        map.insert("bank_b", Value::UInt8(body.byte(1)?));
        map.insert("override", Value::Bool(body.byte(2)? != 0));
        Ok(map)
    })
}

/// Reply body: protocol major and minor, then the firmware build as a
/// big-endian `Int32`.
fn revision_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("major", Value::UInt8(body.byte(0)?));
        map.insert("minor", Value::UInt8(body.byte(1)?));
        map.insert("build", body.sub(2, 5)?.to_int()?);
        Ok(map)
    })
}

/// Reply body: a zero-padded device info string.
fn info_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("info", Value::Str(body.to_string(Encoding::Ascii)?));
        Ok(map)
    })
}
