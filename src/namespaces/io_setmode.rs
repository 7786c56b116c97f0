//! The `bcs.io.setmode` namespace: channel mode changes.

use std::rc::Rc;

use crate::registry::{generic_builder, BodyParser, MethodEntry};
use crate::{Method, NamespaceContribution, RpcEntry, RpcValueMap, TypeCode, Value};

/// The `bcs.io.setmode` contribution.
///
/// `schm` sets a channel's mode, with a flag selecting async value
/// pushes; `post` applies the mode, `critical` additionally demands an
/// acknowledgement before the device continues.
pub fn contribution() -> NamespaceContribution {
    NamespaceContribution::new("bcs.io.setmode").rpc(
        "schm",
        RpcEntry::multi(
            (
                Method::Post,
                MethodEntry::new(
                    Method::Post,
                    3,
                    generic_builder(vec![TypeCode::UInt8, TypeCode::UInt8, TypeCode::Bool]),
                    mode_ack_parser(),
                ),
            ),
            [(
                Method::Critical,
                MethodEntry::new(
                    Method::Critical,
                    3,
                    generic_builder(vec![TypeCode::UInt8, TypeCode::UInt8, TypeCode::Bool]),
                    mode_ack_parser(),
                ),
            )],
        ),
    )
}

/// A mode acknowledgement echoes the channel and mode, or carries
/// nothing.
fn mode_ack_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        if !body.is_empty() {
            map.insert("channel", Value::UInt8(body.byte(0)?));
            map.insert("mode", Value::UInt8(body.byte(1)?));
        }
        Ok(map)
    })
}
