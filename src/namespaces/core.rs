//! The `bcs.core` namespace: ping and namespace enumeration.

use std::rc::Rc;

use crate::registry::{empty_builder, empty_parser, generic_builder, BodyParser};
use crate::{
    Encoding, Error, Method, NamespaceContribution, RpcEntry, RpcValueMap, TypeCode, Value,
};

/// The `bcs.core` contribution: `_png` (ping) and `_nms` (namespace
/// enumeration).
pub fn contribution() -> NamespaceContribution {
    NamespaceContribution::new("bcs.core")
        .rpc(
            "_png",
            RpcEntry::single(Method::Get, Method::Get, 0, empty_builder(), empty_parser()),
        )
        .rpc(
            "_nms",
            RpcEntry::single(
                Method::Get,
                Method::Get,
                1,
                generic_builder(vec![TypeCode::UInt8]),
                nms_parser(),
            ),
        )
}

/// Reply body: a `"name;version"` composite terminated by a nul, then
/// the total namespace count.
fn nms_parser() -> BodyParser {
    Rc::new(|body| {
        let (composite, consumed) = body.to_null(false)?;
        let text = composite.to_raw_string(Encoding::Ascii)?;
        let (name, version) = text.split_once(';').ok_or(Error::ValueOutOfRange(
            "namespace reply carries no version separator",
        ))?;
        let count = body.byte(consumed)?;

        let mut map = RpcValueMap::new();
        map.insert("name", Value::Str(name.to_owned()));
        map.insert("version_str", Value::Str(version.to_owned()));
        map.insert("num_namespaces", Value::UInt8(count));
        Ok(map)
    })
}
