//! The `bcs.pid` namespace: on-device PID control groups.

use std::rc::Rc;

use crate::registry::{empty_parser, generic_builder, BodyParser, MethodEntry};
use crate::{Method, NamespaceContribution, RpcEntry, RpcValueMap, TypeCode, Value};

/// The `bcs.pid` contribution.
///
/// Gains travel as two-place fixed-point values. `apid` takes its
/// setpoint block as a length-prefixed byte array (wire code 37); a
/// device advertising code 38 for it is picked up by RPC introspection
/// instead.
pub fn contribution() -> NamespaceContribution {
    NamespaceContribution::new("bcs.pid")
        .rpc(
            "apid",
            RpcEntry::single(
                Method::Critical,
                Method::Critical,
                1,
                generic_builder(vec![TypeCode::UInt8Array]),
                empty_parser(),
            ),
        )
        .rpc(
            "cpid",
            RpcEntry::single(
                Method::Post,
                Method::Post,
                4,
                generic_builder(vec![
                    TypeCode::UInt8,
                    TypeCode::FixedPointTwoPlaces,
                    TypeCode::FixedPointTwoPlaces,
                    TypeCode::FixedPointTwoPlaces,
                ]),
                empty_parser(),
            ),
        )
        .rpc(
            "_pid",
            RpcEntry::multi(
                (
                    Method::Get,
                    MethodEntry::new(
                        Method::Get,
                        1,
                        generic_builder(vec![TypeCode::UInt8]),
                        pid_value_parser(),
                    ),
                ),
                [(
                    Method::Async,
                    MethodEntry::new(
                        Method::Async,
                        1,
                        generic_builder(vec![TypeCode::UInt8]),
                        pid_value_parser(),
                    ),
                )],
            ),
        )
        .rpc(
            "rpid",
            RpcEntry::single(
                Method::Post,
                Method::Post,
                2,
                generic_builder(vec![TypeCode::UInt8, TypeCode::Int32]),
                empty_parser(),
            ),
        )
}

/// Reply body: control group, then its position as a big-endian `Int32`.
fn pid_value_parser() -> BodyParser {
    Rc::new(|body| {
        let mut map = RpcValueMap::new();
        map.insert("group", Value::UInt8(body.byte(0)?));
        map.insert("position", body.sub(1, 4)?.to_int()?);
        Ok(map)
    })
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::{ByteRange, PacketAssembler};

    #[test]
    fn test_cpid_scales_gains_by_one_hundred() {
        let builder = generic_builder(vec![
            TypeCode::UInt8,
            TypeCode::FixedPointTwoPlaces,
            TypeCode::FixedPointTwoPlaces,
            TypeCode::FixedPointTwoPlaces,
        ]);
        let mut asm = PacketAssembler::new();
        builder(
            &mut asm,
            &[
                Value::UInt8(0),
                Value::FixedPoint2(1.5),
                Value::FixedPoint2(0.25),
                Value::FixedPoint2(-0.01),
            ],
        )
        .unwrap();
        assert_eq!(
            asm.assemble(),
            hex!("00 00000096 00000019 FFFFFFFF")
        );
    }

    #[test]
    fn test_pid_value_parse() {
        let body = hex!("02 00 00 04 00");
        let map = pid_value_parser()(ByteRange::of(&body)).unwrap();
        assert_eq!(map.get("group"), Some(&Value::UInt8(2)));
        assert_eq!(map.get("position"), Some(&Value::Int32(1024)));
    }

    #[test]
    fn test_apid_accepts_a_buffer_setpoint_block() {
        let c = contribution();
        assert_eq!(c.root(), "bcs.pid");

        let builder = generic_builder(vec![TypeCode::UInt8Array]);
        let mut asm = PacketAssembler::new();
        builder(&mut asm, &[Value::UInt8Array(vec![1, 2, 3, 4])]).unwrap();
        assert_eq!(asm.assemble(), hex!("04 01 02 03 04"));
    }
}
