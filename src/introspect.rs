//! Runtime discovery of the device's namespace and RPC catalog.
//!
//! Discovery is a cooperative chain of request/response steps: each step
//! issues one meta-RPC and resumes from its reply continuation, so the
//! owning task is never blocked between round trips. `bcs.core._nms`
//! enumerates namespaces; `bcs.rpc._rpc` and `bcs.rpc.args` enumerate
//! each namespace's RPCs and their argument schemas, from which generic
//! builders and parsers are synthesised for any RPC the host has no
//! hand-written binding for.

use std::rc::Rc;

use crate::{
    registry::{generic_builder, generic_parser, MethodEntry},
    Device, DoneCallback, Error, Method, RpcValueMap, TypeCode, Value,
};

/// Start namespace discovery; `done` resolves when the id table holds
/// every namespace the device reports.
///
/// Only one discovery run may be in flight at a time.
pub(crate) fn run_namespaces(dev: &mut Device, done: DoneCallback) {
    if dev.introspection_active {
        done(dev, Err(Error::IntrospectionBusy));
        return;
    }
    dev.introspection_active = true;
    namespace_step(dev, 0, done);
}

/// Start RPC discovery across every namespace in the id table.
pub(crate) fn run_rpcs(dev: &mut Device, done: DoneCallback) {
    if dev.introspection_active {
        done(dev, Err(Error::IntrospectionBusy));
        return;
    }
    if dev.ids_mut().id_of("bcs.rpc").is_none() {
        done(dev, Err(Error::IntrospectionUnsupported));
        return;
    }

    dev.introspection_active = true;
    let list: Rc<Vec<(u8, String)>> = Rc::new(
        dev.namespace_ids()
            .iter()
            .map(|(id, name)| (id, name.to_owned()))
            .collect(),
    );
    rpc_step(dev, list, 0, 0, done);
}

fn finish(dev: &mut Device, done: DoneCallback, res: Result<(), Error>) {
    dev.introspection_active = false;
    done(dev, res);
}

fn namespace_step(dev: &mut Device, index: u8, done: DoneCallback) {
    dev.call(
        "bcs.core",
        "_nms",
        Some(Method::Get),
        &[Value::UInt8(index)],
        Box::new(move |dev, res| {
            let reply = match res {
                Ok(r) => r,
                Err(e) => return finish(dev, done, Err(e)),
            };

            let parsed = (|| {
                let name = expect_str(reply.values(), "name")?;
                let count = expect_u8(reply.values(), "num_namespaces")?;
                Ok::<_, Error>((name, count))
            })();

            match parsed {
                Err(e) => finish(dev, done, Err(e)),
                Ok((name, count)) => {
                    dev.ids_mut().insert(index, &name);
                    let next = index + 1;
                    if next < count {
                        namespace_step(dev, next, done);
                    } else {
                        finish(dev, done, Ok(()));
                    }
                }
            }
        }),
    );
}

fn rpc_step(
    dev: &mut Device,
    list: Rc<Vec<(u8, String)>>,
    ns_pos: usize,
    rpc_index: u8,
    done: DoneCallback,
) {
    let Some((ns_id, ns_name)) = list.get(ns_pos).cloned() else {
        finish(dev, done, Ok(()));
        return;
    };

    dev.call(
        "bcs.rpc",
        "_rpc",
        Some(Method::Get),
        &[Value::UInt8(ns_id), Value::UInt8(rpc_index)],
        Box::new(move |dev, res| {
            let reply = match res {
                Ok(r) => r,
                Err(e) => return finish(dev, done, Err(e)),
            };

            let parsed = (|| {
                let count = expect_u8(reply.values(), "num_rpcs")?;
                let name = expect_str(reply.values(), "rpc_name")?;
                Ok::<_, Error>((count, name))
            })();

            match parsed {
                Err(e) => finish(dev, done, Err(e)),
                Ok((count, rpc_name)) => {
                    if count == 0 || rpc_index >= count {
                        rpc_step(dev, list, ns_pos + 1, 0, done);
                    } else {
                        args_step(
                            dev, list, ns_pos, rpc_index, count, ns_id, ns_name, rpc_name, done,
                        );
                    }
                }
            }
        }),
    );
}

#[allow(clippy::too_many_arguments)]
fn args_step(
    dev: &mut Device,
    list: Rc<Vec<(u8, String)>>,
    ns_pos: usize,
    rpc_index: u8,
    count: u8,
    ns_id: u8,
    ns_name: String,
    rpc_name: String,
    done: DoneCallback,
) {
    dev.call(
        "bcs.rpc",
        "args",
        Some(Method::Get),
        &[Value::UInt8(ns_id), Value::UInt8(rpc_index)],
        Box::new(move |dev, res| {
            let reply = match res {
                Ok(r) => r,
                Err(e) => return finish(dev, done, Err(e)),
            };

            match apply_schema(dev, &ns_name, &rpc_name, reply.values()) {
                Err(e) => finish(dev, done, Err(e)),
                Ok(()) => {
                    let next = rpc_index + 1;
                    if next < count {
                        rpc_step(dev, list, ns_pos, next, done);
                    } else {
                        rpc_step(dev, list, ns_pos + 1, 0, done);
                    }
                }
            }
        }),
    );
}

/// Graft one discovered RPC schema onto the registry.
///
/// An RPC already bound for the discovered send method keeps its
/// hand-written binding; a new method on a known RPC promotes the entry
/// to the multi-method form.
fn apply_schema(
    dev: &mut Device,
    namespace: &str,
    rpc: &str,
    values: &RpcValueMap,
) -> Result<(), Error> {
    let send = Method::from_wire(expect_u8(values, "send_method")?)?;
    let recv = Method::from_wire(expect_u8(values, "recv_method")?)?;
    let send_types = type_list(expect_bytes(values, "send_types")?)?;
    let recv_types = type_list(expect_bytes(values, "recv_types")?)?;

    let arity = send_types.len();
    let entry = MethodEntry::new(
        recv,
        arity,
        generic_builder(send_types),
        generic_parser(recv_types),
    );
    dev.registry_mut().augment_rpc(namespace, rpc, send, entry);
    Ok(())
}

fn type_list(codes: Vec<u8>) -> Result<Vec<TypeCode>, Error> {
    codes.into_iter().map(TypeCode::from_code).collect()
}

fn expect_str(values: &RpcValueMap, field: &str) -> Result<String, Error> {
    match values.get(field) {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(Error::ValueOutOfRange(
            "introspection reply is missing a string field",
        )),
    }
}

fn expect_u8(values: &RpcValueMap, field: &str) -> Result<u8, Error> {
    match values.get(field) {
        Some(Value::UInt8(v)) => Ok(*v),
        _ => Err(Error::ValueOutOfRange(
            "introspection reply is missing a byte field",
        )),
    }
}

fn expect_bytes(values: &RpcValueMap, field: &str) -> Result<Vec<u8>, Error> {
    match values.get(field) {
        Some(Value::ByteBuffer(b) | Value::UInt8Array(b)) => Ok(b.clone()),
        _ => Err(Error::ValueOutOfRange(
            "introspection reply is missing a buffer field",
        )),
    }
}
