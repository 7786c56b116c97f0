#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::print_stdout,
    missing_debug_implementations,
    unused_crate_dependencies,
    unreachable_pub,
    missing_docs
)]

mod errors;
pub use errors::Error;

mod value;
pub use value::{Encoding, TypeCode, Value};

mod range;
pub use range::{ByteRange, PacketAssembler};

mod packet;
pub use packet::{assemble, MacAddress, Method, Packet, PROTOCOL_VERSION};

mod framing;
pub use framing::FrameParser;

mod registry;
pub use registry::{
    empty_builder, empty_parser, generic_builder, generic_parser, BodyBuilder, BodyParser,
    MethodEntry, NamespaceContribution, NamespaceIdTable, NamespaceRegistry, RpcEntry,
    RpcValueMap,
};

mod dispatch;
pub use dispatch::{event_key, Continuation, Reply, Watcher};

mod transport;
pub use transport::Transport;

mod introspect;

mod device;
pub use device::{
    new_device, CommandHandle, Device, DeviceOptions, DoneCallback, PreparedCall, RpcHandle,
};

pub mod namespaces;

#[cfg(test)]
mod testutil;
