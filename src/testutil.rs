//! Test doubles shared by the module tests.

use std::{cell::RefCell, rc::Rc};

use crate::packet::{self, BODY_OFFSET};
use crate::{Error, MacAddress, Method, PacketAssembler, Transport};

/// A transport that records every write and can be told to start
/// failing.
#[derive(Debug, Default)]
pub(crate) struct MockTransport {
    written: Rc<RefCell<Vec<Vec<u8>>>>,
    fail_writes: Rc<RefCell<bool>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A handle onto the recorded writes, usable after the transport is
    /// moved into a device.
    pub(crate) fn written(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        Rc::clone(&self.written)
    }

    /// A switch that makes every subsequent write fail.
    pub(crate) fn fail_switch(&self) -> Rc<RefCell<bool>> {
        Rc::clone(&self.fail_writes)
    }
}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if *self.fail_writes.borrow() {
            return Err(Error::IOError(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure".to_owned(),
            ));
        }
        self.written.borrow_mut().push(bytes.to_vec());
        Ok(())
    }
}

/// Assemble a device reply frame.
pub(crate) fn reply_frame(ns_id: u8, method: Method, rpc: &str, body_bytes: &[u8]) -> Vec<u8> {
    let mut body = PacketAssembler::with_offset(BODY_OFFSET);
    if !body_bytes.is_empty() {
        body.put(0, body_bytes.to_vec());
    }
    packet::assemble(MacAddress::BROADCAST, method, ns_id, rpc, &body)
        .expect("test frame assembly failed")
}
