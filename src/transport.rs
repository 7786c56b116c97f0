//! The transport abstraction the device core consumes.
//!
//! The crate never opens a serial port itself. Hosts implement
//! [`Transport`] over their port (or a test double), hand it to
//! [`crate::new_device`], and feed the port's inbound bytes to
//! [`crate::Device::on_raw_chunk`] and its failures to
//! [`crate::Device::on_transport_error`].

use std::fmt;

use crate::Error;

/// A duplex byte channel to one physical device.
///
/// Writes must preserve ordering: the bytes of consecutive `write` calls
/// appear on the wire in call order. A `write` error is treated as fatal
/// by the device core.
pub trait Transport: fmt::Debug {
    /// Open the channel.
    fn open(&mut self) -> Result<(), Error>;

    /// Write one outbound packet's bytes.
    fn write(&mut self, bytes: &[u8]) -> Result<(), Error>;
}
