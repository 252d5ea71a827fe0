// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the device logic and whatever actually speaks USB.
//!
//! A protocol engine ([`UsbBus`]) owns the peripheral: it handles bus reset,
//! addressing, PIDs and the EP0 plumbing, and exposes non-blocking endpoint
//! reads and writes. The device logic ([`UsbClass`]) is handed to
//! [`UsbBus::poll`], which calls back into it for control requests,
//! configuration changes and endpoint completions. Nothing here blocks.

use crate::error::Result;
use crate::usb::{UsbSetupPacket, UsbTransferType};

/// An endpoint finished a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferEvent {
    /// The packet claimed by an earlier `read` on this OUT endpoint is done.
    Received(u8),
    /// The packet queued by an earlier `write` on this IN endpoint has been
    /// collected by the host.
    Transmitted(u8),
}

impl TransferEvent {
    pub fn endpoint(self) -> u8 {
        match self {
            Self::Received(ep) | Self::Transmitted(ep) => ep,
        }
    }
}

pub trait UsbBus {
    /// Binds `ep` to hardware resources for the given transfer type and
    /// packet size.
    fn configure(&mut self, ep: u8, kind: UsbTransferType, max_packet_size: u16) -> Result<()>;

    /// Releases `ep`. Anything in flight on it is cancelled: armed buffers
    /// are taken back and completions not yet delivered are dropped.
    fn deconfigure(&mut self, ep: u8) -> Result<()>;

    /// Controls whether completions on `ep` are delivered to the class
    /// passed to [`poll`](Self::poll). Passing `false` clears the
    /// registration.
    fn register_callback(&mut self, ep: u8, enabled: bool) -> Result<()>;

    /// Copies a received packet into `buf`, returning its length, or
    /// `WouldBlock` if none is waiting. A successful read is followed by a
    /// [`TransferEvent::Received`] on a later poll.
    fn read(&mut self, ep: u8, buf: &mut [u8]) -> Result<usize>;

    /// Queues `buf` for transmission, returning the number of bytes queued,
    /// or `WouldBlock` if the endpoint still holds an earlier packet.
    fn write(&mut self, ep: u8, buf: &[u8]) -> Result<usize>;

    /// Advances pending hardware transactions, calling into `class` for
    /// control requests and for completions on registered endpoints.
    fn poll<C: UsbClass<Self>>(&mut self, class: &mut C)
    where
        Self: Sized;
}

/// Hooks a protocol engine calls while it is being polled.
pub trait UsbClass<B: UsbBus> {
    /// Looks up a descriptor for GET_DESCRIPTOR.
    fn get_descriptor(&self, descriptor_type: u8, index: u8) -> Result<&'static [u8]>;

    /// Handles a request the standard control path does not understand.
    /// An error stalls the request.
    fn control(&mut self, bus: &mut B, req: &UsbSetupPacket) -> Result<()>;

    /// SET_CONFIGURATION. An error stalls the request.
    fn set_configuration(&mut self, bus: &mut B, value: u8) -> Result<()>;

    /// Current configuration value, 0 when unconfigured.
    fn configuration(&self) -> u8;

    /// An endpoint with a registered callback finished a transaction.
    fn transfer_complete(&mut self, event: TransferEvent);

    /// The host reset the bus.
    fn reset(&mut self, bus: &mut B) {
        if let Err(e) = self.set_configuration(bus, 0) {
            log::warn!("deconfigure on bus reset failed: {}", e);
        }
    }
}
