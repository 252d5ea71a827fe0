// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB bulk loopback device.
//!
//! The device shows up as a single vendor-class interface with a pair of
//! bulk endpoints. Every block the host sends to the OUT endpoint (0x01)
//! comes back on the IN endpoint (0x81) with each whole 32-bit word
//! bit-inverted.
//!
//! The crate is split along the line between "speaking USB" and "being this
//! device":
//!
//! - [`bus`] defines the protocol engine contract: configure/deconfigure
//!   endpoints, register for completions, non-blocking read/write, and a
//!   `poll` that drives everything else.
//! - [`descriptor`] is the static descriptor table and the GET_DESCRIPTOR
//!   resolver, [`control`] the standard control path built on it.
//! - [`device`] holds the configuration state machine and owns the
//!   [`transfer`] cycle, which applies the [`transform`] to every block.
//! - With the `rp2040` feature, [`rp2040`] implements the protocol engine on
//!   the RP2040's USB controller, driven by the firmware binary.
//!
//! A firmware main loop is nothing more than:
//!
//! ```ignore
//! let mut device = LoopbackDevice::new();
//! loop {
//!     device.service(&mut bus);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod bus;
pub mod control;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod transfer;
pub mod transform;
pub mod usb;

#[cfg(feature = "rp2040")]
pub mod rp2040;

#[cfg(test)]
mod sim;

pub use bus::{TransferEvent, UsbBus, UsbClass};
pub use device::{DeviceState, LoopbackDevice};
pub use error::{Result, UsbError};

/// Receive (OUT) endpoint address.
pub const RX_EP: u8 = usb::UsbDir::Out.endpoint(1);
/// Transmit (IN) endpoint address.
pub const TX_EP: u8 = usb::UsbDir::In.endpoint(1);

/// Maximum packet size of both bulk endpoints, and the size of a block.
pub const PACKET_SIZE: usize = 64;
/// Maximum packet size of EP0.
pub const EP0_PACKET_SIZE: usize = 8;

pub const INTERFACE_NUMBER: u8 = 0;
