// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standard control request handling shared by the protocol engines.

use num_traits::FromPrimitive;

use crate::bus::{UsbBus, UsbClass};
use crate::descriptor::{INTERNAL_SERIAL_INDEX, SERIAL_NUMBER};
use crate::usb::{RequestKind, UsbDescType, UsbDir, UsbSetupPacket, UsbSetupRequest};
use crate::EP0_PACKET_SIZE;

/// What the engine should do with the data and status stages of a control
/// transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Send this data on EP0 IN, then expect the host's zero-length status.
    Data(&'static [u8]),
    /// Send a single byte on EP0 IN.
    Byte(u8),
    /// Zero-length status packet on EP0 IN.
    Ack,
    /// Acknowledge, then switch to this address once the status stage is
    /// done.
    Address(u8),
    /// Refuse the request.
    Stall,
}

static STATUS: [u8; 2] = [0, 0];

/// The IN data stage of a control transfer, cut into EP0-sized packets.
///
/// If the answer is shorter than the host asked for and ends on a full
/// packet, the host cannot tell it is over, so a zero-length packet follows.
#[derive(Clone, Debug)]
pub struct DataStage {
    remaining: &'static [u8],
    zlp: bool,
}

impl DataStage {
    /// `requested` is the setup packet's wLength; `data` is already
    /// truncated to it.
    pub fn new(data: &'static [u8], requested: u16) -> Self {
        Self {
            remaining: data,
            zlp: data.len() < usize::from(requested) && data.len() % EP0_PACKET_SIZE == 0,
        }
    }

    /// The next packet to send, or `None` once the stage is complete.
    pub fn next_packet(&mut self) -> Option<&'static [u8]> {
        if !self.remaining.is_empty() {
            let n = self.remaining.len().min(EP0_PACKET_SIZE);
            let (packet, rest) = self.remaining.split_at(n);
            self.remaining = rest;
            Some(packet)
        } else if self.zlp {
            self.zlp = false;
            Some(&[])
        } else {
            None
        }
    }
}

/// Decides how to answer `setup`, calling into `class` where the device has
/// a say.
pub fn dispatch<B, C>(bus: &mut B, class: &mut C, setup: &UsbSetupPacket) -> Response
where
    B: UsbBus,
    C: UsbClass<B>,
{
    log::debug!(
        "setup: ty {:#04x} rq {:#04x} v {:#06x} i {:#06x} l {}",
        setup.request_type,
        setup.request,
        setup.value.get(),
        setup.index.get(),
        setup.length.get()
    );

    let standard = setup.kind() == Some(RequestKind::Standard);
    let request = if standard {
        UsbSetupRequest::from_u8(setup.request)
    } else {
        None
    };

    let response = match (setup.direction(), request) {
        (UsbDir::In, Some(UsbSetupRequest::GetDescriptor)) => {
            let (ty, index) = setup.descriptor_selector();
            let found = if ty == UsbDescType::String as u8 && index == INTERNAL_SERIAL_INDEX {
                Ok(&SERIAL_NUMBER[..])
            } else {
                class.get_descriptor(ty, index)
            };
            match found {
                Ok(bytes) => {
                    let len = bytes.len().min(usize::from(setup.length.get()));
                    Response::Data(&bytes[..len])
                }
                Err(_) => Response::Stall,
            }
        }
        (UsbDir::In, Some(UsbSetupRequest::GetConfiguration)) => {
            Response::Byte(class.configuration())
        }
        (UsbDir::In, Some(UsbSetupRequest::GetStatus)) => {
            let len = STATUS.len().min(usize::from(setup.length.get()));
            Response::Data(&STATUS[..len])
        }
        (UsbDir::Out, Some(UsbSetupRequest::SetAddress)) => {
            Response::Address((setup.value.get() & 0x7F) as u8)
        }
        (UsbDir::Out, Some(UsbSetupRequest::SetConfiguration)) => {
            match class.set_configuration(bus, setup.value.get() as u8) {
                Ok(()) => Response::Ack,
                Err(_) => Response::Stall,
            }
        }
        _ => match class.control(bus, setup) {
            Ok(()) => Response::Ack,
            Err(_) => Response::Stall,
        },
    };

    if response == Response::Stall {
        log::warn!(
            "stalling request {:#04x}/{:#04x}",
            setup.request_type,
            setup.request
        );
    }
    response
}
