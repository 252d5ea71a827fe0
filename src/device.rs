// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The loopback device: configuration handling plus the transfer cycle,
//! presented to a protocol engine as one [`UsbClass`].

use crate::bus::{TransferEvent, UsbBus, UsbClass};
use crate::descriptor::{self, CONFIGURATION_VALUE};
use crate::error::{Result, UsbError};
use crate::transfer::{Stage, Transfer};
use crate::usb::{Recipient, RequestKind, UsbSetupPacket, UsbTransferType};
use crate::{INTERFACE_NUMBER, PACKET_SIZE, RX_EP, TX_EP};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Unconfigured,
    Configured,
}

pub struct LoopbackDevice {
    state: DeviceState,
    transfer: Transfer,
}

impl LoopbackDevice {
    pub const fn new() -> Self {
        Self {
            state: DeviceState::Unconfigured,
            transfer: Transfer::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.state == DeviceState::Configured
    }

    pub fn configuration_value(&self) -> u8 {
        match self.state {
            DeviceState::Unconfigured => 0,
            DeviceState::Configured => CONFIGURATION_VALUE,
        }
    }

    #[cfg(test)]
    pub(crate) fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// (receive, transmit) stages of the transfer cycle.
    pub fn stages(&self) -> (Stage, Stage) {
        self.transfer.stages()
    }

    /// One pass of the main loop: read if a read is due, let the engine make
    /// progress (which may deliver completions), then write if a write is
    /// due.
    pub fn service<B: UsbBus>(&mut self, bus: &mut B) {
        self.transfer.submit_read(bus);
        bus.poll(self);
        self.transfer.submit_write(bus);
    }

    fn configure_endpoints<B: UsbBus>(&mut self, bus: &mut B) -> Result<()> {
        bus.configure(RX_EP, UsbTransferType::Bulk, PACKET_SIZE as u16)?;
        let bound = bus
            .configure(TX_EP, UsbTransferType::Bulk, PACKET_SIZE as u16)
            .and_then(|()| bus.register_callback(RX_EP, true))
            .and_then(|()| bus.register_callback(TX_EP, true));
        if let Err(e) = bound {
            log::warn!("endpoint setup failed: {}", e);
            // Leaves the state as it was: unconfigured, nothing bound.
            if let Err(re) = self.release_endpoints(bus) {
                log::warn!("rollback incomplete: {}", re);
            }
            return Err(e);
        }
        self.transfer.arm();
        self.state = DeviceState::Configured;
        Ok(())
    }

    fn deconfigure_endpoints<B: UsbBus>(&mut self, bus: &mut B) -> Result<()> {
        let result = self.release_endpoints(bus);
        self.state = DeviceState::Unconfigured;
        result
    }

    /// Endpoints go first so nothing can complete against a half torn down
    /// endpoint once its callback is gone. Unregistering is best effort; the
    /// first deconfigure error is returned.
    fn release_endpoints<B: UsbBus>(&mut self, bus: &mut B) -> Result<()> {
        let tx = bus.deconfigure(TX_EP);
        let rx = bus.deconfigure(RX_EP);
        for ep in [RX_EP, TX_EP] {
            if let Err(e) = bus.register_callback(ep, false) {
                log::warn!("unregister {:#04x} failed: {}", ep, e);
            }
        }
        self.transfer.halt();
        tx.and(rx)
    }
}

impl Default for LoopbackDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: UsbBus> UsbClass<B> for LoopbackDevice {
    fn get_descriptor(&self, descriptor_type: u8, index: u8) -> Result<&'static [u8]> {
        descriptor::resolve(descriptor_type, index)
    }

    fn control(&mut self, _bus: &mut B, req: &UsbSetupPacket) -> Result<()> {
        if req.recipient() == Some(Recipient::Interface)
            && req.kind() == Some(RequestKind::Class)
            && req.index.get() == u16::from(INTERFACE_NUMBER)
        {
            // No class requests are defined for this interface yet.
            log::debug!("class request {:#04x} not handled", req.request);
        }
        Err(UsbError::Stall)
    }

    fn set_configuration(&mut self, bus: &mut B, value: u8) -> Result<()> {
        match value {
            0 => {
                if self.state == DeviceState::Configured {
                    log::info!("deconfiguring");
                    self.deconfigure_endpoints(bus)?;
                }
                Ok(())
            }
            CONFIGURATION_VALUE => {
                if self.state == DeviceState::Configured {
                    // Selecting the current configuration again restarts it.
                    self.deconfigure_endpoints(bus)?;
                }
                self.configure_endpoints(bus)?;
                log::info!("configured");
                Ok(())
            }
            other => {
                log::warn!("unsupported configuration {}", other);
                Err(UsbError::Stall)
            }
        }
    }

    fn configuration(&self) -> u8 {
        self.configuration_value()
    }

    fn transfer_complete(&mut self, event: TransferEvent) {
        self.transfer.complete(event);
    }
}
