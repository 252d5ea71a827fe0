// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Protocol engine for the RP2040 USB controller.
//!
//! This drives the controller directly through `rp2040_pac`, polled, with no
//! interrupts. Each endpoint gets one 64-byte buffer in USB DPRAM at a fixed
//! offset, and the engine keeps track of DATA0/DATA1 per endpoint itself.
//!
//! Buffer control registers, buffer status bits and our per-endpoint slots
//! all share one numbering: `2 * endpoint_number + (1 if OUT else 0)`, so
//! EP0 IN is 0, EP0 OUT is 1, EP1 IN is 2, EP1 OUT is 3, and so on.
//!
//! # A note on `unsafe`
//!
//! As in the rest of the firmware, most `unsafe` here is `rp2040_pac`
//! insisting that raw register writes are unsafe; those are not commented.
//! The rest is access to endpoint buffers in DPRAM, which is commented where
//! it happens.

use rp2040_pac::{RESETS, SIO, USBCTRL_DPRAM, USBCTRL_REGS};
use zerocopy::FromBytes;

use crate::bus::{TransferEvent, UsbBus, UsbClass};
use crate::control::{self, DataStage, Response};
use crate::error::{Result, UsbError};
use crate::usb::{endpoint_number, UsbDir, UsbSetupPacket, UsbTransferType};

/// Offset of the EP0 buffer (shared by IN and OUT) from the base of DPRAM.
const EP0_BUFFER_OFFSET: usize = 0x100;
/// Offset of the first data buffer for endpoints 1..15.
const DATA_BUFFER_OFFSET: usize = 0x180;
const DATA_BUFFER_SIZE: usize = 64;
const SLOTS: usize = 32;

/// Endpoint state tracked by the engine.
#[derive(Copy, Clone, Default)]
struct Slot {
    configured: bool,
    registered: bool,
    max_packet_size: u16,
    /// If `true`, the next packet on this endpoint uses DATA1.
    next_pid_1: bool,
    /// OUT: length of a packet the hardware has handed back but nobody has
    /// read yet.
    received: Option<u16>,
    /// IN: a packet is armed and the host has not collected it.
    busy: bool,
    /// A completion is owed to the class on the next delivery pass.
    owed: bool,
}

/// GPIO pins raised while the engine handles a particular kind of event, so
/// the flow can be watched on a logic analyzer. The pins must already be
/// configured as SIO outputs.
#[derive(Copy, Clone, Debug)]
pub struct ActivityPins {
    pub setup: u8,
    pub buffer: u8,
    pub reset: u8,
}

pub struct Rp2040Bus {
    regs: USBCTRL_REGS,
    dpram: USBCTRL_DPRAM,
    slots: [Slot; SLOTS],
    /// SET_ADDRESS has to be acknowledged from the old address; the new one
    /// is applied once the status stage goes out.
    new_address: Option<u8>,
    /// Rest of an EP0 IN data stage that did not fit in one packet.
    data_stage: Option<DataStage>,
    pins: Option<ActivityPins>,
}

const fn slot_index(ep: u8) -> usize {
    let out = match UsbDir::of_endpoint_addr(ep) {
        UsbDir::Out => 1,
        UsbDir::In => 0,
    };
    endpoint_number(ep) as usize * 2 + out
}

/// Index into `ep_control`, which has no entries for EP0.
const fn endpoint_control_index(slot: usize) -> usize {
    slot - 2
}

const fn buffer_offset(slot: usize) -> usize {
    if slot < 2 {
        EP0_BUFFER_OFFSET
    } else {
        DATA_BUFFER_OFFSET + (slot - 2) * DATA_BUFFER_SIZE
    }
}

fn slot_event(slot: usize) -> TransferEvent {
    let num = (slot >> 1) as u8;
    if slot & 1 == 0 {
        TransferEvent::Transmitted(UsbDir::In.endpoint(num))
    } else {
        TransferEvent::Received(UsbDir::Out.endpoint(num))
    }
}

impl Rp2040Bus {
    /// Takes the controller out of reset and sets it up in device mode. The
    /// 48MHz USB clock must already be running. The device stays invisible
    /// to the host until [`connect`](Self::connect).
    pub fn new(
        regs: USBCTRL_REGS,
        dpram: USBCTRL_DPRAM,
        resets: &RESETS,
        pins: Option<ActivityPins>,
    ) -> Self {
        resets.reset.modify(|_, w| w.usbctrl().set_bit());
        resets.reset.modify(|_, w| w.usbctrl().clear_bit());
        while !resets.reset_done.read().usbctrl().bit() {}

        // The control portion of DPRAM powers up with garbage in it.
        dpram.setup_packet_low.write(|w| unsafe { w.bits(0) });
        dpram.setup_packet_high.write(|w| unsafe { w.bits(0) });
        for epc in &dpram.ep_control {
            epc.write(|w| unsafe { w.bits(0) });
        }
        for epb in &dpram.ep_buffer_control {
            epb.write(|w| unsafe { w.bits(0) });
        }

        // Onboard PHY. `softcon` is undocumented, but the SDK sets it too.
        regs.usb_muxing.write(|w| w.to_phy().set_bit().softcon().set_bit());
        // Not every board wires up VBUS detect, so pretend we always see it.
        regs.usb_pwr.write(|w| w.vbus_detect().set_bit().vbus_detect_override_en().set_bit());
        regs.main_ctrl.write(|w| w.controller_en().set_bit().host_ndevice().clear_bit());
        // Flag every buffer that moves through EP0.
        regs.sie_ctrl.write(|w| w.ep0_int_1buf().set_bit());
        regs.inte.write(|w| w.buff_status().set_bit().bus_reset().set_bit().setup_req().set_bit());

        Self {
            regs,
            dpram,
            slots: [Slot::default(); SLOTS],
            new_address: None,
            data_stage: None,
            pins,
        }
    }

    /// Enables the DP pullup, which is when the host notices us.
    pub fn connect(&self) {
        self.regs.sie_ctrl.modify(|_, w| w.pullup_en().set_bit());
    }

    fn raise(&self, pin: impl Fn(&ActivityPins) -> u8) {
        if let Some(p) = &self.pins {
            // SIO set/clear registers are atomic, so sharing them with the
            // rest of the firmware is fine.
            let sio = unsafe { &*SIO::ptr() };
            sio.gpio_out_set.write(|w| unsafe { w.bits(1 << pin(p)) });
        }
    }

    fn lower(&self, pin: impl Fn(&ActivityPins) -> u8) {
        if let Some(p) = &self.pins {
            let sio = unsafe { &*SIO::ptr() };
            sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << pin(p)) });
        }
    }

    fn buffer_ptr(slot: usize) -> *mut u8 {
        (USBCTRL_DPRAM::ptr() as *mut u8).wrapping_add(buffer_offset(slot))
    }

    /// Copies `data` into the slot's DPRAM buffer and hands it to the
    /// hardware to send on the next IN.
    fn start_tx(&mut self, slot: usize, data: &[u8]) {
        debug_assert!(data.len() <= DATA_BUFFER_SIZE);
        debug_assert!(slot & 1 == 0);
        // Safety: the buffer lies inside DPRAM and is at least
        // DATA_BUFFER_SIZE long. We only write it while the hardware does
        // not own it: an IN slot is never re-armed before its previous
        // packet has gone out, and EP0 is strictly one stage at a time.
        unsafe {
            Self::buffer_ptr(slot).copy_from_nonoverlapping(data.as_ptr(), data.len());
        }
        // Check which DATA0/1 PID this endpoint is expecting next.
        let np = self.slots[slot].next_pid_1;
        self.dpram.ep_buffer_control[slot].write(|w| unsafe {
            w
                // DATA0/1, depending
                .pid_0().bit(np)
                // We have put data in.
                .full_0().set_bit()
                // The hardware owns the buffer from here until the host has
                // collected it and buff_status says so.
                .available_0().set_bit()
                // There are this many bytes.
                .length_0().bits(data.len() as u16)
        });
        // Flip the DATA0/1 PID for the next transmission.
        self.slots[slot].next_pid_1 = !np;
    }

    /// Lets the hardware accept up to `len` bytes into the slot's buffer.
    fn start_rx(&mut self, slot: usize, len: usize) {
        debug_assert!(len <= DATA_BUFFER_SIZE);
        debug_assert!(slot & 1 == 1);
        let np = self.slots[slot].next_pid_1;
        self.dpram.ep_buffer_control[slot].write(|w| unsafe {
            w
                // DATA0/1, depending. A packet with the wrong PID is a
                // retransmission and the hardware drops it for us.
                .pid_0().bit(np)
                // Buffer is empty, the host gets to fill it.
                .full_0().clear_bit()
                // Hardware owns it until a packet lands.
                .available_0().set_bit()
                // Up to this many bytes.
                .length_0().bits(len as u16)
        });
        self.slots[slot].next_pid_1 = !np;
    }

    fn stall_ep0(&mut self) {
        // The stall only takes effect on EP0 if it is armed here as well as
        // in the buffer control registers; the arm clears itself on the
        // next SETUP.
        self.regs.ep_stall_arm.write(|w| w.ep0_in().set_bit().ep0_out().set_bit());
        self.dpram.ep_buffer_control[0].write(|w| w.stall().set_bit());
        self.dpram.ep_buffer_control[1].write(|w| w.stall().set_bit());
    }

    fn check(&self, ep: u8, dir: UsbDir) -> Result<usize> {
        if UsbDir::of_endpoint_addr(ep) != dir {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        let slot = slot_index(ep);
        if !self.slots[slot].configured {
            return Err(UsbError::NotConfigured(ep));
        }
        Ok(slot)
    }

    fn handle_setup<C: UsbClass<Self>>(&mut self, class: &mut C) {
        self.raise(|p| p.setup);
        self.regs.sie_status.write(|w| w.setup_rec().set_bit());

        let mut raw = [0; 8];
        raw[..4].copy_from_slice(&self.dpram.setup_packet_low.read().bits().to_le_bytes());
        raw[4..].copy_from_slice(&self.dpram.setup_packet_high.read().bits().to_le_bytes());
        let setup = match UsbSetupPacket::read_from(&raw[..]) {
            Some(s) => s,
            None => {
                self.lower(|p| p.setup);
                return;
            }
        };

        // The first data packet of every control transfer is DATA1.
        self.slots[0].next_pid_1 = true;
        // A SETUP abandons whatever transfer was in progress on EP0.
        self.data_stage = None;

        match control::dispatch(self, class, &setup) {
            Response::Data(d) => {
                let mut stage = DataStage::new(d, setup.length.get());
                let first = stage.next_packet().unwrap_or(&[]);
                self.start_tx(0, first);
                self.data_stage = Some(stage);
            }
            Response::Byte(b) => self.start_tx(0, &[b]),
            Response::Ack => self.start_tx(0, &[]),
            Response::Address(a) => {
                self.new_address = Some(a);
                self.start_tx(0, &[]);
            }
            Response::Stall => self.stall_ep0(),
        }
        self.lower(|p| p.setup);
    }

    fn handle_buffers(&mut self) {
        self.raise(|p| p.buffer);
        // Each set bit in buff_status is one buffer the hardware has handed
        // back to us, numbered the same way as our slots.
        let orig_bufbits = self.regs.buff_status.read().bits();
        let mut bufbits = orig_bufbits;

        while bufbits != 0 {
            let slot = bufbits.trailing_zeros() as usize;
            bufbits ^= 1 << slot;

            match slot {
                0 => {
                    // EP0 IN finished a packet. That is either part of a
                    // data stage, or the status stage of an OUT request.
                    let next = self.data_stage.as_mut().and_then(|d| d.next_packet());
                    if let Some(packet) = next {
                        self.start_tx(0, packet);
                    } else if let Some(a) = self.new_address.take() {
                        // SET_ADDRESS status went out from address 0; only
                        // now may we answer to the new one.
                        log::debug!("address {}", a);
                        self.regs.addr_endp.write(|w| unsafe { w.address().bits(a) });
                    } else {
                        // Data stage done; the host answers with a
                        // zero-length OUT, always DATA1.
                        self.data_stage = None;
                        self.slots[1].next_pid_1 = true;
                        self.start_rx(1, 0);
                    }
                }
                // EP0 OUT: the status stage of an IN request. Nothing left
                // to do.
                1 => {}
                // The host collected a packet from an IN endpoint.
                s if s & 1 == 0 => {
                    let st = &mut self.slots[s];
                    if st.busy {
                        st.busy = false;
                        st.owed = true;
                    }
                }
                // A packet landed on an OUT endpoint. The hardware has
                // cleared AVAILABLE, so the buffer is ours until we re-arm
                // it, and LENGTH now holds what was actually received.
                s => {
                    let bc = self.dpram.ep_buffer_control[s].read();
                    if !bc.available_0().bit() && self.slots[s].configured {
                        self.slots[s].received = Some(bc.length_0().bits());
                    }
                }
            }
        }
        // Write-one-to-clear every bit we handled.
        self.regs.buff_status.write(|w| unsafe { w.bits(orig_bufbits) });
        self.lower(|p| p.buffer);
    }

    fn handle_reset<C: UsbClass<Self>>(&mut self, class: &mut C) {
        self.raise(|p| p.reset);
        self.regs.sie_status.write(|w| w.bus_reset().set_bit());
        log::info!("bus reset");
        self.new_address = None;
        self.data_stage = None;
        // Back to the default address until the host assigns a new one.
        self.regs.addr_endp.write(|w| unsafe { w.address().bits(0) });

        class.reset(self);
        for slot in 2..SLOTS {
            if self.slots[slot].configured {
                let ep = slot_event(slot).endpoint();
                if let Err(e) = self.deconfigure(ep) {
                    log::warn!("release of {:#04x} on reset failed: {}", ep, e);
                }
            }
        }
        self.lower(|p| p.reset);
    }

    fn deliver<C: UsbClass<Self>>(&mut self, class: &mut C) {
        for slot in 2..SLOTS {
            let st = &mut self.slots[slot];
            if !st.owed {
                continue;
            }
            st.owed = false;
            if st.registered {
                class.transfer_complete(slot_event(slot));
            }
        }
    }
}

impl UsbBus for Rp2040Bus {
    fn configure(&mut self, ep: u8, kind: UsbTransferType, max_packet_size: u16) -> Result<()> {
        if endpoint_number(ep) == 0 || ep & 0x70 != 0 {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        if usize::from(max_packet_size) > DATA_BUFFER_SIZE {
            return Err(UsbError::BufferOverflow(usize::from(max_packet_size)));
        }
        let slot = slot_index(ep);
        let offset = buffer_offset(slot) as u16;
        self.dpram.ep_control[endpoint_control_index(slot)].write(|w| unsafe {
            w.enable().set_bit()
                // Set our bit in buff_status each time a buffer is done.
                .interrupt_per_buff().set_bit()
                // Same encoding as bmAttributes in the endpoint descriptor.
                .endpoint_type().bits(kind as u8)
                // Offset from the start of DPRAM, not an address.
                .buffer_address().bits(offset)
        });
        let registered = self.slots[slot].registered;
        self.slots[slot] = Slot {
            configured: true,
            registered,
            max_packet_size,
            ..Slot::default()
        };
        if UsbDir::of_endpoint_addr(ep) == UsbDir::Out {
            self.start_rx(slot, usize::from(max_packet_size));
        }
        Ok(())
    }

    fn deconfigure(&mut self, ep: u8) -> Result<()> {
        if endpoint_number(ep) == 0 || ep & 0x70 != 0 {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        let slot = slot_index(ep);
        self.dpram.ep_control[endpoint_control_index(slot)].write(|w| unsafe { w.bits(0) });
        // Takes back an armed buffer, if any.
        self.dpram.ep_buffer_control[slot].write(|w| unsafe { w.bits(0) });
        let st = &mut self.slots[slot];
        st.configured = false;
        st.received = None;
        st.busy = false;
        st.owed = false;
        Ok(())
    }

    fn register_callback(&mut self, ep: u8, enabled: bool) -> Result<()> {
        if endpoint_number(ep) == 0 || ep & 0x70 != 0 {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        self.slots[slot_index(ep)].registered = enabled;
        Ok(())
    }

    fn read(&mut self, ep: u8, buf: &mut [u8]) -> Result<usize> {
        let slot = self.check(ep, UsbDir::Out)?;
        if self.slots[slot].owed {
            return Err(UsbError::WouldBlock);
        }
        let len = match self.slots[slot].received {
            Some(len) => usize::from(len),
            None => return Err(UsbError::WouldBlock),
        };
        if len > buf.len() {
            return Err(UsbError::BufferOverflow(len));
        }
        // Safety: `received` is only set once the hardware has cleared the
        // AVAILABLE bit, handing the buffer back to us, and the buffer is not
        // re-armed until after this copy.
        unsafe {
            buf.as_mut_ptr().copy_from_nonoverlapping(Self::buffer_ptr(slot), len);
        }
        self.slots[slot].received = None;
        self.slots[slot].owed = len > 0;
        let mps = usize::from(self.slots[slot].max_packet_size);
        self.start_rx(slot, mps);
        Ok(len)
    }

    fn write(&mut self, ep: u8, buf: &[u8]) -> Result<usize> {
        let slot = self.check(ep, UsbDir::In)?;
        let st = &self.slots[slot];
        if buf.len() > usize::from(st.max_packet_size) {
            return Err(UsbError::BufferOverflow(buf.len()));
        }
        if st.busy || st.owed {
            return Err(UsbError::WouldBlock);
        }
        self.start_tx(slot, buf);
        self.slots[slot].busy = true;
        Ok(buf.len())
    }

    fn poll<C: UsbClass<Self>>(&mut self, class: &mut C) {
        let ints = self.regs.ints.read();
        if ints.setup_req().bit() {
            self.handle_setup(class);
        }
        if ints.buff_status().bit() {
            self.handle_buffers();
        }
        if ints.bus_reset().bit() {
            self.handle_reset(class);
        }
        self.deliver(class);
    }
}
