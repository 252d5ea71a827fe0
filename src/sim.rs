// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A protocol engine with no hardware behind it, for tests.
//!
//! The test plays the host: it queues OUT packets and SETUP requests,
//! collects IN packets, and can reset the bus. Completions follow the same
//! rules as on hardware: a read or write is reported back on a later poll,
//! and only to endpoints with a registered callback.

use std::collections::{HashMap, VecDeque};

use crate::bus::{TransferEvent, UsbBus, UsbClass};
use crate::control::{self, DataStage, Response};
use crate::error::{Result, UsbError};
use crate::usb::{endpoint_number, UsbDir, UsbSetupPacket, UsbTransferType};

/// Endpoint management calls, in the order the device made them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Configure(u8, UsbTransferType, u16),
    Deconfigure(u8),
    Register(u8, bool),
}

#[derive(Default)]
struct SimEndpoint {
    configured: bool,
    registered: bool,
    refuse: bool,
    refuse_register: bool,
    max_packet_size: u16,
}

#[derive(Default)]
pub struct SimBus {
    endpoints: HashMap<u8, SimEndpoint>,
    host_out: HashMap<u8, VecDeque<Vec<u8>>>,
    in_slot: HashMap<u8, Vec<u8>>,
    events: VecDeque<TransferEvent>,
    setups: VecDeque<UsbSetupPacket>,
    answers: Vec<Option<Vec<u8>>>,
    calls: Vec<Call>,
    address: u8,
    reset_pending: bool,
    write_blocked: bool,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host sends a packet to an OUT endpoint. It waits until the device
    /// reads it.
    pub fn host_send(&mut self, ep: u8, data: &[u8]) {
        assert!(data.len() <= crate::PACKET_SIZE);
        self.host_out.entry(ep).or_default().push_back(data.to_vec());
    }

    /// Packets sent to `ep` that the device has not read yet.
    pub fn host_pending(&self, ep: u8) -> usize {
        self.host_out.get(&ep).map_or(0, |q| q.len())
    }

    /// Host collects whatever the device queued on an IN endpoint.
    pub fn host_receive(&mut self, ep: u8) -> Option<Vec<u8>> {
        let packet = self.in_slot.remove(&ep)?;
        self.events.push_back(TransferEvent::Transmitted(ep));
        Some(packet)
    }

    /// Queues a SETUP request, handled on the next poll.
    pub fn host_setup(&mut self, setup: UsbSetupPacket) {
        self.setups.push_back(setup);
    }

    pub fn host_reset(&mut self) {
        self.reset_pending = true;
    }

    /// One entry per SETUP handled: the data stage (empty for a plain
    /// acknowledge), or `None` for a stall.
    pub fn take_control_answers(&mut self) -> Vec<Option<Vec<u8>>> {
        core::mem::take(&mut self.answers)
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        core::mem::take(&mut self.calls)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn is_configured(&self, ep: u8) -> bool {
        self.endpoints.get(&ep).map_or(false, |e| e.configured)
    }

    pub fn is_registered(&self, ep: u8) -> bool {
        self.endpoints.get(&ep).map_or(false, |e| e.registered)
    }

    /// Makes every write report `WouldBlock`, as if the host stopped polling
    /// the IN endpoint.
    pub fn set_write_blocked(&mut self, blocked: bool) {
        self.write_blocked = blocked;
    }

    /// Makes `configure` fail for `ep`.
    pub fn refuse_configure(&mut self, ep: u8) {
        self.endpoints.entry(ep).or_default().refuse = true;
    }

    /// Makes `register_callback(ep, true)` fail for `ep`. Unregistering
    /// still works.
    pub fn refuse_register(&mut self, ep: u8) {
        self.endpoints.entry(ep).or_default().refuse_register = true;
    }

    pub fn allow_register(&mut self, ep: u8) {
        self.endpoints.entry(ep).or_default().refuse_register = false;
    }

    fn endpoint(&self, ep: u8, dir: UsbDir) -> Result<&SimEndpoint> {
        if UsbDir::of_endpoint_addr(ep) != dir {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        match self.endpoints.get(&ep) {
            Some(e) if e.configured => Ok(e),
            _ => Err(UsbError::NotConfigured(ep)),
        }
    }

    fn in_flight(&self, event: TransferEvent) -> bool {
        self.events.contains(&event)
    }
}

fn check_endpoint(ep: u8) -> Result<()> {
    if endpoint_number(ep) == 0 || ep & 0x70 != 0 {
        return Err(UsbError::InvalidEndpoint(ep));
    }
    Ok(())
}

impl UsbBus for SimBus {
    fn configure(&mut self, ep: u8, kind: UsbTransferType, max_packet_size: u16) -> Result<()> {
        check_endpoint(ep)?;
        self.calls.push(Call::Configure(ep, kind, max_packet_size));
        let e = self.endpoints.entry(ep).or_default();
        if e.refuse {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        e.configured = true;
        e.max_packet_size = max_packet_size;
        Ok(())
    }

    fn deconfigure(&mut self, ep: u8) -> Result<()> {
        check_endpoint(ep)?;
        self.calls.push(Call::Deconfigure(ep));
        if let Some(e) = self.endpoints.get_mut(&ep) {
            e.configured = false;
        }
        self.in_slot.remove(&ep);
        self.events.retain(|ev| ev.endpoint() != ep);
        Ok(())
    }

    fn register_callback(&mut self, ep: u8, enabled: bool) -> Result<()> {
        check_endpoint(ep)?;
        self.calls.push(Call::Register(ep, enabled));
        let e = self.endpoints.entry(ep).or_default();
        if enabled && e.refuse_register {
            return Err(UsbError::InvalidEndpoint(ep));
        }
        e.registered = enabled;
        Ok(())
    }

    fn read(&mut self, ep: u8, buf: &mut [u8]) -> Result<usize> {
        self.endpoint(ep, UsbDir::Out)?;
        if self.in_flight(TransferEvent::Received(ep)) {
            return Err(UsbError::WouldBlock);
        }
        let queue = self.host_out.entry(ep).or_default();
        let len = match queue.front() {
            Some(p) if p.len() > buf.len() => return Err(UsbError::BufferOverflow(p.len())),
            Some(p) => p.len(),
            None => return Err(UsbError::WouldBlock),
        };
        if let Some(p) = queue.pop_front() {
            buf[..len].copy_from_slice(&p);
        }
        if len > 0 {
            self.events.push_back(TransferEvent::Received(ep));
        }
        Ok(len)
    }

    fn write(&mut self, ep: u8, buf: &[u8]) -> Result<usize> {
        let max = usize::from(self.endpoint(ep, UsbDir::In)?.max_packet_size);
        if buf.len() > max {
            return Err(UsbError::BufferOverflow(buf.len()));
        }
        if self.write_blocked || self.in_slot.contains_key(&ep) || self.in_flight(TransferEvent::Transmitted(ep)) {
            return Err(UsbError::WouldBlock);
        }
        self.in_slot.insert(ep, buf.to_vec());
        Ok(buf.len())
    }

    fn poll<C: UsbClass<Self>>(&mut self, class: &mut C) {
        if self.reset_pending {
            self.reset_pending = false;
            self.address = 0;
            class.reset(self);
        }

        while let Some(setup) = self.setups.pop_front() {
            let answer = match control::dispatch(self, class, &setup) {
                Response::Data(d) => {
                    let mut stage = DataStage::new(d, setup.length.get());
                    let mut answer = Vec::new();
                    while let Some(packet) = stage.next_packet() {
                        answer.extend_from_slice(packet);
                    }
                    Some(answer)
                }
                Response::Byte(b) => Some(vec![b]),
                Response::Ack => Some(Vec::new()),
                Response::Address(a) => {
                    self.address = a;
                    Some(Vec::new())
                }
                Response::Stall => None,
            };
            self.answers.push(answer);
        }

        let events: Vec<TransferEvent> = self.events.drain(..).collect();
        for event in events {
            if self.is_registered(event.endpoint()) {
                class.transfer_complete(event);
            }
        }
    }
}
