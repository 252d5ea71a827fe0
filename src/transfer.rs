// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The read, transform, write cycle.
//!
//! Each direction has one packet buffer and a [`Stage`] saying who owns it:
//!
//! ```text
//!            submit (read/write ok)        completion
//! Requested -----------------------> InFlight ----------> Completed
//!     ^                                                       |
//!     +-------------- other direction completes --------------+
//! ```
//!
//! The main loop only ever moves a direction out of `Requested`; the
//! completion callback only ever moves it out of `InFlight`. A buffer is
//! touched by the main loop (through the bus) only while its direction is
//! `Requested`, and by the callback only while it is `InFlight`, so there is
//! never more than one transfer outstanding per direction.
//!
//! All of it sits behind one `critical_section::Mutex`, and every step runs
//! inside a single short critical section. That keeps the buffers consistent
//! even if the protocol engine delivers completions from an interrupt.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::bus::{TransferEvent, UsbBus};
use crate::error::UsbError;
use crate::transform::invert_words;
use crate::{PACKET_SIZE, RX_EP, TX_EP};

/// One packet's worth of storage, word aligned so the transform can work in
/// `u32`s.
#[repr(C, align(4))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketBuffer([u8; PACKET_SIZE]);

impl PacketBuffer {
    pub const fn new() -> Self {
        Self([0; PACKET_SIZE])
    }

    pub fn bytes(&self) -> &[u8; PACKET_SIZE] {
        &self.0
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; PACKET_SIZE] {
        &mut self.0
    }
}

impl Default for PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Where one direction is in the cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Nothing to do; the endpoint is not part of an active cycle.
    Idle,
    /// The main loop should submit the next read or write.
    Requested,
    /// The bus has accepted the operation and owns the outcome until the
    /// completion arrives.
    InFlight,
    /// The completion was seen and its buffer processed.
    Completed,
}

impl Stage {
    pub fn is_requested(self) -> bool {
        self == Stage::Requested
    }

    #[cfg(test)]
    pub(crate) fn is_completed(self) -> bool {
        self == Stage::Completed
    }
}

struct Exchange {
    rx: PacketBuffer,
    tx: PacketBuffer,
    rx_len: usize,
    tx_len: usize,
    rx_stage: Stage,
    tx_stage: Stage,
}

/// Buffers and stages for the loopback pair.
///
/// Every method takes `&self`, so a `Transfer` can live in a `static` shared
/// with an interrupt handler.
pub struct Transfer {
    inner: Mutex<RefCell<Exchange>>,
}

impl Transfer {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Exchange {
                rx: PacketBuffer::new(),
                tx: PacketBuffer::new(),
                rx_len: 0,
                tx_len: 0,
                rx_stage: Stage::Idle,
                tx_stage: Stage::Idle,
            })),
        }
    }

    /// Starts a fresh cycle: the next main loop pass reads.
    pub fn arm(&self) {
        critical_section::with(|cs| {
            let mut x = self.inner.borrow_ref_mut(cs);
            x.rx_stage = Stage::Requested;
            x.tx_stage = Stage::Idle;
            x.rx_len = 0;
            x.tx_len = 0;
        });
    }

    /// Drops out of the cycle. Only call once the endpoints have been
    /// deconfigured, so the bus no longer holds anything in flight.
    pub fn halt(&self) {
        critical_section::with(|cs| {
            let mut x = self.inner.borrow_ref_mut(cs);
            x.rx_stage = Stage::Idle;
            x.tx_stage = Stage::Idle;
        });
    }

    /// (receive, transmit) stages.
    pub fn stages(&self) -> (Stage, Stage) {
        critical_section::with(|cs| {
            let x = self.inner.borrow_ref(cs);
            (x.rx_stage, x.tx_stage)
        })
    }

    /// Calls `f` with the last received block and the block queued for
    /// transmission.
    #[cfg(test)]
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&[u8], &[u8]) -> R) -> R {
        critical_section::with(|cs| {
            let x = self.inner.borrow_ref(cs);
            f(&x.rx.bytes()[..x.rx_len], &x.tx.bytes()[..x.tx_len])
        })
    }

    /// Tries to read one packet if a read is due. Returns whether a read was
    /// accepted; a refused read stays due and is retried on the next call.
    pub fn submit_read<B: UsbBus>(&self, bus: &mut B) -> bool {
        critical_section::with(|cs| {
            let mut guard = self.inner.borrow_ref_mut(cs);
            let x = &mut *guard;
            if !x.rx_stage.is_requested() {
                return false;
            }
            match bus.read(RX_EP, x.rx.bytes_mut()) {
                Ok(n) if n > 0 => {
                    log::trace!("read {} bytes", n);
                    x.rx_len = n;
                    x.rx_stage = Stage::InFlight;
                    true
                }
                Ok(_) => {
                    log::trace!("zero-length packet ignored");
                    false
                }
                Err(UsbError::WouldBlock) => false,
                Err(e) => {
                    log::trace!("read failed: {}", e);
                    false
                }
            }
        })
    }

    /// Tries to send the transformed block if a write is due. Same retry
    /// rules as [`submit_read`](Self::submit_read).
    pub fn submit_write<B: UsbBus>(&self, bus: &mut B) -> bool {
        critical_section::with(|cs| {
            let mut guard = self.inner.borrow_ref_mut(cs);
            let x = &mut *guard;
            if !x.tx_stage.is_requested() {
                return false;
            }
            match bus.write(TX_EP, &x.tx.bytes()[..x.tx_len]) {
                Ok(n) if n > 0 => {
                    log::trace!("wrote {} bytes", n);
                    x.tx_stage = Stage::InFlight;
                    true
                }
                Ok(_) | Err(UsbError::WouldBlock) => false,
                Err(e) => {
                    log::trace!("write failed: {}", e);
                    false
                }
            }
        })
    }

    /// Completion callback for both endpoints.
    pub fn complete(&self, event: TransferEvent) {
        critical_section::with(|cs| {
            let mut guard = self.inner.borrow_ref_mut(cs);
            let x = &mut *guard;
            match event {
                TransferEvent::Received(RX_EP) => {
                    if x.rx_stage != Stage::InFlight {
                        log::error!("receive completion with no read in flight ({:?})", x.rx_stage);
                        return;
                    }
                    if x.tx_stage == Stage::InFlight || x.tx_stage == Stage::Requested {
                        log::error!("receive completion while transmit is {:?}", x.tx_stage);
                        return;
                    }
                    let len = x.rx_len;
                    x.tx.bytes_mut()[..len].copy_from_slice(&x.rx.bytes()[..len]);
                    invert_words(&mut x.tx.bytes_mut()[..len]);
                    x.tx_len = len;
                    x.rx_stage = Stage::Completed;
                    x.tx_stage = Stage::Requested;
                    log::trace!("received {} bytes, transmit due", len);
                }
                TransferEvent::Transmitted(TX_EP) => {
                    if x.tx_stage != Stage::InFlight {
                        log::error!("transmit completion with no write in flight ({:?})", x.tx_stage);
                        return;
                    }
                    x.tx_stage = Stage::Completed;
                    x.rx_stage = Stage::Requested;
                    log::trace!("transmitted, receive due");
                }
                other => {
                    log::warn!("completion on unexpected endpoint {:#04x}", other.endpoint());
                }
            }
        });
    }
}

impl Default for Transfer {
    fn default() -> Self {
        Self::new()
    }
}
