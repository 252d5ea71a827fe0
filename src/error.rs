// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

pub type Result<T, E = UsbError> = core::result::Result<T, E>;

/// Errors reported by a protocol engine or by the device's control hooks.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsbError {
    /// The endpoint has nothing to deliver, or cannot accept a packet yet.
    /// The caller is expected to try again on a later poll.
    #[error("operation would block")]
    WouldBlock,
    /// The request is not supported; the host sees a STALL.
    #[error("request stalled")]
    Stall,
    /// The address does not name an endpoint this engine can drive.
    #[error("invalid endpoint {0:#04x}")]
    InvalidEndpoint(u8),
    /// The endpoint exists but is not currently configured.
    #[error("endpoint {0:#04x} is not configured")]
    NotConfigured(u8),
    /// A packet does not fit the endpoint or the caller's buffer.
    #[error("packet of {0} bytes does not fit")]
    BufferOverflow(usize),
}
