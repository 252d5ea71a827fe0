// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The descriptor table: who we are, what we offer, and the strings that go
//! with it.
//!
//! One configuration, one vendor-class interface, two bulk endpoints. The
//! configuration descriptor is stored together with the interface and
//! endpoint descriptors that belong to it, because the host always fetches
//! them as one block.

use zerocopy::AsBytes;

use crate::error::{Result, UsbError};
use crate::usb::{
    le16, UsbConfigurationDescriptor, UsbDescType, UsbDeviceDescriptor, UsbEndpointDescriptor,
    UsbInterfaceDescriptor, UsbTransferType,
};
use crate::{EP0_PACKET_SIZE, INTERFACE_NUMBER, PACKET_SIZE, RX_EP, TX_EP};

pub const VENDOR_ID: u16 = 0x0403;
pub const PRODUCT_ID: u16 = 0x6010;

/// The value SET_CONFIGURATION uses to select our only configuration.
pub const CONFIGURATION_VALUE: u8 = 1;

/// String index the device descriptor advertises for its serial number. The
/// serial is answered by the control path from `SERIAL_NUMBER`, not by the
/// resolver.
pub const INTERNAL_SERIAL_INDEX: u8 = 0xFE;

const VENDOR_SPECIFIC: u8 = 0xFF;

/// Configuration descriptor followed by everything it contains, in wire
/// order.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct LoopbackConfiguration {
    pub config: UsbConfigurationDescriptor,
    pub interface: UsbInterfaceDescriptor,
    pub rx: UsbEndpointDescriptor,
    pub tx: UsbEndpointDescriptor,
}

pub static DEVICE_DESCRIPTOR: UsbDeviceDescriptor = UsbDeviceDescriptor {
    length: core::mem::size_of::<UsbDeviceDescriptor>() as u8,
    descriptor_type: UsbDescType::Device,
    bcd_usb: le16(0x0200),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: EP0_PACKET_SIZE as u8,
    vendor: le16(VENDOR_ID),
    product: le16(PRODUCT_ID),
    bcd_device: le16(0x0100),
    manufacturer_s: 1,
    product_s: 2,
    serial_s: INTERNAL_SERIAL_INDEX,
    num_configurations: 1,
};

pub static CONFIGURATION: LoopbackConfiguration = LoopbackConfiguration {
    config: UsbConfigurationDescriptor {
        length: core::mem::size_of::<UsbConfigurationDescriptor>() as u8,
        descriptor_type: UsbDescType::Config,
        total_length: le16(core::mem::size_of::<LoopbackConfiguration>() as u16),
        num_interfaces: 1,
        configuration_value: CONFIGURATION_VALUE,
        configuration_s: 0,
        // Bus powered, no remote wakeup.
        attributes: 0x80,
        // 500mA
        max_power: 250,
    },
    interface: UsbInterfaceDescriptor {
        length: core::mem::size_of::<UsbInterfaceDescriptor>() as u8,
        descriptor_type: UsbDescType::Interface,
        interface_number: INTERFACE_NUMBER,
        alternate_setting: 0,
        num_endpoints: 2,
        interface_class: VENDOR_SPECIFIC,
        interface_subclass: VENDOR_SPECIFIC,
        interface_protocol: VENDOR_SPECIFIC,
        interface_s: 0,
    },
    rx: bulk_endpoint(RX_EP),
    tx: bulk_endpoint(TX_EP),
};

const fn bulk_endpoint(address: u8) -> UsbEndpointDescriptor {
    UsbEndpointDescriptor {
        length: core::mem::size_of::<UsbEndpointDescriptor>() as u8,
        descriptor_type: UsbDescType::Endpoint,
        endpoint_address: address,
        attributes: UsbTransferType::Bulk as u8,
        max_packet_size: le16(PACKET_SIZE as u16),
        interval: 0,
    }
}

/// Lays out an ASCII string as a string descriptor (UTF-16LE with the
/// two-byte header). `N` must be exactly `2 + 2 * s.len()`, which is checked
/// at compile time for the statics below.
const fn string_descriptor<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    assert!(N == 2 + 2 * bytes.len() && N <= 0xFF);
    let mut out = [0; N];
    out[0] = N as u8;
    out[1] = UsbDescType::String as u8;
    let mut i = 0;
    while i < bytes.len() {
        assert!(bytes[i].is_ascii());
        out[2 + 2 * i] = bytes[i];
        i += 1;
    }
    out
}

/// String descriptor 0: the list of supported languages, US English only.
pub static LANGUAGES: [u8; 4] = [4, UsbDescType::String as u8, 0x09, 0x04];
pub static MANUFACTURER: [u8; 48] = string_descriptor("Kumsong Tractor Factory");
pub static PRODUCT: [u8; 14] = string_descriptor("js2232");
pub static SERIAL_NUMBER: [u8; 26] = string_descriptor("LB0000000001");

/// Indexed by string descriptor number.
pub static STRINGS: [&[u8]; 3] = [&LANGUAGES, &MANUFACTURER, &PRODUCT];

/// Finds the descriptor the host asked for with GET_DESCRIPTOR.
///
/// Device descriptors are answered with their self-declared length. The
/// configuration descriptor is answered with the whole configuration block,
/// since that is what the host expects to read. Only string indices 0..=2
/// exist; everything else stalls.
pub fn resolve(descriptor_type: u8, index: u8) -> Result<&'static [u8]> {
    use num_traits::FromPrimitive;

    let found: &'static [u8] = match UsbDescType::from_u8(descriptor_type) {
        Some(UsbDescType::Device) => {
            let bytes = DEVICE_DESCRIPTOR.as_bytes();
            &bytes[..usize::from(DEVICE_DESCRIPTOR.length)]
        }
        Some(UsbDescType::Config) => {
            let bytes = CONFIGURATION.as_bytes();
            &bytes[..usize::from(CONFIGURATION.config.total_length.get())]
        }
        Some(UsbDescType::String) => match STRINGS.get(usize::from(index)) {
            Some(s) => *s,
            None => return Err(UsbError::Stall),
        },
        _ => return Err(UsbError::Stall),
    };
    log::debug!(
        "descriptor {:#04x}/{} -> {} bytes",
        descriptor_type,
        index,
        found.len()
    );
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_descriptor() {
        let d = resolve(UsbDescType::Device as u8, 0).unwrap();
        assert_eq!(d.len(), 18);
        assert_eq!(d[0], 18);
        assert_eq!(d[1], UsbDescType::Device as u8);
        // bcdUSB 2.0
        assert_eq!(&d[2..4], &[0x00, 0x02]);
        // bMaxPacketSize0
        assert_eq!(d[7], 8);
        // idVendor / idProduct, little endian
        assert_eq!(&d[8..12], &[0x03, 0x04, 0x10, 0x60]);
        assert_eq!(d[16], INTERNAL_SERIAL_INDEX);
        assert_eq!(d, DEVICE_DESCRIPTOR.as_bytes());
    }

    #[test]
    fn configuration_block_is_complete() {
        let c = resolve(UsbDescType::Config as u8, 0).unwrap();
        // 9 + 9 + 7 + 7, not the 9 bytes the header claims for itself.
        assert_eq!(c.len(), 32);
        assert_eq!(c[0], 9);
        assert_eq!(u16::from_le_bytes([c[2], c[3]]), 32);
        assert_eq!(c[5], CONFIGURATION_VALUE);

        // Interface: vendor class, two endpoints.
        assert_eq!(&c[9..11], &[9, UsbDescType::Interface as u8]);
        assert_eq!(c[13], 2);
        assert_eq!(&c[14..17], &[0xFF, 0xFF, 0xFF]);

        // Endpoints: OUT 0x01 then IN 0x81, bulk, 64 bytes.
        assert_eq!(&c[18..25], &[7, 5, 0x01, 0x02, 64, 0, 0]);
        assert_eq!(&c[25..32], &[7, 5, 0x81, 0x02, 64, 0, 0]);
    }

    #[test]
    fn strings() {
        assert_eq!(resolve(3, 0).unwrap(), &[4, 3, 0x09, 0x04]);

        let manufacturer = resolve(3, 1).unwrap();
        assert_eq!(manufacturer.len(), 48);
        assert_eq!(manufacturer[0], 48);
        assert_eq!(&manufacturer[2..8], b"K\0u\0m\0");

        let product = resolve(3, 2).unwrap();
        assert_eq!(product, b"\x0e\x03j\0s\x002\x002\x003\x002\0");
    }

    #[test]
    fn unknown_selectors_stall() {
        assert_eq!(resolve(3, 3), Err(UsbError::Stall));
        assert_eq!(resolve(3, INTERNAL_SERIAL_INDEX), Err(UsbError::Stall));
        assert_eq!(resolve(UsbDescType::Interface as u8, 0), Err(UsbError::Stall));
        assert_eq!(resolve(UsbDescType::Endpoint as u8, 0), Err(UsbError::Stall));
        // Device qualifier: we are full speed only.
        assert_eq!(resolve(0x06, 0), Err(UsbError::Stall));
        assert_eq!(resolve(0, 0), Err(UsbError::Stall));
    }

    #[test]
    fn serial_number_layout() {
        assert_eq!(SERIAL_NUMBER[0] as usize, SERIAL_NUMBER.len());
        assert_eq!(SERIAL_NUMBER[1], UsbDescType::String as u8);
        assert_eq!(&SERIAL_NUMBER[2..6], b"L\0B\0");
    }
}
