// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB structure and constant definitions.
//!
//! Everything in here is laid out exactly as it appears on the wire, so the
//! descriptor table can hand out `as_bytes()` views of its statics and the
//! protocol engines can reinterpret a raw 8-byte SETUP packet in place.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

/// Builds a little-endian `U16` in a `const` context.
pub const fn le16(v: u16) -> U16<LittleEndian> {
    U16::from_bytes(v.to_le_bytes())
}

/// USB deals in two different transfer directions, called OUT (host-to-device)
/// and IN (device-to-host). In endpoint addresses, OUT is a clear top bit and
/// IN is `0x80`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbDir {
    Out = 0,
    In = 0x80,
}

impl UsbDir {
    /// Combines an endpoint number with this direction into an address.
    pub const fn endpoint(self, num: u8) -> u8 {
        (num & 0x0F) | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Endpoint number (0..15) of an endpoint address, without the direction bit.
pub const fn endpoint_number(addr: u8) -> u8 {
    addr & 0x0F
}

/// Bits 5..6 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
}

/// Bits 0..4 of `bmRequestType`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Layout of an 8-byte USB SETUP packet.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct UsbSetupPacket {
    /// Direction, kind and recipient of the request, packed into one byte.
    pub request_type: u8,
    /// Request code. Standard codes are in `UsbSetupRequest`; class and vendor
    /// requests define their own.
    pub request: u8,
    /// Request-specific argument. For GET_DESCRIPTOR this is the descriptor
    /// type (high byte) and index (low byte).
    pub value: U16<LittleEndian>,
    /// Request-specific index, typically an interface or endpoint number.
    pub index: U16<LittleEndian>,
    /// Number of bytes in the data stage; for IN requests, the most the host
    /// will accept.
    pub length: U16<LittleEndian>,
}

impl UsbSetupPacket {
    /// Builds a packet from its fields, mostly useful for driving the
    /// control path without hardware.
    pub const fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type,
            request,
            value: le16(value),
            index: le16(index),
            length: le16(length),
        }
    }

    /// Direction of the data stage.
    pub fn direction(&self) -> UsbDir {
        UsbDir::of_endpoint_addr(self.request_type)
    }

    /// `None` for the reserved kind value 3.
    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::from_u8((self.request_type >> 5) & 0x03)
    }

    /// `None` for reserved recipients.
    pub fn recipient(&self) -> Option<Recipient> {
        Recipient::from_u8(self.request_type & 0x1F)
    }

    /// Splits `value` into the (type, index) pair carried by GET_DESCRIPTOR.
    pub fn descriptor_selector(&self) -> (u8, u8) {
        let v = self.value.get();
        ((v >> 8) as u8, v as u8)
    }
}

/// The standard SETUP requests the control path understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum UsbSetupRequest {
    /// Two bytes of device/interface/endpoint status. Always IN.
    GetStatus = 0x00,
    /// Moves the device to a new bus address, effective after the status
    /// stage. Always OUT.
    SetAddress = 0x05,
    /// Asks the device to send a certain descriptor back to the host. Always
    /// IN.
    GetDescriptor = 0x06,
    /// Reads back the current configuration value. Always IN.
    GetConfiguration = 0x08,
    /// Selects one of the configurations listed in the descriptors, or 0 to
    /// return to the unconfigured state. Always OUT.
    SetConfiguration = 0x09,
}

/// Describes a device. This is the most broad description in USB and is
/// typically the first thing the host asks for.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbDeviceDescriptor {
    /// Length of this structure, must be 18.
    pub length: u8,
    /// Must be `Device`.
    pub descriptor_type: UsbDescType,
    /// USB release in binary-coded decimal, `0x0200` for USB 2.0.
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Packet size of EP0.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// Device release, BCD.
    pub bcd_device: U16<LittleEndian>,
    /// String descriptor indices.
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    pub num_configurations: u8,
}

/// Description of a single available device configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbConfigurationDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Must be `Config`.
    pub descriptor_type: UsbDescType,
    /// Total length of this descriptor plus every interface and endpoint
    /// descriptor that follows it in the configuration block.
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// Value the host passes to SET_CONFIGURATION to select this one.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// Bit 7 must be set. Bit 6 is self-powered, bit 5 remote wakeup.
    pub attributes: u8,
    /// Maximum bus current in units of 2mA.
    pub max_power: u8,
}

/// Description of an interface within a configuration.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbInterfaceDescriptor {
    /// Length of this structure, must be 9.
    pub length: u8,
    /// Must be `Interface`.
    pub descriptor_type: UsbDescType,
    pub interface_number: u8,
    pub alternate_setting: u8,
    /// Number of endpoint descriptors following this one, not counting EP0.
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// Describes an endpoint within an interface.
#[repr(C)]
#[derive(Debug, AsBytes)]
pub struct UsbEndpointDescriptor {
    /// Length of this struct, must be 7.
    pub length: u8,
    /// Must be `Endpoint`.
    pub descriptor_type: UsbDescType,
    /// Bottom 4 bits are the endpoint number, top bit is the direction.
    pub endpoint_address: u8,
    /// Bottom 2 bits hold a `UsbTransferType`.
    pub attributes: u8,
    pub max_packet_size: U16<LittleEndian>,
    /// Polling interval; unused for bulk endpoints.
    pub interval: u8,
}

/// Types of USB descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbDescType {
    Device = 0x01,
    Config = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
}

/// Types of transfer that can be indicated by the `attributes` field on
/// `UsbEndpointDescriptor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, AsBytes)]
#[repr(u8)]
pub enum UsbTransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_addresses() {
        assert_eq!(UsbDir::Out.endpoint(1), 0x01);
        assert_eq!(UsbDir::In.endpoint(1), 0x81);
        assert_eq!(UsbDir::of_endpoint_addr(0x81), UsbDir::In);
        assert_eq!(UsbDir::of_endpoint_addr(0x01), UsbDir::Out);
        assert_eq!(endpoint_number(0x81), 1);
    }

    #[test]
    fn setup_packet_from_wire() {
        // GET_DESCRIPTOR(configuration, 0), wLength = 0xff
        let raw = [0x80, 0x06, 0x00, 0x02, 0x00, 0x00, 0xff, 0x00];
        let setup = UsbSetupPacket::read_from(&raw[..]).unwrap();
        assert_eq!(setup.direction(), UsbDir::In);
        assert_eq!(setup.kind(), Some(RequestKind::Standard));
        assert_eq!(setup.recipient(), Some(Recipient::Device));
        assert_eq!(UsbSetupRequest::from_u8(setup.request), Some(UsbSetupRequest::GetDescriptor));
        assert_eq!(setup.descriptor_selector(), (UsbDescType::Config as u8, 0));
        assert_eq!(setup.length.get(), 0xff);
        assert_eq!(setup.as_bytes(), &raw[..]);
    }

    #[test]
    fn class_interface_request_bits() {
        let setup = UsbSetupPacket::new(0x21, 0x20, 0, 0, 7);
        assert_eq!(setup.direction(), UsbDir::Out);
        assert_eq!(setup.kind(), Some(RequestKind::Class));
        assert_eq!(setup.recipient(), Some(Recipient::Interface));

        let reserved = UsbSetupPacket::new(0x60, 0, 0, 0, 0);
        assert_eq!(reserved.kind(), None);
    }

    #[test]
    fn wire_sizes() {
        assert_eq!(core::mem::size_of::<UsbSetupPacket>(), 8);
        assert_eq!(core::mem::size_of::<UsbDeviceDescriptor>(), 18);
        assert_eq!(core::mem::size_of::<UsbConfigurationDescriptor>(), 9);
        assert_eq!(core::mem::size_of::<UsbInterfaceDescriptor>(), 9);
        assert_eq!(core::mem::size_of::<UsbEndpointDescriptor>(), 7);
    }
}
