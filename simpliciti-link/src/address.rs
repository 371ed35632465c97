//! Device addressing.
//!
//! Every device owns a 4-byte address, set once at startup. It is either derived from the
//! hardware unique value (the Ethernet MAC programmed in the two flash user registers) or
//! taken from a fixed configuration.
use crate::device::Network;
use crate::error::NetError;

use log::{info, warn};

/// Value of an erased (unprogrammed) flash user register.
pub const UNPROGRAMMED: u32 = 0xFFFF_FFFF;

/// Leading byte values reserved by the transport.
const RESERVED_LEADING: [u8; 2] = [0x00, 0xFF];

/// Network address of a device.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DeviceAddress([u8; 4]);

impl DeviceAddress {
    /// Broadcast destination, never a valid device address.
    pub const BROADCAST: DeviceAddress = DeviceAddress([0xFF; 4]);

    /// Builds an address from raw bytes, rejecting reserved leading bytes.
    pub fn new(bytes: [u8; 4]) -> Result<Self, AddressError> {
        if RESERVED_LEADING.contains(&bytes[0]) {
            return Err(AddressError::ReservedLeadingByte { byte: bytes[0] });
        }
        Ok(DeviceAddress(bytes))
    }

    /// Derives an address from the two flash user registers.
    ///
    /// The four bytes are the three low bytes of `user1` (high to low) followed by the third
    /// byte of `user0`. A reserved leading byte gets 0x80 XOR-ed in.
    pub fn derive(user0: u32, user1: u32) -> Result<Self, AddressError> {
        if user0 == UNPROGRAMMED || user1 == UNPROGRAMMED {
            return Err(AddressError::Unprogrammed);
        }
        let mut bytes = [
            (user1 >> 16) as u8,
            (user1 >> 8) as u8,
            user1 as u8,
            (user0 >> 16) as u8,
        ];
        if RESERVED_LEADING.contains(&bytes[0]) {
            bytes[0] ^= 0x80;
        }
        Ok(DeviceAddress(bytes))
    }

    /// Wire representation, also used by frame codecs.
    pub(crate) const fn from_wire(bytes: [u8; 4]) -> Self {
        DeviceAddress(bytes)
    }

    pub fn bytes(&self) -> [u8; 4] {
        self.0
    }
}

impl core::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Source of the hardware unique value.
pub trait HardwareId {
    /// Returns the `(user0, user1)` flash user registers.
    fn user_registers(&self) -> (u32, u32);
}

/// A 6-byte MAC address stored in the user registers.
///
/// The board keeps the OUI in `user0` and the NIC specific part in `user1`, each as a
/// 24-bit value. The NIC bytes are laid out so that the derived address reads
/// `[mac[4], mac[3], mac[5], mac[2]]`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MacAddress(pub [u8; 6]);

impl HardwareId for MacAddress {
    fn user_registers(&self) -> (u32, u32) {
        let m = self.0;
        let user0 = (m[0] as u32) | ((m[1] as u32) << 8) | ((m[2] as u32) << 16);
        let user1 = (m[5] as u32) | ((m[3] as u32) << 8) | ((m[4] as u32) << 16);
        (user0, user1)
    }
}

/// Raw register pair, for boards that expose the registers directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UserRegisters {
    pub user0: u32,
    pub user1: u32,
}

impl HardwareId for UserRegisters {
    fn user_registers(&self) -> (u32, u32) {
        (self.user0, self.user1)
    }
}

/// Where the device address comes from, selected at startup.
pub enum AddressSource<'a> {
    Hardware(&'a dyn HardwareId),
    Fixed(DeviceAddress),
}

/// Resolves the device address and configures the transport with it.
///
/// The transport is only touched once the address is known to be valid. There is no retry:
/// an unprogrammed hardware value leaves the device without an identity.
pub fn set_device_address<N: Network + ?Sized>(
    net: &mut N,
    source: AddressSource<'_>,
) -> Result<DeviceAddress, AddressError> {
    let address = match source {
        AddressSource::Hardware(hw) => {
            let (user0, user1) = hw.user_registers();
            DeviceAddress::derive(user0, user1).map_err(|err| {
                warn!("Hardware address unavailable: {}", err);
                err
            })?
        }
        AddressSource::Fixed(address) => address,
    };
    net.set_address(address)?;
    info!("Device address set to {}", address);
    Ok(address)
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Hardware unique value is not programmed.")]
    Unprogrammed,

    #[error("Address leading byte {:#04x} is reserved.", .byte)]
    ReservedLeadingByte { byte: u8 },

    #[error("Transport refused the address.")]
    Network(#[from] NetError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Call, ScriptedNetwork};

    #[test]
    fn mac_scenario_needs_no_correction() {
        let mac = MacAddress([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]);
        let (user0, user1) = mac.user_registers();
        let address = DeviceAddress::derive(user0, user1).unwrap();
        assert_eq!(address.bytes(), [0x22, 0x11, 0x33, 0xCC]);
    }

    #[test]
    fn reserved_leading_bytes_are_flipped() {
        assert_eq!(
            DeviceAddress::derive(0x0012_3456, 0x0000_1234).unwrap().bytes(),
            [0x80, 0x12, 0x34, 0x12]
        );
        assert_eq!(
            DeviceAddress::derive(0x0012_3456, 0x00FF_1234).unwrap().bytes(),
            [0x7F, 0x12, 0x34, 0x12]
        );
    }

    #[test]
    fn fixed_address_rejects_reserved_bytes() {
        assert_eq!(
            DeviceAddress::new([0xFF, 1, 2, 3]),
            Err(AddressError::ReservedLeadingByte { byte: 0xFF })
        );
        assert!(DeviceAddress::new([0x79, 0x56, 0x34, 0x12]).is_ok());
    }

    #[test]
    fn unprogrammed_hardware_never_reaches_transport() {
        let mut net = ScriptedNetwork::new(4);
        let erased = UserRegisters {
            user0: UNPROGRAMMED,
            user1: 0x0011_2233,
        };
        let result = set_device_address(&mut net, AddressSource::Hardware(&erased));
        assert_eq!(result, Err(AddressError::Unprogrammed));
        assert!(net.calls().is_empty());
    }

    #[test]
    fn derived_address_is_applied_once() {
        let mut net = ScriptedNetwork::new(4);
        let mac = MacAddress([0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]);
        let address = set_device_address(&mut net, AddressSource::Hardware(&mac)).unwrap();
        assert_eq!(net.calls(), &[Call::SetAddress(address)]);
        assert_eq!(net.address(), Some(address));
    }
}
