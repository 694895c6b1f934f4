//! Wire constants and the USB setup packet
//!
//! Operation codes, result codes, loop command codes and the fixed record
//! sizes of the USB/IP wire format, plus a typed view of the 8-byte control
//! setup packet that travels inside a SUBMIT request.

/// Device list request (client -> server)
pub const OP_REQ_DEVLIST: u16 = 0x8005;
/// Device list reply (server -> client)
pub const OP_REP_DEVLIST: u16 = 0x0005;
/// Import request (client -> server)
pub const OP_REQ_IMPORT: u16 = 0x8003;
/// Import reply (server -> client)
pub const OP_REP_IMPORT: u16 = 0x0003;

/// Operation succeeded
pub const RES_OK: u32 = 0x00;
/// Requested device is not available
pub const RES_NO_DEVICE: u32 = 0x04;

/// Loop command: perform a transfer
pub const CMD_SUBMIT: u32 = 0x0001;
/// Loop command: cancel a transfer
pub const CMD_UNLINK: u32 = 0x0002;
/// Loop reply to a SUBMIT
pub const RET_SUBMIT: u32 = 0x0003;
/// Loop reply to an UNLINK
pub const RET_UNLINK: u32 = 0x0004;

/// Direction field value for host-to-device transfers
pub const DIR_OUT: u32 = 0;
/// Direction field value for device-to-host transfers
pub const DIR_IN: u32 = 1;

/// Operation header: version, opcode, result
pub const OP_HEADER_SIZE: usize = 8;
/// Common header shared by every loop record
pub const BASIC_HEADER_SIZE: usize = 20;
/// Fixed envelope read for every loop record (header + largest variant body)
pub const ENVELOPE_SIZE: usize = 48;
/// SUBMIT response record
pub const SUBMIT_RESPONSE_SIZE: usize = 48;
/// UNLINK response record
pub const UNLINK_RESPONSE_SIZE: usize = 24;

/// Device path field of a device summary
pub const DEVICE_PATH_SIZE: usize = 256;
/// Bus id field of a device summary and of an import request
pub const BUS_ID_SIZE: usize = 32;
/// Complete device summary record
pub const DEVICE_SUMMARY_SIZE: usize = DEVICE_PATH_SIZE + BUS_ID_SIZE + 24;
/// Interface summary record
pub const INTERFACE_SUMMARY_SIZE: usize = 4;

/// Standard request: GET_DESCRIPTOR
pub const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
/// Standard request: SET_CONFIGURATION
pub const REQUEST_SET_CONFIGURATION: u8 = 0x09;

/// Descriptor type: device
pub const DESCRIPTOR_DEVICE: u8 = 0x01;
/// Descriptor type: configuration
pub const DESCRIPTOR_CONFIGURATION: u8 = 0x02;
/// Descriptor type: string
pub const DESCRIPTOR_STRING: u8 = 0x03;

/// bmRequestType for a standard device-to-host request addressed to the device
pub const REQUEST_TYPE_STANDARD_IN: u8 = 0x80;
/// bmRequestType for a standard host-to-device request addressed to the device
pub const REQUEST_TYPE_STANDARD_OUT: u8 = 0x00;

/// USB control setup packet
///
/// Kept as the raw 8 bytes the client sent: the multi-byte fields are USB
/// little-endian and the whole packet is handed to the device unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket(pub [u8; 8]);

impl SetupPacket {
    /// Build a setup packet from its fields
    pub fn new(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> Self {
        let [v0, v1] = value.to_le_bytes();
        let [i0, i1] = index.to_le_bytes();
        let [l0, l1] = length.to_le_bytes();
        Self([request_type, request, v0, v1, i0, i1, l0, l1])
    }

    /// bmRequestType
    pub fn request_type(&self) -> u8 {
        self.0[0]
    }

    /// bRequest
    pub fn request(&self) -> u8 {
        self.0[1]
    }

    /// wValue
    pub fn value(&self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    /// wIndex
    pub fn index(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    /// wLength
    pub fn length(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }

    /// Data stage flows device-to-host (bit 7 of bmRequestType)
    pub fn is_device_to_host(&self) -> bool {
        self.0[0] & 0x80 != 0
    }

    /// Descriptor type of a GET_DESCRIPTOR request (high byte of wValue)
    pub fn descriptor_type(&self) -> u8 {
        self.0[3]
    }

    /// Descriptor index of a GET_DESCRIPTOR request (low byte of wValue)
    pub fn descriptor_index(&self) -> u8 {
        self.0[2]
    }

    /// Raw bytes as sent on the wire
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<[u8; 8]> for SetupPacket {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}
