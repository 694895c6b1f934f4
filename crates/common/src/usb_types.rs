//! Host-controller abstraction
//!
//! The server drives devices only through the traits in this module. A
//! [`HostController`] opens the control pipe (endpoint 0) of a local device
//! identified by its numeric unit; the control pipe answers descriptor and
//! configuration queries, issues raw control requests, and opens the data
//! endpoints of the active configuration.

use protocol::SetupPacket;
use thiserror::Error;

/// Size of a standard USB device descriptor
pub const DEVICE_DESCRIPTOR_SIZE: usize = 18;

/// Number of endpoint slots per device, control endpoint included
pub const MAX_ENDPOINTS: usize = 16;

/// Failure reported by the host controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    #[error("operation timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("no such device")]
    NoDevice,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("resource busy")]
    Busy,
    #[error("transfer overflow")]
    Overflow,
    #[error("input/output error")]
    Io,
    #[error("access denied")]
    Access,
    #[error("entity not found")]
    NotFound,
    #[error("endpoint not open")]
    NotOpen,
    #[error("operation not supported")]
    NotSupported,
    #[error("{0}")]
    Other(String),
}

impl UsbError {
    /// Negative Linux errno carried in a SUBMIT response status
    pub fn errno(&self) -> i32 {
        match self {
            UsbError::Timeout => -110,     // ETIMEDOUT
            UsbError::Pipe => -32,         // EPIPE
            UsbError::NoDevice => -19,     // ENODEV
            UsbError::InvalidParam => -22, // EINVAL
            UsbError::Busy => -16,         // EBUSY
            UsbError::Overflow => -75,     // EOVERFLOW
            UsbError::Io => -5,            // EIO
            UsbError::Access => -13,       // EACCES
            UsbError::NotFound => -2,      // ENOENT
            UsbError::NotOpen => -9,       // EBADF
            UsbError::NotSupported => -95, // EOPNOTSUPP
            UsbError::Other(_) => -5,      // EIO
        }
    }
}

/// Raw standard device descriptor, little-endian USB layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor(pub [u8; DEVICE_DESCRIPTOR_SIZE]);

impl DeviceDescriptor {
    pub fn as_bytes(&self) -> &[u8; DEVICE_DESCRIPTOR_SIZE] {
        &self.0
    }

    pub fn class(&self) -> u8 {
        self.0[4]
    }

    pub fn subclass(&self) -> u8 {
        self.0[5]
    }

    pub fn protocol(&self) -> u8 {
        self.0[6]
    }

    pub fn vendor_id(&self) -> u16 {
        u16::from_le_bytes([self.0[8], self.0[9]])
    }

    pub fn product_id(&self) -> u16 {
        u16::from_le_bytes([self.0[10], self.0[11]])
    }

    pub fn bcd_device(&self) -> u16 {
        u16::from_le_bytes([self.0[12], self.0[13]])
    }

    pub fn num_configurations(&self) -> u8 {
        self.0[17]
    }
}

/// Bus speed, numbered like the kernel's `usb_device_speed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSpeed {
    #[default]
    Unknown,
    Low,
    Full,
    High,
    Wireless,
    Super,
    SuperPlus,
}

impl DeviceSpeed {
    pub fn wire_value(self) -> u32 {
        match self {
            DeviceSpeed::Unknown => 0,
            DeviceSpeed::Low => 1,
            DeviceSpeed::Full => 2,
            DeviceSpeed::High => 3,
            DeviceSpeed::Wireless => 4,
            DeviceSpeed::Super => 5,
            DeviceSpeed::SuperPlus => 6,
        }
    }
}

/// Bus placement and identity of an open device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub busnum: u32,
    pub devnum: u32,
    pub speed: DeviceSpeed,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
}

/// Header fields of the active configuration descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigSummary {
    pub configuration_value: u8,
    pub num_interfaces: u8,
    /// iConfiguration string index
    pub configuration_string: u8,
}

/// Class triple of one interface (current alternate setting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Access to the local USB host controller
pub trait HostController {
    type Control: ControlPipe;

    /// Open endpoint 0 of the device with the given numeric unit
    ///
    /// The device is taken from its host drivers for the lifetime of the
    /// returned pipe, ready for data endpoints to be opened.
    fn open_control(&self, unit: &str) -> Result<Self::Control, UsbError>;

    /// Open endpoint 0 for descriptor queries only
    ///
    /// Host drivers stay bound; the pipe must not be used to change the
    /// configuration or open data endpoints.
    fn inspect_control(&self, unit: &str) -> Result<Self::Control, UsbError>;
}

/// Endpoint 0 of an open device
pub trait ControlPipe {
    type Endpoint: EndpointPipe;

    fn device_descriptor(&mut self) -> Result<DeviceDescriptor, UsbError>;

    /// bConfigurationValue of the active configuration (0 if unconfigured)
    fn active_configuration(&mut self) -> Result<u8, UsbError>;

    fn device_info(&mut self) -> Result<DeviceInfo, UsbError>;

    fn config_descriptor(&mut self) -> Result<ConfigSummary, UsbError>;

    /// Interface `index` of the active configuration
    fn interface_descriptor(&mut self, index: u8) -> Result<InterfaceDescriptor, UsbError>;

    /// Configuration descriptor `config_index` with all subordinate descriptors
    ///
    /// Fills at most `buf.len()` bytes and returns the count written.
    fn full_descriptor(&mut self, config_index: u8, buf: &mut [u8]) -> Result<usize, UsbError>;

    fn set_configuration(&mut self, configuration: u16) -> Result<(), UsbError>;

    /// Issue a raw control request
    ///
    /// For host-to-device requests `buf` holds the data stage; for
    /// device-to-host requests it receives it. With `short_ok` a reply
    /// shorter than wLength is not an error.
    fn control_request(
        &mut self,
        setup: &SetupPacket,
        buf: &mut [u8],
        short_ok: bool,
    ) -> Result<usize, UsbError>;

    /// Open data endpoint `number` (1..=15) of the active configuration
    fn open_endpoint(&mut self, number: u8) -> Result<Self::Endpoint, UsbError>;
}

/// A data endpoint; closed when dropped
pub trait EndpointPipe {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UsbError>;

    fn write(&mut self, buf: &[u8]) -> Result<usize, UsbError>;

    /// Allow reads to complete with fewer bytes than requested
    fn set_short_transfer(&mut self, enabled: bool) -> Result<(), UsbError>;
}
