//! Common utilities for usbip-server
//!
//! This crate provides shared functionality for the server and its tests:
//! the error type, logging bootstrap, the host-controller abstraction the
//! session engine drives, and in-memory test doubles.

pub mod error;
pub mod logging;
pub mod stream;
pub mod test_utils;
pub mod usb_types;

pub use error::{DeviceContext, Error, Result};
pub use logging::setup_logging;
pub use stream::ClientStream;
pub use usb_types::{
    ConfigSummary, ControlPipe, DEVICE_DESCRIPTOR_SIZE, DeviceDescriptor, DeviceInfo, DeviceSpeed,
    EndpointPipe, HostController, InterfaceDescriptor, MAX_ENDPOINTS, UsbError,
};
