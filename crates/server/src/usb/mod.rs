//! libusb host controller
//!
//! Implements the host-controller traits from `common::usb_types` on top of
//! rusb. Every session opens its own handle; transfers are synchronous and run
//! on the session's blocking worker.

pub mod device;
pub mod manager;
pub mod transfers;

pub use device::RusbControl;
pub use manager::{LocalDevice, RusbController, check_filter};
pub use transfers::{RusbEndpoint, map_rusb_error};
