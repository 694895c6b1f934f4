//! USB/IP server library
//!
//! The binary wires these modules together; tests drive them directly with
//! the in-memory host controller from `common::test_utils`.

pub mod config;
pub mod network;
pub mod session;
pub mod usb;
