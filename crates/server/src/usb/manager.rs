//! Local device discovery
//!
//! Devices are addressed by a numeric unit: the index of the device in the
//! list of exported devices (root hubs and filtered devices removed) sorted by
//! bus number and address.

use std::sync::Arc;
use std::time::Duration;

use common::{HostController, UsbError};
use rusb::{Context, Device, UsbContext};
use tracing::debug;

use crate::usb::device::RusbControl;
use crate::usb::transfers::map_rusb_error;

/// Linux Foundation vendor id used by root hubs
const ROOT_HUB_VENDOR: u16 = 0x1d6b;
const HUB_CLASS: u8 = 0x09;

/// A device the server would export, as printed by `--list-devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDevice {
    pub unit: usize,
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub class: u8,
}

/// libusb-backed host controller
///
/// Cloning is cheap; each session gets its own clone.
#[derive(Clone)]
pub struct RusbController {
    context: Context,
    filters: Arc<Vec<String>>,
    timeout: Duration,
}

impl RusbController {
    /// Create a controller exposing devices matched by `filters`
    ///
    /// A zero `timeout` waits indefinitely on transfers.
    pub fn new(filters: Vec<String>, timeout: Duration) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            filters: Arc::new(filters),
            timeout,
        })
    }

    /// Exported devices in unit order
    fn exported_devices(&self) -> Result<Vec<Device<Context>>, UsbError> {
        let list = self.context.devices().map_err(map_rusb_error)?;
        let mut devices: Vec<Device<Context>> = list
            .iter()
            .filter(|device| self.is_exported(device))
            .collect();
        devices.sort_by_key(|device| (device.bus_number(), device.address()));
        Ok(devices)
    }

    fn is_exported(&self, device: &Device<Context>) -> bool {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(e) => {
                debug!(
                    "Skipping device bus={} addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                return false;
            }
        };

        if is_root_hub(desc.vendor_id(), desc.class_code()) {
            debug!(
                "Skipping root hub: bus={}, addr={}",
                device.bus_number(),
                device.address()
            );
            return false;
        }

        if !check_filter(desc.vendor_id(), desc.product_id(), &self.filters) {
            debug!(
                "Device ignored by filter: bus={}, addr={}, vid={:#06x}, pid={:#06x}",
                device.bus_number(),
                device.address(),
                desc.vendor_id(),
                desc.product_id()
            );
            return false;
        }

        true
    }

    /// Exported device with the given unit number
    fn find_device(&self, unit: &str) -> Result<Device<Context>, UsbError> {
        let index: usize = unit.parse().map_err(|_| UsbError::NoDevice)?;
        self.exported_devices()?
            .into_iter()
            .nth(index)
            .ok_or(UsbError::NoDevice)
    }

    /// Describe every exported device with its unit number
    pub fn list_devices(&self) -> Result<Vec<LocalDevice>, UsbError> {
        let devices = self.exported_devices()?;
        let mut listed = Vec::with_capacity(devices.len());

        for (unit, device) in devices.iter().enumerate() {
            let desc = device.device_descriptor().map_err(map_rusb_error)?;
            listed.push(LocalDevice {
                unit,
                bus_number: device.bus_number(),
                address: device.address(),
                vendor_id: desc.vendor_id(),
                product_id: desc.product_id(),
                class: desc.class_code(),
            });
        }

        Ok(listed)
    }
}

impl HostController for RusbController {
    type Control = RusbControl;

    fn open_control(&self, unit: &str) -> Result<RusbControl, UsbError> {
        RusbControl::open(self.find_device(unit)?, self.timeout, true)
    }

    fn inspect_control(&self, unit: &str) -> Result<RusbControl, UsbError> {
        RusbControl::open(self.find_device(unit)?, self.timeout, false)
    }
}

fn is_root_hub(vendor_id: u16, class: u8) -> bool {
    vendor_id == ROOT_HUB_VENDOR && class == HUB_CLASS
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filters have the form `0xVID:0xPID`, either side may be `*`. No filters
/// means every device is allowed.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        id_matches(filter_vid, vid) && id_matches(filter_pid, pid)
    })
}

fn id_matches(pattern: &str, id: u16) -> bool {
    if pattern == "*" {
        return true;
    }
    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);
    u16::from_str_radix(hex, 16).is_ok_and(|value| value == id)
}
