//! Open device and its control pipe
//!
//! An exclusive open detaches kernel drivers and claims every interface of
//! the active configuration; dropping it releases them and hands the
//! interfaces back to the kernel. A shared open leaves the drivers alone and
//! only answers descriptor queries.

use std::sync::Arc;
use std::time::Duration;

use common::{
    ConfigSummary, ControlPipe, DEVICE_DESCRIPTOR_SIZE, DeviceDescriptor, DeviceInfo, DeviceSpeed,
    InterfaceDescriptor, MAX_ENDPOINTS, UsbError,
};
use protocol::{
    DESCRIPTOR_CONFIGURATION, DESCRIPTOR_DEVICE, REQUEST_GET_DESCRIPTOR, REQUEST_TYPE_STANDARD_IN,
    SetupPacket,
};
use rusb::{Context, Device, DeviceHandle};
use tracing::{debug, warn};

use crate::usb::transfers::{RusbEndpoint, map_rusb_error, resolve_endpoint};

/// Endpoint 0 of a device opened through libusb
pub struct RusbControl {
    device: Device<Context>,
    /// Shared with every data endpoint opened from this pipe
    handle: Arc<DeviceHandle<Context>>,
    descriptor: DeviceDescriptor,
    claimed_interfaces: Vec<u8>,
    /// Interfaces were claimed at open; required to reconfigure or open endpoints
    exclusive: bool,
    timeout: Duration,
}

impl RusbControl {
    /// Open the device, claiming the interfaces of its active configuration
    /// when `exclusive`
    pub(crate) fn open(
        device: Device<Context>,
        timeout: Duration,
        exclusive: bool,
    ) -> Result<Self, UsbError> {
        let handle = device.open().map_err(|e| {
            warn!(
                "Failed to open device bus={} addr={}: {}",
                device.bus_number(),
                device.address(),
                e
            );
            map_rusb_error(e)
        })?;

        let mut raw = [0u8; DEVICE_DESCRIPTOR_SIZE];
        let len = handle
            .read_control(
                REQUEST_TYPE_STANDARD_IN,
                REQUEST_GET_DESCRIPTOR,
                u16::from(DESCRIPTOR_DEVICE) << 8,
                0,
                &mut raw,
                timeout,
            )
            .map_err(map_rusb_error)?;
        if len < DEVICE_DESCRIPTOR_SIZE {
            warn!("Device descriptor truncated to {} bytes", len);
            return Err(UsbError::Io);
        }

        let mut control = Self {
            device,
            handle: Arc::new(handle),
            descriptor: DeviceDescriptor(raw),
            claimed_interfaces: Vec::new(),
            exclusive,
            timeout,
        };
        if exclusive {
            control.claim_interfaces();
        }

        debug!(
            "Opened device bus={} addr={} ({:04x}:{:04x}, exclusive={})",
            control.device.bus_number(),
            control.device.address(),
            control.descriptor.vendor_id(),
            control.descriptor.product_id(),
            exclusive
        );
        Ok(control)
    }

    /// Detach kernel drivers from and claim each interface of the active configuration
    ///
    /// Interfaces that cannot be claimed are logged and skipped; transfers on
    /// their endpoints fail individually.
    fn claim_interfaces(&mut self) {
        let config = match self.device.active_config_descriptor() {
            Ok(config) => config,
            Err(e) => {
                debug!("No active configuration to claim: {}", e);
                return;
            }
        };

        for interface in config.interfaces() {
            let number = interface.number();

            match self.handle.kernel_driver_active(number) {
                Ok(true) => {
                    debug!("Detaching kernel driver from interface {}", number);
                    if let Err(e) = self.handle.detach_kernel_driver(number) {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            number, e
                        );
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    debug!(
                        "Could not check kernel driver status for interface {}: {}",
                        number, e
                    );
                }
            }

            match self.handle.claim_interface(number) {
                Ok(()) => {
                    debug!("Claimed interface {}", number);
                    self.claimed_interfaces.push(number);
                }
                Err(e) => warn!("Failed to claim interface {}: {}", number, e),
            }
        }
    }

    /// Release claimed interfaces and reattach kernel drivers
    fn release_interfaces(&mut self) {
        for interface in self.claimed_interfaces.drain(..) {
            if let Err(e) = self.handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
            if let Err(e) = self.handle.attach_kernel_driver(interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    interface, e
                );
            }
        }
    }
}

impl Drop for RusbControl {
    fn drop(&mut self) {
        self.release_interfaces();
        debug!(
            "Closed device bus={} addr={}",
            self.device.bus_number(),
            self.device.address()
        );
    }
}

impl ControlPipe for RusbControl {
    type Endpoint = RusbEndpoint;

    fn device_descriptor(&mut self) -> Result<DeviceDescriptor, UsbError> {
        Ok(self.descriptor)
    }

    fn active_configuration(&mut self) -> Result<u8, UsbError> {
        self.handle.active_configuration().map_err(map_rusb_error)
    }

    fn device_info(&mut self) -> Result<DeviceInfo, UsbError> {
        Ok(DeviceInfo {
            busnum: u32::from(self.device.bus_number()),
            devnum: u32::from(self.device.address()),
            speed: map_device_speed(self.device.speed()),
            vendor_id: self.descriptor.vendor_id(),
            product_id: self.descriptor.product_id(),
            bcd_device: self.descriptor.bcd_device(),
        })
    }

    fn config_descriptor(&mut self) -> Result<ConfigSummary, UsbError> {
        let config = self
            .device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;
        Ok(ConfigSummary {
            configuration_value: config.number(),
            num_interfaces: config.num_interfaces(),
            configuration_string: config.description_string_index().unwrap_or(0),
        })
    }

    fn interface_descriptor(&mut self, index: u8) -> Result<InterfaceDescriptor, UsbError> {
        let config = self
            .device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;
        let interface = config
            .interfaces()
            .nth(usize::from(index))
            .ok_or(UsbError::NotFound)?;
        let descriptor = interface.descriptors().next().ok_or(UsbError::NotFound)?;

        Ok(InterfaceDescriptor {
            number: descriptor.interface_number(),
            class: descriptor.class_code(),
            subclass: descriptor.sub_class_code(),
            protocol: descriptor.protocol_code(),
        })
    }

    fn full_descriptor(&mut self, config_index: u8, buf: &mut [u8]) -> Result<usize, UsbError> {
        self.handle
            .read_control(
                REQUEST_TYPE_STANDARD_IN,
                REQUEST_GET_DESCRIPTOR,
                (u16::from(DESCRIPTOR_CONFIGURATION) << 8) | u16::from(config_index),
                0,
                buf,
                self.timeout,
            )
            .map_err(map_rusb_error)
    }

    fn set_configuration(&mut self, configuration: u16) -> Result<(), UsbError> {
        if !self.exclusive {
            return Err(UsbError::Access);
        }
        let value = u8::try_from(configuration).map_err(|_| UsbError::InvalidParam)?;

        self.release_interfaces();
        let result = self
            .handle
            .set_active_configuration(value)
            .map_err(map_rusb_error);
        // Claim whatever the device now exposes, even after a failed switch
        self.claim_interfaces();
        result
    }

    fn control_request(
        &mut self,
        setup: &SetupPacket,
        buf: &mut [u8],
        short_ok: bool,
    ) -> Result<usize, UsbError> {
        let len = if setup.is_device_to_host() {
            self.handle.read_control(
                setup.request_type(),
                setup.request(),
                setup.value(),
                setup.index(),
                buf,
                self.timeout,
            )
        } else {
            self.handle.write_control(
                setup.request_type(),
                setup.request(),
                setup.value(),
                setup.index(),
                buf,
                self.timeout,
            )
        }
        .map_err(map_rusb_error)?;

        if len < buf.len() && !short_ok {
            return Err(UsbError::Io);
        }
        Ok(len)
    }

    fn open_endpoint(&mut self, number: u8) -> Result<RusbEndpoint, UsbError> {
        if !self.exclusive {
            return Err(UsbError::Access);
        }
        if number == 0 || usize::from(number) >= MAX_ENDPOINTS {
            return Err(UsbError::InvalidParam);
        }
        let config = self
            .device
            .active_config_descriptor()
            .map_err(map_rusb_error)?;
        let (input, output) = resolve_endpoint(&config, number);
        if input.is_none() && output.is_none() {
            return Err(UsbError::NotFound);
        }

        Ok(RusbEndpoint::new(
            self.handle.clone(),
            number,
            input,
            output,
            self.timeout,
        ))
    }
}

/// Map rusb device speed to DeviceSpeed
fn map_device_speed(speed: rusb::Speed) -> DeviceSpeed {
    match speed {
        rusb::Speed::Low => DeviceSpeed::Low,
        rusb::Speed::Full => DeviceSpeed::Full,
        rusb::Speed::High => DeviceSpeed::High,
        rusb::Speed::Super => DeviceSpeed::Super,
        rusb::Speed::SuperPlus => DeviceSpeed::SuperPlus,
        _ => DeviceSpeed::Unknown,
    }
}
