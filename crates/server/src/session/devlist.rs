//! Device list request

use std::io::Write;

use common::{ControlPipe, DeviceContext, DeviceDescriptor, HostController, Result};
use protocol::{
    DeviceSummary, InterfaceSummary, OP_REP_DEVLIST, RES_OK, encode_op_header,
    write_device_summary, write_interface_summary, write_u32,
};
use tracing::debug;

/// Everything sent about a device before its interfaces
#[derive(Debug, Clone)]
pub struct ExportedDevice {
    pub summary: DeviceSummary,
    pub descriptor: DeviceDescriptor,
}

/// Bus label and path reported for a unit
pub fn bus_label(unit: &str) -> String {
    format!("usb{unit}")
}

/// Fetch the descriptors that make up a device summary
pub fn describe_device<C: ControlPipe>(control: &mut C, unit: &str) -> Result<ExportedDevice> {
    let descriptor = control
        .device_descriptor()
        .device_context("get device descriptor")?;
    let configuration = control
        .active_configuration()
        .device_context("get active configuration")?;
    let info = control.device_info().device_context("get device info")?;
    let config = control
        .config_descriptor()
        .device_context("get configuration descriptor")?;

    let label = bus_label(unit);
    let summary = DeviceSummary {
        path: label.clone(),
        bus_id: label,
        busnum: info.busnum,
        devnum: info.devnum,
        speed: info.speed.wire_value(),
        vendor_id: info.vendor_id,
        product_id: info.product_id,
        bcd_device: info.bcd_device,
        class: descriptor.class(),
        subclass: descriptor.subclass(),
        protocol: descriptor.protocol(),
        configuration_value: configuration,
        num_configurations: descriptor.num_configurations(),
        num_interfaces: config.num_interfaces,
    };

    Ok(ExportedDevice {
        summary,
        descriptor,
    })
}

/// Answer a device list request for the single exported unit
///
/// The acknowledgment goes out first; a device that cannot be opened is
/// reported as an empty list. The device is only inspected, so its host
/// drivers stay bound.
pub fn list_devices<S, H>(stream: &mut S, host: &H, unit: &str) -> Result<()>
where
    S: Write,
    H: HostController,
{
    encode_op_header(stream, OP_REP_DEVLIST, RES_OK)?;

    let mut control = match host.inspect_control(unit) {
        Ok(control) => control,
        Err(e) => {
            debug!("No device on unit {}: {}", unit, e);
            write_u32(stream, 0)?;
            return Ok(());
        }
    };
    write_u32(stream, 1)?;

    let exported = describe_device(&mut control, unit)?;
    write_device_summary(stream, &exported.summary)?;

    for index in 0..exported.summary.num_interfaces {
        let interface = control
            .interface_descriptor(index)
            .device_context("get interface descriptor")?;
        write_interface_summary(
            stream,
            &InterfaceSummary {
                class: interface.class,
                subclass: interface.subclass,
                protocol: interface.protocol,
            },
        )?;
    }

    debug!(
        "Listed {:04x}:{:04x} with {} interfaces",
        exported.summary.vendor_id, exported.summary.product_id, exported.summary.num_interfaces
    );
    Ok(())
}
