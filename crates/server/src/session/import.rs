//! Import request: attach a device and hand it to the request loop

use common::{ClientStream, Error, HostController, Result};
use protocol::{
    BUS_ID_SIZE, OP_REP_IMPORT, RES_NO_DEVICE, RES_OK, decode_bus_id, encode_op_header,
    read_bus_id, write_device_summary,
};
use tracing::{debug, info, warn};

use crate::session::devlist::describe_device;
use crate::session::endpoints::EndpointTable;
use crate::session::request_loop::RequestLoop;

/// Characters before the unit number in a bus id ("usb")
pub const BUS_ID_PREFIX_LEN: usize = 3;

/// Extract the unit number from a bus id such as `usb0`
///
/// Everything after the prefix must be decimal digits. A bus id no longer
/// than the prefix yields an empty unit, which names no device and is
/// answered with NO_DEVICE by the import.
pub fn parse_unit(bus_id: &str) -> Result<&str> {
    let unit = if bus_id.len() <= BUS_ID_PREFIX_LEN {
        ""
    } else {
        bus_id
            .get(BUS_ID_PREFIX_LEN..)
            .filter(|unit| unit.bytes().all(|b| b.is_ascii_digit()))
            .ok_or_else(|| Error::InvalidBusId(bus_id.to_string()))?
    };
    Ok(unit)
}

/// Answer an import request and, once attached, serve the device
pub fn import_device<S, H>(stream: &mut S, host: &H) -> Result<()>
where
    S: ClientStream,
    H: HostController,
{
    let field: [u8; BUS_ID_SIZE] = read_bus_id(stream)?;
    let bus_id = decode_bus_id(&field);
    let unit = parse_unit(&bus_id)?;

    let control = match host.open_control(unit) {
        Ok(control) => control,
        Err(e) => {
            warn!("Cannot open device {}: {}", bus_id, e);
            encode_op_header(stream, OP_REP_IMPORT, RES_NO_DEVICE)?;
            return Ok(());
        }
    };
    let mut endpoints = EndpointTable::new(control);
    let opened = endpoints.open_all(false);
    debug!("Opened {} data endpoints of {}", opened, bus_id);

    if let Err(e) = stream.set_nodelay() {
        debug!("Cannot set TCP_NODELAY: {}", e);
    }
    encode_op_header(stream, OP_REP_IMPORT, RES_OK)?;

    let exported = describe_device(endpoints.control(), unit)?;
    write_device_summary(stream, &exported.summary)?;

    info!(
        "Imported {} ({:04x}:{:04x})",
        bus_id, exported.summary.vendor_id, exported.summary.product_id
    );

    RequestLoop::new(stream, endpoints, exported.descriptor).run()
}
