//! USB/IP session engine
//!
//! A session serves one client connection: it reads a single operation
//! header and either answers a device list request or imports the device and
//! runs the request loop until the client goes away.

pub mod devlist;
pub mod endpoints;
pub mod import;
pub mod request_loop;

use common::{ClientStream, Error, HostController, Result};
use protocol::{OP_REQ_DEVLIST, OP_REQ_IMPORT, decode_op_header};
use tracing::debug;

pub use devlist::{ExportedDevice, bus_label, describe_device, list_devices};
pub use endpoints::EndpointTable;
pub use import::{import_device, parse_unit};
pub use request_loop::{MAX_CONTROL_LENGTH, MAX_TRANSFER_LENGTH, RequestLoop};

/// One client connection
pub struct Session<S, H> {
    stream: S,
    host: H,
    /// Unit reported by device list requests
    list_unit: String,
}

impl<S, H> Session<S, H>
where
    S: ClientStream,
    H: HostController,
{
    pub fn new(stream: S, host: H, list_unit: impl Into<String>) -> Self {
        Self {
            stream,
            host,
            list_unit: list_unit.into(),
        }
    }

    /// Read the operation header and run the matching handler
    ///
    /// Returns once the request is answered, or with the error that ended
    /// the session. Unknown opcodes get no reply.
    pub fn run(&mut self) -> Result<()> {
        let header = decode_op_header(&mut self.stream)?;

        match header.opcode {
            OP_REQ_DEVLIST => {
                debug!("Device list requested");
                list_devices(&mut self.stream, &self.host, &self.list_unit)
            }
            OP_REQ_IMPORT => {
                debug!("Import requested");
                import_device(&mut self.stream, &self.host)
            }
            opcode => Err(Error::UnknownOpcode(opcode)),
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn into_stream(self) -> S {
        self.stream
    }
}
