//! Request loop of an imported device
//!
//! Each iteration reads one envelope and runs it to completion before the
//! next is read. Control requests on endpoint 0 are split into the standard
//! requests the server answers itself (device, configuration and string
//! descriptors, SET_CONFIGURATION) and raw requests passed to the device.
//! Requests on other endpoints are bulk or interrupt transfers.
//!
//! Some malformed requests are dropped without a response: oversized
//! lengths, unknown descriptor types and failed control requests. A failed
//! data transfer is answered with a negative status instead.

use std::io::{Read, Write};

use common::{ControlPipe, DeviceDescriptor, EndpointPipe, Error, Result, UsbError};
use protocol::{
    Command, DESCRIPTOR_CONFIGURATION, DESCRIPTOR_DEVICE, DESCRIPTOR_STRING, DIR_OUT,
    REQUEST_GET_DESCRIPTOR, REQUEST_SET_CONFIGURATION, REQUEST_TYPE_STANDARD_IN,
    REQUEST_TYPE_STANDARD_OUT, SubmitRequest, SubmitResponse, UnlinkRequest,
    decode_generic_header, read_exact, write_submit_response,
};
use tracing::{debug, trace, warn};

use crate::session::endpoints::EndpointTable;

/// Largest data stage accepted on the control pipe
pub const MAX_CONTROL_LENGTH: usize = 1024;

/// Largest bulk or interrupt transfer accepted
pub const MAX_TRANSFER_LENGTH: usize = 32768;

pub struct RequestLoop<'a, S, C: ControlPipe> {
    stream: &'a mut S,
    endpoints: EndpointTable<C>,
    /// Device descriptor read at import
    descriptor: DeviceDescriptor,
}

impl<'a, S, C> RequestLoop<'a, S, C>
where
    S: Read + Write,
    C: ControlPipe,
{
    pub fn new(stream: &'a mut S, endpoints: EndpointTable<C>, descriptor: DeviceDescriptor) -> Self {
        Self {
            stream,
            endpoints,
            descriptor,
        }
    }

    /// Serve requests until the stream fails or an unknown command arrives
    pub fn run(mut self) -> Result<()> {
        loop {
            match decode_generic_header(self.stream)? {
                Command::Submit(submit) => self.submit(&submit)?,
                Command::Unlink(unlink) => self.unlink(&unlink),
                Command::Unknown(header) => return Err(Error::UnknownCommand(header.command)),
            }
        }
    }

    fn submit(&mut self, submit: &SubmitRequest) -> Result<()> {
        trace!(
            "SUBMIT seq={} ep={} dir={} len={}",
            submit.header.seqnum, submit.header.endpoint, submit.header.direction, submit.length
        );

        if submit.header.endpoint != 0 {
            return self.data_transfer(submit);
        }

        let setup = submit.setup;
        match (setup.request(), setup.request_type()) {
            (REQUEST_GET_DESCRIPTOR, REQUEST_TYPE_STANDARD_IN) => self.get_descriptor(submit),
            (REQUEST_SET_CONFIGURATION, REQUEST_TYPE_STANDARD_OUT) => {
                self.set_configuration(submit)
            }
            _ => self.control_request(submit),
        }
    }

    /// Cancellation is not supported; the request is consumed and ignored
    fn unlink(&mut self, unlink: &UnlinkRequest) {
        debug!(
            "Ignoring UNLINK seq={} of seq={}",
            unlink.header.seqnum, unlink.unlink_seqnum
        );
    }

    fn get_descriptor(&mut self, submit: &SubmitRequest) -> Result<()> {
        let setup = submit.setup;
        let seqnum = submit.header.seqnum;

        match setup.descriptor_type() {
            DESCRIPTOR_DEVICE => {
                let bytes = *self.descriptor.as_bytes();
                self.respond(seqnum, &bytes)
            }
            DESCRIPTOR_CONFIGURATION => {
                let Some(len) = control_length(setup.length()) else {
                    return Ok(());
                };
                let mut buf = vec![0u8; MAX_CONTROL_LENGTH];
                match self
                    .endpoints
                    .control()
                    .full_descriptor(setup.descriptor_index(), &mut buf)
                {
                    Ok(read) => trace!("Configuration descriptor: {} bytes", read),
                    Err(e) => {
                        warn!(
                            "Cannot get configuration descriptor {}: {}",
                            setup.descriptor_index(),
                            e
                        );
                        return Ok(());
                    }
                }
                self.respond(seqnum, &buf[..len])
            }
            DESCRIPTOR_STRING => {
                let Some(len) = control_length(setup.length()) else {
                    return Ok(());
                };
                let mut buf = vec![0u8; len];
                if let Err(e) = self.endpoints.control().control_request(&setup, &mut buf, true) {
                    warn!("Cannot get string descriptor {}: {}", setup.descriptor_index(), e);
                    return Ok(());
                }
                self.respond(seqnum, &buf)
            }
            other => {
                warn!("Unknown descriptor type {:#04x} requested", other);
                Ok(())
            }
        }
    }

    /// Rebind data endpoints around a configuration change
    fn set_configuration(&mut self, submit: &SubmitRequest) -> Result<()> {
        let configuration = submit.setup.value();

        self.endpoints.close_all();
        if let Err(e) = self.endpoints.control().set_configuration(configuration) {
            warn!("Cannot set configuration {}: {}", configuration, e);
            return Ok(());
        }

        self.respond(submit.header.seqnum, &[])?;

        let opened = self.endpoints.open_all(true);
        debug!(
            "Configuration {} active, {} data endpoints open",
            configuration, opened
        );
        Ok(())
    }

    fn control_request(&mut self, submit: &SubmitRequest) -> Result<()> {
        let setup = submit.setup;
        let Some(len) = control_length(setup.length()) else {
            return Ok(());
        };
        let device_to_host = setup.is_device_to_host();

        let mut buf = if !device_to_host && len > 0 {
            read_exact(self.stream, len)?
        } else {
            vec![0u8; len]
        };

        if let Err(e) = self.endpoints.control().control_request(&setup, &mut buf, true) {
            warn!("Cannot do control request {:02x?}: {}", setup.as_bytes(), e);
            return Ok(());
        }

        if device_to_host {
            self.respond(submit.header.seqnum, &buf)
        } else {
            self.respond(submit.header.seqnum, &[])
        }
    }

    fn data_transfer(&mut self, submit: &SubmitRequest) -> Result<()> {
        let Some(len) = usize::try_from(submit.length)
            .ok()
            .filter(|len| *len <= MAX_TRANSFER_LENGTH)
        else {
            warn!(
                "Transfer length {} on endpoint {} exceeds {}",
                submit.length, submit.header.endpoint, MAX_TRANSFER_LENGTH
            );
            return Ok(());
        };
        let endpoint_number = submit.header.endpoint;
        let seqnum = submit.header.seqnum;

        if submit.header.direction == DIR_OUT {
            let data = if len > 0 {
                read_exact(self.stream, len)?
            } else {
                Vec::new()
            };
            let result = match self.endpoints.endpoint(endpoint_number) {
                Some(endpoint) => endpoint.write(&data),
                None => Err(UsbError::NotOpen),
            };
            match result {
                Ok(written) => {
                    trace!("Wrote {} bytes to endpoint {}", written, endpoint_number);
                    self.respond(seqnum, &[])
                }
                Err(e) => self.respond_error(seqnum, endpoint_number, e),
            }
        } else {
            let mut buf = vec![0u8; len];
            let result = match self.endpoints.endpoint(endpoint_number) {
                Some(endpoint) => endpoint.read(&mut buf),
                None => Err(UsbError::NotOpen),
            };
            match result {
                Ok(read) => {
                    trace!("Read {} bytes from endpoint {}", read, endpoint_number);
                    self.respond(seqnum, &buf[..read.min(len)])
                }
                Err(e) => self.respond_error(seqnum, endpoint_number, e),
            }
        }
    }

    /// Successful completion; the payload length is the reported length
    fn respond(&mut self, seqnum: u32, payload: &[u8]) -> Result<()> {
        // Payloads are capped well below i32::MAX
        let response = SubmitResponse::success(seqnum, payload.len() as i32);
        write_submit_response(self.stream, &response, payload)?;
        Ok(())
    }

    fn respond_error(&mut self, seqnum: u32, endpoint: u32, error: UsbError) -> Result<()> {
        warn!("Transfer on endpoint {} failed: {}", endpoint, error);
        let response = SubmitResponse::error(seqnum, error.errno());
        write_submit_response(self.stream, &response, &[])?;
        Ok(())
    }
}

/// wLength of a control request, or None (logged) when it exceeds the cap
fn control_length(length: u16) -> Option<usize> {
    let len = usize::from(length);
    if len > MAX_CONTROL_LENGTH {
        warn!(
            "Control request length {} exceeds {}",
            len, MAX_CONTROL_LENGTH
        );
        return None;
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_length_cap() {
        assert_eq!(control_length(0), Some(0));
        assert_eq!(control_length(1024), Some(1024));
        assert_eq!(control_length(1025), None);
        assert_eq!(control_length(u16::MAX), None);
    }
}
