//! Data endpoint transfers
//!
//! Bulk and interrupt I/O on one endpoint number of an open device, with rusb
//! errors mapped to [`UsbError`] so they can be reported in a SUBMIT response.

use std::sync::Arc;
use std::time::Duration;

use common::{EndpointPipe, UsbError};
use rusb::{Context, DeviceHandle, Direction, TransferType};
use tracing::{debug, trace};

/// Transfer type of one endpoint direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeKind {
    Bulk,
    Interrupt,
}

impl PipeKind {
    fn from_transfer_type(transfer_type: TransferType) -> Option<Self> {
        match transfer_type {
            TransferType::Bulk => Some(PipeKind::Bulk),
            TransferType::Interrupt => Some(PipeKind::Interrupt),
            // Isochronous scheduling is not provided
            _ => None,
        }
    }
}

/// Endpoint address and kind for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeAddress {
    pub address: u8,
    pub kind: PipeKind,
}

/// One data endpoint number, covering its IN and OUT halves
pub struct RusbEndpoint {
    handle: Arc<DeviceHandle<Context>>,
    number: u8,
    input: Option<PipeAddress>,
    output: Option<PipeAddress>,
    timeout: Duration,
    short_transfer: bool,
}

impl RusbEndpoint {
    pub(crate) fn new(
        handle: Arc<DeviceHandle<Context>>,
        number: u8,
        input: Option<PipeAddress>,
        output: Option<PipeAddress>,
        timeout: Duration,
    ) -> Self {
        Self {
            handle,
            number,
            input,
            output,
            timeout,
            short_transfer: false,
        }
    }
}

/// Resolve the IN and OUT halves of endpoint `number` from a configuration
pub(crate) fn resolve_endpoint(
    config: &rusb::ConfigDescriptor,
    number: u8,
) -> (Option<PipeAddress>, Option<PipeAddress>) {
    let mut input = None;
    let mut output = None;

    for interface in config.interfaces() {
        // Endpoint layout of the default alternate setting
        let Some(descriptor) = interface.descriptors().next() else {
            continue;
        };
        for endpoint in descriptor.endpoint_descriptors() {
            if endpoint.number() != number {
                continue;
            }
            let Some(kind) = PipeKind::from_transfer_type(endpoint.transfer_type()) else {
                debug!(
                    "Endpoint {:#04x} has unsupported transfer type {:?}",
                    endpoint.address(),
                    endpoint.transfer_type()
                );
                continue;
            };
            let pipe = PipeAddress {
                address: endpoint.address(),
                kind,
            };
            match endpoint.direction() {
                Direction::In => input = input.or(Some(pipe)),
                Direction::Out => output = output.or(Some(pipe)),
            }
        }
    }

    (input, output)
}

impl EndpointPipe for RusbEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UsbError> {
        let pipe = self.input.ok_or(UsbError::InvalidParam)?;
        let len = match pipe.kind {
            PipeKind::Bulk => self.handle.read_bulk(pipe.address, buf, self.timeout),
            PipeKind::Interrupt => self.handle.read_interrupt(pipe.address, buf, self.timeout),
        }
        .map_err(map_rusb_error)?;

        trace!(
            "Read {} of {} bytes from endpoint {:#04x}",
            len,
            buf.len(),
            pipe.address
        );

        if len < buf.len() && !self.short_transfer {
            debug!(
                "Short read on endpoint {} without short transfers enabled",
                self.number
            );
            return Err(UsbError::Io);
        }
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, UsbError> {
        let pipe = self.output.ok_or(UsbError::InvalidParam)?;
        let len = match pipe.kind {
            PipeKind::Bulk => self.handle.write_bulk(pipe.address, buf, self.timeout),
            PipeKind::Interrupt => self.handle.write_interrupt(pipe.address, buf, self.timeout),
        }
        .map_err(map_rusb_error)?;

        trace!("Wrote {} bytes to endpoint {:#04x}", len, pipe.address);
        Ok(len)
    }

    fn set_short_transfer(&mut self, enabled: bool) -> Result<(), UsbError> {
        if self.input.is_none() {
            return Err(UsbError::InvalidParam);
        }
        self.short_transfer = enabled;
        Ok(())
    }
}

/// Map rusb::Error to UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        rusb::Error::NotSupported => UsbError::NotSupported,
        _ => UsbError::Other(err.to_string()),
    }
}
