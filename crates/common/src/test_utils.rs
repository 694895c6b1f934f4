//! Test utilities for usbip-server
//!
//! Provides an in-memory host controller and a scripted client stream so
//! sessions can be exercised without hardware or sockets.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockDevice, MockHostController};
//! use common::usb_types::{ControlPipe, HostController};
//!
//! let host = MockHostController::new().with_device("0", MockDevice::new(0x1234, 0x5678));
//! let mut control = host.open_control("0").unwrap();
//! assert_eq!(control.device_descriptor().unwrap().vendor_id(), 0x1234);
//! assert!(host.open_control("1").is_err());
//! ```

use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use protocol::{
    BasicHeader, CMD_SUBMIT, CMD_UNLINK, DIR_IN, DIR_OUT, OP_REQ_DEVLIST, OP_REQ_IMPORT,
    OpHeader, SetupPacket, SubmitRequest, UnlinkRequest, encode_bus_id,
};

use crate::usb_types::{
    ConfigSummary, ControlPipe, DEVICE_DESCRIPTOR_SIZE, DeviceDescriptor, DeviceInfo,
    DeviceSpeed, EndpointPipe, HostController, InterfaceDescriptor, UsbError,
};

/// Device-side call observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    OpenControl(String),
    InspectControl(String),
    OpenEndpoint(u8),
    CloseEndpoint(u8),
    SetConfiguration(u16),
    SetShortTransfer(u8),
    ControlRequest(SetupPacket),
    FullDescriptor(u8),
    EndpointRead(u8, usize),
    EndpointWrite(u8, Vec<u8>),
}

/// One simulated device
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub descriptor: DeviceDescriptor,
    pub info: DeviceInfo,
    /// Active bConfigurationValue
    pub configuration: u8,
    /// Data endpoint numbers present in each configuration
    pub configurations: BTreeMap<u8, Vec<u8>>,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl MockDevice {
    /// High-speed device with one vendor-specific interface and endpoints 1 and 2
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        let [v0, v1] = vendor_id.to_le_bytes();
        let [p0, p1] = product_id.to_le_bytes();
        let raw: [u8; DEVICE_DESCRIPTOR_SIZE] = [
            18, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 64, v0, v1, p0, p1, 0x00, 0x01, 1, 2, 3, 1,
        ];

        Self {
            descriptor: DeviceDescriptor(raw),
            info: DeviceInfo {
                busnum: 1,
                devnum: 4,
                speed: DeviceSpeed::High,
                vendor_id,
                product_id,
                bcd_device: 0x0100,
            },
            configuration: 1,
            configurations: BTreeMap::from([(1, vec![1, 2])]),
            interfaces: vec![InterfaceDescriptor {
                number: 0,
                class: 0xff,
                subclass: 0x00,
                protocol: 0x00,
            }],
        }
    }

    /// Mass storage device (bulk-only transport) with endpoints 1 and 2
    pub fn mass_storage() -> Self {
        let mut device = Self::new(0x0781, 0x5581);
        device.interfaces = vec![InterfaceDescriptor {
            number: 0,
            class: 0x08,
            subclass: 0x06,
            protocol: 0x50,
        }];
        device
    }

    /// Replace the interface list with `count` HID interfaces
    pub fn with_interfaces(mut self, count: u8) -> Self {
        self.interfaces = (0..count)
            .map(|number| InterfaceDescriptor {
                number,
                class: 0x03,
                subclass: 0x01,
                protocol: number % 3,
            })
            .collect();
        self
    }

    /// Add a configuration exposing the given data endpoints
    pub fn with_configuration(mut self, value: u8, endpoints: Vec<u8>) -> Self {
        self.configurations.insert(value, endpoints);
        self
    }

    /// Configuration descriptor followed by interface descriptors
    pub fn full_descriptor(&self) -> Vec<u8> {
        let total = 9 + 9 * self.interfaces.len();
        let [t0, t1] = (total as u16).to_le_bytes();
        let mut bytes = vec![
            9,
            0x02,
            t0,
            t1,
            self.interfaces.len() as u8,
            self.configuration,
            0,
            0x80,
            50,
        ];
        for interface in &self.interfaces {
            bytes.extend_from_slice(&[
                9,
                0x04,
                interface.number,
                0,
                0,
                interface.class,
                interface.subclass,
                interface.protocol,
                0,
            ]);
        }
        bytes
    }
}

/// Shared state behind every handle of one mock controller
#[derive(Debug, Default)]
pub struct MockState {
    pub devices: HashMap<String, MockDevice>,
    pub calls: Vec<MockCall>,
    pub open_endpoints: BTreeSet<u8>,
    pub short_transfer: BTreeSet<u8>,
    pub fail_set_configuration: bool,
    pub fail_device_info: bool,
    /// Endpoint numbers that refuse to open
    pub unopenable_endpoints: BTreeSet<u8>,
    /// I/O failure returned by reads and writes on an endpoint
    pub endpoint_errors: HashMap<u8, UsbError>,
    /// Data returned by successive reads on an endpoint; a read shorter
    /// than requested fails unless short transfers are enabled
    pub endpoint_data: HashMap<u8, VecDeque<Vec<u8>>>,
    /// Data stage returned by device-to-host control requests
    pub control_reply: Vec<u8>,
    /// Data stages received by host-to-device control requests
    pub control_writes: Vec<Vec<u8>>,
    /// Failure returned by raw control requests
    pub control_error: Option<UsbError>,
}

/// In-memory [`HostController`]
///
/// Clones share state, so a test keeps one clone to inspect what a session
/// did with the other.
#[derive(Debug, Clone, Default)]
pub struct MockHostController {
    state: Arc<Mutex<MockState>>,
}

impl MockHostController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, unit: &str, device: MockDevice) -> Self {
        self.state().devices.insert(unit.to_string(), device);
        self
    }

    /// Lock and return the shared state
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn open_endpoints(&self) -> Vec<u8> {
        self.state().open_endpoints.iter().copied().collect()
    }

    fn control(&self, call: MockCall, unit: &str) -> Result<MockControl, UsbError> {
        let mut state = self.state();
        state.calls.push(call);
        if !state.devices.contains_key(unit) {
            return Err(UsbError::NoDevice);
        }
        Ok(MockControl {
            state: self.state.clone(),
            unit: unit.to_string(),
        })
    }

    /// Queue data for the next read on `endpoint`
    pub fn push_endpoint_data(&self, endpoint: u8, data: Vec<u8>) {
        self.state()
            .endpoint_data
            .entry(endpoint)
            .or_default()
            .push_back(data);
    }
}

impl HostController for MockHostController {
    type Control = MockControl;

    fn open_control(&self, unit: &str) -> Result<MockControl, UsbError> {
        self.control(MockCall::OpenControl(unit.to_string()), unit)
    }

    fn inspect_control(&self, unit: &str) -> Result<MockControl, UsbError> {
        self.control(MockCall::InspectControl(unit.to_string()), unit)
    }
}

/// Endpoint 0 of a mock device
#[derive(Debug)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
    unit: String,
}

impl MockControl {
    fn with_device<T>(
        &self,
        f: impl FnOnce(&mut MockDevice) -> Result<T, UsbError>,
    ) -> Result<T, UsbError> {
        let mut state = lock(&self.state);
        let device = state.devices.get_mut(&self.unit).ok_or(UsbError::NoDevice)?;
        f(device)
    }
}

impl ControlPipe for MockControl {
    type Endpoint = MockEndpoint;

    fn device_descriptor(&mut self) -> Result<DeviceDescriptor, UsbError> {
        self.with_device(|device| Ok(device.descriptor))
    }

    fn active_configuration(&mut self) -> Result<u8, UsbError> {
        self.with_device(|device| Ok(device.configuration))
    }

    fn device_info(&mut self) -> Result<DeviceInfo, UsbError> {
        if lock(&self.state).fail_device_info {
            return Err(UsbError::Io);
        }
        self.with_device(|device| Ok(device.info))
    }

    fn config_descriptor(&mut self) -> Result<ConfigSummary, UsbError> {
        self.with_device(|device| {
            Ok(ConfigSummary {
                configuration_value: device.configuration,
                num_interfaces: device.interfaces.len() as u8,
                configuration_string: 0,
            })
        })
    }

    fn interface_descriptor(&mut self, index: u8) -> Result<InterfaceDescriptor, UsbError> {
        self.with_device(|device| {
            device
                .interfaces
                .get(index as usize)
                .copied()
                .ok_or(UsbError::NotFound)
        })
    }

    fn full_descriptor(&mut self, config_index: u8, buf: &mut [u8]) -> Result<usize, UsbError> {
        lock(&self.state)
            .calls
            .push(MockCall::FullDescriptor(config_index));
        self.with_device(|device| {
            let bytes = device.full_descriptor();
            let len = bytes.len().min(buf.len());
            buf[..len].copy_from_slice(&bytes[..len]);
            Ok(len)
        })
    }

    fn set_configuration(&mut self, configuration: u16) -> Result<(), UsbError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::SetConfiguration(configuration));
        if state.fail_set_configuration {
            return Err(UsbError::Io);
        }
        let device = state.devices.get_mut(&self.unit).ok_or(UsbError::NoDevice)?;
        let value = u8::try_from(configuration).map_err(|_| UsbError::InvalidParam)?;
        if !device.configurations.contains_key(&value) {
            return Err(UsbError::InvalidParam);
        }
        device.configuration = value;
        Ok(())
    }

    fn control_request(
        &mut self,
        setup: &SetupPacket,
        buf: &mut [u8],
        _short_ok: bool,
    ) -> Result<usize, UsbError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::ControlRequest(*setup));
        if let Some(error) = &state.control_error {
            return Err(error.clone());
        }
        if setup.is_device_to_host() {
            let len = state.control_reply.len().min(buf.len());
            buf[..len].copy_from_slice(&state.control_reply[..len]);
            Ok(len)
        } else {
            state.control_writes.push(buf.to_vec());
            Ok(buf.len())
        }
    }

    fn open_endpoint(&mut self, number: u8) -> Result<MockEndpoint, UsbError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::OpenEndpoint(number));
        if state.unopenable_endpoints.contains(&number) {
            return Err(UsbError::Access);
        }
        let device = state.devices.get(&self.unit).ok_or(UsbError::NoDevice)?;
        let present = device
            .configurations
            .get(&device.configuration)
            .is_some_and(|endpoints| endpoints.contains(&number));
        if !present {
            return Err(UsbError::NotFound);
        }
        state.open_endpoints.insert(number);
        Ok(MockEndpoint {
            state: self.state.clone(),
            number,
        })
    }
}

/// Data endpoint of a mock device
#[derive(Debug)]
pub struct MockEndpoint {
    state: Arc<Mutex<MockState>>,
    number: u8,
}

impl EndpointPipe for MockEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UsbError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::EndpointRead(self.number, buf.len()));
        if let Some(error) = state.endpoint_errors.get(&self.number) {
            return Err(error.clone());
        }
        let data = state
            .endpoint_data
            .get_mut(&self.number)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_default();
        let len = data.len().min(buf.len());
        // Like libusb without short transfers, a short read is a failure
        if len < buf.len() && !state.short_transfer.contains(&self.number) {
            return Err(UsbError::Io);
        }
        buf[..len].copy_from_slice(&data[..len]);
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, UsbError> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(MockCall::EndpointWrite(self.number, buf.to_vec()));
        if let Some(error) = state.endpoint_errors.get(&self.number) {
            return Err(error.clone());
        }
        Ok(buf.len())
    }

    fn set_short_transfer(&mut self, enabled: bool) -> Result<(), UsbError> {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::SetShortTransfer(self.number));
        if enabled {
            state.short_transfer.insert(self.number);
        } else {
            state.short_transfer.remove(&self.number);
        }
        Ok(())
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.calls.push(MockCall::CloseEndpoint(self.number));
        state.open_endpoints.remove(&self.number);
        state.short_transfer.remove(&self.number);
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory client connection: reads come from a script, writes are kept
#[derive(Debug)]
pub struct MockStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
    nodelay: Cell<bool>,
}

impl MockStream {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
            nodelay: Cell::new(false),
        }
    }

    pub(crate) fn mark_nodelay(&self) {
        self.nodelay.set(true);
    }

    /// Whether the session asked for TCP_NODELAY
    pub fn nodelay(&self) -> bool {
        self.nodelay.get()
    }

    /// Everything the server wrote so far
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Script bytes the server has not consumed
    pub fn remaining_input(&self) -> usize {
        self.input.get_ref().len() - self.input.position() as usize
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builder for the bytes a USB/IP client sends
#[derive(Debug, Default)]
pub struct ClientScript {
    bytes: Vec<u8>,
}

impl ClientScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, opcode: u16) -> Self {
        self.bytes
            .extend_from_slice(&OpHeader::new(opcode, 0).to_bytes());
        self
    }

    pub fn list_devices(self) -> Self {
        self.op(OP_REQ_DEVLIST)
    }

    /// Import request with a raw bus-id field
    pub fn import_raw(mut self, bus_id: [u8; 32]) -> Self {
        self = self.op(OP_REQ_IMPORT);
        self.bytes.extend_from_slice(&bus_id);
        self
    }

    pub fn import(self, bus_id: &str) -> Self {
        let field = encode_bus_id(bus_id).unwrap_or([0u8; 32]);
        self.import_raw(field)
    }

    pub fn submit(mut self, request: SubmitRequest) -> Self {
        self.bytes.extend_from_slice(&request.to_bytes());
        self
    }

    pub fn unlink(mut self, seqnum: u32, unlink_seqnum: u32) -> Self {
        let request = UnlinkRequest {
            header: BasicHeader {
                command: CMD_UNLINK,
                seqnum,
                ..BasicHeader::default()
            },
            unlink_seqnum,
        };
        self.bytes.extend_from_slice(&request.to_bytes());
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn into_stream(self) -> MockStream {
        MockStream::new(self.bytes)
    }
}

/// SUBMIT on endpoint 0 carrying `setup`
pub fn control_submit(seqnum: u32, setup: SetupPacket) -> SubmitRequest {
    let direction = if setup.is_device_to_host() {
        DIR_IN
    } else {
        DIR_OUT
    };
    SubmitRequest {
        header: BasicHeader {
            command: CMD_SUBMIT,
            seqnum,
            devid: 0x0001_0004,
            direction,
            endpoint: 0,
        },
        transfer_flags: 0,
        length: i32::from(setup.length()),
        start_frame: 0,
        packet_count: 0,
        interval: 0,
        setup,
    }
}

/// SUBMIT on a data endpoint
pub fn data_submit(seqnum: u32, endpoint: u32, direction: u32, length: i32) -> SubmitRequest {
    SubmitRequest {
        header: BasicHeader {
            command: CMD_SUBMIT,
            seqnum,
            devid: 0x0001_0004,
            direction,
            endpoint,
        },
        transfer_flags: 0,
        length,
        start_frame: 0,
        packet_count: 0,
        interval: 0,
        setup: SetupPacket::default(),
    }
}
