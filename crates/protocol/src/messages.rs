//! Wire record definitions
//!
//! Every record has a fixed size and big-endian multi-byte fields. Byte order
//! is converted exactly here: the structs below always hold host-native
//! values, and `to_bytes` / `from_bytes` are the only places that touch the
//! wire representation.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};
use crate::types::{
    BASIC_HEADER_SIZE, BUS_ID_SIZE, CMD_SUBMIT, CMD_UNLINK, DEVICE_PATH_SIZE, DEVICE_SUMMARY_SIZE,
    ENVELOPE_SIZE, INTERFACE_SUMMARY_SIZE, OP_HEADER_SIZE, RET_SUBMIT, RET_UNLINK,
    SUBMIT_RESPONSE_SIZE, SetupPacket, UNLINK_RESPONSE_SIZE,
};
use crate::version::USBIP_VERSION;

/// Operation header opening every top-level exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: u16,
    pub opcode: u16,
    pub result: u32,
}

impl OpHeader {
    /// Header carrying the current protocol version
    pub fn new(opcode: u16, result: u32) -> Self {
        Self {
            version: USBIP_VERSION,
            opcode,
            result,
        }
    }

    pub fn to_bytes(&self) -> [u8; OP_HEADER_SIZE] {
        let mut buf = [0u8; OP_HEADER_SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.version);
        BigEndian::write_u16(&mut buf[2..4], self.opcode);
        BigEndian::write_u32(&mut buf[4..8], self.result);
        buf
    }

    /// Decode without validating the version
    pub fn from_bytes(buf: &[u8; OP_HEADER_SIZE]) -> Self {
        Self {
            version: BigEndian::read_u16(&buf[0..2]),
            opcode: BigEndian::read_u16(&buf[2..4]),
            result: BigEndian::read_u32(&buf[4..8]),
        }
    }
}

/// Common header of every loop request and response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicHeader {
    pub command: u32,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: u32,
    pub endpoint: u32,
}

impl BasicHeader {
    /// Header of a server reply: only command and sequence number are set
    pub fn reply(command: u32, seqnum: u32) -> Self {
        Self {
            command,
            seqnum,
            ..Self::default()
        }
    }

    fn write(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[0..4], self.command);
        BigEndian::write_u32(&mut buf[4..8], self.seqnum);
        BigEndian::write_u32(&mut buf[8..12], self.devid);
        BigEndian::write_u32(&mut buf[12..16], self.direction);
        BigEndian::write_u32(&mut buf[16..20], self.endpoint);
    }

    fn read(buf: &[u8]) -> Self {
        Self {
            command: BigEndian::read_u32(&buf[0..4]),
            seqnum: BigEndian::read_u32(&buf[4..8]),
            devid: BigEndian::read_u32(&buf[8..12]),
            direction: BigEndian::read_u32(&buf[12..16]),
            endpoint: BigEndian::read_u32(&buf[16..20]),
        }
    }
}

/// SUBMIT request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitRequest {
    pub header: BasicHeader,
    pub transfer_flags: u32,
    /// Requested transfer length, untrusted
    pub length: i32,
    pub start_frame: i32,
    pub packet_count: i32,
    pub interval: i32,
    pub setup: SetupPacket,
}

impl SubmitRequest {
    pub fn to_bytes(&self) -> [u8; ENVELOPE_SIZE] {
        let mut buf = [0u8; ENVELOPE_SIZE];
        self.header.write(&mut buf);
        let body = &mut buf[BASIC_HEADER_SIZE..];
        BigEndian::write_u32(&mut body[0..4], self.transfer_flags);
        BigEndian::write_i32(&mut body[4..8], self.length);
        BigEndian::write_i32(&mut body[8..12], self.start_frame);
        BigEndian::write_i32(&mut body[12..16], self.packet_count);
        BigEndian::write_i32(&mut body[16..20], self.interval);
        body[20..28].copy_from_slice(self.setup.as_bytes());
        buf
    }

    fn from_envelope(header: BasicHeader, body: &[u8]) -> Self {
        let mut setup = [0u8; 8];
        setup.copy_from_slice(&body[20..28]);
        Self {
            header,
            transfer_flags: BigEndian::read_u32(&body[0..4]),
            length: BigEndian::read_i32(&body[4..8]),
            start_frame: BigEndian::read_i32(&body[8..12]),
            packet_count: BigEndian::read_i32(&body[12..16]),
            interval: BigEndian::read_i32(&body[16..20]),
            setup: SetupPacket(setup),
        }
    }
}

/// UNLINK request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlinkRequest {
    pub header: BasicHeader,
    /// Sequence number of the transfer to cancel
    pub unlink_seqnum: u32,
}

impl UnlinkRequest {
    pub fn to_bytes(&self) -> [u8; ENVELOPE_SIZE] {
        let mut buf = [0u8; ENVELOPE_SIZE];
        self.header.write(&mut buf);
        BigEndian::write_u32(
            &mut buf[BASIC_HEADER_SIZE..BASIC_HEADER_SIZE + 4],
            self.unlink_seqnum,
        );
        buf
    }
}

/// A decoded loop envelope, keyed by its command field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Submit(SubmitRequest),
    Unlink(UnlinkRequest),
    /// Any other command code; only the common header is meaningful
    Unknown(BasicHeader),
}

impl Command {
    /// Interpret an already-buffered envelope
    pub fn from_envelope(buf: &[u8; ENVELOPE_SIZE]) -> Self {
        let header = BasicHeader::read(buf);
        let body = &buf[BASIC_HEADER_SIZE..];
        match header.command {
            CMD_SUBMIT => Command::Submit(SubmitRequest::from_envelope(header, body)),
            CMD_UNLINK => Command::Unlink(UnlinkRequest {
                header,
                unlink_seqnum: BigEndian::read_u32(&body[0..4]),
            }),
            _ => Command::Unknown(header),
        }
    }

    pub fn header(&self) -> &BasicHeader {
        match self {
            Command::Submit(submit) => &submit.header,
            Command::Unlink(unlink) => &unlink.header,
            Command::Unknown(header) => header,
        }
    }
}

/// SUBMIT response record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitResponse {
    pub header: BasicHeader,
    /// 0 on success, negative errno on failure
    pub status: i32,
    pub actual_length: i32,
    pub start_frame: i32,
    pub packet_count: i32,
    pub error_count: i32,
    pub setup: [u8; 8],
}

impl SubmitResponse {
    /// Successful completion carrying `actual_length` bytes of payload
    pub fn success(seqnum: u32, actual_length: i32) -> Self {
        Self::with_status(seqnum, 0, actual_length)
    }

    /// Failed completion; no payload follows
    pub fn error(seqnum: u32, status: i32) -> Self {
        Self::with_status(seqnum, status, 0)
    }

    fn with_status(seqnum: u32, status: i32, actual_length: i32) -> Self {
        Self {
            header: BasicHeader::reply(RET_SUBMIT, seqnum),
            status,
            actual_length,
            start_frame: 0,
            packet_count: 0,
            error_count: 0,
            setup: [0u8; 8],
        }
    }

    pub fn to_bytes(&self) -> [u8; SUBMIT_RESPONSE_SIZE] {
        let mut buf = [0u8; SUBMIT_RESPONSE_SIZE];
        self.header.write(&mut buf);
        let body = &mut buf[BASIC_HEADER_SIZE..];
        BigEndian::write_i32(&mut body[0..4], self.status);
        BigEndian::write_i32(&mut body[4..8], self.actual_length);
        BigEndian::write_i32(&mut body[8..12], self.start_frame);
        BigEndian::write_i32(&mut body[12..16], self.packet_count);
        BigEndian::write_i32(&mut body[16..20], self.error_count);
        body[20..28].copy_from_slice(&self.setup);
        buf
    }

    pub fn from_bytes(buf: &[u8; SUBMIT_RESPONSE_SIZE]) -> Self {
        let body = &buf[BASIC_HEADER_SIZE..];
        let mut setup = [0u8; 8];
        setup.copy_from_slice(&body[20..28]);
        Self {
            header: BasicHeader::read(buf),
            status: BigEndian::read_i32(&body[0..4]),
            actual_length: BigEndian::read_i32(&body[4..8]),
            start_frame: BigEndian::read_i32(&body[8..12]),
            packet_count: BigEndian::read_i32(&body[12..16]),
            error_count: BigEndian::read_i32(&body[16..20]),
            setup,
        }
    }
}

/// UNLINK response record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnlinkResponse {
    pub header: BasicHeader,
    pub status: i32,
}

impl UnlinkResponse {
    pub fn new(seqnum: u32, status: i32) -> Self {
        Self {
            header: BasicHeader::reply(RET_UNLINK, seqnum),
            status,
        }
    }

    pub fn to_bytes(&self) -> [u8; UNLINK_RESPONSE_SIZE] {
        let mut buf = [0u8; UNLINK_RESPONSE_SIZE];
        self.header.write(&mut buf);
        BigEndian::write_i32(&mut buf[20..24], self.status);
        buf
    }

    pub fn from_bytes(buf: &[u8; UNLINK_RESPONSE_SIZE]) -> Self {
        Self {
            header: BasicHeader::read(buf),
            status: BigEndian::read_i32(&buf[20..24]),
        }
    }
}

/// Exported device summary sent in list and import replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub path: String,
    pub bus_id: String,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub bcd_device: u16,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

impl DeviceSummary {
    /// Encode; fails if a string does not fit its NUL-terminated field
    pub fn to_bytes(&self) -> Result<[u8; DEVICE_SUMMARY_SIZE]> {
        let mut buf = [0u8; DEVICE_SUMMARY_SIZE];
        write_c_string(&mut buf[..DEVICE_PATH_SIZE], &self.path)?;
        write_c_string(
            &mut buf[DEVICE_PATH_SIZE..DEVICE_PATH_SIZE + BUS_ID_SIZE],
            &self.bus_id,
        )?;

        let fields = &mut buf[DEVICE_PATH_SIZE + BUS_ID_SIZE..];
        BigEndian::write_u32(&mut fields[0..4], self.busnum);
        BigEndian::write_u32(&mut fields[4..8], self.devnum);
        BigEndian::write_u32(&mut fields[8..12], self.speed);
        BigEndian::write_u16(&mut fields[12..14], self.vendor_id);
        BigEndian::write_u16(&mut fields[14..16], self.product_id);
        BigEndian::write_u16(&mut fields[16..18], self.bcd_device);
        fields[18] = self.class;
        fields[19] = self.subclass;
        fields[20] = self.protocol;
        fields[21] = self.configuration_value;
        fields[22] = self.num_configurations;
        fields[23] = self.num_interfaces;
        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8; DEVICE_SUMMARY_SIZE]) -> Self {
        let fields = &buf[DEVICE_PATH_SIZE + BUS_ID_SIZE..];
        Self {
            path: read_c_string(&buf[..DEVICE_PATH_SIZE]),
            bus_id: read_c_string(&buf[DEVICE_PATH_SIZE..DEVICE_PATH_SIZE + BUS_ID_SIZE]),
            busnum: BigEndian::read_u32(&fields[0..4]),
            devnum: BigEndian::read_u32(&fields[4..8]),
            speed: BigEndian::read_u32(&fields[8..12]),
            vendor_id: BigEndian::read_u16(&fields[12..14]),
            product_id: BigEndian::read_u16(&fields[14..16]),
            bcd_device: BigEndian::read_u16(&fields[16..18]),
            class: fields[18],
            subclass: fields[19],
            protocol: fields[20],
            configuration_value: fields[21],
            num_configurations: fields[22],
            num_interfaces: fields[23],
        }
    }
}

/// Per-interface summary following a device summary in a list reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceSummary {
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

impl InterfaceSummary {
    pub fn to_bytes(&self) -> [u8; INTERFACE_SUMMARY_SIZE] {
        [self.class, self.subclass, self.protocol, 0]
    }

    pub fn from_bytes(buf: &[u8; INTERFACE_SUMMARY_SIZE]) -> Self {
        Self {
            class: buf[0],
            subclass: buf[1],
            protocol: buf[2],
        }
    }
}

/// Encode a bus id into its fixed import-request field
pub fn encode_bus_id(bus_id: &str) -> Result<[u8; BUS_ID_SIZE]> {
    let mut buf = [0u8; BUS_ID_SIZE];
    write_c_string(&mut buf, bus_id)?;
    Ok(buf)
}

/// Decode a bus id field: everything up to the first NUL
pub fn decode_bus_id(buf: &[u8; BUS_ID_SIZE]) -> String {
    read_c_string(buf)
}

fn write_c_string(field: &mut [u8], value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    // One byte is reserved for the terminator
    if bytes.len() >= field.len() {
        return Err(ProtocolError::FieldTooLong {
            len: bytes.len(),
            max: field.len() - 1,
        });
    }
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn read_c_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
