//! USB/IP wire protocol
//!
//! This crate defines the fixed-layout binary records exchanged between a
//! USB/IP client and the server, and the codec that moves them over a byte
//! stream. All multi-byte fields are big-endian on the wire and host-native
//! in the types.
//!
//! # Example
//!
//! ```
//! use protocol::{OP_REQ_DEVLIST, RES_OK, decode_op_header, encode_op_header};
//! use std::io::Cursor;
//!
//! let mut wire = Vec::new();
//! encode_op_header(&mut wire, OP_REQ_DEVLIST, RES_OK).unwrap();
//! assert_eq!(wire.len(), 8);
//!
//! let header = decode_op_header(&mut Cursor::new(wire)).unwrap();
//! assert_eq!(header.opcode, OP_REQ_DEVLIST);
//! ```
//!
//! # Loop records
//!
//! After an import, every request is a 48-byte envelope decoded into a
//! [`Command`] by its command field:
//!
//! ```
//! use protocol::{BasicHeader, CMD_UNLINK, Command, UnlinkRequest, decode_generic_header};
//! use std::io::Cursor;
//!
//! let unlink = UnlinkRequest {
//!     header: BasicHeader { command: CMD_UNLINK, seqnum: 4, ..Default::default() },
//!     unlink_seqnum: 3,
//! };
//! let mut cursor = Cursor::new(unlink.to_bytes().to_vec());
//! assert_eq!(decode_generic_header(&mut cursor).unwrap(), Command::Unlink(unlink));
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;
pub mod version;

pub use codec::{
    decode_generic_header, decode_op_header, encode_op_header, read_array, read_bus_id,
    read_device_summary, read_exact, read_interface_summary, read_submit_response, read_u32,
    write_device_summary, write_exact, write_interface_summary, write_submit_response, write_u32,
};
pub use error::{ProtocolError, Result};
pub use messages::{
    BasicHeader, Command, DeviceSummary, InterfaceSummary, OpHeader, SubmitRequest,
    SubmitResponse, UnlinkRequest, UnlinkResponse, decode_bus_id, encode_bus_id,
};
pub use types::*;
pub use version::{USBIP_VERSION, validate_version};
