//! Fixed-layout record I/O over a byte stream
//!
//! The codec knows how to move whole records between a stream and the types
//! in [`crate::messages`]. It has no session knowledge: which record comes
//! next is decided by the caller.
//!
//! # Framing
//!
//! ```text
//! [OpHeader: 8][body...]                 top-level exchange
//! [Envelope: 48][payload: length]        loop request (payload for OUT only)
//! [SubmitResponse: 48][payload: length]  loop reply (payload for IN only)
//! ```
//!
//! Reads are exact: a record is either read completely or the call fails.
//! Writes are all-or-nothing: a single write call must accept the whole
//! record, a short write is a failure and is not retried.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};
use crate::messages::{Command, DeviceSummary, InterfaceSummary, OpHeader, SubmitResponse};
use crate::types::{
    BUS_ID_SIZE, DEVICE_SUMMARY_SIZE, ENVELOPE_SIZE, INTERFACE_SUMMARY_SIZE, OP_HEADER_SIZE,
    SUBMIT_RESPONSE_SIZE,
};
use crate::version::validate_version;

/// Read exactly `len` bytes
///
/// Partial reads are retried until the buffer is full. End of stream or an
/// I/O error before that is a failure; a short buffer is never returned.
///
/// # Example
/// ```
/// use protocol::read_exact;
/// use std::io::Cursor;
///
/// let mut cursor = Cursor::new(vec![1, 2, 3, 4]);
/// assert_eq!(read_exact(&mut cursor, 3).unwrap(), vec![1, 2, 3]);
/// assert!(read_exact(&mut cursor, 3).is_err());
/// ```
pub fn read_exact<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    if len == 0 {
        return Err(ProtocolError::EmptyRead);
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a fixed-size record into an array
pub fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Write `bytes` with a single write call
///
/// # Example
/// ```
/// use protocol::write_exact;
///
/// let mut out = Vec::new();
/// write_exact(&mut out, &[0xde, 0xad]).unwrap();
/// assert_eq!(out, vec![0xde, 0xad]);
/// ```
pub fn write_exact<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let written = writer.write(bytes)?;
    if written != bytes.len() {
        return Err(ProtocolError::ShortWrite {
            written,
            expected: bytes.len(),
        });
    }
    Ok(())
}

/// Read an operation header and check its version
///
/// A short read surfaces as [`ProtocolError::Io`], a wrong version as
/// [`ProtocolError::VersionMismatch`].
pub fn decode_op_header<R: Read>(reader: &mut R) -> Result<OpHeader> {
    let buf = read_array::<_, OP_HEADER_SIZE>(reader)?;
    let header = OpHeader::from_bytes(&buf);
    validate_version(header.version)?;
    Ok(header)
}

/// Write an operation header with the current version
pub fn encode_op_header<W: Write>(writer: &mut W, opcode: u16, result: u32) -> Result<()> {
    write_exact(writer, &OpHeader::new(opcode, result).to_bytes())
}

/// Read one loop envelope and decode it by command
///
/// The envelope is read once; the command-specific fields are parsed from
/// the buffered bytes.
pub fn decode_generic_header<R: Read>(reader: &mut R) -> Result<Command> {
    let buf = read_array::<_, ENVELOPE_SIZE>(reader)?;
    Ok(Command::from_envelope(&buf))
}

/// Read the fixed bus-id field of an import request
pub fn read_bus_id<R: Read>(reader: &mut R) -> Result<[u8; BUS_ID_SIZE]> {
    read_array(reader)
}

/// Write a big-endian u32 (device count of a list reply)
pub fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, value);
    write_exact(writer, &buf)
}

/// Read a big-endian u32
pub fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let buf = read_array::<_, 4>(reader)?;
    Ok(BigEndian::read_u32(&buf))
}

/// Write a SUBMIT response followed by its payload as one record
pub fn write_submit_response<W: Write>(
    writer: &mut W,
    response: &SubmitResponse,
    payload: &[u8],
) -> Result<()> {
    let mut frame = Vec::with_capacity(SUBMIT_RESPONSE_SIZE + payload.len());
    frame.extend_from_slice(&response.to_bytes());
    frame.extend_from_slice(payload);
    write_exact(writer, &frame)
}

/// Read a SUBMIT response header (payload is left on the stream)
pub fn read_submit_response<R: Read>(reader: &mut R) -> Result<SubmitResponse> {
    let buf = read_array::<_, SUBMIT_RESPONSE_SIZE>(reader)?;
    Ok(SubmitResponse::from_bytes(&buf))
}

pub fn write_device_summary<W: Write>(writer: &mut W, summary: &DeviceSummary) -> Result<()> {
    write_exact(writer, &summary.to_bytes()?)
}

pub fn read_device_summary<R: Read>(reader: &mut R) -> Result<DeviceSummary> {
    let buf = read_array::<_, DEVICE_SUMMARY_SIZE>(reader)?;
    Ok(DeviceSummary::from_bytes(&buf))
}

pub fn write_interface_summary<W: Write>(
    writer: &mut W,
    summary: &InterfaceSummary,
) -> Result<()> {
    write_exact(writer, &summary.to_bytes())
}

pub fn read_interface_summary<R: Read>(reader: &mut R) -> Result<InterfaceSummary> {
    let buf = read_array::<_, INTERFACE_SUMMARY_SIZE>(reader)?;
    Ok(InterfaceSummary::from_bytes(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OP_REQ_DEVLIST, RES_OK};
    use std::io::{self, Cursor};

    /// Reader that hands out one byte per call
    struct Trickle(Cursor<Vec<u8>>);

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(1);
            self.0.read(&mut buf[..len])
        }
    }

    /// Writer that accepts at most `limit` bytes per call
    struct Choked {
        limit: usize,
        out: Vec<u8>,
    }

    impl Write for Choked {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let len = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..len]);
            Ok(len)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_exact_retries_partial_reads() {
        let mut reader = Trickle(Cursor::new(vec![1, 2, 3, 4, 5]));
        assert_eq!(read_exact(&mut reader, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_read_exact_fails_on_eof() {
        let mut reader = Cursor::new(vec![1, 2]);
        let err = read_exact(&mut reader, 4).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn test_read_exact_zero_length_rejected() {
        let mut reader = Cursor::new(vec![1, 2]);
        assert!(matches!(
            read_exact(&mut reader, 0),
            Err(ProtocolError::EmptyRead)
        ));
        // Nothing was consumed
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_write_exact_short_write_fails() {
        let mut writer = Choked {
            limit: 3,
            out: Vec::new(),
        };
        let err = write_exact(&mut writer, &[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortWrite {
                written: 3,
                expected: 8
            }
        ));
    }

    #[test]
    fn test_decode_op_header_distinguishes_failures() {
        let mut short = Cursor::new(vec![0x01, 0x11, 0x80]);
        assert!(matches!(
            decode_op_header(&mut short),
            Err(ProtocolError::Io(_))
        ));

        let mut wrong = Cursor::new(vec![0x01, 0x06, 0x80, 0x05, 0, 0, 0, 0]);
        assert!(matches!(
            decode_op_header(&mut wrong),
            Err(ProtocolError::VersionMismatch {
                found: 0x0106,
                expected: 0x0111
            })
        ));
    }

    #[test]
    fn test_op_header_encode_decode() {
        let mut buf = Vec::new();
        encode_op_header(&mut buf, OP_REQ_DEVLIST, RES_OK).unwrap();
        let header = decode_op_header(&mut Cursor::new(buf)).unwrap();
        assert_eq!(header.opcode, OP_REQ_DEVLIST);
        assert_eq!(header.result, RES_OK);
    }

    #[test]
    fn test_decode_generic_header_consumes_one_envelope() {
        let mut bytes = vec![0u8; ENVELOPE_SIZE * 2];
        bytes[3] = 2;
        bytes[ENVELOPE_SIZE + 3] = 1;
        let mut cursor = Cursor::new(bytes);

        assert!(matches!(
            decode_generic_header(&mut cursor).unwrap(),
            Command::Unlink(_)
        ));
        assert_eq!(cursor.position(), ENVELOPE_SIZE as u64);
        assert!(matches!(
            decode_generic_header(&mut cursor).unwrap(),
            Command::Submit(_)
        ));
    }

    #[test]
    fn test_submit_response_with_payload_is_one_write() {
        let mut writer = Choked {
            limit: usize::MAX,
            out: Vec::new(),
        };
        let response = SubmitResponse::success(1, 3);
        write_submit_response(&mut writer, &response, &[7, 8, 9]).unwrap();
        assert_eq!(writer.out.len(), SUBMIT_RESPONSE_SIZE + 3);
        assert_eq!(&writer.out[SUBMIT_RESPONSE_SIZE..], &[7, 8, 9]);
    }
}
