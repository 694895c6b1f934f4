//! Integration tests for the USB/IP wire codec
//!
//! Verifies byte-exact record layouts against hand-built wire images and the
//! decode/encode properties of the operation header.

use proptest::prelude::*;
use protocol::{
    BasicHeader, CMD_SUBMIT, CMD_UNLINK, Command, DeviceSummary, ENVELOPE_SIZE, InterfaceSummary,
    OP_REP_IMPORT, OpHeader, ProtocolError, RES_NO_DEVICE, SetupPacket, SubmitRequest,
    SubmitResponse, USBIP_VERSION, UnlinkRequest, UnlinkResponse, decode_bus_id,
    decode_generic_header, decode_op_header, encode_bus_id, encode_op_header, read_device_summary,
    read_interface_summary, read_submit_response, write_device_summary, write_interface_summary,
    write_submit_response,
};
use std::io::Cursor;

fn make_test_summary() -> DeviceSummary {
    DeviceSummary {
        path: "usb0".to_string(),
        bus_id: "usb0".to_string(),
        busnum: 1,
        devnum: 4,
        speed: 3,
        vendor_id: 0x0781,
        product_id: 0x5581,
        bcd_device: 0x0100,
        class: 0x00,
        subclass: 0x00,
        protocol: 0x00,
        configuration_value: 1,
        num_configurations: 1,
        num_interfaces: 1,
    }
}

mod op_header {
    use super::*;

    proptest! {
        #[test]
        fn decode_then_encode_is_byte_identical(opcode in any::<u16>(), result in any::<u32>()) {
            let mut wire = Vec::new();
            wire.extend_from_slice(&USBIP_VERSION.to_be_bytes());
            wire.extend_from_slice(&opcode.to_be_bytes());
            wire.extend_from_slice(&result.to_be_bytes());

            let header = decode_op_header(&mut Cursor::new(wire.clone())).unwrap();
            let mut encoded = Vec::new();
            encode_op_header(&mut encoded, header.opcode, header.result).unwrap();

            prop_assert_eq!(encoded, wire);
        }

        #[test]
        fn wrong_version_is_rejected(version in any::<u16>(), opcode in any::<u16>()) {
            prop_assume!(version != USBIP_VERSION);
            let header = OpHeader { version, opcode, result: 0 };
            let result = decode_op_header(&mut Cursor::new(header.to_bytes().to_vec()));
            let is_version_mismatch = matches!(result, Err(ProtocolError::VersionMismatch { .. }));
            prop_assert!(is_version_mismatch);
        }
    }

    #[test]
    fn test_short_read_is_not_a_version_error() {
        let result = decode_op_header(&mut Cursor::new(vec![0x01, 0x11, 0x80, 0x05]));
        let Err(err) = result else {
            panic!("Expected an error for a truncated header");
        };
        assert!(err.is_disconnect());
        assert!(!matches!(err, ProtocolError::VersionMismatch { .. }));
    }

    #[test]
    fn test_import_reply_no_device_layout() {
        let mut wire = Vec::new();
        encode_op_header(&mut wire, OP_REP_IMPORT, RES_NO_DEVICE).unwrap();
        assert_eq!(wire, vec![0x01, 0x11, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04]);
    }
}

mod loop_records {
    use super::*;

    #[test]
    fn test_submit_request_wire_image() {
        let request = SubmitRequest {
            header: BasicHeader {
                command: CMD_SUBMIT,
                seqnum: 0x0102_0304,
                devid: 0x0001_0002,
                direction: 1,
                endpoint: 0,
            },
            transfer_flags: 0x200,
            length: 18,
            start_frame: 0,
            packet_count: 0,
            interval: 0,
            setup: SetupPacket::new(0x80, 0x06, 0x0100, 0, 18),
        };
        let wire = request.to_bytes();

        assert_eq!(&wire[0..4], &[0, 0, 0, 1]);
        assert_eq!(&wire[4..8], &[1, 2, 3, 4]);
        assert_eq!(&wire[8..12], &[0, 1, 0, 2]);
        assert_eq!(&wire[12..16], &[0, 0, 0, 1]);
        assert_eq!(&wire[20..24], &[0, 0, 2, 0]);
        assert_eq!(&wire[24..28], &[0, 0, 0, 18]);
        // Setup stays in USB little-endian order
        assert_eq!(&wire[40..48], &[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);

        let decoded = decode_generic_header(&mut Cursor::new(wire.to_vec())).unwrap();
        assert_eq!(decoded, Command::Submit(request));
    }

    #[test]
    fn test_unlink_request_padding_is_consumed() {
        let unlink = UnlinkRequest {
            header: BasicHeader {
                command: CMD_UNLINK,
                seqnum: 8,
                ..BasicHeader::default()
            },
            unlink_seqnum: 6,
        };
        let mut wire = unlink.to_bytes().to_vec();
        assert_eq!(wire.len(), ENVELOPE_SIZE);
        wire.extend_from_slice(&[0xAA; 4]);

        let mut cursor = Cursor::new(wire);
        assert_eq!(
            decode_generic_header(&mut cursor).unwrap(),
            Command::Unlink(unlink)
        );
        assert_eq!(cursor.position(), ENVELOPE_SIZE as u64);
    }

    #[test]
    fn test_submit_response_roundtrip_with_payload() {
        let response = SubmitResponse::success(77, 4);
        let mut wire = Vec::new();
        write_submit_response(&mut wire, &response, &[1, 2, 3, 4]).unwrap();

        let mut cursor = Cursor::new(wire);
        let decoded = read_submit_response(&mut cursor).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.header.command, 3);
        assert_eq!(decoded.header.endpoint, 0);
        assert_eq!(protocol::read_exact(&mut cursor, 4).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unlink_response_layout() {
        let response = UnlinkResponse::new(12, -104);
        let wire = response.to_bytes();
        assert_eq!(wire.len(), 24);
        assert_eq!(&wire[0..4], &4u32.to_be_bytes());
        assert_eq!(UnlinkResponse::from_bytes(&wire), response);
    }
}

mod device_records {
    use super::*;

    #[test]
    fn test_device_summary_roundtrip() {
        let summary = make_test_summary();
        let mut wire = Vec::new();
        write_device_summary(&mut wire, &summary).unwrap();
        assert_eq!(wire.len(), 312);

        let decoded = read_device_summary(&mut Cursor::new(wire)).unwrap();
        assert_eq!(decoded, summary);
    }

    #[test]
    fn test_interface_summary_has_zero_pad() {
        let summary = InterfaceSummary {
            class: 0x08,
            subclass: 0x06,
            protocol: 0x50,
        };
        let mut wire = Vec::new();
        write_interface_summary(&mut wire, &summary).unwrap();
        assert_eq!(wire, vec![0x08, 0x06, 0x50, 0x00]);
        assert_eq!(
            read_interface_summary(&mut Cursor::new(wire)).unwrap(),
            summary
        );
    }

    #[test]
    fn test_bus_id_field() {
        let field = encode_bus_id("usb3").unwrap();
        assert_eq!(field.len(), 32);
        assert_eq!(decode_bus_id(&field), "usb3");
        assert!(encode_bus_id(&"9".repeat(32)).is_err());
    }
}
