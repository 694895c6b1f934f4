//! Server Integration Tests
//!
//! End-to-end tests over real TCP connections:
//! - Device list and import through the acceptor
//! - Independent concurrent sessions
//! - Idle peers never starving new connections
//! - Sessions ending on client hang-up
//!
//! Run with: `cargo test -p server --test integration_tests`

use std::net::SocketAddr;
use std::time::Duration;

use common::test_utils::{ClientScript, MockCall, MockDevice, MockHostController, control_submit};
use protocol::{
    DEVICE_SUMMARY_SIZE, OP_HEADER_SIZE, OP_REP_DEVLIST, OP_REP_IMPORT, OpHeader, RES_NO_DEVICE,
    RES_OK, SUBMIT_RESPONSE_SIZE, SetupPacket, SubmitResponse,
};
use server::network::UsbIpServer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(host: MockHostController) -> SocketAddr {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = UsbIpServer::bind(addr, 10, host, "0".to_string())
        .await
        .unwrap();
    let local = server.local_addr().unwrap();
    tokio::spawn(server.run());
    local
}

async fn connect(addr: SocketAddr, script: ClientScript) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&script.into_bytes()).await.unwrap();
    stream
}

async fn read_op(stream: &mut TcpStream) -> OpHeader {
    let mut buf = [0u8; OP_HEADER_SIZE];
    timeout(TEST_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    OpHeader::from_bytes(&buf)
}

async fn read_bytes(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(TEST_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    buf
}

/// Read until the server closes the connection
async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    timeout(TEST_TIMEOUT, stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    rest
}

#[tokio::test]
async fn test_list_over_tcp() {
    let host = MockHostController::new().with_device("0", MockDevice::new(0x1234, 0x5678));
    let addr = start_server(host).await;

    let mut stream = connect(addr, ClientScript::new().list_devices()).await;
    let op = read_op(&mut stream).await;
    assert_eq!(op.opcode, OP_REP_DEVLIST);
    assert_eq!(op.result, RES_OK);

    let rest = read_to_end(&mut stream).await;
    // count, device summary, one interface
    assert_eq!(rest.len(), 4 + DEVICE_SUMMARY_SIZE + 4);
    assert_eq!(rest[..4], 1u32.to_be_bytes());
}

#[tokio::test]
async fn test_list_without_device_over_tcp() {
    let addr = start_server(MockHostController::new()).await;

    let mut stream = connect(addr, ClientScript::new().list_devices()).await;
    assert_eq!(read_op(&mut stream).await.result, RES_OK);
    assert_eq!(read_to_end(&mut stream).await, 0u32.to_be_bytes());
}

#[tokio::test]
async fn test_import_missing_device_over_tcp() {
    let addr = start_server(MockHostController::new()).await;

    let mut stream = connect(addr, ClientScript::new().import("usb0")).await;
    let op = read_op(&mut stream).await;
    assert_eq!(op.opcode, OP_REP_IMPORT);
    assert_eq!(op.result, RES_NO_DEVICE);
    assert!(read_to_end(&mut stream).await.is_empty());
}

#[tokio::test]
async fn test_import_then_get_descriptor() {
    let device = MockDevice::new(0x1234, 0x5678);
    let expected = *device.descriptor.as_bytes();
    let host = MockHostController::new().with_device("0", device);
    let addr = start_server(host.clone()).await;

    let script = ClientScript::new()
        .import("usb0")
        .submit(control_submit(1, SetupPacket::new(0x80, 0x06, 0x0100, 0, 18)));
    let mut stream = connect(addr, script).await;

    assert_eq!(read_op(&mut stream).await.result, RES_OK);
    read_bytes(&mut stream, DEVICE_SUMMARY_SIZE).await;

    let header = read_bytes(&mut stream, SUBMIT_RESPONSE_SIZE).await;
    let response = SubmitResponse::from_bytes(&header.try_into().unwrap());
    assert_eq!(response.header.seqnum, 1);
    assert_eq!(response.status, 0);
    assert_eq!(response.actual_length, 18);
    assert_eq!(read_bytes(&mut stream, 18).await, expected);

    // Hanging up ends the session and closes the device
    drop(stream);
    timeout(TEST_TIMEOUT, async {
        while !host.calls().contains(&MockCall::CloseEndpoint(2)) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(host.open_endpoints().is_empty());
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let host = MockHostController::new().with_device("0", MockDevice::new(1, 2));
    let addr = start_server(host).await;

    // An imported session stays open while another client lists devices
    let mut imported = connect(addr, ClientScript::new().import("usb0")).await;
    assert_eq!(read_op(&mut imported).await.result, RES_OK);
    read_bytes(&mut imported, DEVICE_SUMMARY_SIZE).await;

    let mut lister = connect(addr, ClientScript::new().list_devices()).await;
    assert_eq!(read_op(&mut lister).await.opcode, OP_REP_DEVLIST);
    assert!(!read_to_end(&mut lister).await.is_empty());

    let request = control_submit(9, SetupPacket::new(0x80, 0x06, 0x0100, 0, 18));
    imported.write_all(&request.to_bytes()).await.unwrap();
    let header = read_bytes(&mut imported, SUBMIT_RESPONSE_SIZE).await;
    let response = SubmitResponse::from_bytes(&header.try_into().unwrap());
    assert_eq!(response.header.seqnum, 9);
}

#[test]
fn test_idle_peers_do_not_block_new_sessions() {
    // More silent peers than the runtime has blocking threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(1)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let host = MockHostController::new().with_device("0", MockDevice::new(1, 2));
        let addr = start_server(host).await;

        let mut idle = Vec::new();
        for _ in 0..4 {
            idle.push(TcpStream::connect(addr).await.unwrap());
        }

        let mut lister = connect(addr, ClientScript::new().list_devices()).await;
        let op = read_op(&mut lister).await;
        assert_eq!(op.opcode, OP_REP_DEVLIST);
        assert_eq!(op.result, RES_OK);
        assert_eq!(read_to_end(&mut lister).await[..4], 1u32.to_be_bytes());

        drop(idle);
    });
}

#[tokio::test]
async fn test_unknown_opcode_closes_connection() {
    let addr = start_server(MockHostController::new()).await;

    let mut stream = connect(addr, ClientScript::new().op(0x8001)).await;
    assert!(read_to_end(&mut stream).await.is_empty());
}
