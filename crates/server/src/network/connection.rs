//! Per-client connection handler
//!
//! Runs one session to completion on the calling (blocking) thread and logs
//! how it ended. Everything logged here carries the peer address through the
//! `session` span.

use common::{ClientStream, HostController};
use tracing::{debug, info, info_span, warn};

use crate::session::Session;

/// A client connection bound to its own host-controller handle
pub struct ClientConnection<S, H> {
    peer: String,
    session: Session<S, H>,
}

impl<S, H> ClientConnection<S, H>
where
    S: ClientStream,
    H: HostController,
{
    /// `peer` is the client's `ip:port`
    pub fn new(peer: String, stream: S, host: H, list_unit: &str) -> Self {
        Self {
            peer,
            session: Session::new(stream, host, list_unit),
        }
    }

    /// Serve the session; errors end the connection and are only logged
    pub fn run(mut self) -> S {
        let span = info_span!("session", peer = %self.peer);
        let _enter = span.enter();

        debug!("Session started");
        match self.session.run() {
            Ok(()) => debug!("Session finished"),
            Err(e) if e.is_disconnect() => info!("Client disconnected"),
            Err(e) => warn!("Session ended: {}", e),
        }

        self.session.into_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{ClientScript, MockDevice, MockHostController};
    use protocol::{OP_REP_DEVLIST, RES_OK};

    #[test]
    fn test_connection_returns_stream_after_list() {
        let host = MockHostController::new().with_device("0", MockDevice::new(1, 2));
        let stream = ClientScript::new().list_devices().into_stream();

        let stream = ClientConnection::new("127.0.0.1:5000".to_string(), stream, host, "0").run();

        let output = stream.output();
        assert_eq!(u16::from_be_bytes([output[2], output[3]]), OP_REP_DEVLIST);
        assert_eq!(
            u32::from_be_bytes([output[4], output[5], output[6], output[7]]),
            RES_OK
        );
    }

    #[test]
    fn test_connection_survives_empty_input() {
        let host = MockHostController::new();
        let stream = ClientScript::new().into_stream();

        let stream = ClientConnection::new("127.0.0.1:5001".to_string(), stream, host, "0").run();
        assert!(stream.output().is_empty());
    }
}
