//! Client connection abstraction

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::test_utils::MockStream;

/// Byte stream to a USB/IP client
///
/// Sessions are written against this trait so they can run over a socket or
/// an in-memory script.
pub trait ClientStream: Read + Write {
    /// Stop batching small writes; called once a device is imported
    fn set_nodelay(&self) -> io::Result<()>;
}

impl ClientStream for TcpStream {
    fn set_nodelay(&self) -> io::Result<()> {
        TcpStream::set_nodelay(self, true)
    }
}

impl ClientStream for MockStream {
    fn set_nodelay(&self) -> io::Result<()> {
        self.mark_nodelay();
        Ok(())
    }
}
