//! Network subsystem
//!
//! ```text
//! UsbIpServer
//!   ├─> accept TCP connections
//!   └─> session thread running ClientConnection per client
//!         └─> Session: list devices | import + request loop
//! ```

pub mod connection;
pub mod server;

pub use connection::ClientConnection;
pub use server::UsbIpServer;
