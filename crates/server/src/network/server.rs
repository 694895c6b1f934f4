//! USB/IP TCP server
//!
//! Accepts client connections and runs one session per connection on its own
//! OS thread, so a stalled peer never holds up anyone else. Sessions never
//! share state; each gets its own clone of the host controller and opens its
//! own device handles.

use std::future::Future;
use std::net::SocketAddr;
use std::thread;

use anyhow::{Context, Result};
use common::HostController;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use super::connection::ClientConnection;

/// Listening USB/IP server
pub struct UsbIpServer<H> {
    listener: TcpListener,
    host: H,
    list_unit: String,
}

impl<H> UsbIpServer<H>
where
    H: HostController + Clone + Send + 'static,
{
    /// Bind `addr` with address reuse and start listening
    pub async fn bind(addr: SocketAddr, backlog: u32, host: H, list_unit: String) -> Result<Self> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .context("Failed to create listening socket")?;

        socket
            .set_reuseaddr(true)
            .context("Failed to enable address reuse")?;
        socket
            .bind(addr)
            .with_context(|| format!("Failed to bind {}", addr))?;
        let listener = socket
            .listen(backlog)
            .with_context(|| format!("Failed to listen on {}", addr))?;

        info!("Listening on {}", addr);

        Ok(Self {
            listener,
            host,
            list_unit,
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Accept connections until `shutdown` completes
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => info!("Shutting down listener"),
        }
        Ok(())
    }

    /// Accept connections forever
    ///
    /// Accept errors are logged and the loop continues.
    pub async fn run(self) -> Result<()> {
        self.accept_loop().await;
        Ok(())
    }

    async fn accept_loop(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.spawn_session(stream, peer),
                Err(e) => debug!("Accept failed: {}", e),
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Cannot take over connection from {}: {}", peer, e);
                return;
            }
        };
        // Sessions do blocking I/O
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("Cannot switch connection from {} to blocking: {}", peer, e);
            return;
        }

        debug!("Accepted connection from {}", peer);
        let host = self.host.clone();
        let list_unit = self.list_unit.clone();
        let spawned = thread::Builder::new()
            .name(format!("session-{}", peer))
            .spawn(move || {
                ClientConnection::new(peer.to_string(), stream, host, &list_unit).run();
            });
        if let Err(e) = spawned {
            warn!("Cannot start session thread for {}: {}", peer, e);
        }
    }
}
