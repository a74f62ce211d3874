//! TCP listener for the chat room.
//!
//! Accepts connections, applies the room's admission limit, and hands
//! admitted connections to new sessions.

use crate::config::Config;
use crate::room::Room;
use crate::session::Session;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Listen backlog for the accepting socket
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    room: Arc<Room>,
    verbose: bool,
}

impl Server {
    /// Bind the listening socket and create the room.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;

        let server = Server {
            listener,
            room: Arc::new(Room::new(config.user_limit)),
            verbose: config.verbose,
        };

        info!(
            address = %server.local_addr()?,
            capacity = server.room.capacity(),
            "Server listening"
        );

        Ok(server)
    }

    /// Address the listener is actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get a reference to the room for testing
    #[cfg(test)]
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Accept connections forever.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if !self.room.has_capacity() {
                        if self.verbose {
                            warn!(peer = %peer, "Number of users has reached its limit");
                        }
                        drop(stream);
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    info!(peer = %peer, "user joined");
                    Session::start(stream, peer, Arc::clone(&self.room));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
