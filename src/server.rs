//! TCP server for the CSV bridge.
//!
//! Binds one listener, then serves peers strictly one at a time: a session
//! is driven to completion before the next accept. An interrupt closes the
//! open session (if any) and stops the loop.

use crate::config::Config;
use crate::session::Session;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Listening socket owned by the server for its whole lifetime.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind `host:port` and start listening with the given backlog.
    ///
    /// An empty host binds every IPv4 interface.
    pub fn bind(host: &str, port: u16, backlog: i32) -> io::Result<Self> {
        let addr = resolve(host, port)?;
        let listener = create_listener(addr, backlog)?;

        Ok(Self {
            inner: TcpListener::from_std(listener)?,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Wait for the next peer.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }
}

/// Server instance
pub struct Server {
    config: Config,
    listener: Listener,
}

impl Server {
    /// Bind the listener described by `config`.
    pub fn bind(config: Config) -> io::Result<Self> {
        let listener = Listener::bind(&config.host, config.port, config.backlog)?;

        info!(
            address = %listener.local_addr()?,
            backlog = config.backlog,
            recv_buffer_size = config.recv_buffer_size,
            "Server listening"
        );

        Ok(Server { config, listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve peers until Ctrl-C.
    pub async fn run(&self) -> io::Result<()> {
        self.run_until(interrupt()).await
    }

    /// Serve peers until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let accepted = tokio::select! {
                result = self.listener.accept() => result,
                _ = &mut shutdown => {
                    info!("Interrupt received, shutting down");
                    return Ok(());
                }
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            };

            info!(peer = %peer, "Peer connected");

            let mut session = Session::new(stream, peer, self.config.recv_buffer_size);

            let finished = tokio::select! {
                summary = session.run() => Some(summary),
                _ = &mut shutdown => None,
            };

            match finished {
                Some(summary) => {
                    info!(
                        peer = %peer,
                        reason = ?summary.reason,
                        records = summary.stats.records,
                        malformed = summary.stats.malformed,
                        "Session closed"
                    );
                }
                None => {
                    session.close().await;
                    let stats = session.stats();
                    info!(
                        peer = %peer,
                        records = stats.records,
                        malformed = stats.malformed,
                        "Interrupt received, connection closed, shutting down"
                    );
                    return Ok(());
                }
            }
        }
    }
}

/// Resolves once the process receives Ctrl-C.
async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for interrupt");
        std::future::pending::<()>().await;
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("could not resolve host '{host}'"),
        )
    })
}

/// Create a non-blocking TCP listener with an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<std::net::TcpListener> {
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
    socket.listen(backlog)?;

    Ok(socket.into())
}
