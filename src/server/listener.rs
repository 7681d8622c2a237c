use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn, Instrument};

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::http::connection::Connection;
use crate::proxy::dispatcher::Dispatcher;
use crate::proxy::upstream::{ForwardingEngine, Protocol};
use crate::server::tls;

/// Exit code when a listener address is already taken.
pub const EXIT_ADDR_IN_USE: i32 = 1;

/// Pending connection queue length.
const BACKLOG: u32 = 1024;

/// Binds a TCP listener, classifying address conflicts.
///
/// With `reuse_port` several worker processes can bind the same address and
/// the kernel spreads connections between them.
pub async fn bind(addr: &str, reuse_port: bool) -> Result<TcpListener> {
    let in_use = |e: io::Error| match e.kind() {
        io::ErrorKind::AddrInUse => ProxyError::AddrInUse {
            addr: addr.to_string(),
        },
        _ => ProxyError::Io(e),
    };

    let socket_addr = tokio::net::lookup_host(addr)
        .await?
        .next()
        .ok_or_else(|| ProxyError::config_validation(format!("Cannot resolve listen address {}", addr)))?;

    let socket = if socket_addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    #[cfg(unix)]
    {
        socket.set_reuseaddr(true)?;
        if reuse_port {
            socket.set_reuseport(true)?;
        }
    }
    #[cfg(not(unix))]
    let _ = reuse_port;

    socket.bind(socket_addr).map_err(in_use)?;
    socket.listen(BACKLOG).map_err(in_use)
}

/// Fails with `AddrInUse` when anything already listens on `addr`,
/// including processes sharing it through `SO_REUSEPORT`. The socket is
/// released before returning.
pub async fn ensure_exclusive(addr: &str) -> Result<()> {
    let listener = bind(addr, false).await?;
    drop(listener);
    Ok(())
}

/// Checks every configured listen address. Run by the coordinator before
/// any worker binds with `SO_REUSEPORT`, which would otherwise share a
/// port some other process already holds.
pub async fn ensure_addresses_free(cfg: &Config) -> Result<()> {
    ensure_exclusive(&cfg.server.listen_addr).await?;
    if let Some(tls_cfg) = &cfg.tls {
        ensure_exclusive(&tls_cfg.listen_addr).await?;
    }
    Ok(())
}

/// Like `ensure_addresses_free`, exiting with `EXIT_ADDR_IN_USE` on a
/// conflict.
pub async fn ensure_addresses_free_or_exit(cfg: &Config) -> anyhow::Result<()> {
    match ensure_addresses_free(cfg).await {
        Ok(()) => Ok(()),
        Err(ProxyError::AddrInUse { addr }) => exit_addr_in_use(&addr),
        Err(e) => Err(e.into()),
    }
}

fn exit_addr_in_use(addr: &str) -> ! {
    warn!(addr = %addr, "that address is already in use");
    std::process::exit(EXIT_ADDR_IN_USE);
}

/// The plain listener and optional TLS listener of one worker, both feeding
/// the same dispatcher.
pub struct ListenerSupervisor<E> {
    dispatcher: Arc<Dispatcher<E>>,
    plain: TcpListener,
    secure: Option<(TcpListener, TlsAcceptor)>,
}

impl<E: ForwardingEngine> ListenerSupervisor<E> {
    /// Binds the plain listener and, when configured, the TLS listener.
    pub async fn bind(cfg: &Config, dispatcher: Arc<Dispatcher<E>>) -> Result<Self> {
        let reuse_port = cfg.server.workers > 0;

        let plain = bind(&cfg.server.listen_addr, reuse_port).await?;
        info!(addr = %plain.local_addr()?, "http server is running");

        let secure = match &cfg.tls {
            Some(tls_cfg) => {
                let acceptor = tls::load_acceptor(&tls_cfg.cert, &tls_cfg.key)?;
                let listener = bind(&tls_cfg.listen_addr, reuse_port).await?;
                info!(addr = %listener.local_addr()?, "https server is running");
                Some((listener, acceptor))
            }
            None => None,
        };

        Ok(Self {
            dispatcher,
            plain,
            secure,
        })
    }

    /// Wraps already-bound listeners.
    pub fn from_listeners(
        dispatcher: Arc<Dispatcher<E>>,
        plain: TcpListener,
        secure: Option<(TcpListener, TlsAcceptor)>,
    ) -> Self {
        Self {
            dispatcher,
            plain,
            secure,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.plain.local_addr()
    }

    pub fn secure_addr(&self) -> Option<io::Result<SocketAddr>> {
        self.secure.as_ref().map(|(listener, _)| listener.local_addr())
    }

    /// Accepts on every listener until one fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        let plain = accept_plain(self.plain, self.dispatcher.clone());

        match self.secure {
            Some((listener, acceptor)) => {
                let secure = accept_tls(listener, acceptor, self.dispatcher);
                tokio::try_join!(plain, secure)?;
            }
            None => plain.await?,
        }

        Ok(())
    }
}

/// Binds and serves. An address conflict exits the process with
/// `EXIT_ADDR_IN_USE`; any other error is returned to the caller.
pub async fn run<E: ForwardingEngine>(cfg: &Config, dispatcher: Arc<Dispatcher<E>>) -> anyhow::Result<()> {
    let supervisor = match ListenerSupervisor::bind(cfg, dispatcher).await {
        Ok(supervisor) => supervisor,
        Err(ProxyError::AddrInUse { addr }) => exit_addr_in_use(&addr),
        Err(e) => return Err(e.into()),
    };

    supervisor.serve().await
}

async fn accept_plain<E: ForwardingEngine>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<E>>,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let _ = socket.set_nodelay(true);
        let dispatcher = dispatcher.clone();
        tokio::spawn(
            async move {
                let conn = Connection::new(socket, dispatcher, peer, Protocol::Http);
                if let Err(e) = conn.run().await {
                    tracing::debug!("Connection error from {}: {}", peer, e);
                }
            }
            .in_current_span(),
        );
    }
}

async fn accept_tls<E: ForwardingEngine>(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    dispatcher: Arc<Dispatcher<E>>,
) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted TLS connection from {}", peer);

        let acceptor = acceptor.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(
            async move {
                let stream = match acceptor.accept(socket).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::debug!("TLS handshake with {} failed: {}", peer, e);
                        return;
                    }
                };

                let conn = Connection::new(stream, dispatcher, peer, Protocol::Https);
                if let Err(e) = conn.run().await {
                    tracing::debug!("Connection error from {}: {}", peer, e);
                }
            }
            .in_current_span(),
        );
    }
}
