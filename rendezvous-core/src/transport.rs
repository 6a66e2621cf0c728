// rendezvous-core/src/transport.rs

//! Point-to-point byte-stream transport.
//!
//! Services listen on a *virtual port* of their server and clients
//! connect to `(server address, virtual port)`. [`TcpTransport`] realizes
//! this over plain TCP by serving virtual port `v` at TCP port `base + v`.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{RendezvousError, Result};

/// A duplex byte stream.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

pub type Connection = Box<dyn Stream>;

/// An accepting endpoint created by [`Transport::listen`].
#[async_trait]
pub trait Listener: Send + Sync {
    /// Waits for the next inbound connection. Returns the stream and a
    /// printable peer address.
    async fn accept(&self) -> Result<(Connection, String)>;

    /// The address clients reach this listener at.
    fn local_addr(&self) -> String;
}

/// Factory for listeners and outbound connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address this server is reachable at.
    fn local_address(&self) -> String;

    async fn listen(&self, virtual_port: u16) -> Result<Box<dyn Listener>>;

    async fn connect(
        &self,
        address: &ServerAddress,
        virtual_port: u16,
        timeout: Duration,
    ) -> Result<Connection>;
}

/// `host:port` address of a rendezvous server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`, or a bare `host` completed with `default_port`.
    /// IPv6 literals must be bracketed when a port is given.
    pub fn parse(text: &str, default_port: u16) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RendezvousError::transport("server address undefined"));
        }

        if let Ok(addr) = text.parse::<SocketAddr>() {
            return Ok(Self::new(addr.ip().to_string(), addr.port()));
        }
        if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return Ok(Self::new(inner, default_port));
        }

        match text.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.contains(':') => {
                let port = port.parse::<u16>().map_err(|_| {
                    RendezvousError::transport(format!(
                        "could not create server address from given string: {text}"
                    ))
                })?;
                Ok(Self::new(host, port))
            }
            Some(_) if text.parse::<std::net::Ipv6Addr>().is_ok() => {
                Ok(Self::new(text, default_port))
            }
            Some(_) => Err(RendezvousError::transport(format!(
                "could not create server address from given string: {text}"
            ))),
            None => Ok(Self::new(text, default_port)),
        }
    }

    fn with_offset(&self, virtual_port: u16) -> Result<(String, u16)> {
        let port = self.port.checked_add(virtual_port).ok_or_else(|| {
            RendezvousError::transport(format!(
                "virtual port {virtual_port} overflows base port {}",
                self.port
            ))
        })?;
        Ok((self.host.clone(), port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Plain TCP transport.
///
/// With a base port of 0 every listener binds an ephemeral port; the
/// address a service is really reachable at is then only known from its
/// listener.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    bind_host: String,
    base_port: u16,
    advertised: ServerAddress,
    offset_ports: bool,
}

impl TcpTransport {
    pub fn new(
        bind_host: impl Into<String>,
        base_port: u16,
        advertised_host: Option<String>,
    ) -> Self {
        let bind_host = bind_host.into();
        let host = advertised_host.unwrap_or_else(|| advertised_host_for(&bind_host));
        Self {
            advertised: ServerAddress::new(host, base_port),
            bind_host,
            base_port,
            offset_ports: true,
        }
    }

    /// Connect to the given address as is, without adding the virtual
    /// port. Used with addresses taken from [`Listener::local_addr`].
    #[must_use]
    pub fn direct(mut self) -> Self {
        self.offset_ports = false;
        self
    }

    /// Client-only transport; it never listens.
    pub fn client() -> Self {
        Self::new("127.0.0.1", 0, None)
    }

    pub fn from_config(config: &crate::config::ServerConfig) -> Self {
        Self::new(
            config.server.bind_host.clone(),
            config.server.port,
            config.server.advertised_host.clone(),
        )
    }
}

fn advertised_host_for(bind_host: &str) -> String {
    match bind_host {
        "0.0.0.0" | "::" | "" => "localhost".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_address(&self) -> String {
        self.advertised.to_string()
    }

    async fn listen(&self, virtual_port: u16) -> Result<Box<dyn Listener>> {
        let port = if self.base_port == 0 {
            0
        } else {
            self.base_port.checked_add(virtual_port).ok_or_else(|| {
                RendezvousError::transport(format!(
                    "virtual port {virtual_port} overflows base port {}",
                    self.base_port
                ))
            })?
        };

        let listener = TcpListener::bind((self.bind_host.as_str(), port))
            .await
            .map_err(|e| {
                RendezvousError::transport_with_source(
                    format!("could not listen on {}:{port}", self.bind_host),
                    e,
                )
            })?;
        let bound = listener
            .local_addr()
            .map_err(|e| RendezvousError::transport_with_source("listener has no address", e))?;

        Ok(Box::new(TcpServiceListener {
            listener,
            advertised: ServerAddress::new(self.advertised.host.clone(), bound.port()),
        }))
    }

    async fn connect(
        &self,
        address: &ServerAddress,
        virtual_port: u16,
        timeout: Duration,
    ) -> Result<Connection> {
        let (host, port) = if self.offset_ports {
            address.with_offset(virtual_port)?
        } else {
            (address.host.clone(), address.port)
        };
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| {
                RendezvousError::transport(format!(
                    "connecting to {host}:{port} timed out after {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                RendezvousError::transport_with_source(
                    format!("could not connect to {host}:{port}"),
                    e,
                )
            })?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }
}

struct TcpServiceListener {
    listener: TcpListener,
    advertised: ServerAddress,
}

#[async_trait]
impl Listener for TcpServiceListener {
    async fn accept(&self) -> Result<(Connection, String)> {
        let (stream, peer) = self
            .listener
            .accept()
            .await
            .map_err(|e| RendezvousError::transport_with_source("accept failed", e))?;
        stream.set_nodelay(true).ok();
        Ok((Box::new(stream), peer.to_string()))
    }

    fn local_addr(&self) -> String {
        self.advertised.to_string()
    }
}
