pub mod config;
pub mod pool;

use async_trait::async_trait;
use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default service port used when an address omits it.
pub const DEFAULT_PORT: u16 = 3000;

/// Network address of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub port: u16,
}

impl Host {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }

    /// Parses `host`, `host:port` or `[v6addr]:port`.
    pub fn parse(address: &str, default_port: u16) -> Result<Self, ConfigError> {
        let address = address.trim();
        if address.is_empty() {
            return Err(ConfigError::InvalidHost(address.to_string()));
        }

        if let Some(rest) = address.strip_prefix('[') {
            let (name, tail) = rest
                .split_once(']')
                .ok_or_else(|| ConfigError::InvalidHost(address.to_string()))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port
                    .parse()
                    .map_err(|_| ConfigError::InvalidHost(address.to_string()))?,
                None if tail.is_empty() => default_port,
                None => return Err(ConfigError::InvalidHost(address.to_string())),
            };
            return Ok(Self::new(name, port));
        }

        match address.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() => {
                let port = port
                    .parse()
                    .map_err(|_| ConfigError::InvalidHost(address.to_string()))?;
                Ok(Self::new(name, port))
            }
            Some(_) => Err(ConfigError::InvalidHost(address.to_string())),
            None => Ok(Self::new(address, default_port)),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.contains(':') {
            write!(f, "[{}]:{}", self.name, self.port)
        } else {
            write!(f, "{}:{}", self.name, self.port)
        }
    }
}

/// Transport a connection pool is dedicated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tcp,
    Tls,
}

/// A transport connection to one node.
///
/// The routing core only moves opaque command bytes; encoding is up to the
/// codec that drives the connection.
#[async_trait]
pub trait Connection: Send {
    fn id(&self) -> u64;

    /// False once the transport is known to be broken.
    fn is_usable(&self) -> bool {
        true
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    fn close(&mut self);
}

/// Opens new transport connections for a pool.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &Host, transport: TransportKind)
    -> io::Result<Box<dyn Connection>>;
}

/// Plain TCP connector backed by tokio.
#[derive(Debug, Default)]
pub struct TcpConnector {
    next_id: AtomicU64,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(
        &self,
        host: &Host,
        transport: TransportKind,
    ) -> io::Result<Box<dyn Connection>> {
        if transport != TransportKind::Tcp {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{:?} transport requires a dedicated connector", transport),
            ));
        }

        let stream = TcpStream::connect((host.name.as_str(), host.port)).await?;
        stream.set_nodelay(true)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Box::new(TcpConnection {
            id,
            stream: Some(stream),
        }))
    }
}

struct TcpConnection {
    id: u64,
    stream: Option<TcpStream>,
}

impl TcpConnection {
    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
    }
}

#[async_trait]
impl Connection for TcpConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_usable(&self) -> bool {
        self.stream.is_some()
    }

    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream()?.write_all(buf).await
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream()?.read_exact(buf).await.map(|_| ())
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_forms() {
        assert_eq!(Host::parse("db1", 3000).unwrap(), Host::new("db1", 3000));
        assert_eq!(Host::parse("db1:3100", 3000).unwrap(), Host::new("db1", 3100));
        assert_eq!(Host::parse("[::1]:3200", 3000).unwrap(), Host::new("::1", 3200));
        assert_eq!(Host::parse("[::1]", 3000).unwrap(), Host::new("::1", 3000));
    }

    #[test]
    fn test_parse_host_rejects_garbage() {
        assert!(Host::parse("", 3000).is_err());
        assert!(Host::parse(":3000", 3000).is_err());
        assert!(Host::parse("db1:port", 3000).is_err());
        assert!(Host::parse("[::1", 3000).is_err());
    }

    #[test]
    fn test_host_display() {
        assert_eq!(Host::new("db1", 3000).to_string(), "db1:3000");
        assert_eq!(Host::new("::1", 3000).to_string(), "[::1]:3000");
    }

    #[tokio::test]
    async fn test_tcp_connector_rejects_tls() {
        let connector = TcpConnector::new();
        let result = connector
            .connect(&Host::new("127.0.0.1", 1), TransportKind::Tls)
            .await;
        assert_eq!(result.err().unwrap().kind(), io::ErrorKind::Unsupported);
    }
}
