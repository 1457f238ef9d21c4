//! Socket establishment.
//!
//! The session only needs a read half and a write half; how they are
//! obtained sits behind [`Connector`] so tests can hand in in-memory pipes.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;

use aura_protocol::ConnectionError;
use tokio::io::{AsyncRead, AsyncWrite};

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type ConnectFut<'a> =
    Pin<Box<dyn Future<Output = Result<(BoxReader, BoxWriter), ConnectionError>> + Send + 'a>>;

/// Default backend address.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:5559";

/// Where the backend listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `host:port`
    Tcp(String),
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Tcp(DEFAULT_ENDPOINT.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEndpoint(String);

impl fmt::Display for InvalidEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint {:?}", self.0)
    }
}

impl std::error::Error for InvalidEndpoint {}

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    /// Accepts `host:port`, `tcp://host:port`, and (Unix only) `unix:/path`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            #[cfg(unix)]
            {
                let path = path.trim_start_matches("//");
                if path.is_empty() {
                    return Err(InvalidEndpoint(s.to_string()));
                }
                return Ok(Self::Unix(PathBuf::from(path)));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err(InvalidEndpoint(s.to_string()));
            }
        }
        let addr = s.strip_prefix("tcp://").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(addr.to_string()))
            }
            _ => Err(InvalidEndpoint(s.to_string())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Opens a byte stream to an endpoint.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> ConnectFut<'a>;
}

/// Connects over TCP or a Unix domain socket, depending on the endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketConnector;

impl Connector for SocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> ConnectFut<'a> {
        Box::pin(async move {
            let refused = |source| ConnectionError::Refused {
                endpoint: endpoint.to_string(),
                source,
            };
            match endpoint {
                Endpoint::Tcp(addr) => {
                    let stream = tokio::net::TcpStream::connect(addr.as_str())
                        .await
                        .map_err(refused)?;
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("TCP_NODELAY not applied: {e}");
                    }
                    let (reader, writer) = stream.into_split();
                    Ok((Box::new(reader) as BoxReader, Box::new(writer) as BoxWriter))
                }
                #[cfg(unix)]
                Endpoint::Unix(path) => {
                    let stream = tokio::net::UnixStream::connect(path).await.map_err(refused)?;
                    let (reader, writer) = stream.into_split();
                    Ok((Box::new(reader) as BoxReader, Box::new(writer) as BoxWriter))
                }
            }
        })
    }
}
