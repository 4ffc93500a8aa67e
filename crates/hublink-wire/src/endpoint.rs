//! Endpoint addressing: `ipc://<path>` and `tcp://<host>:<port>`.

use crate::socket::WireError;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// A transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket at a filesystem path.
    Ipc(PathBuf),
    /// TCP address. The host `*` is the all-interfaces bind wildcard and is
    /// only valid for listening.
    Tcp { host: String, port: u16 },
}

impl Endpoint {
    /// An `ipc://` endpoint at the given path.
    pub fn ipc(path: impl Into<PathBuf>) -> Self {
        Self::Ipc(path.into())
    }

    /// A `tcp://` endpoint.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    pub(crate) async fn dial(&self) -> Result<LinkStream, WireError> {
        match self {
            Self::Ipc(path) => {
                #[cfg(unix)]
                {
                    Ok(LinkStream::Ipc(UnixStream::connect(path).await?))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(WireError::InvalidEndpoint(
                        "ipc endpoints require a unix platform".to_string(),
                    ))
                }
            }
            Self::Tcp { host, port } => {
                if host == "*" {
                    return Err(WireError::InvalidEndpoint(
                        "cannot dial the wildcard host `*`".to_string(),
                    ));
                }
                Ok(LinkStream::Tcp(
                    TcpStream::connect((host.as_str(), *port)).await?,
                ))
            }
        }
    }

    pub(crate) async fn listen(&self) -> Result<LinkListener, WireError> {
        match self {
            Self::Ipc(path) => {
                #[cfg(unix)]
                {
                    // A stale socket file from a previous run blocks the bind.
                    if path.exists() {
                        let _ = std::fs::remove_file(path);
                    }
                    Ok(LinkListener::Ipc(UnixListener::bind(path)?))
                }
                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(WireError::InvalidEndpoint(
                        "ipc endpoints require a unix platform".to_string(),
                    ))
                }
            }
            Self::Tcp { host, port } => {
                let host = if host == "*" { "0.0.0.0" } else { host.as_str() };
                Ok(LinkListener::Tcp(
                    TcpListener::bind((host, *port)).await?,
                ))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(WireError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| WireError::InvalidEndpoint(s.to_string()))?;
            if host.is_empty() {
                return Err(WireError::InvalidEndpoint(s.to_string()));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| WireError::InvalidEndpoint(s.to_string()))?;
            return Ok(Self::tcp(host, port));
        }
        Err(WireError::InvalidEndpoint(s.to_string()))
    }
}

/// An established stream, either transport flavor.
pub(crate) enum LinkStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Ipc(UnixStream),
}

type BoxedReader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;

impl LinkStream {
    pub(crate) fn into_split(self) -> (BoxedReader, BoxedWriter) {
        match self {
            Self::Tcp(stream) => {
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
            #[cfg(unix)]
            Self::Ipc(stream) => {
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
        }
    }
}

/// A bound listener, either transport flavor.
pub(crate) enum LinkListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(UnixListener),
}

impl LinkListener {
    pub(crate) async fn accept(&self) -> std::io::Result<LinkStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(LinkStream::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Ipc(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(LinkStream::Ipc(stream))
            }
        }
    }

    /// Actual bound address for TCP listeners (useful when binding port 0).
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Ipc(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipc() {
        let ep: Endpoint = "ipc:///tmp/hublink.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::ipc("/tmp/hublink.sock"));
        assert_eq!(ep.to_string(), "ipc:///tmp/hublink.sock");
    }

    #[test]
    fn test_parse_tcp() {
        let ep: Endpoint = "tcp://127.0.0.1:3559".parse().unwrap();
        assert_eq!(ep, Endpoint::tcp("127.0.0.1", 3559));
        assert_eq!(ep.to_string(), "tcp://127.0.0.1:3559");

        let wildcard: Endpoint = "tcp://*:3559".parse().unwrap();
        assert_eq!(wildcard, Endpoint::tcp("*", 3559));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("".parse::<Endpoint>().is_err());
        assert!("ipc://".parse::<Endpoint>().is_err());
        assert!("tcp://nohost".parse::<Endpoint>().is_err());
        assert!("tcp://host:notaport".parse::<Endpoint>().is_err());
        assert!("udp://host:1".parse::<Endpoint>().is_err());
    }

    #[tokio::test]
    async fn test_dialing_wildcard_is_invalid() {
        let ep = Endpoint::tcp("*", 3559);
        assert!(matches!(
            ep.dial().await,
            Err(WireError::InvalidEndpoint(_))
        ));
    }
}
