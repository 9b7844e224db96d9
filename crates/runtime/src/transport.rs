//! Tunnel provider: dialing the gateway through a bound proxy.
//!
//! Sessions never open sockets themselves; they ask a [`Tunnel`] for a
//! duplex byte stream to a host/port and layer the WebSocket on top. The
//! trait keeps the proxy mechanics swappable (and mockable in tests).
//!
//! [`NetTunnel`] is the default implementation:
//!
//! - no proxy: plain TCP
//! - `socks5://`: SOCKS5 negotiation via `tokio-socks`, with optional
//!   username/password auth
//! - `http://` / `https://`: HTTP CONNECT handshake with optional basic
//!   auth, then the raw stream

use std::future::Future;
use std::pin::Pin;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

use crate::error::{Error, Result};
use crate::proxy::{ProxyDescriptor, ProxyScheme};

/// Marker trait for the byte streams a tunnel yields.
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TunnelStream for T {}

impl std::fmt::Debug for dyn TunnelStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TunnelStream")
    }
}

/// Owned duplex stream to the target.
pub type BoxedStream = Box<dyn TunnelStream>;

/// Capability of dialing a target host/port, possibly through a proxy.
///
/// Object-safe so sessions can hold `Arc<dyn Tunnel>`.
pub trait Tunnel: Send + Sync {
    /// Opens a duplex stream to `host:port` through this tunnel.
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedStream>> + Send + '_>>;
}

/// Default tunnel over real sockets.
pub struct NetTunnel {
    proxy: Option<ProxyDescriptor>,
}

impl NetTunnel {
    /// Creates a tunnel bound to `proxy`, or a direct one for `None`.
    pub fn new(proxy: Option<ProxyDescriptor>) -> Self {
        Self { proxy }
    }

    async fn dial(&self, host: &str, port: u16) -> Result<BoxedStream> {
        match &self.proxy {
            None => {
                let stream = TcpStream::connect((host, port)).await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            Some(proxy) => match proxy.scheme {
                ProxyScheme::Socks5 => {
                    let upstream = (proxy.host.as_str(), proxy.port);
                    let stream = match &proxy.credentials {
                        Some(c) => {
                            Socks5Stream::connect_with_password(
                                upstream,
                                (host, port),
                                &c.username,
                                &c.password,
                            )
                            .await?
                        }
                        None => Socks5Stream::connect(upstream, (host, port)).await?,
                    };
                    Ok(Box::new(stream))
                }
                ProxyScheme::Http | ProxyScheme::Https => {
                    http_connect(proxy, host, port).await
                }
            },
        }
    }
}

impl Tunnel for NetTunnel {
    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<BoxedStream>> + Send + '_>> {
        let host = host.to_string();
        Box::pin(async move { self.dial(&host, port).await })
    }
}

/// Performs an HTTP CONNECT handshake and hands back the raw stream.
async fn http_connect(proxy: &ProxyDescriptor, host: &str, port: u16) -> Result<BoxedStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port)).await?;
    stream.set_nodelay(true)?;

    let mut request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: keep-alive\r\n"
    );
    if let Some(c) = &proxy.credentials {
        let token = BASE64.encode(format!("{}:{}", c.username, c.password));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read exactly up to the end of the response head; anything after
    // belongs to the tunneled protocol and must not be consumed here.
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::Tunnel(format!("proxy {proxy} closed during CONNECT")));
        }
        head.push(byte[0]);
        if head.len() > 8192 {
            return Err(Error::Tunnel(format!("proxy {proxy} sent oversized CONNECT response")));
        }
    }

    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    let accepted = status_line
        .split_whitespace()
        .nth(1)
        .map(|code| code.starts_with('2'))
        .unwrap_or(false);

    if !accepted {
        return Err(Error::Tunnel(format!(
            "proxy {proxy} refused CONNECT: {status_line}"
        )));
    }

    Ok(Box::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn local_listener() -> (TcpListener, String, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn direct_tunnel_dials_target() {
        let (listener, host, port) = local_listener().await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let tunnel = NetTunnel::new(None);
        let mut stream = tunnel.connect(&host, port).await.unwrap();

        stream.write_all(b"hello").await.unwrap();
        let mut echo = [0u8; 5];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_connect_succeeds_on_2xx() {
        let (listener, host, port) = local_listener().await;

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Consume the CONNECT head.
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                socket.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            let head = String::from_utf8(head).unwrap();
            assert!(head.starts_with("CONNECT target.example:443 HTTP/1.1\r\n"));
            assert!(head.contains("Proxy-Authorization: Basic "));

            socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();

            // Tunneled bytes flow untouched after the handshake.
            let mut payload = [0u8; 4];
            socket.read_exact(&mut payload).await.unwrap();
            socket.write_all(&payload).await.unwrap();
        });

        let proxy =
            ProxyDescriptor::parse(&format!("http://user:pw@{host}:{port}")).unwrap();
        let tunnel = NetTunnel::new(Some(proxy));
        let mut stream = tunnel.connect("target.example", 443).await.unwrap();

        stream.write_all(b"ping").await.unwrap();
        let mut echo = [0u8; 4];
        stream.read_exact(&mut echo).await.unwrap();
        assert_eq!(&echo, b"ping");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_connect_rejects_non_2xx() {
        let (listener, host, port) = local_listener().await;

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                socket.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            socket
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = ProxyDescriptor::parse(&format!("http://{host}:{port}")).unwrap();
        let tunnel = NetTunnel::new(Some(proxy));
        let err = tunnel.connect("target.example", 443).await.unwrap_err();

        assert!(err.to_string().contains("refused CONNECT"));
        assert!(err.to_string().contains("407"));
    }

    #[tokio::test]
    async fn http_connect_error_redacts_credentials() {
        let (listener, host, port) = local_listener().await;

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            // Close immediately: CONNECT sees EOF.
            drop(socket);
        });

        let proxy =
            ProxyDescriptor::parse(&format!("http://user:topsecret@{host}:{port}")).unwrap();
        let tunnel = NetTunnel::new(Some(proxy));
        let err = tunnel.connect("target.example", 443).await.unwrap_err();

        assert!(!err.to_string().contains("topsecret"));
    }
}
