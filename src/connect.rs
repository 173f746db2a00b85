use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use http::uri::Scheme;
use http::{HeaderValue, Uri};
use hyper::client::connect::{Connected, Connection};
use hyper::client::HttpConnector;
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tower_service::Service;

use crate::error::BoxError;

/// A resolved proxy destination: where to dial, and the
/// `Proxy-Authorization` value to present, if credentials were found.
#[derive(Clone, Debug)]
pub(crate) struct ProxyServer {
    pub(crate) uri: Uri,
    pub(crate) auth: Option<HeaderValue>,
}

impl ProxyServer {
    pub(crate) fn new(
        host: &str,
        port: u16,
        auth: Option<HeaderValue>,
    ) -> crate::Result<ProxyServer> {
        let uri = format!("http://{}:{}", host, port)
            .parse()
            .map_err(crate::error::builder)?;
        Ok(ProxyServer { uri, auth })
    }
}

/// The connector handed to hyper: dials the target directly or through the
/// proxy, tunnels https-over-proxy with CONNECT, and performs the rustls
/// handshake.
#[derive(Clone)]
pub(crate) struct Connector {
    http: HttpConnector,
    tls: TlsConnector,
    proxy: Option<ProxyServer>,
}

impl Connector {
    pub(crate) fn new(
        tls: Arc<rustls::ClientConfig>,
        proxy: Option<ProxyServer>,
        connect_timeout: Option<Duration>,
        nodelay: bool,
    ) -> Connector {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(connect_timeout);
        http.set_nodelay(nodelay);
        Connector {
            http,
            tls: TlsConnector::from(tls),
            proxy,
        }
    }

    async fn connect(mut self, dst: Uri) -> Result<Conn, BoxError> {
        match self.proxy.take() {
            Some(proxy) => self.connect_via_proxy(dst, proxy).await,
            None => self.connect_direct(dst).await,
        }
    }

    async fn connect_direct(mut self, dst: Uri) -> Result<Conn, BoxError> {
        trace!("connecting to {:?}", dst);
        let io = self.http.call(dst.clone()).await?;
        if dst.scheme() == Some(&Scheme::HTTPS) {
            let host = dst.host().ok_or("destination has no host")?.to_owned();
            let io = self.handshake(io, &host).await?;
            Ok(Conn {
                inner: Inner::Tls(Box::new(io)),
                is_proxy: false,
            })
        } else {
            Ok(Conn {
                inner: Inner::Plain(io),
                is_proxy: false,
            })
        }
    }

    async fn connect_via_proxy(mut self, dst: Uri, proxy: ProxyServer) -> Result<Conn, BoxError> {
        trace!("proxy({:?}) intercepts {:?}", proxy.uri, dst);
        let io = self.http.call(proxy.uri.clone()).await?;
        if dst.scheme() == Some(&Scheme::HTTPS) {
            trace!("tunneling https over proxy");
            let host = dst.host().ok_or("destination has no host")?.to_owned();
            let port = dst.port_u16().unwrap_or(443);
            let tunneled = tunnel(io, &host, port, proxy.auth.as_ref()).await?;
            let io = self.handshake(tunneled, &host).await?;
            return Ok(Conn {
                inner: Inner::Tls(Box::new(io)),
                is_proxy: false,
            });
        }
        // Plain http is forwarded: hyper sees the proxy flag and switches the
        // request line to absolute form.
        Ok(Conn {
            inner: Inner::Plain(io),
            is_proxy: true,
        })
    }

    async fn handshake(
        &self,
        io: TcpStream,
        host: &str,
    ) -> Result<TlsStream<TcpStream>, BoxError> {
        let server_name = rustls::ServerName::try_from(host)
            .map_err(|_| format!("invalid server name {:?}", host))?;
        let io = self.tls.connect(server_name, io).await?;
        Ok(io)
    }
}

impl Service<Uri> for Connector {
    type Response = Conn;
    type Error = BoxError;
    type Future = Connecting;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(connector.connect(dst))
    }
}

pub(crate) type Connecting = Pin<Box<dyn Future<Output = Result<Conn, BoxError>> + Send>>;

pub(crate) struct Conn {
    inner: Inner,
    is_proxy: bool,
}

enum Inner {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Connection for Conn {
    fn connected(&self) -> Connected {
        let connected = match self.inner {
            Inner::Plain(ref s) => s.connected(),
            Inner::Tls(ref s) => s.get_ref().0.connected(),
        };
        if self.is_proxy {
            connected.proxy(true)
        } else {
            connected
        }
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.inner {
            Inner::Plain(ref mut s) => Pin::new(s).poll_read(cx, buf),
            Inner::Tls(ref mut s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner {
            Inner::Plain(ref mut s) => Pin::new(s).poll_write(cx, buf),
            Inner::Tls(ref mut s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.inner {
            Inner::Plain(ref mut s) => Pin::new(s).poll_write_vectored(cx, bufs),
            Inner::Tls(ref mut s) => Pin::new(s.as_mut()).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self.inner {
            Inner::Plain(ref s) => s.is_write_vectored(),
            Inner::Tls(ref s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner {
            Inner::Plain(ref mut s) => Pin::new(s).poll_flush(cx),
            Inner::Tls(ref mut s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner {
            Inner::Plain(ref mut s) => Pin::new(s).poll_shutdown(cx),
            Inner::Tls(ref mut s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Exchange a CONNECT request with the proxy, returning the stream once the
/// proxy confirms the tunnel.
async fn tunnel<T>(
    mut conn: T,
    host: &str,
    port: u16,
    auth: Option<&HeaderValue>,
) -> Result<T, BoxError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = format!(
        "\
         CONNECT {0}:{1} HTTP/1.1\r\n\
         Host: {0}:{1}\r\n\
         ",
        host, port
    )
    .into_bytes();

    if let Some(value) = auth {
        trace!("tunnel to {}:{} using basic auth", host, port);
        buf.extend_from_slice(b"Proxy-Authorization: ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"\r\n");

    conn.write_all(&buf).await?;

    let mut buf = [0; 8192];
    let mut pos = 0;

    loop {
        let n = conn.read(&mut buf[pos..]).await?;

        if n == 0 {
            return Err(tunnel_eof());
        }
        pos += n;

        let recvd = &buf[..pos];
        if recvd.starts_with(b"HTTP/1.1 200") || recvd.starts_with(b"HTTP/1.0 200") {
            if recvd.ends_with(b"\r\n\r\n") {
                return Ok(conn);
            }
            if pos == buf.len() {
                return Err("proxy headers too long for tunnel".into());
            }
        // else read more
        } else if recvd.starts_with(b"HTTP/1.1 407") {
            return Err("proxy authentication required".into());
        } else if pos > 12 {
            return Err("unsuccessful tunnel".into());
        }
    }
}

fn tunnel_eof() -> BoxError {
    "unexpected eof while tunneling".into()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::tunnel;

    macro_rules! mock_tunnel {
        () => {{
            mock_tunnel!(b"\
                HTTP/1.1 200 OK\r\n\
                \r\n\
            ")
        }};
        ($write:expr) => {{
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            let connect_expected = format!(
                "\
                 CONNECT {0}:{1} HTTP/1.1\r\n\
                 Host: {0}:{1}\r\n\
                 \r\n\
                 ",
                addr.ip(),
                addr.port()
            )
            .into_bytes();

            thread::spawn(move || {
                let (mut sock, _) = listener.accept().unwrap();
                let mut buf = [0u8; 4096];
                let n = sock.read(&mut buf).unwrap();
                assert_eq!(&buf[..n], &connect_expected[..]);

                sock.write_all($write).unwrap();
            });
            addr
        }};
    }

    #[tokio::test]
    async fn test_tunnel() {
        let addr = mock_tunnel!();

        let tcp = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let host = addr.ip().to_string();
        let port = addr.port();
        tunnel(tcp, &host, port, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_eof() {
        let addr = mock_tunnel!(b"HTTP/1.1 200 OK");

        let tcp = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let host = addr.ip().to_string();
        let port = addr.port();
        tunnel(tcp, &host, port, None).await.unwrap_err();
    }

    #[tokio::test]
    async fn test_tunnel_non_http_response() {
        let addr = mock_tunnel!(b"foo bar baz hallo");

        let tcp = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let host = addr.ip().to_string();
        let port = addr.port();
        tunnel(tcp, &host, port, None).await.unwrap_err();
    }

    #[tokio::test]
    async fn test_tunnel_proxy_auth_required() {
        let addr = mock_tunnel!(b"\
            HTTP/1.1 407 Proxy Authentication Required\r\n\
            \r\n\
        ");

        let tcp = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let host = addr.ip().to_string();
        let port = addr.port();
        let err = tunnel(tcp, &host, port, None).await.unwrap_err();
        assert_eq!(err.to_string(), "proxy authentication required");
    }
}
