use crate::error::Error;
use pki_types::ServerName;
use rustls::RootCertStore;
use std::fs::File;
use std::io::{self, BufReader};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, TlsStream};

/// The transport under a connection: a raw TCP stream or a TLS session on
/// top of one. Everything above reads and writes through this enum so the
/// frame codec never cares which one it got.
pub enum WaveStream {
    Plain(TcpStream),
    Secure(TlsStream<TcpStream>),
}

impl AsyncRead for WaveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WaveStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            WaveStream::Secure(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for WaveStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            WaveStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            WaveStream::Secure(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WaveStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            WaveStream::Secure(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            WaveStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            WaveStream::Secure(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Wraps an established TCP stream in a client TLS session. The trust store
/// starts from the bundled webpki roots; a PEM file from the client config
/// extends it, which is how self-signed test servers get accepted.
pub(crate) async fn wrap_client_tls(
    stream: TcpStream,
    domain: &str,
    ca_file: Option<&str>,
) -> Result<WaveStream, Error> {
    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = ca_file {
        let mut reader = BufReader::new(File::open(path)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            root_store
                .add(cert?)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        }
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(domain.to_owned())?;
    let tls_stream = connector.connect(server_name, stream).await?;

    Ok(WaveStream::Secure(TlsStream::from(tls_stream)))
}
