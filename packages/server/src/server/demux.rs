//! Protocol demultiplexing
//!
//! Single-shot sniff of a new plaintext connection: an exact match of the
//! 24-byte HTTP/2 preface selects the H/2 engine with the preface
//! consumed; a first byte that can start an HTTP/1 method selects the H/1
//! engine with every sniffed byte rewound; anything else closes the
//! connection. Over TLS the decision comes from ALPN instead and this
//! module is not involved.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;
use crate::protocols::h2::PREFACE;

/// Outcome of the sniff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

/// First bytes an HTTP/1 request can start with (GET, POST, PUT, PATCH,
/// DELETE, HEAD, OPTIONS, CONNECT, TRACE).
const H1_FIRST_BYTES: &[u8] = b"GPDHOCT";

/// Peeks the first bytes of `io`. Returns `None` when the connection is
/// neither protocol (the caller closes it), otherwise the protocol and a
/// stream that replays anything the H/1 parser still needs.
pub async fn sniff<S>(mut io: S) -> Result<Option<(Protocol, Rewind<S>)>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut sniffed = [0u8; PREFACE.len()];
    let mut filled = 0;

    loop {
        // Decide as early as a mismatch allows; only a potential preface
        // needs the full 24 bytes.
        if filled > 0 && sniffed[..filled] != PREFACE[..filled] {
            return Ok(decide_h1(&sniffed[..filled]).map(|proto| {
                (proto, Rewind::new(io, Bytes::copy_from_slice(&sniffed[..filled])))
            }));
        }
        if filled == PREFACE.len() {
            // Full preface matched and is consumed by contract.
            return Ok(Some((Protocol::Http2, Rewind::new(io, Bytes::new()))));
        }

        let n = io.read(&mut sniffed[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None); // clean close before any byte
            }
            return Ok(decide_h1(&sniffed[..filled]).map(|proto| {
                (proto, Rewind::new(io, Bytes::copy_from_slice(&sniffed[..filled])))
            }));
        }
        filled += n;
    }
}

fn decide_h1(sniffed: &[u8]) -> Option<Protocol> {
    sniffed
        .first()
        .filter(|b| H1_FIRST_BYTES.contains(b))
        .map(|_| Protocol::Http1)
}

/// Stream wrapper replaying sniffed bytes before the inner socket.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    #[must_use]
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
