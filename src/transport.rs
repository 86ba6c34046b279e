//! In-memory transport backing one proxy instance.
//!
//! The proxy never opens a socket: the gRPC server engine and the bound
//! client talk over a single pre-connected [`tokio::io::duplex`] pair.
//! [`SingleUseIncoming`] plays the role of a listener for the server side,
//! handing out exactly one connection for the whole process lifetime.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Capacity of the in-memory byte stream in each direction.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Create the linked endpoint pair for one proxy instance.
///
/// Returns `(client half, server half)`. Both halves live for the proxy's
/// lifetime; only the gRPC framing layer reads or writes them.
pub fn connection_pair(buffer_size: usize) -> (DuplexStream, DuplexStream) {
    tokio::io::duplex(buffer_size)
}

/// The server half of a pair, failing all IO once the abort token fires.
///
/// The server engine runs each connection detached from its accept loop, so
/// an immediate stop has to kill the connection itself; erroring the IO
/// resets every in-flight stream.
pub struct AbortableIo {
    io: DuplexStream,
    aborted: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl AbortableIo {
    pub fn new(io: DuplexStream, abort: CancellationToken) -> Self {
        Self {
            io,
            aborted: Box::pin(abort.cancelled_owned()),
        }
    }

    fn poll_abort(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        match self.aborted.as_mut().poll(cx) {
            Poll::Ready(()) => Poll::Ready(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "proxy stopped",
            )),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncRead for AbortableIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Poll::Ready(err) = self.poll_abort(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for AbortableIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Poll::Ready(err) = self.poll_abort(cx) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl tonic::transport::server::Connected for AbortableIo {
    type ConnectInfo = ();

    fn connect_info(&self) -> Self::ConnectInfo {}
}

/// Connection source handed to the gRPC server engine.
///
/// The first poll yields the server half of the pair immediately. Every
/// later poll parks on the lifecycle token and ends the stream once it
/// fires, which the server engine maps to a clean accept-loop shutdown
/// rather than an error. A second live connection is never produced.
pub struct SingleUseIncoming {
    conn: Option<AbortableIo>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl SingleUseIncoming {
    /// Wrap the server half of a pair; `lifecycle` owns the graceful
    /// shutdown, `abort` the immediate stop.
    pub fn new(conn: DuplexStream, lifecycle: CancellationToken, abort: CancellationToken) -> Self {
        Self {
            conn: Some(AbortableIo::new(conn, abort)),
            cancelled: Box::pin(lifecycle.cancelled_owned()),
        }
    }
}

impl Stream for SingleUseIncoming {
    type Item = io::Result<AbortableIo>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("handing out the in-memory server endpoint");
            return Poll::Ready(Some(Ok(conn)));
        }
        match self.cancelled.as_mut().poll(cx) {
            Poll::Ready(()) => {
                tracing::debug!("in-memory listener cancelled, ending accept loop");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn pair_is_full_duplex() {
        let (mut client, mut server) = connection_pair(DEFAULT_BUFFER_SIZE);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn yields_the_server_endpoint_exactly_once() {
        let (_client, server) = connection_pair(DEFAULT_BUFFER_SIZE);
        let lifecycle = CancellationToken::new();
        let mut incoming =
            SingleUseIncoming::new(server, lifecycle.clone(), CancellationToken::new());

        let first = incoming.next().await;
        assert!(matches!(first, Some(Ok(_))));

        // The second accept parks until the lifecycle is cancelled.
        let second = tokio::time::timeout(Duration::from_millis(50), incoming.next()).await;
        assert!(second.is_err());

        lifecycle.cancel();
        let exhausted = incoming.next().await;
        assert!(exhausted.is_none());
    }

    #[tokio::test]
    async fn cancelling_before_first_accept_still_yields_the_endpoint() {
        let (_client, server) = connection_pair(DEFAULT_BUFFER_SIZE);
        let lifecycle = CancellationToken::new();
        lifecycle.cancel();
        let mut incoming = SingleUseIncoming::new(server, lifecycle, CancellationToken::new());

        assert!(matches!(incoming.next().await, Some(Ok(_))));
        assert!(incoming.next().await.is_none());
    }

    #[tokio::test]
    async fn abort_fails_io_and_wakes_a_parked_read() {
        let (mut client, server) = connection_pair(DEFAULT_BUFFER_SIZE);
        let abort = CancellationToken::new();
        let mut server = AbortableIo::new(server, abort.clone());

        // IO passes through while the token is live.
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // A read parked on an idle pair is woken by the abort.
        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 1];
            server.read_exact(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        abort.cancel();

        let err = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("abort should wake the parked read")
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
    }
}
