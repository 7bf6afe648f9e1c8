//! WebSocket connection exposed as an ordered byte stream
//!
//! The controller forwards the VM's SSH port as binary WebSocket messages.
//! SSH needs a plain byte stream, so [`WsStream`] hides the message
//! boundaries: every write becomes exactly one binary message, and reads
//! drain the current inbound message before fetching the next one.
//!
//! A background pump task is the only owner of the WebSocket. The stream
//! talks to it over channels, and a [`CancellationToken`] derived from the
//! caller's token is the single source of truth for "stop waiting": once it
//! fires, pending reads and writes fail and the pump closes the socket with
//! a normal-closure frame.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use vt_core::traits::{DuplexTransport, TransportCloser};
use vt_core::TunnelError;

/// Upper bound on waiting for the close handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the pump waits for the peer's close reply; shorter than
/// `CLOSE_TIMEOUT` so a silent peer still yields a clean close
const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_millis(2_500);

type PumpHandle = JoinHandle<Result<(), WsError>>;

/// Byte-stream view of one WebSocket connection
#[derive(Debug)]
pub struct WsStream {
    /// Messages forwarded by the pump
    inbound: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    /// Unread remainder of the current inbound message
    pending: Bytes,
    /// Outgoing messages, one per write
    outbound: mpsc::UnboundedSender<Bytes>,
    /// Cancelled on close, deadline, or parent cancellation
    cancel: CancellationToken,
    /// Set when the cancellation came from an expired deadline
    deadline_expired: Arc<AtomicBool>,
    /// Timer task armed by `set_deadline`
    deadline: Option<JoinHandle<()>>,
    closer: StreamCloser,
}

impl WsStream {
    /// Wrap an established WebSocket.
    ///
    /// The stream's lifetime is bound to a child of `parent`: cancelling the
    /// parent tears the stream down, but closing the stream leaves the
    /// parent untouched.
    pub fn new<S>(ws: S, parent: &CancellationToken) -> Self
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Unpin
            + Send
            + 'static,
    {
        let cancel = parent.child_token();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump(ws, inbound_tx, outbound_rx, cancel.clone()));

        Self {
            inbound: inbound_rx,
            pending: Bytes::new(),
            outbound: outbound_tx,
            cancel: cancel.clone(),
            deadline_expired: Arc::new(AtomicBool::new(false)),
            deadline: None,
            closer: StreamCloser {
                cancel,
                pump: Arc::new(Mutex::new(Some(pump))),
            },
        }
    }

    /// Handle that closes this stream after it has been moved elsewhere
    pub fn closer(&self) -> StreamCloser {
        self.closer.clone()
    }

    /// Arm (or with `None`, disarm) a deadline for the whole stream.
    ///
    /// When the deadline passes the stream is cancelled: pending and future
    /// reads and writes fail with [`io::ErrorKind::TimedOut`].
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
        let Some(deadline) = deadline else {
            return;
        };

        let cancel = self.cancel.clone();
        let expired = Arc::clone(&self.deadline_expired);
        self.deadline = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::debug!("WebSocket stream deadline expired");
                    expired.store(true, Ordering::SeqCst);
                    cancel.cancel();
                }
            }
        }));
    }

    /// Cancel the stream and close the WebSocket with a normal-closure frame
    pub async fn close(self) -> Result<(), TunnelError> {
        self.closer.close().await
    }

    fn cancelled_error(&self) -> io::Error {
        if self.deadline_expired.load(Ordering::SeqCst) {
            io::Error::new(io::ErrorKind::TimedOut, "websocket stream deadline expired")
        } else {
            io::Error::new(io::ErrorKind::ConnectionAborted, "websocket stream closed")
        }
    }
}

impl Drop for WsStream {
    fn drop(&mut self) {
        if let Some(timer) = self.deadline.take() {
            timer.abort();
        }
    }
}

impl AsyncRead for WsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }

            match ready!(this.inbound.poll_recv(cx)) {
                Some(Ok(message)) => this.pending = message,
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None if this.cancel.is_cancelled() => {
                    return Poll::Ready(Err(this.cancelled_error()))
                }
                // Peer closed the WebSocket
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for WsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if this.cancel.is_cancelled() {
            return Poll::Ready(Err(this.cancelled_error()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        match this.outbound.send(Bytes::copy_from_slice(buf)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "websocket connection is gone",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.cancel.cancel();
        Poll::Ready(Ok(()))
    }
}

impl DuplexTransport for WsStream {
    fn closer(&self) -> Box<dyn TransportCloser> {
        Box::new(self.closer.clone())
    }
}

/// Closes a [`WsStream`] from outside the task that owns it
#[derive(Clone, Debug)]
pub struct StreamCloser {
    cancel: CancellationToken,
    pump: Arc<Mutex<Option<PumpHandle>>>,
}

impl StreamCloser {
    /// Cancel the stream and wait (bounded) for the close frame to go out.
    ///
    /// Only the first call waits for the pump; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), TunnelError> {
        self.cancel.cancel();

        let pump = self
            .pump
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(mut pump) = pump else {
            return Ok(());
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut pump).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(TunnelError::Io(to_io_error(&e))),
            Ok(Err(e)) => Err(TunnelError::Io(io::Error::other(format!(
                "websocket pump task failed: {}",
                e
            )))),
            Err(_) => {
                tracing::warn!("Timeout closing WebSocket, dropping connection");
                pump.abort();
                Err(TunnelError::Timeout {
                    operation: "websocket close",
                    after: CLOSE_TIMEOUT,
                })
            }
        }
    }
}

#[async_trait]
impl TransportCloser for StreamCloser {
    async fn close(&self) -> Result<(), TunnelError> {
        StreamCloser::close(self).await
    }
}

/// Owns the WebSocket: forwards messages in both directions until
/// cancelled, then sends a normal-closure frame
async fn pump<S>(
    mut ws: S,
    inbound: mpsc::UnboundedSender<io::Result<Bytes>>,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
) -> Result<(), WsError>
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = outbound.recv() => match frame {
                Some(data) => {
                    if let Err(e) = ws.send(Message::Binary(data)).await {
                        tracing::debug!("WebSocket send failed: {}", e);
                        let _ = inbound.send(Err(to_io_error(&e)));
                        return Err(e);
                    }
                }
                // The stream was dropped without an explicit close
                None => break,
            },

            message = ws.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    let _ = inbound.send(Ok(data));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(Ok(Bytes::copy_from_slice(text.as_bytes())));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "Peer closed WebSocket");
                    drop(inbound);
                    // Flushes the close reply tungstenite queued for us
                    return match ws.close().await {
                        Err(e) if !is_closed(&e) => Err(e),
                        _ => Ok(()),
                    };
                }
                // Ping/pong are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("WebSocket receive failed: {}", e);
                    let _ = inbound.send(Err(to_io_error(&e)));
                    return Err(e);
                }
                None => return Ok(()),
            },
        }
    }

    // Unblock the reader before the close handshake
    drop(inbound);

    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "closing".into(),
    };
    match ws.send(Message::Close(Some(frame))).await {
        Err(e) if !is_closed(&e) => return Err(e),
        Err(_) => return Ok(()),
        Ok(()) => {}
    }

    // Wait for the peer's close reply so the handshake completes
    let drain = async {
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
        }
    };
    if tokio::time::timeout(CLOSE_REPLY_TIMEOUT, drain).await.is_err() {
        tracing::debug!("Peer did not answer the close frame");
    }
    Ok(())
}

fn is_closed(e: &WsError) -> bool {
    matches!(e, WsError::ConnectionClosed | WsError::AlreadyClosed)
}

fn to_io_error(e: &WsError) -> io::Error {
    match e {
        WsError::Io(inner) => io::Error::new(inner.kind(), inner.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            io::Error::new(io::ErrorKind::ConnectionAborted, e.to_string())
        }
        other => io::Error::other(other.to_string()),
    }
}
