//! Scripted serial stream for driving the engine from tests

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// Host end: handed to the engine
pub struct MockSerial {
    incoming: mpsc::UnboundedReceiver<io::Result<Vec<u8>>>,
    leftover: Vec<u8>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    fail_on_send: Arc<AtomicBool>,
    shut_down: Arc<AtomicBool>,
}

/// Device end: kept by the test
pub struct MockDevice {
    incoming: mpsc::UnboundedSender<io::Result<Vec<u8>>>,
    outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    fail_on_send: Arc<AtomicBool>,
    shut_down: Arc<AtomicBool>,
}

pub fn mock_serial() -> (MockSerial, MockDevice) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let fail_on_send = Arc::new(AtomicBool::new(false));
    let shut_down = Arc::new(AtomicBool::new(false));

    let serial = MockSerial {
        incoming: incoming_rx,
        leftover: Vec::new(),
        outgoing: outgoing_tx,
        fail_on_send: fail_on_send.clone(),
        shut_down: shut_down.clone(),
    };
    let device = MockDevice {
        incoming: incoming_tx,
        outgoing: outgoing_rx,
        fail_on_send,
        shut_down,
    };
    (serial, device)
}

impl MockDevice {
    /// Deliver bytes to the host
    pub fn send(&self, bytes: &[u8]) {
        assert!(!bytes.is_empty(), "an empty chunk reads as EOF");
        let _ = self.incoming.send(Ok(bytes.to_vec()));
    }

    /// Make the host's next read fail
    pub fn fail_read(&self) {
        let _ = self.incoming.send(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "device unplugged",
        )));
    }

    /// Make every host write fail
    pub fn fail_writes(&self) {
        self.fail_on_send.store(true, Ordering::SeqCst);
    }

    /// Next command written by the host
    pub async fn next_command(&mut self) -> Vec<u8> {
        self.outgoing
            .recv()
            .await
            .expect("host end dropped without writing")
    }

    /// A command written by the host, if any is waiting
    pub fn try_command(&mut self) -> Option<Vec<u8>> {
        self.outgoing.try_recv().ok()
    }

    /// True once the host has shut the stream down
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl AsyncRead for MockSerial {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.leftover.is_empty() {
            match this.incoming.poll_recv(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.leftover = bytes,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(e)),
                // Device end dropped: EOF
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = this.leftover.len().min(buf.remaining());
        buf.put_slice(&this.leftover[..n]);
        this.leftover.drain(..n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerial {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.shut_down.load(Ordering::SeqCst) || self.fail_on_send.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "serial write failed",
            )));
        }
        let _ = self.outgoing.send(buf.to_vec());
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shut_down.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
