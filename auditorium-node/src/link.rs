//! One live connection to a peer: a reader task feeding the host and a writer
//! task draining an outbound queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use auditorium_core::{AuditoriumHost, HostPointer, LinkId, Message};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::transport::{message_bytes, ExprReader};

struct LinkState {
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl LinkState {
    /// Stop both tasks. True only for the call that actually stopped the link.
    fn halt(&self) -> bool {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        was_running
    }
}

pub struct Link {
    id: LinkId,
    peer: HostPointer,
    state: Arc<LinkState>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl Link {
    /// Start the reader and writer tasks. Messages read off the stream go to
    /// `host.receive_announcement`; when the link fails on its own the host
    /// hears `remove_link(id)` exactly once.
    pub fn spawn<R, W>(
        id: LinkId,
        peer: HostPointer,
        reader: ExprReader<R>,
        writer: W,
        host: Arc<dyn AuditoriumHost>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown, _) = watch::channel(false);
        let state = Arc::new(LinkState {
            running: AtomicBool::new(true),
            shutdown,
        });
        let (outbound, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(
            id,
            peer.clone(),
            reader,
            state.clone(),
            host.clone(),
        ));
        tokio::spawn(write_loop(id, peer.clone(), writer, rx, state.clone(), host));
        info!(link = id, %peer, "link started");
        Self {
            id,
            peer,
            state,
            outbound,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn peer(&self) -> &HostPointer {
        &self.peer
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Queue a message for the peer. False if the link is no longer running.
    pub fn send(&self, message: &Message) -> bool {
        self.send_bytes(message_bytes(message))
    }

    pub(crate) fn send_bytes(&self, bytes: Vec<u8>) -> bool {
        self.is_running() && self.outbound.send(bytes).is_ok()
    }

    /// Close the connection. The host is not notified.
    pub fn stop(&self) {
        if self.state.halt() {
            debug!(link = self.id, peer = %self.peer, "link stopped");
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(
    id: LinkId,
    peer: HostPointer,
    mut reader: ExprReader<R>,
    state: Arc<LinkState>,
    host: Arc<dyn AuditoriumHost>,
) {
    let mut shutdown = state.shutdown.subscribe();
    loop {
        let next = tokio::select! {
            r = reader.read_expr() => r,
            _ = shutdown.wait_for(|stopped| *stopped) => return,
        };
        match next {
            Ok(Some(expr)) => match Message::from_expr(&expr) {
                Ok(message) => host.receive_announcement(message),
                Err(e) => debug!(link = id, %peer, "dropping value that is not a message: {e}"),
            },
            Ok(None) => {
                info!(link = id, %peer, "peer closed link");
                break;
            }
            Err(e) => {
                warn!(link = id, %peer, "link read failed: {e}");
                break;
            }
        }
    }
    if state.halt() {
        host.remove_link(id);
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(
    id: LinkId,
    peer: HostPointer,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    state: Arc<LinkState>,
    host: Arc<dyn AuditoriumHost>,
) {
    let mut shutdown = state.shutdown.subscribe();
    loop {
        let bytes = tokio::select! {
            b = rx.recv() => b,
            _ = shutdown.wait_for(|stopped| *stopped) => None,
        };
        let Some(bytes) = bytes else { break };
        let written = match writer.write_all(&bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(link = id, %peer, "link write failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
    if state.halt() {
        host.remove_link(id);
    }
}
