//! LAN discovery over UDP: a broadcast `discover` request and a responder
//! that answers with this host's pointer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auditorium_core::wire::{self, Expr};
use auditorium_core::{AuditoriumHost, FormatError, HostPointer, Message};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DISCOVER: &str = "discover";
pub const DISCOVER_REPLY: &str = "discover-reply";

const MAX_DATAGRAM: usize = 65536;

/// Broadcast a discover request to `target` and collect the hosts named in
/// replies until `wait` elapses. Our own pointer and duplicates are skipped.
pub async fn discover(
    me: &HostPointer,
    sequence: String,
    target: SocketAddr,
    wait: Duration,
) -> std::io::Result<Vec<HostPointer>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    let request = Message::new(DISCOVER, me.clone(), sequence, me.to_expr());
    socket.send_to(&request.to_expr().to_verbatim(), target).await?;
    debug!(%target, "discover request sent");

    let deadline = Instant::now() + wait;
    let mut found: Vec<HostPointer> = Vec::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Ok(r) => r,
            Err(_) => break,
        };
        let (n, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!("discover receive failed: {e}");
                break;
            }
        };
        match parse_reply(&buf[..n]) {
            Ok(hosts) => {
                for hp in hosts {
                    if hp.node_id() != me.node_id() && !found.contains(&hp) {
                        found.push(hp);
                    }
                }
            }
            Err(e) => debug!(%from, "ignoring datagram: {e}"),
        }
    }
    info!(count = found.len(), "discovery finished");
    Ok(found)
}

#[derive(Debug, thiserror::Error)]
enum DatagramError {
    #[error(transparent)]
    Decode(#[from] wire::DecodeError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("unexpected message type {0}")]
    Kind(String),
}

fn parse_message(bytes: &[u8], kind: &str) -> Result<Message, DatagramError> {
    let message = Message::from_expr(&wire::decode_exact(bytes)?)?;
    if message.kind() != kind {
        return Err(DatagramError::Kind(message.kind().to_string()));
    }
    Ok(message)
}

fn parse_reply(bytes: &[u8]) -> Result<Vec<HostPointer>, DatagramError> {
    let message = parse_message(bytes, DISCOVER_REPLY)?;
    let hosts = message
        .datum()
        .as_list()
        .ok_or_else(|| FormatError::mismatch(&HostPointer::pattern(), message.datum()))?;
    Ok(hosts
        .iter()
        .map(HostPointer::from_expr)
        .collect::<Result<Vec<_>, FormatError>>()?)
}

/// Answer discover requests on `socket` until `shutdown` flips to true.
pub async fn run_responder(
    socket: UdpSocket,
    me: HostPointer,
    host: Arc<dyn AuditoriumHost>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        };
        let (n, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!("discovery responder stopped: {e}");
                break;
            }
        };
        let request = match parse_message(&buf[..n], DISCOVER) {
            Ok(m) => m,
            Err(e) => {
                debug!(%from, "ignoring datagram: {e}");
                continue;
            }
        };
        let asker = match HostPointer::from_expr(request.datum()) {
            Ok(hp) => hp,
            Err(e) => {
                debug!(%from, "ignoring discover request: {e}");
                continue;
            }
        };
        if asker.node_id() == me.node_id() {
            continue;
        }
        let reply = Message::new(
            DISCOVER_REPLY,
            me.clone(),
            host.next_sequence(),
            Expr::list([me.to_expr()]),
        );
        if let Err(e) = socket.send_to(&reply.to_expr().to_verbatim(), from).await {
            warn!(%from, "discover reply failed: {e}");
        } else {
            debug!(%asker, "answered discover request");
        }
    }
}
