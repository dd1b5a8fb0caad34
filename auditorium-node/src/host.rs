//! Host: owns the log, the layer stack and the set of links, and turns
//! incoming messages into deliveries.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use auditorium_core::message::{ANNOUNCE, JOIN, JOIN_REPLY};
use auditorium_core::{
    AuditoriumHost, CryptoError, Expr, FormatError, HostPointer, IntegrityLayer, KeyStore,
    Layer, LayerStack, LinkId, Log, LogError, Message, MessagePointer, TemporalLayer,
};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery;
use crate::link::Link;
use crate::transport::{message_bytes, write_message, ExprReader, ReadError};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("network: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error("bad address {0:?}")]
    Address(String),
    #[error("join failed: {0}")]
    Join(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("host released")]
    Released,
}

struct HostInner {
    config: Config,
    me: HostPointer,
    broadcast: SocketAddr,
    discovery_port: Option<u16>,
    stack: LayerStack,
    log: Log,
    links: Mutex<HashMap<LinkId, Link>>,
    next_link: AtomicU64,
    sequence: AtomicU64,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    delivered_tx: mpsc::UnboundedSender<Message>,
    delivered_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
}

impl AuditoriumHost for HostInner {
    fn node_id(&self) -> &str {
        self.me.node_id()
    }

    fn log(&self) -> &Log {
        &self.log
    }

    fn next_sequence(&self) -> String {
        (self.sequence.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn receive_announcement(&self, message: Message) {
        self.process(message);
    }

    fn remove_link(&self, link: LinkId) {
        if let Some(l) = self.links.lock().remove(&link) {
            info!(link, peer = %l.peer(), "link removed");
        }
    }
}

impl HostInner {
    /// Unwrap through the stack, then log, flood and deliver. Messages already
    /// in the log are dropped. Rejected ones are never logged, so they cannot
    /// reach the frontier or a later `succeeds` list.
    fn process(&self, message: Message) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        if message.kind() != ANNOUNCE {
            debug!(from = %message.from(), kind = message.kind(), "ignoring non-announcement on link");
            return;
        }
        let ptr = MessagePointer::from(&message);
        if self.log.contains(&ptr) {
            debug!(%ptr, "already seen");
            return;
        }
        let payload = match self.stack.receive_announcement(self, message.datum().clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%ptr, from = %message.from(), "rejected announcement: {e}");
                return;
            }
        };
        match self.log.log_announcement(&message) {
            Ok(true) => {
                self.flood(&message);
                let _ = self.delivered_tx.send(message.with_datum(payload));
            }
            Ok(false) => debug!(%ptr, "already seen"),
            Err(e) => warn!(%ptr, "could not log announcement: {e}"),
        }
    }

    fn flood(&self, message: &Message) {
        let bytes = message_bytes(message);
        for link in self.links.lock().values() {
            if !link.send_bytes(bytes.clone()) {
                debug!(link = link.id(), "skipping stopped link");
            }
        }
    }

    /// Hand a handshaken connection to a new link. A join from a peer we are
    /// already linked to replaces the old link.
    fn adopt(
        self: &Arc<Self>,
        reader: ExprReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        peer: HostPointer,
        replace: bool,
    ) -> bool {
        let mut links = self.links.lock();
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let existing: Vec<LinkId> = links
            .iter()
            .filter(|(_, l)| l.peer() == &peer)
            .map(|(id, _)| *id)
            .collect();
        if !existing.is_empty() {
            if !replace {
                debug!(%peer, "already linked");
                return false;
            }
            for id in existing {
                if let Some(old) = links.remove(&id) {
                    old.stop();
                }
            }
        }
        let id = self.next_link.fetch_add(1, Ordering::SeqCst);
        let host: Arc<dyn AuditoriumHost> = self.clone();
        links.insert(id, Link::spawn(id, peer, reader, writer, host));
        true
    }

    fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.config.join_timeout_ms)
    }

    async fn read_handshake(
        &self,
        reader: &mut ExprReader<OwnedReadHalf>,
        kind: &str,
    ) -> Result<Message, HostError> {
        let wait = self.join_timeout();
        let expr = tokio::time::timeout(wait, reader.read_expr())
            .await
            .map_err(|_| HostError::Timeout(wait))??
            .ok_or_else(|| HostError::Join(format!("peer closed before {kind}")))?;
        let message = Message::from_expr(&expr)?;
        if message.kind() != kind {
            return Err(HostError::Join(format!(
                "expected {kind}, got {}",
                message.kind()
            )));
        }
        Ok(message)
    }
}

async fn handshake_accept(inner: Arc<HostInner>, stream: TcpStream) -> Result<(), HostError> {
    let (read, mut write) = stream.into_split();
    let mut reader = ExprReader::new(read);
    let request = inner.read_handshake(&mut reader, JOIN).await?;
    inner.stack.receive_join(&*inner, request.datum().clone())?;
    let datum = inner.stack.make_join_reply(&*inner, Expr::empty_list())?;
    let reply = Message::new(JOIN_REPLY, inner.me.clone(), inner.next_sequence(), datum);
    write_message(&mut write, &reply).await?;
    info!(peer = %request.from(), "peer joined");
    inner.adopt(reader, write, request.from().clone(), true);
    Ok(())
}

/// True when the listener is reachable from the network but the pointer we
/// hand out only works on this machine.
fn advertises_loopback_only(config: &Config) -> bool {
    let loopback = |a: &str| match a.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => a == "localhost",
    };
    loopback(&config.advertise_address) && !loopback(&config.listen_address)
}

async fn accept_loop(inner: Arc<HostInner>, listener: TcpListener) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            _ = shutdown.wait_for(|stopped| *stopped) => break,
        };
        match accepted {
            Ok((stream, addr)) => {
                let inner = inner.clone();
                tokio::spawn(async move {
                    if let Err(e) = handshake_accept(inner, stream).await {
                        warn!(%addr, "incoming join failed: {e}");
                    }
                });
            }
            Err(e) => {
                warn!("accept failed, no longer taking joins: {e}");
                break;
            }
        }
    }
}

/// A running node. Cheap to clone; all clones drive the same host.
#[derive(Clone)]
pub struct Host {
    inner: Arc<HostInner>,
}

impl Host {
    /// Open the log, load keys, bind the link listener and the discovery
    /// responder, and start accepting joins.
    pub async fn start(config: Config, keystore: Arc<dyn KeyStore>) -> Result<Host, HostError> {
        let broadcast_ip: IpAddr = config
            .broadcast_address
            .parse()
            .map_err(|_| HostError::Address(config.broadcast_address.clone()))?;
        let broadcast = SocketAddr::new(broadcast_ip, config.discover_port);
        let layers: Vec<Box<dyn Layer>> = vec![
            Box::new(IntegrityLayer::new(&config.node_id, keystore)?),
            Box::new(TemporalLayer),
        ];
        let stack = LayerStack::new(layers);
        let log = Log::open(config.log_path())?;

        let listener =
            TcpListener::bind((config.listen_address.as_str(), config.listen_port)).await?;
        let port = listener.local_addr()?.port();
        let me = HostPointer::new(config.node_id.clone(), config.advertise_address.clone(), port);
        if advertises_loopback_only(&config) {
            warn!(
                advertise = %config.advertise_address,
                "advertising a loopback address; peers on other machines cannot connect back"
            );
        }

        let responder =
            match UdpSocket::bind((config.listen_address.as_str(), config.discover_port)).await {
                Ok(s) => Some(s),
                Err(e) => {
                    warn!(port = config.discover_port, "discovery responder disabled: {e}");
                    None
                }
            };
        let discovery_port = match &responder {
            Some(s) => Some(s.local_addr()?.port()),
            None => None,
        };

        let (shutdown, _) = watch::channel(false);
        let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(HostInner {
            config,
            me,
            broadcast,
            discovery_port,
            stack,
            log,
            links: Mutex::new(HashMap::new()),
            next_link: AtomicU64::new(0),
            sequence: AtomicU64::new(0),
            running: AtomicBool::new(true),
            shutdown,
            delivered_tx,
            delivered_rx: tokio::sync::Mutex::new(delivered_rx),
        });

        tokio::spawn(accept_loop(inner.clone(), listener));
        if let Some(socket) = responder {
            tokio::spawn(discovery::run_responder(
                socket,
                inner.me.clone(),
                inner.clone(),
                inner.shutdown.subscribe(),
            ));
        }
        info!(me = %inner.me, layers = ?inner.stack.names(), "host started");
        Ok(Host { inner })
    }

    pub fn me(&self) -> &HostPointer {
        &self.inner.me
    }

    pub fn log(&self) -> &Log {
        &self.inner.log
    }

    /// Port the discovery responder is bound to, if it could be bound.
    pub fn discovery_port(&self) -> Option<u16> {
        self.inner.discovery_port
    }

    fn ensure_running(&self) -> Result<(), HostError> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HostError::Released)
        }
    }

    /// Ask the LAN who is out there. Waits the configured discovery timeout.
    pub async fn discover(&self) -> Result<Vec<HostPointer>, HostError> {
        self.ensure_running()?;
        let wait = Duration::from_millis(self.inner.config.discover_timeout_ms);
        Ok(discovery::discover(
            &self.inner.me,
            self.inner.next_sequence(),
            self.inner.broadcast,
            wait,
        )
        .await?)
    }

    /// Connect to `peer`, run the join handshake and keep the connection as a
    /// link. Pointers in the reply are added to our log.
    pub async fn join(&self, peer: &HostPointer) -> Result<(), HostError> {
        self.ensure_running()?;
        let inner = &self.inner;
        if peer.node_id() == inner.me.node_id() {
            return Err(HostError::Join("refusing to join ourselves".into()));
        }
        if self.links().contains(peer) {
            debug!(%peer, "already linked");
            return Ok(());
        }
        let wait = inner.join_timeout();
        let stream = tokio::time::timeout(wait, TcpStream::connect((peer.address(), peer.port())))
            .await
            .map_err(|_| HostError::Timeout(wait))??;
        let (read, mut write) = stream.into_split();
        let datum = inner.stack.make_join(&**inner, Expr::atom(""))?;
        let request = Message::new(JOIN, inner.me.clone(), inner.next_sequence(), datum);
        write_message(&mut write, &request).await?;

        let mut reader = ExprReader::new(read);
        let reply = inner.read_handshake(&mut reader, JOIN_REPLY).await?;
        inner
            .stack
            .receive_join_reply(&**inner, reply.datum().clone())?;
        info!(%peer, "joined");
        inner.adopt(reader, write, reply.from().clone(), false);
        Ok(())
    }

    /// Wrap `datum` through the layer stack and send it to every peer. Our
    /// own announcement is logged and delivered like any other. Returns the
    /// message as it went on the wire.
    pub fn announce(&self, datum: Expr) -> Result<Message, HostError> {
        self.ensure_running()?;
        let inner = &self.inner;
        let datum = inner.stack.make_announcement(&**inner, datum)?;
        let message = Message::new(ANNOUNCE, inner.me.clone(), inner.next_sequence(), datum);
        inner.process(message.clone());
        Ok(message)
    }

    /// Next delivered announcement, with its datum unwrapped. Fails with
    /// [`HostError::Released`] once the host stops.
    pub async fn listen(&self) -> Result<Message, HostError> {
        let mut shutdown = self.inner.shutdown.subscribe();
        if *shutdown.borrow() {
            return Err(HostError::Released);
        }
        let mut rx = tokio::select! {
            rx = self.inner.delivered_rx.lock() => rx,
            _ = shutdown.wait_for(|stopped| *stopped) => return Err(HostError::Released),
        };
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => Err(HostError::Released),
            m = rx.recv() => m.ok_or(HostError::Released),
        }
    }

    /// Stop accepting, close every link and close the log. Idempotent.
    pub fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        inner.shutdown.send_replace(true);
        let links: Vec<Link> = inner.links.lock().drain().map(|(_, l)| l).collect();
        for link in &links {
            link.stop();
        }
        if let Err(e) = inner.log.close() {
            warn!("closing log: {e}");
        }
        info!(me = %inner.me, closed_links = links.len(), "host stopped");
    }

    /// Peers of the currently running links.
    pub fn links(&self) -> Vec<HostPointer> {
        self.inner
            .links
            .lock()
            .values()
            .filter(|l| l.is_running())
            .map(|l| l.peer().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditorium_core::MemoryKeyStore;
    use tokio::io::AsyncWriteExt;
    use tokio::time::{sleep, timeout};

    fn config(node: &str, dir: &tempfile::TempDir) -> Config {
        Config {
            node_id: node.into(),
            listen_address: "127.0.0.1".into(),
            advertise_address: "127.0.0.1".into(),
            listen_port: 0,
            discover_port: 0,
            broadcast_address: "127.0.0.1".into(),
            discover_timeout_ms: 300,
            join_timeout_ms: 2000,
            log_location: Some(dir.path().join(format!("{node}.log"))),
            keys_directory: dir.path().join("keys"),
            log_level: "debug".into(),
        }
    }

    async fn start(store: &Arc<MemoryKeyStore>, dir: &tempfile::TempDir, node: &str) -> Host {
        Host::start(config(node, dir), store.clone()).await.unwrap()
    }

    async fn next(host: &Host) -> Message {
        timeout(Duration::from_secs(3), host.listen())
            .await
            .expect("delivery timed out")
            .unwrap()
    }

    async fn nothing_delivered(host: &Host) {
        assert!(timeout(Duration::from_millis(300), host.listen())
            .await
            .is_err());
    }

    async fn wait_links(host: &Host, n: usize) {
        for _ in 0..60 {
            if host.links().len() == n {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("expected {n} links, have {:?}", host.links());
    }

    async fn until_datum(host: &Host, datum: &Expr) -> Message {
        loop {
            let m = next(host).await;
            if m.datum() == datum {
                return m;
            }
        }
    }

    #[tokio::test]
    async fn announcement_reaches_joined_peer() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let b = start(&store, &dir, "b").await;

        b.join(a.me()).await.unwrap();
        wait_links(&a, 1).await;
        assert_eq!(b.links(), vec![a.me().clone()]);

        let sent = a.announce(Expr::atom("polls-open")).unwrap();
        let own = next(&a).await;
        assert_eq!(own.datum(), &Expr::atom("polls-open"));
        assert_eq!(own.sequence(), sent.sequence());

        let got = next(&b).await;
        assert_eq!(got.datum(), &Expr::atom("polls-open"));
        assert_eq!(got.from(), a.me());
        assert!(b.log().contains(&MessagePointer::from(&sent)));
    }

    #[tokio::test]
    async fn frontier_follows_causal_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let b = start(&store, &dir, "b").await;
        b.join(a.me()).await.unwrap();
        wait_links(&a, 1).await;

        let m1 = a.announce(Expr::atom("first")).unwrap();
        next(&a).await;
        next(&b).await;
        let p1 = MessagePointer::from(&m1);
        assert_eq!(a.log().frontier(), vec![p1.clone()]);
        assert_eq!(b.log().frontier(), vec![p1]);

        let m2 = b.announce(Expr::atom("second")).unwrap();
        next(&b).await;
        next(&a).await;
        let p2 = MessagePointer::from(&m2);
        assert_eq!(b.log().frontier(), vec![p2.clone()]);
        assert_eq!(a.log().frontier(), vec![p2]);
    }

    #[tokio::test]
    async fn join_reply_seeds_log() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let m1 = a.announce(Expr::atom("before-join")).unwrap();
        next(&a).await;

        let b = start(&store, &dir, "b").await;
        b.join(a.me()).await.unwrap();
        let p1 = MessagePointer::from(&m1);
        assert!(b.log().contains(&p1));
        assert_eq!(b.log().frontier(), vec![p1]);
        // Joining twice is a no-op.
        b.join(a.me()).await.unwrap();
        assert_eq!(b.links().len(), 1);
    }

    #[tokio::test]
    async fn duplicates_are_delivered_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let b = start(&store, &dir, "b").await;
        b.join(a.me()).await.unwrap();
        wait_links(&a, 1).await;

        let sent = a.announce(Expr::atom("once")).unwrap();
        next(&b).await;
        b.inner.receive_announcement(sent.clone());
        b.inner.receive_announcement(sent);
        nothing_delivered(&b).await;
    }

    #[tokio::test]
    async fn forged_announcement_is_not_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let b = start(&store, &dir, "b").await;
        b.join(a.me()).await.unwrap();
        wait_links(&a, 1).await;

        let forged = Message::new(
            ANNOUNCE,
            a.me().clone(),
            "99",
            Expr::list([
                Expr::atom("signed-message"),
                Expr::atom("cert"),
                Expr::atom("sig"),
            ]),
        );
        let forged_ptr = MessagePointer::from(&forged);
        b.inner.receive_announcement(forged.clone());
        nothing_delivered(&b).await;
        nothing_delivered(&a).await;
        assert!(!b.log().contains(&forged_ptr));
        assert!(b.log().frontier().is_empty());

        a.announce(Expr::atom("genuine")).unwrap();
        assert_eq!(next(&b).await.datum(), &Expr::atom("genuine"));

        // b's own next announcement must not vouch for the forgery.
        let own = b.announce(Expr::atom("after")).unwrap();
        let wire = own.to_expr().to_verbatim();
        let needle = forged_ptr.to_expr().to_verbatim();
        assert!(!wire.windows(needle.len()).any(|w| w == needle.as_slice()));
        assert_eq!(next(&b).await.datum(), &Expr::atom("after"));

        // A rejected message is checked again rather than remembered as seen.
        b.inner.receive_announcement(forged);
        nothing_delivered(&b).await;
        assert!(!b.log().contains(&forged_ptr));
    }

    #[tokio::test]
    async fn stop_releases_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a"]));
        let a = start(&store, &dir, "a").await;
        let waiting = a.clone();
        let listener = tokio::spawn(async move { waiting.listen().await });
        sleep(Duration::from_millis(50)).await;

        a.stop();
        a.stop();
        let released = timeout(Duration::from_secs(2), listener)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(released, Err(HostError::Released)));
        assert!(matches!(a.listen().await, Err(HostError::Released)));
        assert!(matches!(
            a.announce(Expr::atom("late")),
            Err(HostError::Released)
        ));
    }

    #[tokio::test]
    async fn stop_closes_links_on_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let b = start(&store, &dir, "b").await;
        b.join(a.me()).await.unwrap();
        wait_links(&a, 1).await;

        a.stop();
        assert!(a.links().is_empty());
        wait_links(&b, 0).await;
    }

    #[tokio::test]
    async fn misbehaving_peer_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a"]));
        let a = start(&store, &dir, "a").await;

        let stream = TcpStream::connect(("127.0.0.1", a.me().port())).await.unwrap();
        let (read, mut write) = stream.into_split();
        let join = Message::new(
            JOIN,
            HostPointer::new("x", "127.0.0.1", 1),
            "1",
            Expr::atom(""),
        );
        write_message(&mut write, &join).await.unwrap();
        let mut reader = ExprReader::new(read);
        let reply = reader.read_expr().await.unwrap().unwrap();
        assert_eq!(Message::from_expr(&reply).unwrap().kind(), JOIN_REPLY);
        wait_links(&a, 1).await;

        write.write_all(&[234]).await.unwrap();
        wait_links(&a, 0).await;

        a.announce(Expr::atom("still-here")).unwrap();
        assert_eq!(next(&a).await.datum(), &Expr::atom("still-here"));
    }

    #[tokio::test]
    async fn join_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a"]));
        let a = start(&store, &dir, "a").await;

        let mute = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = mute.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((stream, _)) = mute.accept().await {
                drop(stream);
            }
        });
        let peer = HostPointer::new("z", "127.0.0.1", port);
        assert!(a.join(&peer).await.is_err());
        assert!(a.join(a.me()).await.is_err());
        assert!(a.links().is_empty());
    }

    #[tokio::test]
    async fn concurrent_joins_announcements_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b", "c", "d"]));
        let a = start(&store, &dir, "a").await;
        let b = start(&store, &dir, "b").await;
        let c = start(&store, &dir, "c").await;
        let d = start(&store, &dir, "d").await;

        let announcer = a.clone();
        let chatter = tokio::spawn(async move {
            for i in 0..20 {
                announcer.announce(Expr::atom(format!("tick-{i}"))).unwrap();
                tokio::task::yield_now().await;
            }
        });
        let port = a.me().port();
        let vandal = tokio::spawn(async move {
            if let Ok(mut s) = TcpStream::connect(("127.0.0.1", port)).await {
                let _ = s.write_all(b"not an expression").await;
            }
        });
        let (rb, rc, rd) = tokio::join!(b.join(a.me()), c.join(a.me()), d.join(a.me()));
        rb.unwrap();
        rc.unwrap();
        rd.unwrap();
        chatter.await.unwrap();
        vandal.await.unwrap();
        wait_links(&a, 3).await;

        let last = Expr::atom("final");
        a.announce(last.clone()).unwrap();
        for peer in [&b, &c, &d] {
            until_datum(peer, &last).await;
        }
    }

    #[tokio::test]
    async fn discover_finds_running_host() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a", "b"]));
        let a = start(&store, &dir, "a").await;
        let mut cfg = config("b", &dir);
        cfg.discover_port = a.discovery_port().unwrap();
        let b = Host::start(cfg, store.clone()).await.unwrap();
        assert_eq!(b.discover().await.unwrap(), vec![a.me().clone()]);
    }

    #[test]
    fn loopback_advertise_is_flagged_for_lan_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = config("a", &dir);
        assert!(!advertises_loopback_only(&c));
        c.listen_address = "0.0.0.0".into();
        assert!(advertises_loopback_only(&c));
        c.advertise_address = "10.0.0.7".into();
        assert!(!advertises_loopback_only(&c));
        assert!(!advertises_loopback_only(&Config {
            advertise_address: "10.0.0.7".into(),
            ..Config::default()
        }));
        assert!(advertises_loopback_only(&Config::default()));
    }

    #[tokio::test]
    async fn start_fails_without_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryKeyStore::with_nodes(&["a"]));
        assert!(matches!(
            Host::start(config("nobody", &dir), store).await,
            Err(HostError::Crypto(_))
        ));
    }
}
