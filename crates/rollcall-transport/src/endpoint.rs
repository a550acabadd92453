//! UDP endpoint with ack/retransmit bookkeeping
//!
//! One endpoint per protocol engine. The endpoint owns the unicast socket
//! (and optionally a multicast socket), a monotonically increasing send
//! sequence counter, and the set of sequence numbers still awaiting a peer
//! acknowledgement. Two background tasks service it:
//!
//! - the **receive loop** multiplexes all owned sockets, decodes datagrams
//!   into the inbox, replies with a bare ACK to anything sequenced, and
//!   clears pending entries when an acknowledgement arrives;
//! - the **retransmission loop** re-sends unacknowledged packets (with a
//!   refreshed timestamp) until the retry budget is exhausted.
//!
//! Delivery is best effort: exhausting the retry budget is logged, never
//! surfaced to the sender.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use rollcall_core::{
    codec, DeviceId, Header, Message, MsgType, DEFAULT_LISTEN_PORT, DEFAULT_MULTICAST_GROUP,
    DEFAULT_MULTICAST_PORT,
};

use crate::error::{Result, TransportError};
use crate::multicast::MulticastSocket;

/// Endpoint configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Unicast listen address
    pub listen_addr: SocketAddr,
    /// Discovery multicast group
    pub multicast_group: Ipv4Addr,
    /// Port of the multicast group
    pub multicast_port: u16,
    /// TTL for outgoing multicast packets
    pub multicast_ttl: u32,
    /// Receive buffer size per datagram
    pub recv_buffer_size: usize,
    /// Delay before an unacknowledged packet is resent
    pub retransmit_interval: Duration,
    /// How many times to resend before giving up
    pub max_retries: u32,
    /// Upper bound on loop wakeup latency; also sizes the shutdown grace
    pub select_timeout: Duration,
    /// Capacity of the decoded-message inbox
    pub inbox_capacity: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_LISTEN_PORT)),
            multicast_group: DEFAULT_MULTICAST_GROUP,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_ttl: 3,
            recv_buffer_size: 4096,
            retransmit_interval: Duration::from_secs(1),
            max_retries: 3,
            select_timeout: Duration::from_millis(2500),
            inbox_capacity: 128,
        }
    }
}

/// A decoded datagram delivered to the engine's inbox
#[derive(Debug)]
pub struct Inbound {
    pub from: SocketAddr,
    pub header: Header,
    pub message: Message,
}

struct RetryEntry {
    due: Instant,
    attempt: u32,
    to: SocketAddr,
    header: Header,
    message: Message,
}

struct Inner {
    config: EndpointConfig,
    socket: UdpSocket,
    multicast: Option<MulticastSocket>,
    identity: RwLock<DeviceId>,
    next_seq: AtomicU32,
    pending: Mutex<HashSet<u32>>,
    inbox_tx: mpsc::Sender<Inbound>,
    retry_tx: mpsc::UnboundedSender<RetryEntry>,
}

/// A bound rollcall UDP endpoint
pub struct Endpoint {
    inner: Arc<Inner>,
    inbox_rx: Mutex<Option<mpsc::Receiver<Inbound>>>,
    retry_rx: Mutex<Option<mpsc::UnboundedReceiver<RetryEntry>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Endpoint {
    /// Bind the unicast socket only (client side).
    pub async fn bind(config: EndpointConfig) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen_addr)
            .await
            .map_err(TransportError::Bind)?;
        Self::build(config, socket, None)
    }

    /// Bind the unicast socket and join the discovery multicast group on
    /// `interface` (server side).
    pub async fn bind_with_multicast(config: EndpointConfig, interface: Ipv4Addr) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen_addr)
            .await
            .map_err(TransportError::Bind)?;
        let multicast = MulticastSocket::join(
            config.multicast_group,
            interface,
            config.multicast_port,
            config.multicast_ttl,
        )
        .map_err(TransportError::MulticastJoin)?;
        Self::build(config, socket, Some(multicast))
    }

    fn build(
        config: EndpointConfig,
        socket: UdpSocket,
        multicast: Option<MulticastSocket>,
    ) -> Result<Self> {
        let (inbox_tx, inbox_rx) = mpsc::channel(config.inbox_capacity);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        if let Ok(addr) = socket.local_addr() {
            info!(%addr, "endpoint bound");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                socket,
                multicast,
                identity: RwLock::new(DeviceId::REQUEST),
                next_seq: AtomicU32::new(0),
                pending: Mutex::new(HashSet::new()),
                inbox_tx,
                retry_tx,
            }),
            inbox_rx: Mutex::new(Some(inbox_rx)),
            retry_rx: Mutex::new(Some(retry_rx)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the receive and retransmission loops; returns the inbox.
    ///
    /// Must be called exactly once per endpoint.
    pub fn start(&self) -> mpsc::Receiver<Inbound> {
        let inbox_rx = self
            .inbox_rx
            .lock()
            .take()
            .expect("endpoint already started");
        let retry_rx = self
            .retry_rx
            .lock()
            .take()
            .expect("endpoint already started");

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(receive_loop(
            Arc::clone(&self.inner),
            self.shutdown_tx.subscribe(),
        )));
        tasks.push(tokio::spawn(retransmit_loop(
            Arc::clone(&self.inner),
            retry_rx,
            self.shutdown_tx.subscribe(),
        )));
        inbox_rx
    }

    /// Local address of the unicast socket
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.socket.local_addr()
    }

    /// Where multicast JOINs for the configured group should be sent
    pub fn multicast_target(&self) -> SocketAddr {
        SocketAddr::from((
            self.inner.config.multicast_group,
            self.inner.config.multicast_port,
        ))
    }

    /// Identity stamped into every outgoing header
    pub fn device_id(&self) -> DeviceId {
        *self.inner.identity.read()
    }

    pub fn set_device_id(&self, id: DeviceId) {
        *self.inner.identity.write() = id;
    }

    /// Whether a sequence number is still awaiting acknowledgement
    pub fn is_pending(&self, seq: u32) -> bool {
        self.inner.pending.lock().contains(&seq)
    }

    /// Send a message.
    ///
    /// With `needs_ack` the packet is assigned the next sequence number,
    /// tracked in the pending-ack set, and retransmitted until acked or the
    /// retry budget runs out; the assigned sequence number is returned.
    /// Without it the packet is fire-and-forget.
    pub async fn send(
        &self,
        to: SocketAddr,
        message: &Message,
        needs_ack: bool,
    ) -> Result<Option<u32>> {
        let inner = &self.inner;
        let mut header = Header::new(message.kind());
        header.device_id = Some(*inner.identity.read());
        let seq = needs_ack.then(|| inner.next_seq.fetch_add(1, Ordering::SeqCst));
        header.sequence = seq;

        let bytes = codec::encode(&mut header, message).map_err(|e| {
            error!(kind = ?message.kind(), "failed to encode outgoing packet: {e}");
            TransportError::Codec(e)
        })?;
        inner
            .socket
            .send_to(&bytes, to)
            .await
            .map_err(TransportError::Send)?;

        if let Some(seq) = seq {
            inner.pending.lock().insert(seq);
            let _ = inner.retry_tx.send(RetryEntry {
                due: Instant::now() + inner.config.retransmit_interval,
                attempt: 1,
                to,
                header,
                message: message.clone(),
            });
        }
        debug!(kind = ?message.kind(), %to, ?seq, "sent packet");
        Ok(seq)
    }

    /// Leave the multicast group (stops discovery before full shutdown).
    pub fn leave_multicast(&self) {
        if let Some(multicast) = &self.inner.multicast {
            multicast.leave();
        }
    }

    /// Signal both loops to stop and wait for them to exit, bounded by the
    /// configured grace period.
    pub async fn shutdown(&self) {
        self.leave_multicast();
        let _ = self.shutdown_tx.send(true);

        let grace = self.inner.config.select_timeout + self.inner.config.retransmit_interval;
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(grace, task).await.is_err() {
                warn!("endpoint task did not stop within grace period");
            }
        }
        info!("endpoint stopped");
    }
}

impl Inner {
    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let (header, message) = match codec::decode(data) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(%from, len = data.len(), "dropping undecodable datagram: {e}");
                return;
            }
        };
        debug!(%from, kind = ?message.kind(), seq = ?header.sequence, "received packet");

        if let Some(seq) = header.sequence {
            self.send_ack(from, seq).await;
        }
        if let Some(ack) = header.ack_sequence {
            if self.pending.lock().remove(&ack) {
                debug!(seq = ack, "acknowledged");
            }
        }

        if self.inbox_tx.send(Inbound { from, header, message }).await.is_err() {
            debug!("inbox closed, datagram discarded");
        }
    }

    /// Reply with a bare ACK; never sequenced, never retried.
    async fn send_ack(&self, to: SocketAddr, seq: u32) {
        let mut header = Header::new(MsgType::Ack);
        header.device_id = Some(*self.identity.read());
        header.ack_sequence = Some(seq);
        match codec::encode(&mut header, &Message::Ack) {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to).await {
                    warn!(%to, "failed to send ack: {e}");
                }
            }
            Err(e) => warn!("failed to encode ack: {e}"),
        }
    }
}

async fn receive_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut unicast_buf = vec![0u8; inner.config.recv_buffer_size];
    let mut multicast_buf = vec![0u8; inner.config.recv_buffer_size];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = inner.socket.recv_from(&mut unicast_buf) => match received {
                Ok((len, from)) => inner.handle_datagram(&unicast_buf[..len], from).await,
                Err(e) => error!("unicast receive failed: {e}"),
            },
            received = recv_multicast(&inner, &mut multicast_buf) => match received {
                Ok((len, from)) => inner.handle_datagram(&multicast_buf[..len], from).await,
                Err(e) => error!("multicast receive failed: {e}"),
            },
        }
    }
    debug!("receive loop stopped");
}

async fn recv_multicast(
    inner: &Inner,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match &inner.multicast {
        Some(multicast) => multicast.socket.recv_from(buf).await,
        // No multicast socket: park this select arm forever
        None => std::future::pending().await,
    }
}

async fn retransmit_loop(
    inner: Arc<Inner>,
    mut retry_rx: mpsc::UnboundedReceiver<RetryEntry>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let entry = tokio::select! {
            _ = shutdown.changed() => break,
            entry = retry_rx.recv() => match entry {
                Some(entry) => entry,
                None => break,
            },
        };
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep_until(entry.due) => {}
        }

        let seq = match entry.header.sequence {
            Some(seq) => seq,
            None => continue,
        };
        if !inner.pending.lock().contains(&seq) {
            // Already acked
            continue;
        }

        if entry.attempt <= inner.config.max_retries {
            let mut header = entry.header.clone();
            header.touch();
            match codec::encode(&mut header, &entry.message) {
                Ok(bytes) => {
                    if let Err(e) = inner.socket.send_to(&bytes, entry.to).await {
                        warn!(seq, "retransmit failed: {e}");
                    } else {
                        debug!(seq, attempt = entry.attempt, "retransmitted packet");
                    }
                }
                Err(e) => error!(seq, "failed to re-encode packet: {e}"),
            }
            let _ = inner.retry_tx.send(RetryEntry {
                due: Instant::now() + inner.config.retransmit_interval,
                attempt: entry.attempt + 1,
                ..entry
            });
        } else {
            inner.pending.lock().remove(&seq);
            warn!(seq, tries = entry.attempt, "gave up waiting for ack");
        }
    }
    debug!("retransmission loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{JoinPayload, Person};
    use serde_json::json;

    fn test_config() -> EndpointConfig {
        EndpointConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            retransmit_interval: Duration::from_millis(50),
            select_timeout: Duration::from_millis(200),
            ..EndpointConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_local_addr() {
        let endpoint = Endpoint::bind(test_config()).await.unwrap();
        assert!(endpoint.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let sender = Endpoint::bind(test_config()).await.unwrap();
        let receiver = Endpoint::bind(test_config()).await.unwrap();
        let mut inbox = receiver.start();

        let message = Message::Data(json!({"k": 1}));
        sender
            .send(receiver.local_addr().unwrap(), &message, false)
            .await
            .unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.message, message);
        assert_eq!(inbound.from.port(), sender.local_addr().unwrap().port());
        assert_eq!(inbound.header.sequence, None);

        sender.shutdown().await;
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn test_sequenced_send_is_auto_acked() {
        let sender = Endpoint::bind(test_config()).await.unwrap();
        let receiver = Endpoint::bind(test_config()).await.unwrap();
        let _sender_inbox = sender.start();
        let _receiver_inbox = receiver.start();

        let message = Message::Join(JoinPayload {
            people: vec![Person::new(0u64, false)],
        });
        let seq = sender
            .send(receiver.local_addr().unwrap(), &message, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seq, 0);
        assert!(sender.is_pending(seq));

        // The receiver's receive loop acks it without any engine involved.
        let mut acked = false;
        for _ in 0..50 {
            if !sender.is_pending(seq) {
                acked = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(acked, "sequence {seq} was never acknowledged");

        sender.shutdown().await;
        receiver.shutdown().await;
    }

    #[tokio::test]
    async fn test_retransmits_then_gives_up() {
        let mut config = test_config();
        config.max_retries = 2;
        let sender = Endpoint::bind(config).await.unwrap();
        let _inbox = sender.start();

        // A raw socket that never acks anything.
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let message = Message::Data(json!({"retry": true}));
        let seq = sender
            .send(peer_addr, &message, true)
            .await
            .unwrap()
            .unwrap();

        // Original send plus max_retries resends.
        let mut datagrams = 0;
        let mut buf = [0u8; 512];
        while let Ok(received) =
            tokio::time::timeout(Duration::from_millis(700), peer.recv_from(&mut buf)).await
        {
            received.unwrap();
            datagrams += 1;
        }
        assert_eq!(datagrams, 3);
        assert!(!sender.is_pending(seq), "retry budget should expire pending entry");

        sender.shutdown().await;
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_dropped() {
        let receiver = Endpoint::bind(test_config()).await.unwrap();
        let mut inbox = receiver.start();
        let addr = receiver.local_addr().unwrap();

        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        raw.send_to(b"definitely not a packet", addr).await.unwrap();

        let sender = Endpoint::bind(test_config()).await.unwrap();
        let message = Message::Unjoin;
        // Unjoin without ack tracking keeps this test free of ack traffic
        sender.send(addr, &message, false).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.message, Message::Unjoin);

        sender.shutdown().await;
        receiver.shutdown().await;
    }
}
