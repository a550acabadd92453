//! Sensor client engine
//!
//! Lifecycle: `start` binds the endpoint and spawns the dispatch loop,
//! `join` announces the roster and blocks until the server's CONFIG arrives
//! (retrying a bounded number of times), `update` streams sitting states,
//! `unjoin`/`stop` leave the audience.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rollcall_core::{ConfigPayload, DeviceId, Header, JoinPayload, Message, Person};
use rollcall_transport::{Endpoint, EndpointConfig, Inbound};

use crate::error::{ClientError, Result};

/// Invoked with every accepted CONFIG payload, before the join is marked
/// complete. Extra entries the server sends ride along in `extra`.
pub type ConfigCallback = Box<dyn Fn(&ConfigPayload) + Send + Sync>;

/// Sensor client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transport settings
    pub endpoint: EndpointConfig,
    /// Explicit server address; when unset, joins go to the multicast group
    pub server: Option<SocketAddr>,
    /// How long each join attempt waits for the server's CONFIG
    pub join_retry_timeout: Duration,
    /// How many join attempts before giving up
    pub join_retry_count: u32,
    /// Extra wait when the join was acked but the CONFIG is still in flight
    pub joined_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            server: None,
            join_retry_timeout: Duration::from_secs(5),
            join_retry_count: 3,
            joined_grace: Duration::from_secs(1),
        }
    }
}

struct Shared {
    joined_tx: watch::Sender<bool>,
    server_addr: RwLock<Option<SocketAddr>>,
    on_config: RwLock<ConfigCallback>,
}

impl Shared {
    fn new() -> Self {
        let (joined_tx, _) = watch::channel(false);
        Self {
            joined_tx,
            server_addr: RwLock::new(None),
            on_config: RwLock::new(Box::new(|_| {})),
        }
    }

    /// Apply a CONFIG from the server: adopt the assigned device id, learn
    /// the server's update address, and flip the joined flag.
    fn handle_config(
        &self,
        endpoint: &Endpoint,
        from: SocketAddr,
        header: &Header,
        config: &ConfigPayload,
    ) {
        if header.device_id != Some(DeviceId::SERVER) {
            warn!(%from, device_id = ?header.device_id, "ignoring CONFIG from non-server device");
            return;
        }

        endpoint.set_device_id(DeviceId(config.device_id));
        let ip = config
            .server_ip
            .as_deref()
            .and_then(|s| s.parse::<IpAddr>().ok())
            .unwrap_or_else(|| from.ip());
        let port = config.server_port.unwrap_or(from.port());
        *self.server_addr.write() = Some(SocketAddr::new(ip, port));

        (self.on_config.read())(config);
        self.joined_tx.send_replace(true);
        info!(device_id = config.device_id, server = %SocketAddr::new(ip, port), "joined audience");
    }
}

struct Started {
    endpoint: Arc<Endpoint>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A presence-reporting client
pub struct SensorClient {
    config: ClientConfig,
    shared: Arc<Shared>,
    started: Mutex<Option<Started>>,
}

impl SensorClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new()),
            started: Mutex::new(None),
        }
    }

    /// Replace the CONFIG callback. Takes effect for the next CONFIG.
    pub fn on_config_changed(&self, callback: ConfigCallback) {
        *self.shared.on_config.write() = callback;
    }

    /// Whether a join has completed and not been undone
    pub fn is_joined(&self) -> bool {
        *self.shared.joined_tx.borrow()
    }

    /// Bind the endpoint and spawn the dispatch loop.
    pub async fn start(&self) -> Result<()> {
        if self.started.lock().is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        let endpoint = Arc::new(Endpoint::bind(self.config.endpoint.clone()).await?);
        let inbox = endpoint.start();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(dispatch_loop(
            Arc::clone(&self.shared),
            Arc::clone(&endpoint),
            inbox,
            stop_rx,
        ));
        *self.started.lock() = Some(Started {
            endpoint,
            stop_tx,
            task,
        });
        Ok(())
    }

    fn endpoint(&self) -> Result<Arc<Endpoint>> {
        self.started
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.endpoint))
            .ok_or(ClientError::NotStarted)
    }

    /// Join a server's audience with `people` as the reported roster.
    ///
    /// The roster must be non-empty with distinct, present ids; its order is
    /// the positional contract every later `update` is interpreted against.
    /// Blocks until the server's CONFIG arrives or the retry budget runs out.
    pub async fn join(&self, people: &[Person]) -> Result<()> {
        if people.is_empty() {
            return Err(ClientError::EmptyRoster);
        }
        let mut seen = HashSet::new();
        for person in people {
            match &person.id {
                None => return Err(ClientError::MissingId),
                Some(id) => {
                    if !seen.insert(id) {
                        return Err(ClientError::DuplicateId(id.clone()));
                    }
                }
            }
        }

        let endpoint = self.endpoint()?;
        let target = self
            .config
            .server
            .unwrap_or_else(|| endpoint.multicast_target());
        let message = Message::Join(JoinPayload {
            people: people.to_vec(),
        });

        let mut joined_rx = self.shared.joined_tx.subscribe();
        for attempt in 1..=self.config.join_retry_count {
            debug!(attempt, %target, "sending join");
            let seq = endpoint.send(target, &message, true).await?;
            if wait_joined(&mut joined_rx, self.config.join_retry_timeout).await {
                return Ok(());
            }
            // Acked but the CONFIG may still be in flight
            if seq.is_some_and(|seq| !endpoint.is_pending(seq))
                && wait_joined(&mut joined_rx, self.config.joined_grace).await
            {
                return Ok(());
            }
            warn!(attempt, %target, "join attempt got no CONFIG");
        }
        Err(ClientError::JoinTimeout {
            attempts: self.config.join_retry_count,
        })
    }

    /// Report the sitting state of every roster person, in join order.
    ///
    /// Fire-and-forget; a lost update is corrected by the next one.
    pub async fn update(&self, sitting: &[bool]) -> Result<()> {
        let endpoint = self.endpoint()?;
        let server = self
            .is_joined()
            .then(|| *self.shared.server_addr.read())
            .flatten()
            .ok_or(ClientError::NotJoined)?;
        endpoint
            .send(server, &Message::Update(sitting.to_vec()), false)
            .await?;
        Ok(())
    }

    /// Leave the audience. The server forgets the roster on receipt.
    pub async fn unjoin(&self) -> Result<()> {
        let endpoint = self.endpoint()?;
        let server = self
            .is_joined()
            .then(|| *self.shared.server_addr.read())
            .flatten()
            .ok_or(ClientError::NotJoined)?;
        endpoint.send(server, &Message::Unjoin, true).await?;
        self.shared.joined_tx.send_replace(false);
        info!(%server, "left audience");
        Ok(())
    }

    /// Unjoin if joined, then stop the dispatch loop and the endpoint.
    pub async fn stop(&self) {
        if self.is_joined() {
            if let Err(e) = self.unjoin().await {
                warn!("unjoin during stop failed: {e}");
            }
        }
        let started = self.started.lock().take();
        if let Some(started) = started {
            let _ = started.stop_tx.send(true);
            let _ = tokio::time::timeout(Duration::from_secs(1), started.task).await;
            started.endpoint.shutdown().await;
        }
    }
}

async fn wait_joined(joined_rx: &mut watch::Receiver<bool>, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, joined_rx.wait_for(|joined| *joined)).await,
        Ok(Ok(_))
    )
}

async fn dispatch_loop(
    shared: Arc<Shared>,
    endpoint: Arc<Endpoint>,
    mut inbox: mpsc::Receiver<Inbound>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let inbound = tokio::select! {
            _ = stop_rx.changed() => break,
            inbound = inbox.recv() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };
        match inbound.message {
            Message::Config(config) => {
                shared.handle_config(&endpoint, inbound.from, &inbound.header, &config)
            }
            // Acks are consumed by the transport
            Message::Ack => {}
            other => {
                debug!(from = %inbound.from, kind = ?other.kind(), "ignoring unexpected message")
            }
        }
    }
    debug!("client dispatch loop stopped");
}
