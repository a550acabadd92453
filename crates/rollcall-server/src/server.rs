//! Audience server engine
//!
//! One dispatch task drains the endpoint's inbox and routes JOIN, UPDATE
//! and UNJOIN through the registry. Per-client state is keyed by device id
//! and guarded against spoofing by the client's source address. Audience
//! callbacks run inline on the dispatch task.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rollcall_core::{ConfigPayload, DeviceId, Header, JoinPayload, Message, Person};
use rollcall_transport::{Endpoint, EndpointConfig, Inbound};

use crate::audience::Audience;
use crate::error::{Result, ServerError};
use crate::registry::{Registration, Registry};

/// Sensor server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport settings
    pub endpoint: EndpointConfig,
    /// Whether to also listen for JOINs on the discovery multicast group
    pub multicast: bool,
    /// Interface to receive multicast on
    pub multicast_interface: Ipv4Addr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            multicast: true,
            multicast_interface: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Routes inbound messages through the registry and the audience.
struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
    audience: Arc<dyn Audience>,
    endpoint: Arc<Endpoint>,
}

impl Dispatcher {
    async fn dispatch(&self, inbound: Inbound) {
        match inbound.message {
            Message::Join(payload) => {
                self.handle_join(inbound.from, &payload).await;
            }
            Message::Update(states) => self.handle_update(inbound.from, &inbound.header, &states),
            Message::Unjoin => self.handle_unjoin(inbound.from, &inbound.header),
            // Acks are consumed by the transport
            Message::Ack => {}
            other => {
                debug!(from = %inbound.from, kind = ?other.kind(), "ignoring unexpected message")
            }
        }
    }

    /// Register a joining client and answer with its CONFIG.
    ///
    /// Ids are minted in composite form `"<device_id>.<local_id>"`. A
    /// repeated JOIN with the same roster (a retransmitted datagram, or a
    /// client whose CONFIG got lost) only re-sends the CONFIG; a JOIN with
    /// a different roster replaces the old registration.
    async fn handle_join(&self, from: SocketAddr, payload: &JoinPayload) {
        let key = from.to_string();
        let device_id = self.registry.lock().allocate(&key);

        let people: Vec<Person> = payload
            .people
            .iter()
            .enumerate()
            .map(|(index, person)| {
                let local = person
                    .id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| index.to_string());
                Person::new(format!("{device_id}.{local}"), person.sitting)
            })
            .collect();

        let same_roster = self.registry.lock().get(device_id).is_some_and(|existing| {
            existing
                .people
                .iter()
                .map(|p| &p.id)
                .eq(people.iter().map(|p| &p.id))
        });

        if !same_roster {
            let previous = self.registry.lock().remove(device_id);
            if let Some(previous) = previous {
                debug!(%device_id, "replacing roster of re-joining client");
                if let Err(e) = self.audience.on_person_leave(&previous.people) {
                    error!(%device_id, "audience failed on leaving people: {e:#}");
                }
            }
            if let Err(e) = self.audience.on_person_new(&people) {
                error!(%from, "audience rejected joining people, join aborted: {e:#}");
                return;
            }
            info!(%from, %device_id, people = people.len(), "client joined");
            self.registry.lock().insert(Registration {
                device_id,
                key: key.clone(),
                people,
            });
        }

        let mut config = ConfigPayload::new(device_id.0);
        config.key = Some(key);
        if let Err(e) = self.endpoint.send(from, &Message::Config(config), true).await {
            error!(%from, %device_id, "failed to send CONFIG: {e}");
        }
    }

    /// Check that a message claims a registered device id and comes from
    /// the address that registered it.
    fn validate_client(&self, from: SocketAddr, header: &Header, what: &str) -> Option<DeviceId> {
        let device_id = match header.device_id {
            Some(id) if id > DeviceId::SERVER => id,
            other => {
                error!(%from, device_id = ?other, "{what} with unusable device id");
                return None;
            }
        };
        let registry = self.registry.lock();
        let Some(registration) = registry.get(device_id) else {
            error!(%from, %device_id, "{what} from unregistered device");
            return None;
        };
        if registration.key != from.to_string() {
            error!(%from, %device_id, registered = %registration.key, "{what} from mismatched address");
            return None;
        }
        Some(device_id)
    }

    /// Apply sitting states positionally and notify about actual changes.
    fn handle_update(&self, from: SocketAddr, header: &Header, states: &[bool]) {
        let Some(device_id) = self.validate_client(from, header, "UPDATE") else {
            return;
        };

        let changed = {
            let mut registry = self.registry.lock();
            let Some(registration) = registry.get_mut(device_id) else {
                return;
            };
            if states.len() != registration.people.len() {
                warn!(
                    %device_id,
                    got = states.len(),
                    expected = registration.people.len(),
                    "update length mismatch, applying the overlap"
                );
            }
            let mut changed = Vec::new();
            for (person, sitting) in registration.people.iter_mut().zip(states.iter().copied()) {
                if person.sitting != sitting {
                    person.sitting = sitting;
                    changed.push(person.clone());
                }
            }
            changed
        };

        if !changed.is_empty() {
            debug!(%device_id, changed = changed.len(), "sitting states changed");
            if let Err(e) = self.audience.on_person_update(&changed) {
                error!(%device_id, "audience failed on updated people: {e:#}");
            }
        }
    }

    /// Drop the client's registration; the audience failure does not keep
    /// a departed client registered.
    fn handle_unjoin(&self, from: SocketAddr, header: &Header) {
        let Some(device_id) = self.validate_client(from, header, "UNJOIN") else {
            return;
        };
        let removed = self.registry.lock().remove(device_id);
        if let Some(removed) = removed {
            info!(%from, %device_id, people = removed.people.len(), "client unjoined");
            if let Err(e) = self.audience.on_person_leave(&removed.people) {
                error!(%device_id, "audience failed on leaving people: {e:#}");
            }
        }
    }
}

struct Started {
    endpoint: Arc<Endpoint>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A presence-collecting server
pub struct SensorServer {
    config: ServerConfig,
    audience: Arc<dyn Audience>,
    registry: Arc<Mutex<Registry>>,
    started: Mutex<Option<Started>>,
}

impl SensorServer {
    pub fn new(config: ServerConfig, audience: Arc<dyn Audience>) -> Self {
        Self {
            config,
            audience,
            registry: Arc::new(Mutex::new(Registry::new())),
            started: Mutex::new(None),
        }
    }

    /// Bind the endpoint (joining the discovery group when configured) and
    /// spawn the dispatch loop.
    pub async fn start(&self) -> Result<()> {
        if self.started.lock().is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let endpoint = if self.config.multicast {
            Endpoint::bind_with_multicast(
                self.config.endpoint.clone(),
                self.config.multicast_interface,
            )
            .await?
        } else {
            Endpoint::bind(self.config.endpoint.clone()).await?
        };
        let endpoint = Arc::new(endpoint);
        endpoint.set_device_id(DeviceId::SERVER);

        let inbox = endpoint.start();
        let (stop_tx, stop_rx) = watch::channel(false);
        let dispatcher = Dispatcher {
            registry: Arc::clone(&self.registry),
            audience: Arc::clone(&self.audience),
            endpoint: Arc::clone(&endpoint),
        };
        let task = tokio::spawn(serve_loop(dispatcher, inbox, stop_rx));
        *self.started.lock() = Some(Started {
            endpoint,
            stop_tx,
            task,
        });
        info!("server started");
        Ok(())
    }

    /// Unicast address the server is reachable on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.started
            .lock()
            .as_ref()
            .and_then(|s| s.endpoint.local_addr().ok())
    }

    /// Number of currently joined clients
    pub fn client_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Stop the dispatch loop and the endpoint. Registrations are dropped
    /// without notifying clients.
    pub async fn stop(&self) {
        let started = self.started.lock().take();
        if let Some(started) = started {
            let _ = started.stop_tx.send(true);
            let _ = tokio::time::timeout(Duration::from_secs(1), started.task).await;
            started.endpoint.shutdown().await;
            info!("server stopped");
        }
    }
}

async fn serve_loop(
    dispatcher: Dispatcher,
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
        dispatcher.dispatch(inbound).await;
    }
    debug!("server dispatch loop stopped");
}
