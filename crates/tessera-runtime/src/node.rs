//! Tessera Node - identity, lifecycle, and inbound frame dispatch

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tessera_core::{Error, Health, Mode, NodeId, Priority, Result, ServiceId, SubjectId, TransferId};
use tessera_registry::{RegisterFlags, Registry, Value};
use tessera_transport::Transport;
use tessera_wire::{encode_to_vec, Frame, FrameKind};

use crate::standard::{self, Heartbeat};

/// Register holding this node's network identifier
pub const NODE_ID_REGISTER: &str = "tessera.node.id";

/// Node lifecycle states
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Created = 0,
    Started = 1,
    Closing = 2,
    Closed = 3,
}

impl NodeState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Created,
            1 => NodeState::Started,
            2 => NodeState::Closing,
            _ => NodeState::Closed,
        }
    }
}

/// Human-readable node identity
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub name: String,
    pub software_version: (u8, u8),
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, major: u8, minor: u8) -> Self {
        NodeInfo {
            name: name.into(),
            software_version: (major, minor),
        }
    }
}

/// Node configuration
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub info: NodeInfo,
    /// Overrides the `tessera.node.id` register when set
    pub node_id: Option<u16>,
    /// Heartbeat broadcast cadence
    pub heartbeat_interval: Duration,
    /// Upper bound on any single transport send
    pub send_timeout: Duration,
    /// Depth of each subscription and server queue
    pub queue_depth: usize,
    /// Budget for a server handler to produce a response
    pub response_budget: Duration,
    /// Answer info/register/command services automatically
    pub standard_services: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            info: NodeInfo::new("tessera.node", 0, 1),
            node_id: None,
            heartbeat_interval: Duration::from_secs(1),
            send_timeout: Duration::from_millis(500),
            queue_depth: 16,
            response_budget: Duration::from_secs(1),
            standard_services: true,
        }
    }
}

/// Runtime counters, updated by the background tasks
#[derive(Default)]
pub struct NodeStats {
    pub(crate) frames_in: AtomicU64,
    pub(crate) frames_out: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) queue_overflows: AtomicU64,
    pub(crate) stale_responses: AtomicU64,
}

/// Point-in-time copy of the runtime counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeStatsSnapshot {
    pub frames_in: u64,
    pub frames_out: u64,
    pub decode_errors: u64,
    pub queue_overflows: u64,
    pub stale_responses: u64,
}

impl NodeStats {
    pub fn snapshot(&self) -> NodeStatsSnapshot {
        NodeStatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
        }
    }
}

/// Frame plus arrival metadata, queued toward a port
pub(crate) struct Inbound {
    pub(crate) frame: Frame,
    pub(crate) received_at: SystemTime,
}

pub(crate) struct SubscriberRoute {
    pub(crate) token: u64,
    pub(crate) tx: mpsc::Sender<Inbound>,
}

#[derive(Default)]
pub(crate) struct RouteTable {
    pub(crate) subscriptions: HashMap<SubjectId, Vec<SubscriberRoute>>,
    pub(crate) servers: HashMap<ServiceId, mpsc::Sender<Inbound>>,
}

/// Correlation key of one pending service call
pub(crate) type PendingKey = (ServiceId, TransferId, NodeId);

pub(crate) struct NodeInner {
    pub(crate) config: NodeConfig,
    pub(crate) id: Option<NodeId>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) state: AtomicU8,
    pub(crate) health: AtomicU8,
    pub(crate) mode: AtomicU8,
    pub(crate) vendor_status: AtomicU8,
    pub(crate) uptime_base: Mutex<Instant>,
    pub(crate) routes: Mutex<RouteTable>,
    pub(crate) pending: Mutex<HashMap<PendingKey, oneshot::Sender<Frame>>>,
    pub(crate) next_token: AtomicU64,
    pub(crate) heartbeat_transfer: AtomicU64,
    pub(crate) shutdown: watch::Sender<bool>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) stats: NodeStats,
}

impl NodeInner {
    pub(crate) fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Source identifier for outgoing frames; UNSET when anonymous
    pub(crate) fn source_id(&self) -> NodeId {
        self.id.unwrap_or(NodeId::UNSET)
    }

    /// Port creation and publishing are refused once closing begins
    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.state() {
            NodeState::Created | NodeState::Started => Ok(()),
            NodeState::Closing | NodeState::Closed => Err(Error::NodeClosed),
        }
    }

    /// Service calls additionally require the dispatch loop to be running
    pub(crate) fn ensure_started(&self) -> Result<()> {
        match self.state() {
            NodeState::Started => Ok(()),
            NodeState::Created => Err(Error::NotStarted),
            NodeState::Closing | NodeState::Closed => Err(Error::NodeClosed),
        }
    }

    pub(crate) fn uptime(&self) -> Duration {
        self.uptime_base.lock().elapsed()
    }

    /// Route one inbound frame. Frames are decoded at most once, by the
    /// port that consumes them; this only inspects the header.
    pub(crate) fn dispatch(&self, frame: Frame) {
        self.stats.frames_in.fetch_add(1, Ordering::Relaxed);

        // The medium may echo our own broadcasts back at us
        if let Some(own) = self.id {
            if frame.header.source == own {
                return;
            }
        }

        let received_at = SystemTime::now();
        match frame.header.kind {
            FrameKind::Message => {
                let subject = SubjectId::new(frame.header.port);
                let routes = self.routes.lock();
                let Some(subs) = routes.subscriptions.get(&subject) else {
                    return;
                };
                for route in subs {
                    let inbound = Inbound {
                        frame: frame.clone(),
                        received_at,
                    };
                    match route.tx.try_send(inbound) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                            warn!(%subject, "subscription queue full, frame dropped");
                        }
                        // Dropped subscribers unregister themselves
                        Err(mpsc::error::TrySendError::Closed(_)) => {}
                    }
                }
            }
            FrameKind::Request => {
                if self.id != Some(frame.header.destination) {
                    return;
                }
                let service = ServiceId::new(frame.header.port);
                let routes = self.routes.lock();
                if let Some(tx) = routes.servers.get(&service) {
                    match tx.try_send(Inbound { frame, received_at }) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            // The caller will observe a timeout
                            self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                            warn!(%service, "server queue full, request dropped");
                        }
                        // Server dropped before binding a handler
                        Err(mpsc::error::TrySendError::Closed(_)) => {}
                    }
                }
            }
            FrameKind::Response => {
                if self.id != Some(frame.header.destination) {
                    return;
                }
                let key = (
                    ServiceId::new(frame.header.port),
                    frame.header.transfer,
                    frame.header.source,
                );
                let waiter = self.pending.lock().remove(&key);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame);
                    }
                    None => {
                        self.stats.stale_responses.fetch_add(1, Ordering::Relaxed);
                        debug!(transfer = ?frame.header.transfer, "unmatched response dropped");
                    }
                }
            }
        }
    }
}

/// The node: a register store plus a set of ports over one transport.
///
/// Cheap to clone; all clones refer to the same node.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node in the `Created` state.
    ///
    /// The network identifier comes from `config.node_id` when set,
    /// otherwise from the `tessera.node.id` register; the sentinel value
    /// leaves the node anonymous.
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<Registry>, config: NodeConfig) -> Node {
        let registered = registry
            .ensure(
                NODE_ID_REGISTER,
                Value::from(config.node_id.unwrap_or(NodeId::UNSET.0)),
                RegisterFlags::MUTABLE_PERSISTENT,
            )
            .scalar_u16()
            .unwrap_or(NodeId::UNSET.0);
        // An explicit configuration override wins over the register
        let raw_id = config.node_id.unwrap_or(registered);
        let id = (raw_id != NodeId::UNSET.0).then(|| NodeId::new(raw_id));
        let (shutdown, _) = watch::channel(false);

        Node {
            inner: Arc::new(NodeInner {
                id,
                transport,
                registry,
                state: AtomicU8::new(NodeState::Created as u8),
                health: AtomicU8::new(Health::default().to_bits()),
                mode: AtomicU8::new(Mode::default().to_bits()),
                vendor_status: AtomicU8::new(0),
                uptime_base: Mutex::new(Instant::now()),
                routes: Mutex::new(RouteTable::default()),
                pending: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(0),
                heartbeat_transfer: AtomicU64::new(0),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                stats: NodeStats::default(),
                config,
            }),
        }
    }

    /// Enter the `Started` state: begin dispatching inbound frames,
    /// broadcasting heartbeats, and answering standard services.
    ///
    /// Must be called from within a tokio runtime. Starting an already
    /// started node is a no-op; starting a closed node fails.
    pub fn start(&self) -> Result<()> {
        match self.inner.state() {
            NodeState::Created => {}
            NodeState::Started => return Ok(()),
            NodeState::Closing | NodeState::Closed => return Err(Error::NodeClosed),
        }
        self.inner
            .state
            .store(NodeState::Started as u8, Ordering::Release);

        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        self.inner
            .tasks
            .lock()
            .push(tokio::spawn(run_dispatch(inner, shutdown)));

        let inner = Arc::clone(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        self.inner
            .tasks
            .lock()
            .push(tokio::spawn(run_heartbeat(inner, shutdown)));

        if self.inner.config.standard_services && self.inner.id.is_some() {
            standard::spawn_standard_services(self)?;
        }

        debug!(node = %self.inner.source_id(), "node started");
        Ok(())
    }

    /// Close the node: cancel background tasks cooperatively, resolve
    /// pending calls with a cancellation outcome, and flush persistent
    /// registers. Idempotent and safe to call from any state.
    pub async fn close(&self) {
        match self.inner.state() {
            NodeState::Closing | NodeState::Closed => return,
            NodeState::Created | NodeState::Started => {}
        }
        self.inner
            .state
            .store(NodeState::Closing as u8, Ordering::Release);
        let _ = self.inner.shutdown.send(true);

        // Dropping the waiters resolves in-flight calls with Cancelled
        self.inner.pending.lock().clear();

        // Releasing routes ends every subscription stream
        {
            let mut routes = self.inner.routes.lock();
            routes.subscriptions.clear();
            routes.servers.clear();
        }

        // In-flight handler invocations are allowed to finish
        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        self.inner.registry.flush();
        self.inner
            .state
            .store(NodeState::Closed as u8, Ordering::Release);
        debug!("node closed");
    }

    /// Network identifier; None when anonymous
    pub fn id(&self) -> Option<NodeId> {
        self.inner.id
    }

    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    pub fn info(&self) -> &NodeInfo {
        &self.inner.config.info
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    pub fn health(&self) -> Health {
        Health::from_bits(self.inner.health.load(Ordering::Relaxed))
    }

    /// Read by the heartbeat task at its next tick
    pub fn set_health(&self, health: Health) {
        self.inner.health.store(health.to_bits(), Ordering::Relaxed);
    }

    pub fn mode(&self) -> Mode {
        Mode::from_bits(self.inner.mode.load(Ordering::Relaxed))
    }

    /// Read by the heartbeat task at its next tick
    pub fn set_mode(&self, mode: Mode) {
        self.inner.mode.store(mode.to_bits(), Ordering::Relaxed);
    }

    /// Vendor-specific status code broadcast with each heartbeat
    pub fn set_vendor_status(&self, code: u8) {
        self.inner.vendor_status.store(code, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.inner.uptime()
    }

    pub fn stats(&self) -> NodeStatsSnapshot {
        self.inner.stats.snapshot()
    }
}

/// Inbound loop: transport faults are absorbed here and never escape
async fn run_dispatch(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = inner.transport.recv() => match result {
                Ok(frame) => inner.dispatch(frame),
                Err(Error::Decode(err)) => {
                    inner.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %err, "malformed frame dropped");
                }
                Err(err) => {
                    warn!(error = %err, "transport receive failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
    debug!("dispatch loop stopped");
}

/// Heartbeat loop: broadcasts liveness once per interval without omission,
/// regardless of what happens to any other port
async fn run_heartbeat(inner: Arc<NodeInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let beat = Heartbeat {
                    uptime_secs: inner.uptime().as_secs().min(u32::MAX as u64) as u32,
                    health: Health::from_bits(inner.health.load(Ordering::Relaxed)),
                    mode: Mode::from_bits(inner.mode.load(Ordering::Relaxed)),
                    vendor_status: inner.vendor_status.load(Ordering::Relaxed),
                };
                let transfer = TransferId::new(inner.heartbeat_transfer.fetch_add(1, Ordering::Relaxed));
                let frame = Frame::message(
                    standard::HEARTBEAT_SUBJECT,
                    Priority::Nominal,
                    inner.source_id(),
                    transfer,
                    encode_to_vec(&beat),
                );
                match inner.transport.send(&frame).await {
                    Ok(()) => {
                        inner.stats.frames_out.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => warn!(error = %err, "heartbeat send failed"),
                }
            }
        }
    }
    debug!("heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_transport::MemoryBus;

    fn node_on(bus: &MemoryBus, id: u16) -> Node {
        let config = NodeConfig {
            node_id: Some(id),
            ..Default::default()
        };
        Node::new(
            Arc::new(bus.endpoint()),
            Arc::new(Registry::new()),
            config,
        )
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let bus = MemoryBus::new();
        let node = node_on(&bus, 1);
        assert_eq!(node.state(), NodeState::Created);

        node.start().unwrap();
        assert_eq!(node.state(), NodeState::Started);
        // Idempotent while running
        node.start().unwrap();

        node.close().await;
        assert_eq!(node.state(), NodeState::Closed);
        // Repeated close is idempotent
        node.close().await;
        assert_eq!(node.state(), NodeState::Closed);

        // A closed node never restarts
        assert!(matches!(node.start(), Err(Error::NodeClosed)));
    }

    #[tokio::test]
    async fn test_node_id_from_register() {
        let bus = MemoryBus::new();
        let registry = Arc::new(Registry::new());
        registry.ensure(
            NODE_ID_REGISTER,
            Value::from(77u16),
            RegisterFlags::MUTABLE_PERSISTENT,
        );
        let node = Node::new(
            Arc::new(bus.endpoint()),
            registry,
            NodeConfig {
                node_id: None,
                ..Default::default()
            },
        );
        assert_eq!(node.id(), Some(NodeId::new(77)));
    }

    #[tokio::test]
    async fn test_unconfigured_node_is_anonymous() {
        let bus = MemoryBus::new();
        let node = Node::new(
            Arc::new(bus.endpoint()),
            Arc::new(Registry::new()),
            NodeConfig {
                node_id: None,
                ..Default::default()
            },
        );
        assert_eq!(node.id(), None);
        // The identity register materialized for configuration tooling
        assert!(node.registry().get(NODE_ID_REGISTER).is_some());
    }

    #[tokio::test]
    async fn test_health_and_mode_are_writable() {
        let bus = MemoryBus::new();
        let node = node_on(&bus, 2);
        assert_eq!(node.health(), Health::Nominal);
        assert_eq!(node.mode(), Mode::Initialization);

        node.set_health(Health::Caution);
        node.set_mode(Mode::Operational);
        assert_eq!(node.health(), Health::Caution);
        assert_eq!(node.mode(), Mode::Operational);
    }

    #[tokio::test]
    async fn test_close_flushes_persistent_registers() {
        use tessera_registry::{MemoryBackend, RegistryBackend};

        let bus = MemoryBus::new();
        let backend = Arc::new(MemoryBackend::new());
        let registry = Arc::new(Registry::with_backend(
            Arc::clone(&backend) as Arc<dyn RegistryBackend>
        ));
        registry.ensure(
            "app.gain",
            Value::from(1.5f64),
            RegisterFlags::MUTABLE_PERSISTENT,
        );

        let node = Node::new(
            Arc::new(bus.endpoint()),
            registry,
            NodeConfig {
                node_id: Some(3),
                ..Default::default()
            },
        );
        node.start().unwrap();
        node.close().await;

        assert_eq!(backend.load("app.gain"), Some(Value::F64(vec![1.5])));
    }
}
