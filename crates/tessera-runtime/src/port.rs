//! Publish/subscribe ports
//!
//! A port binds a numeric identifier and a message type to the node's
//! transport. Identifiers resolve either from a literal or from the
//! `<name>.id` register, so the network binding of a named port is a
//! configuration concern, not a code change.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tracing::warn;

use tessera_core::{Error, NodeId, Priority, Result, SubjectId, TransferId};
use tessera_registry::{RegisterFlags, Value};
use tessera_wire::{decode_from_slice, encode_to_vec, Frame, Message};

use crate::node::{Inbound, Node, NodeInner, SubscriberRoute};

/// How a factory names the port it is asked to create
#[derive(Clone, Debug)]
pub enum PortName {
    /// Identifier given directly
    Literal(u16),
    /// Identifier resolved from the `<name>.id` register
    Named(String),
}

impl From<u16> for PortName {
    fn from(raw: u16) -> Self {
        PortName::Literal(raw)
    }
}

impl From<&str> for PortName {
    fn from(name: &str) -> Self {
        PortName::Named(name.to_owned())
    }
}

impl From<String> for PortName {
    fn from(name: String) -> Self {
        PortName::Named(name)
    }
}

/// Sentinel shared by both identifier spaces
const DISABLED_SENTINEL: u16 = 0xFFFF;

impl NodeInner {
    /// Resolve a port identifier within one identifier space.
    ///
    /// An absent register fails with `MissingRegister` after materializing
    /// the register (sentinel default) so configuration tooling can see
    /// it; a register explicitly holding the sentinel fails with
    /// `PortDisabled`. Either way the caller can treat the feature as
    /// configured-off without touching any other port.
    pub(crate) fn resolve_port(&self, spec: PortName, space: &'static str, max: u16) -> Result<u16> {
        let (raw, label) = match spec {
            PortName::Literal(raw) => (raw, format!("{space} {raw}")),
            PortName::Named(name) => {
                let register = format!("{name}.id");
                let value = match self.registry.get(&register) {
                    Some(value) => value,
                    None => {
                        let value = self.registry.ensure(
                            &register,
                            Value::from(DISABLED_SENTINEL),
                            RegisterFlags::MUTABLE_PERSISTENT,
                        );
                        // A persisted configuration may still supply an id
                        if value.scalar_u16() == Some(DISABLED_SENTINEL) {
                            return Err(Error::MissingRegister(register));
                        }
                        value
                    }
                };
                let raw = value.scalar_u16().ok_or_else(|| Error::TypeMismatch {
                    name: register,
                    expected: "u16",
                    offered: value.kind().name(),
                })?;
                (raw, name)
            }
        };
        if raw == DISABLED_SENTINEL {
            return Err(Error::PortDisabled(label));
        }
        if raw > max {
            return Err(Error::InvalidPortId { id: raw, space });
        }
        Ok(raw)
    }
}

impl Node {
    /// Create a publisher on a subject
    pub fn publisher<T: Message>(
        &self,
        port: impl Into<PortName>,
        priority: Priority,
    ) -> Result<Publisher<T>> {
        self.inner.ensure_open()?;
        let raw = self
            .inner
            .resolve_port(port.into(), "subject", SubjectId::MAX)?;
        Ok(Publisher {
            inner: Arc::clone(&self.inner),
            subject: SubjectId::new(raw),
            priority,
            send_timeout: self.inner.config.send_timeout,
            transfer: AtomicU64::new(0),
            _marker: PhantomData,
        })
    }

    /// Create a subscriber on a subject
    pub fn subscriber<T: Message>(&self, port: impl Into<PortName>) -> Result<Subscriber<T>> {
        self.inner.ensure_open()?;
        let raw = self
            .inner
            .resolve_port(port.into(), "subject", SubjectId::MAX)?;
        let subject = SubjectId::new(raw);

        let (tx, rx) = mpsc::channel(self.inner.config.queue_depth);
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .routes
            .lock()
            .subscriptions
            .entry(subject)
            .or_default()
            .push(SubscriberRoute { token, tx });

        Ok(Subscriber {
            inner: Arc::clone(&self.inner),
            subject,
            token,
            rx,
            _marker: PhantomData,
        })
    }
}

/// Typed publisher bound to one subject
pub struct Publisher<T: Message> {
    inner: Arc<NodeInner>,
    subject: SubjectId,
    priority: Priority,
    send_timeout: Duration,
    transfer: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message> Publisher<T> {
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Encode and hand the value to the transport.
    ///
    /// Resolves `Ok` once the frame is accepted for transmission - there
    /// is no delivery acknowledgment - and never blocks past the node's
    /// send timeout.
    pub async fn publish(&self, value: &T) -> Result<()> {
        self.inner.ensure_open()?;
        let transfer = TransferId::new(self.transfer.fetch_add(1, Ordering::Relaxed));
        let frame = Frame::message(
            self.subject,
            self.priority,
            self.inner.source_id(),
            transfer,
            encode_to_vec(value),
        );
        match tokio::time::timeout(self.send_timeout, self.inner.transport.send(&frame)).await {
            Ok(Ok(())) => {
                self.inner.stats.frames_out.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::TransportUnavailable(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        }
    }
}

/// A decoded value with its provenance
#[derive(Clone, Debug)]
pub struct Received<T> {
    pub value: T,
    /// Originating node, when it was not anonymous
    pub source: Option<NodeId>,
    pub priority: Priority,
    /// Arrival time of the underlying frame
    pub timestamp: SystemTime,
}

/// Typed subscriber yielding decoded values from one subject
pub struct Subscriber<T: Message> {
    inner: Arc<NodeInner>,
    subject: SubjectId,
    token: u64,
    rx: mpsc::Receiver<Inbound>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Message> Subscriber<T> {
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Next decoded value, or None once the node has closed.
    ///
    /// Malformed frames are dropped and counted, never surfaced.
    pub async fn recv(&mut self) -> Option<Received<T>> {
        while let Some(inbound) = self.rx.recv().await {
            match decode_from_slice::<T>(&inbound.frame.payload) {
                Ok(value) => {
                    let source = inbound.frame.header.source;
                    return Some(Received {
                        value,
                        source: (!source.is_unset()).then_some(source),
                        priority: inbound.frame.header.priority,
                        timestamp: inbound.received_at,
                    });
                }
                Err(err) => {
                    self.inner.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(subject = %self.subject, error = %err, "malformed frame dropped");
                }
            }
        }
        None
    }
}

impl<T: Message> Drop for Subscriber<T> {
    fn drop(&mut self) {
        let mut routes = self.inner.routes.lock();
        if let Some(subs) = routes.subscriptions.get_mut(&self.subject) {
            subs.retain(|route| route.token != self.token);
            if subs.is_empty() {
                routes.subscriptions.remove(&self.subject);
            }
        }
    }
}
