//! Request/response dispatch
//!
//! Each call allocates a transfer identifier, registers a pending entry
//! keyed by `(service, transfer, server)`, and awaits its deadline. A
//! pending entry resolves exactly once: by a matching response, by the
//! deadline, or by node closure - and closure is observable as a distinct
//! outcome. The dispatcher never retries; retry policy belongs to callers.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use tessera_core::{Error, NodeId, Priority, Result, ServiceId, TransferId};
use tessera_wire::{decode_from_slice, encode_to_vec, Frame, Service};

use crate::node::{Inbound, Node, NodeInner};
use crate::port::PortName;

/// Provenance of one inbound request, handed to server handlers
#[derive(Clone, Copy, Debug)]
pub struct RequestMeta {
    pub client: NodeId,
    pub priority: Priority,
    pub transfer: TransferId,
    pub received_at: SystemTime,
}

impl Node {
    /// Create a client for a service hosted by `server`
    pub fn client<S: Service>(
        &self,
        port: impl Into<PortName>,
        server: NodeId,
        priority: Priority,
    ) -> Result<Client<S>> {
        self.inner.ensure_open()?;
        if server.is_unset() {
            return Err(Error::Anonymous("be addressed for service calls"));
        }
        let raw = self
            .inner
            .resolve_port(port.into(), "service", ServiceId::MAX)?;
        Ok(Client {
            inner: Arc::clone(&self.inner),
            service: ServiceId::new(raw),
            server,
            priority,
            // A random starting point keeps a restarted client from
            // correlating against a stale peer's transfer space
            transfer: AtomicU64::new(rand::random::<u32>() as u64),
            _marker: PhantomData,
        })
    }

    /// Create a server for a service; bind a handler with [`Server::serve`]
    pub fn server<S: Service>(&self, port: impl Into<PortName>) -> Result<Server<S>> {
        self.inner.ensure_open()?;
        if self.inner.id.is_none() {
            return Err(Error::Anonymous("serve requests"));
        }
        let raw = self
            .inner
            .resolve_port(port.into(), "service", ServiceId::MAX)?;
        let service = ServiceId::new(raw);

        let (tx, rx) = mpsc::channel(self.inner.config.queue_depth);
        self.inner.routes.lock().servers.insert(service, tx);

        Ok(Server {
            inner: Arc::clone(&self.inner),
            service,
            rx,
            _marker: PhantomData,
        })
    }
}

/// Typed RPC client bound to one service on one server node
pub struct Client<S: Service> {
    inner: Arc<NodeInner>,
    service: ServiceId,
    server: NodeId,
    priority: Priority,
    transfer: AtomicU64,
    _marker: PhantomData<fn(S)>,
}

impl<S: Service> Client<S> {
    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn server(&self) -> NodeId {
        self.server
    }

    /// Issue one request and await its response until `timeout`.
    ///
    /// On deadline expiry the call fails with `Timeout`; if the node
    /// closes first it fails with `Cancelled`. No automatic retry.
    pub async fn call(&self, request: &S::Request, timeout: Duration) -> Result<S::Response> {
        self.inner.ensure_started()?;
        let own = self.inner.id.ok_or(Error::Anonymous("issue service calls"))?;

        let transfer = TransferId::new(self.transfer.fetch_add(1, Ordering::Relaxed));
        let key = (self.service, transfer, self.server);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(key, tx);

        let frame = Frame::request(
            self.service,
            self.priority,
            own,
            self.server,
            transfer,
            encode_to_vec(request),
        );
        if let Err(err) = self.inner.transport.send(&frame).await {
            self.inner.pending.lock().remove(&key);
            return Err(err);
        }
        self.inner.stats.frames_out.fetch_add(1, Ordering::Relaxed);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(decode_from_slice::<S::Response>(&frame.payload)?),
            // The waiter was dropped by node closure
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                self.inner.pending.lock().remove(&key);
                Err(Error::Timeout(timeout))
            }
        }
    }
}

/// Typed RPC server; inert until a handler is bound
pub struct Server<S: Service> {
    inner: Arc<NodeInner>,
    service: ServiceId,
    rx: mpsc::Receiver<Inbound>,
    _marker: PhantomData<fn(S)>,
}

impl<S> Server<S>
where
    S: Service + 'static,
    S::Request: Send + 'static,
    S::Response: Send + 'static,
{
    pub fn service(&self) -> ServiceId {
        self.service
    }

    /// Bind a handler and start serving in the background.
    ///
    /// A handler returning `None` or overrunning the node's response
    /// budget silently drops the request, so the caller times out.
    pub fn serve<F, Fut>(self, handler: F)
    where
        F: Fn(S::Request, RequestMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<S::Response>> + Send + 'static,
    {
        let Server {
            inner,
            service,
            mut rx,
            ..
        } = self;
        let budget = inner.config.response_budget;
        let mut shutdown = inner.shutdown.subscribe();
        let task_inner = Arc::clone(&inner);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    inbound = rx.recv() => {
                        let Some(inbound) = inbound else { break };
                        let request = match decode_from_slice::<S::Request>(&inbound.frame.payload) {
                            Ok(request) => request,
                            Err(err) => {
                                task_inner.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                                warn!(%service, error = %err, "malformed request dropped");
                                continue;
                            }
                        };
                        let meta = RequestMeta {
                            client: inbound.frame.header.source,
                            priority: inbound.frame.header.priority,
                            transfer: inbound.frame.header.transfer,
                            received_at: inbound.received_at,
                        };
                        let response = match tokio::time::timeout(budget, handler(request, meta)).await {
                            Ok(Some(response)) => response,
                            // Dropped deliberately or by budget overrun;
                            // the caller's deadline handles the rest
                            Ok(None) => continue,
                            Err(_) => {
                                warn!(%service, "handler overran response budget, request dropped");
                                continue;
                            }
                        };
                        let frame = Frame::response(
                            &inbound.frame.header,
                            task_inner.source_id(),
                            encode_to_vec(&response),
                        );
                        match task_inner.transport.send(&frame).await {
                            Ok(()) => {
                                task_inner.stats.frames_out.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => warn!(%service, error = %err, "response send failed"),
                        }
                    }
                }
            }
        });
        inner.tasks.lock().push(handle);
    }
}
