use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::info;

use crate::error::{BrokerError, Result};
use crate::shard::{self, Intake, Register, ShardEvent, ShardState, DELIVERY_CAPACITY};
use crate::types::{ConnId, Envelope, Frame};

/// The intake queue holds at most one pending connection; connect()
/// additionally waits for the claiming shard's ack, making attachment a
/// rendezvous rather than a buffered drop-off.
const INTAKE_CAPACITY: usize = 1;
/// Per-shard control channel capacity. Kept minimal so backpressure from
/// a stalled shard reaches producers instead of piling up unseen.
const CONTROL_CAPACITY: usize = 1;

struct Inner {
    intake_tx: mpsc::Sender<Register>,
    shards: Vec<mpsc::Sender<ShardEvent>>,
    shutdown_tx: watch::Sender<bool>,
}

/// A single logical broker fronting N independent shards.
///
/// New connections are claimed by whichever shard is free first; every
/// outbound operation (send, broadcast, enumerate, disconnect) goes to
/// all shards, since no one tracks which shard owns which connection.
/// Cheap to clone; all clones drive the same shard set.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

/// The client half of a delivery channel, returned by [`Broker::connect`].
///
/// `recv` yields frames until the owning shard deregisters the
/// connection, at which point it returns `None`; closure doubles as
/// end-of-stream.
pub struct Subscription {
    id: ConnId,
    rx: mpsc::Receiver<Frame>,
}

impl Subscription {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }
}

impl Broker {
    /// Spawn `shards` shard event loops (clamped to at least 1). The
    /// count is fixed for the broker's lifetime. Must be called from
    /// within a tokio runtime.
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1);

        let (intake_tx, intake_rx) = mpsc::channel(INTAKE_CAPACITY);
        let intake: Intake = Arc::new(Mutex::new(intake_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut controls = Vec::with_capacity(count);
        for label in 1..=count {
            let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
            tokio::spawn(shard::run(
                ShardState::new(label),
                Arc::clone(&intake),
                control_rx,
                shutdown_rx.clone(),
            ));
            controls.push(control_tx);
        }

        info!(shards = count, "broker started");
        Self {
            inner: Arc::new(Inner {
                intake_tx,
                shards: controls,
                shutdown_tx,
            }),
        }
    }

    /// Attach a new client and return its subscription. Completes only
    /// after one shard has applied the registration, so a broadcast
    /// issued afterwards reaches this connection. Fails once the broker
    /// has shut down.
    pub async fn connect(&self, identity: Option<String>) -> Result<Subscription> {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        let (registered_tx, registered_rx) = oneshot::channel();

        self.inner
            .intake_tx
            .send(Register {
                id,
                identity,
                tx,
                registered: registered_tx,
            })
            .await
            .map_err(|_| BrokerError::Closed)?;
        registered_rx.await.map_err(|_| BrokerError::Closed)?;

        Ok(Subscription { id, rx })
    }

    /// Detach a client. The owning shard is unknown to the caller, so
    /// every shard is told; at most one deregister is non-trivial and
    /// the rest are no-ops. Safe to call more than once.
    pub async fn disconnect(&self, id: ConnId) {
        for control in &self.inner.shards {
            let _ = control.send(ShardEvent::Deregister(id)).await;
        }
    }

    /// Deliver `payload` to every connected client, anonymous or not.
    /// Returns once every shard has completed its fan-out, so a client
    /// that connects afterwards cannot receive this message.
    pub async fn broadcast(&self, payload: impl Into<String>) {
        self.deliver(Envelope {
            target: None,
            payload: payload.into(),
        })
        .await;
    }

    /// Deliver `payload` to every connection bound to `identity`. An
    /// identity with no active connections receives nothing; that is not
    /// an error.
    pub async fn send(&self, identity: impl Into<String>, payload: impl Into<String>) {
        self.deliver(Envelope {
            target: Some(identity.into()),
            payload: payload.into(),
        })
        .await;
    }

    async fn deliver(&self, envelope: Envelope) {
        // The target identity's connections may be spread across shards,
        // so the message goes to all of them.
        for control in &self.inner.shards {
            let (done_tx, done_rx) = oneshot::channel();
            if control
                .send(ShardEvent::Deliver(envelope.clone(), done_tx))
                .await
                .is_err()
            {
                continue;
            }
            // Wait for the shard to finish fanning out. Returning while
            // the event is merely queued would let a racing connect()
            // register first and hand this message to a connection that
            // attached after it was sent.
            let _ = done_rx.await;
        }
    }

    /// The set of identities with at least one connected client, unioned
    /// across all shards. An identity connected twice still appears once.
    pub async fn identities(&self) -> HashSet<String> {
        let mut identities = HashSet::new();
        for control in &self.inner.shards {
            let (reply_tx, reply_rx) = oneshot::channel();
            if control.send(ShardEvent::Identities(reply_tx)).await.is_err() {
                continue;
            }
            if let Ok(list) = reply_rx.await {
                identities.extend(list);
            }
        }
        identities
    }

    /// Signal every shard to stop. Shard state drops with the loops,
    /// closing all delivery handles.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
    }
}
