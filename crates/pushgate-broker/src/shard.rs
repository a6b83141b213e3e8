use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::info;

use crate::types::{ConnId, Envelope, Frame, FrameKind};

/// Capacity of each connection's delivery channel. A single slot keeps
/// the handoff a rendezvous: the shard's send completes only once the
/// connection's write loop is draining, so an undrained consumer parks
/// its owning shard and nothing else.
pub(crate) const DELIVERY_CAPACITY: usize = 1;

/// A new connection waiting on the shared intake queue to be claimed by
/// the first shard whose event loop is free.
pub(crate) struct Register {
    pub id: ConnId,
    /// Absent for anonymous, broadcast-only clients.
    pub identity: Option<String>,
    pub tx: mpsc::Sender<Frame>,
    /// Resolved once the claiming shard has applied the registration.
    pub registered: oneshot::Sender<()>,
}

/// Control events multiplexed into a shard's event loop. Events on this
/// channel are processed in arrival order, one at a time.
pub(crate) enum ShardEvent {
    Deregister(ConnId),
    /// The ack resolves only after the fan-out has run, so the sender
    /// holds until this shard's delivery is complete.
    Deliver(Envelope, oneshot::Sender<()>),
    Identities(oneshot::Sender<Vec<String>>),
}

/// The intake queue is the only state shared between shard tasks. The
/// mutex-guarded `recv` is the claim: exactly one shard takes each
/// pending connection.
pub(crate) type Intake = Arc<Mutex<mpsc::Receiver<Register>>>;

/// One partition of the broker's client set. All mutation happens inside
/// this shard's own task; no locks protect the maps.
pub(crate) struct ShardState {
    /// Integer label used in log messages.
    label: usize,
    /// Every owned connection, for broadcast delivery.
    clients: HashMap<ConnId, mpsc::Sender<Frame>>,
    /// Identity to the set of owned connections carrying it. One identity
    /// may hold several connections at once (multiple tabs on one
    /// account), hence a set rather than a single entry.
    by_identity: HashMap<String, HashSet<ConnId>>,
    /// Reverse map for O(1) cleanup on deregister.
    identity_of: HashMap<ConnId, String>,
}

impl ShardState {
    pub(crate) fn new(label: usize) -> Self {
        Self {
            label,
            clients: HashMap::new(),
            by_identity: HashMap::new(),
            identity_of: HashMap::new(),
        }
    }

    fn register(&mut self, reg: Register) {
        let Register {
            id,
            identity,
            tx,
            registered,
        } = reg;
        self.clients.insert(id, tx);
        if let Some(identity) = identity {
            self.by_identity.entry(identity.clone()).or_default().insert(id);
            self.identity_of.insert(id, identity);
        }
        info!(shard = self.label, conn = %id, "client attached");
        // Unblocks the caller's connect(); from here on the connection
        // receives everything this shard delivers.
        let _ = registered.send(());
    }

    /// Idempotent: every shard is asked to deregister because the caller
    /// does not know which one owns the connection, so unknown handles
    /// are a no-op.
    fn deregister(&mut self, id: ConnId) -> bool {
        let Some(tx) = self.clients.remove(&id) else {
            return false;
        };
        if let Some(identity) = self.identity_of.remove(&id) {
            if let Some(set) = self.by_identity.get_mut(&identity) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_identity.remove(&identity);
                }
            }
        }
        // Last sender for this connection: dropping it closes the
        // delivery handle and the client's read loop sees end-of-stream.
        drop(tx);
        info!(shard = self.label, conn = %id, "client detached");
        true
    }

    async fn deliver(&mut self, envelope: Envelope) {
        let (kind, targets): (FrameKind, Vec<ConnId>) = match &envelope.target {
            None => (FrameKind::Broadcast, self.clients.keys().copied().collect()),
            Some(identity) => (
                FrameKind::Individual,
                // Unknown identity: delivered to zero connections. It may
                // simply be owned by another shard.
                self.by_identity
                    .get(identity)
                    .map(|set| set.iter().copied().collect())
                    .unwrap_or_default(),
            ),
        };

        let frame = Frame {
            kind,
            payload: envelope.payload,
        };

        let mut stale = Vec::new();
        for id in targets {
            let Some(tx) = self.clients.get(&id) else {
                continue;
            };
            // Blocking handoff: an undrained consumer parks this shard
            // here until it catches up or is deregistered.
            if tx.send(frame.clone()).await.is_err() {
                stale.push(id);
            }
        }
        for id in stale {
            // The receiver is gone without a disconnect ever arriving:
            // failure to deliver is treated as closure.
            self.deregister(id);
        }
    }

    /// Distinct identities with at least one owned connection. Answered
    /// over a reply channel so no external reader races the event loop.
    fn identities(&self) -> Vec<String> {
        self.by_identity.keys().cloned().collect()
    }
}

/// The shard event loop: a multi-way wait over the shared intake queue,
/// this shard's control channel, and the shutdown signal. First ready
/// wins, each event runs to completion before the next is considered.
pub(crate) async fn run(
    mut state: ShardState,
    intake: Intake,
    mut control: mpsc::Receiver<ShardEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(shard = state.label, "shard started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            reg = claim(&intake) => match reg {
                Some(reg) => state.register(reg),
                None => break,
            },
            event = control.recv() => match event {
                Some(ShardEvent::Deregister(id)) => {
                    state.deregister(id);
                }
                Some(ShardEvent::Deliver(envelope, done)) => {
                    state.deliver(envelope).await;
                    let _ = done.send(());
                }
                Some(ShardEvent::Identities(reply)) => {
                    let _ = reply.send(state.identities());
                }
                None => break,
            },
        }
    }
    info!(shard = state.label, "shard stopped");
}

/// Claim the next pending connection. `recv` is cancel-safe, so losing
/// the select race to another event never drops a registration.
async fn claim(intake: &Intake) -> Option<Register> {
    intake.lock().await.recv().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_client(
        state: &mut ShardState,
        identity: Option<&str>,
    ) -> (ConnId, mpsc::Receiver<Frame>) {
        let id = ConnId::new();
        let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
        let (ack, _) = oneshot::channel();
        state.register(Register {
            id,
            identity: identity.map(String::from),
            tx,
            registered: ack,
        });
        (id, rx)
    }

    #[test]
    fn register_updates_all_three_maps() {
        let mut state = ShardState::new(1);
        let (id, _rx) = register_client(&mut state, Some("u1"));

        assert!(state.clients.contains_key(&id));
        assert!(state.by_identity["u1"].contains(&id));
        assert_eq!(state.identity_of[&id], "u1");
    }

    #[test]
    fn anonymous_client_is_broadcast_only() {
        let mut state = ShardState::new(1);
        let (id, _rx) = register_client(&mut state, None);

        assert!(state.clients.contains_key(&id));
        assert!(state.by_identity.is_empty());
        assert!(!state.identity_of.contains_key(&id));
    }

    #[test]
    fn deregister_removes_empty_identity_entry() {
        let mut state = ShardState::new(1);
        let (a, _rx_a) = register_client(&mut state, Some("u1"));
        let (b, _rx_b) = register_client(&mut state, Some("u1"));

        assert!(state.deregister(a));
        assert_eq!(state.identities(), vec!["u1".to_string()]);

        assert!(state.deregister(b));
        assert!(state.identities().is_empty());
        assert!(state.clients.is_empty());
        assert!(state.identity_of.is_empty());
    }

    #[test]
    fn deregister_unknown_conn_is_noop() {
        let mut state = ShardState::new(1);
        assert!(!state.deregister(ConnId::new()));
    }

    #[test]
    fn deregister_closes_the_delivery_handle() {
        let mut state = ShardState::new(1);
        let (id, mut rx) = register_client(&mut state, None);

        state.deregister(id);
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn deliver_broadcast_reaches_every_client() {
        let mut state = ShardState::new(1);
        let (_a, mut rx_a) = register_client(&mut state, None);
        let (_b, mut rx_b) = register_client(&mut state, Some("u1"));

        state
            .deliver(Envelope {
                target: None,
                payload: "hi".into(),
            })
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.kind, FrameKind::Broadcast);
            assert_eq!(frame.payload, "hi");
        }
    }

    #[tokio::test]
    async fn deliver_targeted_skips_other_identities() {
        let mut state = ShardState::new(1);
        let (_a, mut rx_a) = register_client(&mut state, Some("u1"));
        let (_b, mut rx_b) = register_client(&mut state, Some("u2"));

        state
            .deliver(Envelope {
                target: Some("u1".into()),
                payload: "hey".into(),
            })
            .await;

        let frame = rx_a.recv().await.unwrap();
        assert_eq!(frame.kind, FrameKind::Individual);
        assert_eq!(frame.payload, "hey");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_to_unknown_identity_is_noop() {
        let mut state = ShardState::new(1);
        let (_a, mut rx_a) = register_client(&mut state, Some("u1"));

        state
            .deliver(Envelope {
                target: Some("nobody".into()),
                payload: "hey".into(),
            })
            .await;

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_delivery_deregisters_the_connection() {
        let mut state = ShardState::new(1);
        let (id, rx) = register_client(&mut state, Some("u1"));
        drop(rx);

        state
            .deliver(Envelope {
                target: None,
                payload: "hi".into(),
            })
            .await;

        assert!(!state.clients.contains_key(&id));
        assert!(state.identities().is_empty());
    }
}
