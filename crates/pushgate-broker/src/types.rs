use std::fmt;
use uuid::Uuid;

/// Per-connection identifier (random UUID, not persisted).
///
/// Shards key their maps by `ConnId` rather than by the delivery channel
/// itself, so the same connection can be addressed from any shard's
/// deregister path without holding a channel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire class of a delivered frame, exposed to clients as the SSE
/// `event:` field so they can tell message classes apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Broadcast,
    Individual,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Broadcast => "broadcast",
            FrameKind::Individual => "individual",
        }
    }
}

/// One message as handed to a connection's delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: String,
}

/// A message entering the broker. No target means broadcast; a target
/// names the identity whose connections should receive it.
///
/// Messages are value objects, cloned per shard and not retained after
/// delivery.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub target: Option<String>,
    pub payload: String,
}
