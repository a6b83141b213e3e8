pub mod broker;
pub mod error;
mod shard;
pub mod types;

pub use broker::{Broker, Subscription};
pub use error::BrokerError;
pub use types::{ConnId, Frame, FrameKind};
