// Upstream queue abstraction and adapters

pub mod channel;
pub mod memory;
pub mod nats;

pub use channel::{Channel, Transaction};
pub use memory::{MemoryChannel, MemoryTransaction};
pub use nats::{NatsChannel, NatsClient, NatsConfig, NatsTransaction};
