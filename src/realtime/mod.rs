//! Real-time notifications over WebSocket connections.
//!
//! - [`ConnectionRegistry`] tracks live connections, their channel
//!   subscriptions and liveness, and fans broadcasts out to subscribers.
//! - [`Notifier`] turns domain events into messages on well-known channels.
//! - [`Transport`] is how the registry hands a message to a socket.

mod broker;
pub mod channel;
mod config;
mod message;
mod notify;
mod registry;
mod transport;

pub use config::RealtimeConfig;
pub use message::{InboundMessage, MessageError, MessageType, NotificationMessage, parse_inbound};
pub use notify::Notifier;
pub use registry::{
    ConnectOptions, ConnectionId, ConnectionInfo, ConnectionRegistry, ConnectionsByAge,
    RealtimeStats,
};
pub use transport::{DeliveryError, QueueTransport, Transport};
