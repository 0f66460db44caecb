//! Client-side connection core.
//!
//! Opens one socket per logical session, authenticates it, retries after
//! unsolicited closes and fans inbound events out to subscribers.
//! [`ConnectionManager`] is the entry point; [`Machine`] is the pure
//! transition function underneath it.

pub mod config;
pub mod dispatcher;
pub mod handshake;
pub mod machine;
pub mod manager;
mod pumps;
pub mod reconnection;
pub mod transport;
pub mod types;
pub mod ws;

pub use config::{ConfigError, ConnectionConfig};
pub use dispatcher::{Dispatcher, KindFilter, Subscription, SubscriptionId};
pub use handshake::{AuthOutcome, HandshakeMode};
pub use machine::{Effect, Input, Machine};
pub use manager::ConnectionManager;
pub use reconnection::ReconnectConfig;
pub use transport::{Link, Transport, TransportEvent, TransportEvents};
pub use types::{ConnectionState, Credential, StateChange, TransportHandle};
pub use ws::{WsError, WsTransport, WsTransportConfig};

pub use tether_protocol::{InboundEvent, OutboundMessage};
