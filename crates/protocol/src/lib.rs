pub mod constants;
pub mod envelope;
pub mod error;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::ControlKind;
pub use envelope::{Envelope, InboundEvent, OutboundMessage};
pub use error::ProtocolError;
pub use messages::{AuthAccepted, AuthRejected, AuthRequest};
