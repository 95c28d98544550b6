//! Message protocol for depot.
//!
//! Inbound messages drive the dispatcher; outbound messages carry uploads
//! (and refill requests) back to the delivery side. On the wire every message
//! is one JSON object per line, tagged by its `type` field.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::LineCodec;
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Inbound, Outbound, MAX_MESSAGE_SIZE};
