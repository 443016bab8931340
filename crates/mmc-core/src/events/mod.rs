//! Real-time event handling: wire frames, normalization and delivery.

pub mod message;
pub mod normalizer;
pub mod pump;
pub mod types;

pub use message::Message;
pub use normalizer::{Discard, Disposition, Normalizer};
pub use pump::EventStreams;
pub use types::{EventError, Frame, MessageKind, PushEvent, RawEvent, RawResponse};
