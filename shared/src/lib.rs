pub mod commands;
pub mod envelope;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod outbox;
pub mod routing;
pub mod schema;

pub use envelope::{Envelope, EventMeta, MessageContext, SchemaVersion};
pub use error::{DomainError, DomainResult};
