//! Driven ports at the edge of the bridge.
//!
//! Ports describe what the core expects from the outside world: a source of
//! transactional database connections and an outbound request client. Each
//! exposes a strongly typed error generated by [`define_port_error`] so
//! adapters map their failures into predictable variants.

mod macros;
pub(crate) use macros::define_port_error;

mod connection_source;
mod outbound_client;

pub use connection_source::{ConnectionSource, SourceId, TransactionError};
pub use outbound_client::{
    OutboundClient, OutboundError, ReceivedResponse, RequestSpec, StreamedResponse, Verb,
};
