//! Inbound adapters that translate external requests into bridged
//! computations while keeping framework details at the edge.

pub mod http;
