//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! - **http**: reqwest-backed outbound client and the retrying decorator
//! - **persistence**: bb8 + diesel-async PostgreSQL connection source
//!
//! Adapters are thin translators between domain types and
//! infrastructure-specific representations. They contain no business logic.

pub mod http;
pub mod persistence;
