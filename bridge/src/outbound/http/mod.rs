//! Outbound HTTP: the reqwest adapter and the retry decorator.
//!
//! Compose them by wrapping, never by subclassing:
//!
//! ```ignore
//! let client = RetryingClient::new(ReqwestClient::new(Duration::from_secs(5))?);
//! let rentals = client.fetch(&url, RequestSpec::new()).await?;
//! ```

mod reqwest_client;
mod retrying;

pub use reqwest_client::ReqwestClient;
pub use retrying::{RetryingClient, connection_reset_policy};
