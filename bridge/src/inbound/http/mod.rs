//! HTTP inbound adapter.
//!
//! Handlers hand their body to the execution bridge and turn the resolved
//! [`Deferred`](crate::runtime::Deferred) into a response; failures go
//! through [`error::classify`].

pub mod error;
pub mod health;
pub mod trace;

use std::future::Future;

use crate::domain::Error;
use crate::runtime::ExecutionBridge;

pub use error::{ApiResult, Classification, ErrorBody, classify};
pub use trace::Trace;

/// Run a handler body as a request unit on the bridge's compute lane, under
/// the request's ambient context.
///
/// # Examples
/// ```ignore
/// async fn show(bridge: web::Data<ExecutionBridge>, id: web::Path<i64>) -> ApiResult<HttpResponse> {
///     let id = id.into_inner();
///     let booking = dispatch(&bridge, async move { load_booking(id).await }).await?;
///     Ok(HttpResponse::Ok().json(booking))
/// }
/// ```
pub async fn dispatch<T, F>(bridge: &ExecutionBridge, body: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Error>> + Send + 'static,
{
    bridge.run_current(body).await
}
