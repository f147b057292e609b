//! Health endpoints for orchestration.
//!
//! Liveness reports how long the process has been up and which build is
//! running. Readiness is earned rather than declared: a probe only passes
//! once the server has started, a unit scheduled through the bridge
//! completes on the compute lane, and every registered connection source
//! hands out a connection.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use actix_web::{HttpResponse, get, http::header, web};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::Error;
use crate::domain::ports::ConnectionSource;
use crate::runtime::ExecutionBridge;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

type Check = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Body served by the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthBody {
    /// Milliseconds since the process started serving.
    pub up_since: u64,
    /// Build version.
    pub version: String,
}

/// Shared health state: start time, version and readiness checks.
pub struct HealthState {
    started: Instant,
    version: String,
    serving: AtomicBool,
    bridge: ExecutionBridge,
    checks: Vec<(&'static str, Check)>,
}

impl HealthState {
    /// Health of a server dispatching onto `bridge`.
    pub fn new(bridge: ExecutionBridge) -> Self {
        Self {
            started: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            serving: AtomicBool::new(false),
            bridge,
            checks: Vec::new(),
        }
    }

    /// Override the reported version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Require `source` to hand out a connection before reporting ready.
    pub fn with_source<S: ConnectionSource>(mut self, name: &'static str, source: S) -> Self {
        let check: Check = Arc::new(move || {
            let source = source.clone();
            async move {
                let connection = source.acquire().await?;
                source.release(connection).await;
                Ok(())
            }
            .boxed()
        });
        self.checks.push((name, check));
        self
    }

    /// Mark the server as accepting connections.
    pub fn mark_serving(&self) {
        self.serving.store(true, Ordering::Release);
    }

    /// Liveness body for this instant.
    pub fn body(&self) -> HealthBody {
        let up_since = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        HealthBody {
            up_since,
            version: self.version.clone(),
        }
    }

    /// Whether the server is started, the compute lane answers and every
    /// connection source hands out a connection.
    pub async fn is_ready(&self) -> bool {
        if !self.serving.load(Ordering::Acquire) {
            return false;
        }
        let checks: Vec<_> = self
            .checks
            .iter()
            .map(|(name, check)| (*name, Arc::clone(check)))
            .collect();
        let probe = self.bridge.run_current(async move {
            for (name, check) in checks {
                check().await.map_err(|err| {
                    warn!(check = name, error = %err, "readiness check failed");
                    err
                })?;
            }
            Ok(())
        });
        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("readiness probe timed out");
                false
            }
        }
    }
}

fn no_store(mut response: actix_web::HttpResponseBuilder) -> actix_web::HttpResponseBuilder {
    response.insert_header((header::CACHE_CONTROL, "no-store"));
    response
}

/// Readiness probe: 200 once the server is up and its dependencies answer.
#[get("/health/ready")]
pub async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    if state.is_ready().await {
        no_store(HttpResponse::Ok()).finish()
    } else {
        no_store(HttpResponse::ServiceUnavailable()).finish()
    }
}

/// Liveness probe: uptime and version.
#[get("/health/live")]
pub async fn live(state: web::Data<HealthState>) -> HttpResponse {
    no_store(HttpResponse::Ok()).json(state.body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Reactor, ReactorConfig};
    use crate::test_support::MemoryConnectionSource;
    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use rstest::{fixture, rstest};

    #[fixture]
    fn reactor() -> Reactor {
        Reactor::new(&ReactorConfig::default().with_compute_threads(1)).expect("reactor starts")
    }

    async fn ready_status(state: web::Data<HealthState>) -> StatusCode {
        let app = test::init_service(App::new().app_data(state).service(ready)).await;
        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/health/ready").to_request(),
        )
        .await;
        res.status()
    }

    #[rstest]
    #[actix_web::test]
    async fn readiness_waits_for_the_server_to_start(reactor: Reactor) {
        let state = web::Data::new(
            HealthState::new(reactor.bridge()).with_source("orders", MemoryConnectionSource::new()),
        );

        assert_eq!(ready_status(state.clone()).await, StatusCode::SERVICE_UNAVAILABLE);
        state.mark_serving();
        assert_eq!(ready_status(state).await, StatusCode::OK);
    }

    #[rstest]
    #[actix_web::test]
    async fn readiness_fails_while_a_source_refuses_connections(reactor: Reactor) {
        let source = MemoryConnectionSource::new().failing_acquire();
        let state = web::Data::new(HealthState::new(reactor.bridge()).with_source("orders", source));
        state.mark_serving();

        assert_eq!(ready_status(state).await, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[rstest]
    #[actix_web::test]
    async fn readiness_checks_hand_their_connection_back(reactor: Reactor) {
        let source = MemoryConnectionSource::new();
        let state =
            web::Data::new(HealthState::new(reactor.bridge()).with_source("orders", source.clone()));
        state.mark_serving();

        assert_eq!(ready_status(state).await, StatusCode::OK);
        assert_eq!(source.events().len(), 2);
        assert!(source.committed().is_empty());
    }

    #[rstest]
    #[actix_web::test]
    async fn liveness_reports_uptime_and_version(reactor: Reactor) {
        let state = web::Data::new(HealthState::new(reactor.bridge()).with_version("1.2.3"));
        let app = test::init_service(App::new().app_data(state).service(live)).await;

        let res = test::call_service(
            &app,
            test::TestRequest::get().uri("/health/live").to_request(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
            Some(b"no-store".as_slice())
        );
        let body: serde_json::Value = test::read_body_json(res).await;
        assert_eq!(body["version"], "1.2.3");
        assert!(body["up_since"].is_u64());
    }
}
