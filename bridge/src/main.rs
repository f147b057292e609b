//! Server entry-point: builds the reactor and serves the HTTP edge.
//!
//! Actix accepts connections on its own system runtime; handlers hand their
//! bodies to the bridge, which runs them on the reactor's compute lane.

use actix_web::{App, HttpServer, web};
use color_eyre::eyre::{Context, Result, eyre};
use ortho_config::OrthoConfig;
use tracing::info;

use execution_bridge::config::BridgeSettings;
use execution_bridge::inbound::http::Trace;
use execution_bridge::inbound::http::health::{HealthState, live, ready};
use execution_bridge::outbound::persistence::DbPool;
use execution_bridge::runtime::Reactor;
use execution_bridge::telemetry::init_tracing;

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let settings = BridgeSettings::load()
        .map_err(|err| eyre!("failed to load bridge settings: {err}"))?;
    let reactor = Reactor::new(&settings.reactor_config()).wrap_err("failed to build reactor")?;
    let bridge = web::Data::new(reactor.bridge());
    let outbound = web::Data::new(
        settings
            .outbound_client()
            .wrap_err("failed to build outbound client")?,
    );

    let pool = match settings.pool_config() {
        Some(config) => Some(
            reactor
                .block_on(DbPool::new(config))
                .wrap_err("failed to build database pool")?,
        ),
        None => {
            info!("no database configured; persistence disabled");
            None
        }
    };

    let mut health = HealthState::new(reactor.bridge());
    if let Some(pool) = &pool {
        health = health.with_source("database", pool.clone());
    }
    let health_state = web::Data::new(health);
    // Clone for server factory so readiness probe remains accessible.
    let server_health_state = health_state.clone();
    let pool = pool.map(web::Data::new);
    let bind_addr = settings.bind_addr().to_owned();

    actix_web::rt::System::new().block_on(async move {
        let server = HttpServer::new(move || {
            let mut app = App::new()
                .wrap(Trace)
                .app_data(server_health_state.clone())
                .app_data(bridge.clone())
                .app_data(outbound.clone())
                .service(live)
                .service(ready);
            if let Some(pool) = &pool {
                app = app.app_data(pool.clone());
            }
            app
        })
        .bind(bind_addr.as_str())
        .wrap_err_with(|| format!("failed to bind {bind_addr}"))?;

        health_state.mark_serving();
        info!(%bind_addr, "serving");
        server.run().await.wrap_err("server terminated")
    })
}
