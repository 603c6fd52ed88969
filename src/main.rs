use std::{net::SocketAddr, sync::Arc};

use tokio::signal;
use tracing::{error, info};

use storefront_api as api;
use api::db::DbConfig;
use api::services::factory::{ServiceContainer, ServiceFactory};
use api::services::scheduler::{self, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);
    api::handlers::health::init_start_time();

    let db_pool = api::db::establish_connection(&DbConfig::from(&cfg)).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Missing credentials do not stop start-up; the adapter reports a
    // configuration error when it is first used.
    let pos: Arc<dyn api::pos::PosClient> = Arc::new(api::pos::LoyverseClient::from_config(&cfg));
    let gateways = api::gateways::GatewayRegistry::from_config(&cfg);
    let shipment = api::services::shipping::booker_from_config(&cfg);

    let factory = ServiceFactory::new(db_arc.clone(), pos, gateways, shipment, &cfg);
    let services = ServiceContainer::new(&factory);

    let jobs = scheduler::spawn(
        SchedulerConfig::from(&cfg),
        factory.inventory_sync_service(),
        factory.cleanup_service(),
    );

    let app_state = api::AppState {
        db: db_arc,
        config: Arc::new(cfg.clone()),
        services,
    };
    let app = api::build_router(app_state);

    let ip: std::net::IpAddr = cfg.host.parse()?;
    let addr = SocketAddr::new(ip, cfg.port);
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    jobs.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
