//! Box Office HTTP server.
//!
//! Wires the `Redis` counter store, the `PostgreSQL` ledger, the HTTP job
//! transport and the mailer into the services and serves the router.

use anyhow::Context;
use boxoffice::app::{
    AdmissionService, PaymentDependencies, PaymentService, ReservationCoordinator,
    ReservationPolicy, RollbackHandler, TicketScanner,
};
use boxoffice::config::Config;
use boxoffice::mailer::{LoggingTicketMailer, SmtpTicketMailer};
use boxoffice::server::{AppState, BackendReadiness, build_router};
use boxoffice::signing::{HmacSignatureVerifier, HmacTicketSigner};
use boxoffice::transport::HttpJobScheduler;
use boxoffice_core::{
    Clock, CounterStore, JobScheduler, OrderLedger, SystemClock, TicketMailer, TicketRegistry,
    TicketSigner,
};
use boxoffice_postgres::{PostgresOrderLedger, PostgresTicketRegistry, run_migrations};
use boxoffice_redis::RedisCounterStore;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is normal outside development
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Box Office server");

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        redis_url = %config.redis.url,
        job_transport = %config.scheduler.base_url,
        callback_url = %config.scheduler.callback_url,
        hold_window_secs = config.reservations.hold_window_secs,
        tiers = config.tiers.iter().count(),
        smtp = config.smtp.is_some(),
        "Configuration loaded"
    );

    boxoffice::metrics::register_business_metrics();
    let metrics_addr: SocketAddr = format!(
        "{}:{}",
        config.server.metrics_host, config.server.metrics_port
    )
    .parse()
    .context("invalid metrics address")?;
    if let Err(e) = boxoffice::metrics::install_prometheus(metrics_addr) {
        warn!(error = %e, "Prometheus exporter not installed; metrics disabled");
    }

    info!("Connecting to order ledger database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("failed to connect to PostgreSQL")?;
    run_migrations(&pool).await?;
    let postgres_ledger = PostgresOrderLedger::new(pool.clone());
    info!("Order ledger connected");

    info!("Connecting to counter store...");
    let redis_counters = RedisCounterStore::new(&config.redis.url).await?;
    info!("Counter store connected");

    let counters: Arc<dyn CounterStore> = Arc::new(redis_counters.clone());
    let ledger: Arc<dyn OrderLedger> = Arc::new(postgres_ledger.clone());
    let registry: Arc<dyn TicketRegistry> = Arc::new(PostgresTicketRegistry::new(pool));
    let scheduler: Arc<dyn JobScheduler> = Arc::new(HttpJobScheduler::new(&config.scheduler)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let signer: Arc<dyn TicketSigner> =
        Arc::new(HmacTicketSigner::new(&config.signing.ticket_signing_key)?);
    let mailer: Arc<dyn TicketMailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpTicketMailer::new(smtp)),
        None => {
            warn!("SMTP not configured; ticket emails will only be logged");
            Arc::new(LoggingTicketMailer)
        }
    };

    let state = AppState {
        coordinator: ReservationCoordinator::new(
            counters.clone(),
            ledger.clone(),
            scheduler.clone(),
            clock.clone(),
            ReservationPolicy::from_config(&config.reservations),
        ),
        rollback: RollbackHandler::new(
            counters.clone(),
            ledger.clone(),
            Arc::new(HmacSignatureVerifier::new(&config.signing.job_signing_key)?),
            clock.clone(),
        ),
        payments: PaymentService::new(PaymentDependencies {
            ledger: ledger.clone(),
            counters: counters.clone(),
            registry: registry.clone(),
            signer: signer.clone(),
            mailer,
            scheduler,
            verifier: Arc::new(HmacSignatureVerifier::new(
                &config.signing.payment_signing_key,
            )?),
            clock: clock.clone(),
        }),
        scanner: TicketScanner::new(signer, registry, clock),
        admission: AdmissionService::new(counters, ledger, config.tiers.clone()),
        admin_token: Arc::from(config.admin_token.as_str()),
        readiness: Arc::new(BackendReadiness::new(postgres_ledger, redis_counters)),
    };

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
