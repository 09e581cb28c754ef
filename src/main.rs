use std::{process, sync::Arc};

use cache_aside::{
    application::{cache_admin::CacheAdminService, error::AppError},
    cache::{CacheConfig, CacheState, CacheStore},
    config,
    domain::catalog::Catalog,
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings.cache);
    let store = Arc::new(CacheStore::connect(&cache_config).await);

    let result = match command {
        config::Command::Serve(_) => run_serve(&settings, cache_config, store.clone()).await,
        config::Command::Stats(_) => {
            let admin = CacheAdminService::new(store.clone());
            print_json(&admin.stats().await)
        }
        config::Command::Health(_) => {
            let admin = CacheAdminService::new(store.clone());
            let report = admin.health().await;
            print_json(&report)?;
            if report.is_healthy() {
                Ok(())
            } else {
                Err(AppError::Unhealthy)
            }
        }
        config::Command::Flush(_) => {
            let admin = CacheAdminService::new(store.clone());
            print_json(&admin.flush().await)
        }
        config::Command::Invalidate(args) => {
            let admin = CacheAdminService::new(store.clone());
            let deleted = admin.invalidate(&args.patterns).await?;
            print_json(&deleted)
        }
    };

    store.close();
    result
}

async fn run_serve(
    settings: &config::Settings,
    cache_config: CacheConfig,
    store: Arc<CacheStore>,
) -> Result<(), AppError> {
    let state = AppState::new(
        CacheState::new(cache_config, store),
        Arc::new(Catalog::seeded()),
    );
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(addr = %settings.server.addr, "Listening");

    let shutdown = Arc::new(Notify::new());
    let signal = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { signal.notified().await })
            .await
    });

    let outcome = tokio::select! {
        joined = &mut server => joined,
        _ = tokio::signal::ctrl_c() => {
            info!(
                grace_secs = settings.server.graceful_shutdown.as_secs(),
                "Shutdown requested; draining connections"
            );
            shutdown.notify_one();
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Graceful shutdown timed out; aborting open connections");
                    server.abort();
                    return Ok(());
                }
            }
        }
    };

    outcome
        .map_err(|err| AppError::unexpected(format!("server task failed: {err}")))?
        .map_err(|err| AppError::from(InfraError::from(err)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value).map_err(InfraError::from)?;
    println!("{text}");
    Ok(())
}
