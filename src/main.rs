use std::process;

use output_cache::{
    cache::{OutputCache, OutputCacheConfig},
    config,
    infra::{
        error::InfraError,
        http::{TeamsState, build_router},
        telemetry,
    },
};
use tokio::time;
use tracing::{Dispatch, Level, debug, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &InfraError) {
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

async fn run() -> Result<(), InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CheckConfig => {
            info!(
                addr = %settings.server.addr,
                cache_enabled = settings.cache.enabled,
                max_body_bytes = settings.cache.max_body_bytes,
                endpoints = settings
                    .cache
                    .endpoints
                    .values()
                    .map(|actions| actions.len())
                    .sum::<usize>(),
                "configuration is valid"
            );
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), InfraError> {
    let cache = OutputCache::new(OutputCacheConfig::from(&settings.cache));

    let purge_handle = cache.config().purge_interval().map(|period| {
        let store = cache.memory_store();
        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(cache = "output", removed, "purged expired entries");
                }
            }
        })
    });

    let router = build_router(&cache, TeamsState::new());
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::Bind)?;
    info!(addr = %settings.server.addr, "listening");

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(InfraError::Serve);

    if let Some(handle) = purge_handle {
        handle.abort();
    }
    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
