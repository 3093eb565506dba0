use std::{error::Error as _, iter, net::SocketAddr, process, sync::Arc, time::Duration};

use hemicycle::{
    application::error::AppError,
    cache::{CacheConfig, CacheService, RedisStore, RemoteStore},
    config,
    infra::{
        error::InfraError,
        http::{self, AppState, RateLimitPolicy, RateLimiter},
        telemetry,
    },
    realtime::{ConnectionRegistry, Notifier, RealtimeConfig},
};
use serde_json::json;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let causes: Vec<String> = iter::successors(error.source(), |&cause| cause.source())
        .map(ToString::to_string)
        .collect();

    if dispatcher::has_been_set() {
        error!(error = %error, ?causes, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, ?causes, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cache(args) => match args.command {
            config::CacheCommand::Clear(clear) => run_cache_clear(settings, &clear.namespace).await,
        },
    }
}

fn build_cache(settings: &config::Settings) -> Result<CacheService, AppError> {
    let cache_config = CacheConfig::from(settings);
    let remote = match settings.redis.url.as_deref() {
        Some(url) => {
            let store = RedisStore::open(url).map_err(InfraError::RemoteClient)?;
            Some(Arc::new(store) as Arc<dyn RemoteStore>)
        }
        None => None,
    };
    Ok(CacheService::new(cache_config, remote))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = Arc::new(build_cache(&settings)?);
    cache.connect().await;

    let registry = ConnectionRegistry::new(RealtimeConfig::from(&settings));
    let notifier = Notifier::new(registry.clone());

    let rate_limiter = settings
        .rate_limit
        .enabled
        .then(|| RateLimiter::new(RateLimitPolicy::from(&settings.rate_limit)));
    let prune_handle = rate_limiter.clone().map(spawn_rate_limit_pruning);

    let state = AppState {
        cache: Arc::clone(&cache),
        registry: registry.clone(),
        expose_debug_stats: settings.server.expose_debug_stats,
    };
    let router = http::build_router(state, rate_limiter);

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;
    info!(
        target: "hemicycle::serve",
        addr = %settings.server.addr,
        remote_cache = cache.is_remote_connected(),
        "listening"
    );

    let result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| AppError::from(InfraError::Serve(err)));

    let notified = notifier.system_status("shutting_down", json!({ "reason": "server stopping" }));
    debug!(target: "hemicycle::serve", notified, "shutdown notice sent");

    if let Some(handle) = prune_handle {
        handle.abort();
        let _ = handle.await;
    }

    let grace = settings.server.graceful_shutdown;
    if tokio::time::timeout(grace, async {
        registry.shutdown();
        cache.disconnect().await;
    })
    .await
    .is_err()
    {
        warn!(
            target: "hemicycle::serve",
            grace_secs = grace.as_secs(),
            "shutdown did not complete in time"
        );
    }

    info!(target: "hemicycle::serve", "server stopped");
    result
}

async fn run_cache_clear(settings: config::Settings, namespace: &str) -> Result<(), AppError> {
    if settings.redis.url.is_none() {
        return Err(InfraError::RemoteNotConfigured.into());
    }

    let cache = build_cache(&settings)?;
    if !cache.connect().await {
        return Err(InfraError::RemoteUnreachable.into());
    }

    let removed = cache.clear_namespace(namespace).await;
    cache.disconnect().await;

    info!(target: "hemicycle::cache", namespace, removed, "namespace cleared");
    Ok(())
}

fn spawn_rate_limit_pruning(limiter: RateLimiter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_PRUNE_INTERVAL);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            let pruned = limiter.prune();
            if pruned > 0 {
                debug!(target: "hemicycle::rate_limit", pruned, "rate limiter pruned");
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(target: "hemicycle::serve", "shutdown signal received");
}
