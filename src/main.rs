use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use cachet::{
    application::{
        error::AppError,
        repos::ContentRepo,
        selftest::{SelftestReport, run_selftest},
    },
    cache::{CacheConfig, CacheStore},
    config,
    infra::{
        content::MemoryContentRepo,
        error::InfraError,
        http::{self, HttpState},
        kv::{self, KvStore, StoreConfig},
        telemetry,
    },
    rate_limit::RateLimitConfig,
};
use tokio::{net::TcpListener, sync::oneshot};
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Selftest(args) => run_selftest_command(settings, args).await,
    }
}

fn open_store(settings: &config::Settings) -> Result<Arc<dyn KvStore>, AppError> {
    let store_config = StoreConfig::from(&settings.store);
    info!(
        target = "cachet::bootstrap",
        backend = store_config.backend.as_str(),
        url = %store_config.redacted_url(),
        "Opening shared store"
    );
    Ok(kv::open_store(store_config)?)
}

async fn load_content(settings: &config::Settings) -> Result<Arc<dyn ContentRepo>, AppError> {
    let repo = match settings.content.seed_file.as_deref() {
        Some(path) => MemoryContentRepo::from_seed_file(path).await?,
        None => MemoryContentRepo::new(),
    };
    Ok(Arc::new(repo))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    let repo = load_content(&settings).await?;
    let cache = CacheConfig::from(&settings.cache);
    let rate_limit = RateLimitConfig::from(&settings.rate_limit);

    info!(
        target = "cachet::bootstrap",
        cache_enabled = cache.enabled,
        default_ttl_secs = cache.default_ttl_secs,
        listing_ttl_secs = cache.listing_ttl_secs,
        rate_limit_window_secs = rate_limit.window_secs,
        rate_limit_max_requests = rate_limit.max_requests.get(),
        "Components configured"
    );

    let state = HttpState::new(store, repo, cache, rate_limit);
    serve_http(&settings, state).await
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "cachet::bootstrap",
        addr = %settings.server.addr,
        "Listening"
    );

    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        })
        .into_future();
    let mut server = std::pin::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        Ok(()) = signalled_rx => {
            drain(server, settings.server.graceful_shutdown).await
        }
    }
}

async fn drain<F>(server: F, grace: Duration) -> Result<(), AppError>
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    info!(
        target = "cachet::bootstrap",
        grace_secs = grace.as_secs(),
        "Shutdown requested; draining in-flight requests"
    );
    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        Err(_) => {
            warn!(
                target = "cachet::bootstrap",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping remaining connections"
            );
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "cachet::bootstrap", error = %err, "Failed to listen for Ctrl-C");
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
                error!(target = "cachet::bootstrap", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_selftest_command(
    settings: config::Settings,
    args: config::SelftestArgs,
) -> Result<(), AppError> {
    let store = open_store(&settings)?;
    let reply = store.ping().await?;
    info!(target = "cachet::selftest", reply = %reply, "Store reachable");

    // Probes must hit the store even when response caching is switched off.
    let cache_config = CacheConfig {
        enabled: true,
        ..CacheConfig::from(&settings.cache)
    };
    let cache = CacheStore::new(store, cache_config);
    let report = run_selftest(&cache, &args.probe_prefix).await;
    log_report(&report);

    if report.passed() {
        info!(target = "cachet::selftest", "Store self-test passed");
        Ok(())
    } else {
        let failed: Vec<_> = report.failed_steps().collect();
        Err(AppError::unexpected(format!(
            "store self-test failed: {}",
            failed.join(", ")
        )))
    }
}

fn log_report(report: &SelftestReport) {
    for step in &report.steps {
        if step.passed {
            info!(target = "cachet::selftest", step = step.name, "Probe passed");
        } else {
            warn!(target = "cachet::selftest", step = step.name, "Probe failed");
        }
    }
}
