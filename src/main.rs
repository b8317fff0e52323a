use anyhow::Context;
use escpos_print_agent::advertise::ServiceAdvertisement;
use escpos_print_agent::api::{self, ApiState};
use escpos_print_agent::config::AppConfig;
use escpos_print_agent::executor::PrintJobExecutor;
use escpos_print_agent::prober::StatusProber;
use escpos_print_agent::queue::PrintWorker;
use escpos_print_agent::sentry_init;
use escpos_print_agent::transport::{DeviceAccess, SystemTransport, TransportTimeouts};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize logging with structured output; returns the file writer guard
/// when a log directory is configured.
fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let stdout = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "print-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file_layer)
        .with(sentry_tracing::layer())
        .init();

    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("loading configuration")?;
    let _log_guard = init_logging(&config);

    info!("========================================");
    info!("Local Print Agent Starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    match &config.loaded_from {
        Some(path) => info!("Config loaded from {}", path.display()),
        None => info!(
            "No config file at {}, using defaults",
            AppConfig::config_path().display()
        ),
    }

    // Must be kept alive for the whole process
    let _sentry_guard = sentry_init::init();

    let transport = SystemTransport::new(TransportTimeouts::from(&config));
    let usb_context = transport.usb_context().cloned();
    let device = Arc::new(DeviceAccess::new(
        Arc::new(transport),
        TransportTimeouts::from(&config).read,
    ));

    let executor = Arc::new(PrintJobExecutor::new(device.clone()));
    let (queue, worker) = PrintWorker::start(executor).context("starting print worker")?;

    let state = ApiState {
        queue,
        prober: Arc::new(StatusProber::new(device)),
        usb_context,
        start_time: Instant::now(),
    };

    let advertisement = if config.mdns_enabled {
        match ServiceAdvertisement::register(&config) {
            Ok(advertisement) => Some(advertisement),
            Err(e) => {
                warn!("mDNS advertisement unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let served = api::start_api_server(&config, state, shutdown_signal()).await;

    if let Some(advertisement) = advertisement {
        advertisement.stop();
    }

    // Joins the worker; an in-flight job finishes first
    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .context("joining print worker")?;

    info!("Local Print Agent shut down");
    served.context("HTTP server failed")
}
