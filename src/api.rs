use crate::config::AppConfig;
use crate::discovery::{self, UsbPrinterInfo};
use crate::errors::{AgentError, Result};
use crate::executor;
use crate::prober::StatusProber;
use crate::queue::{JobQueue, PrintJob, WorkerStats};
use crate::status::StatusClass;
use crate::transport::DeviceTarget;
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared context handed to every handler
#[derive(Clone)]
pub struct ApiState {
    pub queue: JobQueue,
    pub prober: Arc<StatusProber>,
    /// `None` when the USB backend could not be initialized
    pub usb_context: Option<rusb::Context>,
    pub start_time: Instant,
}

/// Envelope status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Warning,
    Error,
    Queued,
}

/// `{status, message}` envelope used by every JSON endpoint
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: ResponseStatus,
    pub message: T,
}

/// Status check message: plain text, or problems per status class
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum StatusMessage {
    Text(String),
    Problems(BTreeMap<StatusClass, Vec<String>>),
}

/// Identifies the printer: USB ids, or `address` for a raw TCP printer.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TargetRequest {
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub address: Option<String>,
}

impl TargetRequest {
    pub fn resolve(&self) -> Result<DeviceTarget> {
        match (&self.address, &self.vendor_id, &self.product_id) {
            (Some(address), _, _) => DeviceTarget::network(address),
            (None, Some(vendor_id), Some(product_id)) => {
                DeviceTarget::usb_from_hex(vendor_id, product_id)
            }
            _ => Err(AgentError::InvalidFormat(
                "vendor_id and product_id (or address) are required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusCheckRequest {
    #[serde(flatten)]
    pub target: TargetRequest,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PrintRequest {
    pub raster_base64: String,
    pub width: u32,
    pub height: u32,
    #[serde(flatten)]
    pub target: TargetRequest,
    #[serde(default)]
    pub cash_drawer: bool,
}

#[derive(Debug, Serialize)]
pub struct PrintResponse {
    pub status: ResponseStatus,
    pub message: String,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub status: ResponseStatus,
    pub message: String,
    pub version: String,
    pub uptime_secs: u64,
    pub jobs: WorkerStats,
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = match &self {
            AgentError::InvalidFormat(_) | AgentError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            AgentError::NotFound(_) => StatusCode::NOT_FOUND,
            AgentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AgentError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(Envelope {
            status: ResponseStatus::Error,
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AgentError::InvalidFormat(rejection.body_text()))
}

/// POST /printer/status-usb - Synchronous four-class status probe
async fn handle_status(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<StatusCheckRequest>, JsonRejection>,
) -> Result<Json<Envelope<StatusMessage>>> {
    let request = json_body(payload)?;
    let target = request.target.resolve()?;
    debug!("Status check requested for {}", target);

    // Device I/O is blocking; the task finishes (and closes the device) even
    // if the client goes away.
    let prober = state.prober.clone();
    let outcome = tokio::task::spawn_blocking(move || prober.probe(&target))
        .await
        .map_err(|e| AgentError::Other(anyhow::anyhow!("Status probe task failed: {}", e)))?;

    let envelope = match outcome {
        Ok(report) if report.is_ready() => Envelope {
            status: ResponseStatus::Success,
            message: StatusMessage::Text("Printer is ready to use !".to_string()),
        },
        Ok(report) => Envelope {
            status: ResponseStatus::Warning,
            message: StatusMessage::Problems(report.problems()),
        },
        Err(e) => {
            warn!("Status check failed: {}", e);
            Envelope {
                status: ResponseStatus::Error,
                message: StatusMessage::Text(e.to_string()),
            }
        }
    };
    Ok(Json(envelope))
}

/// POST /pos/print/ - Queue a raster job, answer before it prints
async fn handle_print(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<PrintRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PrintResponse>)> {
    let request = json_body(payload)?;
    let target = request.target.resolve()?;

    if BASE64.decode(request.raster_base64.trim()).is_err() {
        return Err(AgentError::InvalidFormat(
            "raster_base64 is not valid base64".to_string(),
        ));
    }
    executor::raster_geometry(request.width, request.height)?;

    let job = PrintJob::new(
        request.raster_base64,
        request.width,
        request.height,
        target,
        request.cash_drawer,
    );
    let job_id = state.queue.submit(job)?;
    info!("Print job {} queued via HTTP", job_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(PrintResponse {
            status: ResponseStatus::Queued,
            message: "Print job queued.".to_string(),
            job_id: job_id.to_string(),
        }),
    ))
}

async fn list_devices(state: &ApiState, only_candidates: bool) -> Result<Vec<UsbPrinterInfo>> {
    let context = state
        .usb_context
        .clone()
        .ok_or_else(|| AgentError::Io("USB backend is not available".to_string()))?;
    tokio::task::spawn_blocking(move || discovery::list_usb_printers(&context, only_candidates))
        .await
        .map_err(|e| AgentError::Other(anyhow::anyhow!("USB listing task failed: {}", e)))?
}

/// GET /printer-list - Candidate ESC/POS printers
async fn handle_printer_list(
    State(state): State<ApiState>,
) -> Result<Json<Envelope<Vec<UsbPrinterInfo>>>> {
    let printers = list_devices(&state, true).await?;
    Ok(Json(Envelope {
        status: ResponseStatus::Success,
        message: printers,
    }))
}

/// GET / - Human-readable device page
async fn handle_root(State(state): State<ApiState>) -> Result<Html<String>> {
    let devices = list_devices(&state, false).await?;
    Ok(Html(render_device_page(&devices)))
}

/// GET /test - Liveness
async fn handle_test(State(state): State<ApiState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        status: ResponseStatus::Success,
        message: "Local Print Agent is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        jobs: state.queue.stats(),
    })
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn render_device_page(devices: &[UsbPrinterInfo]) -> String {
    let rows: String = devices
        .iter()
        .map(|d| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(&d.vendor_id),
                escape_html(&d.product_id),
                escape_html(&d.manufacturer),
                escape_html(&d.product),
                escape_html(&d.vendor_name),
            )
        })
        .collect();

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Local Print Agent</title></head>\n\
         <body><h1>Local Print Agent</h1><p>{} USB device(s) attached</p>\n\
         <table border=\"1\"><tr><th>Vendor ID</th><th>Product ID</th><th>Manufacturer</th><th>Product</th><th>Vendor</th></tr>\n\
         {}</table></body></html>\n",
        devices.len(),
        rows
    )
}

/// Create HTTP API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/test", get(handle_test))
        .route("/printer-list", get(handle_printer_list))
        .route("/printer/status-usb", post(handle_status))
        .route("/pos/print/", post(handle_print))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// rustls needs one process-wide crypto backend when several are compiled in.
fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        debug!("rustls crypto provider already installed");
    }
}

/// Serve until `shutdown` resolves. HTTPS when the configured PEM files
/// exist, plain HTTP otherwise.
pub async fn start_api_server<F>(config: &AppConfig, state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config.listen_address().parse().map_err(|e| {
        AgentError::Config(format!("invalid listen address {}: {}", config.listen_address(), e))
    })?;
    let router = create_router(state);

    let handle = Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        info!("Shutting down HTTP server");
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    let served = if config.tls_files_present() {
        install_crypto_provider();
        let tls = RustlsConfig::from_pem_file(&config.tls_cert_path, &config.tls_key_path)
            .await
            .map_err(|e| AgentError::Config(format!("failed to load TLS certificate: {}", e)))?;
        info!("Starting HTTPS server on {}", addr);
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(router.into_make_service())
            .await
    } else {
        warn!(
            "TLS files {} / {} not found, serving plain HTTP",
            config.tls_cert_path.display(),
            config.tls_key_path.display()
        );
        info!("Starting HTTP server on {}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(router.into_make_service())
            .await
    };

    served.map_err(|e| {
        error!("HTTP server error: {}", e);
        AgentError::Io(format!("HTTP server on {}: {}", addr, e))
    })
}
