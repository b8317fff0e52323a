use crate::errors::{AgentError, Result};
use crate::escpos::{self, ESCPOSBuilder};
use crate::queue::PrintJob;
use crate::transport::DeviceAccess;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Something that can run a dequeued print job to completion.
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &PrintJob) -> Result<()>;
}

/// Drives a raster job through the ESC/POS print sequence on the device.
pub struct PrintJobExecutor {
    device: Arc<DeviceAccess>,
}

impl PrintJobExecutor {
    pub fn new(device: Arc<DeviceAccess>) -> Self {
        Self { device }
    }
}

impl JobExecutor for PrintJobExecutor {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, target = %job.target))]
    fn execute(&self, job: &PrintJob) -> Result<()> {
        let started = Instant::now();
        let raster = raster_command(job)?;

        let mut session = self.device.open(&job.target)?;

        let mut init = ESCPOSBuilder::new();
        init.initialize();
        session.write_command(&init.build())?;

        session.write_command(&raster)?;

        let mut feed = ESCPOSBuilder::new();
        feed.feed(1);
        session.write_command(&feed.build())?;

        let mut cut = ESCPOSBuilder::new();
        cut.cut(false);
        session.write_command(&cut.build())?;

        if job.cash_drawer {
            let mut drawer = ESCPOSBuilder::new();
            drawer.open_drawer();
            session.write_command(&drawer.build())?;
            debug!("Cash drawer kick sent");
        }

        drop(session);
        info!("Print job completed in {}ms", started.elapsed().as_millis());
        Ok(())
    }
}

/// Check raster dimensions against what `GS v 0` can encode; returns
/// `(bytes_per_row, height)`.
pub fn raster_geometry(width: u32, height: u32) -> Result<(u16, u16)> {
    if width == 0 || height == 0 {
        return Err(AgentError::InvalidPayload(format!(
            "raster size must be non-zero, got {}x{}",
            width, height
        )));
    }

    let bytes_per_row = u16::try_from(escpos::bytes_per_row(width)).map_err(|_| {
        AgentError::InvalidPayload(format!("width {} exceeds raster row limit", width))
    })?;
    let height = u16::try_from(height).map_err(|_| {
        AgentError::InvalidPayload(format!("height {} exceeds raster limit", height))
    })?;
    Ok((bytes_per_row, height))
}

/// Decode the job payload and frame it as a `GS v 0` raster command.
pub fn raster_command(job: &PrintJob) -> Result<Vec<u8>> {
    let bitmap = BASE64
        .decode(job.raster_base64.trim())
        .map_err(|e| AgentError::InvalidPayload(format!("raster_base64 is not valid base64: {}", e)))?;

    let (bytes_per_row, height) = raster_geometry(job.width, job.height)?;

    let expected = usize::from(bytes_per_row) * usize::from(height);
    if bitmap.len() != expected {
        warn!(
            "Raster payload is {} bytes, expected {} for {}x{}; printing anyway",
            bitmap.len(),
            expected,
            job.width,
            job.height
        );
    }

    let mut builder = ESCPOSBuilder::new();
    builder.raster_bitmap(bytes_per_row, height, &bitmap);
    Ok(builder.build())
}
