use crate::errors::{AgentError, Result};
use crate::status::{StatusClass, StatusReport};
use crate::transport::{DeviceAccess, DeviceSession, DeviceTarget};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs the four DLE EOT queries against one printer.
pub struct StatusProber {
    device: Arc<DeviceAccess>,
}

impl StatusProber {
    pub fn new(device: Arc<DeviceAccess>) -> Self {
        Self { device }
    }

    /// Query every status class in order over a single session.
    ///
    /// Any failed exchange aborts the whole probe; the session is closed
    /// exactly once on every path.
    #[tracing::instrument(skip(self), fields(target = %target))]
    pub fn probe(&self, target: &DeviceTarget) -> Result<StatusReport> {
        let mut session = self.device.open(target)?;

        let mut responses = [0u8; 4];
        for (slot, class) in responses.iter_mut().zip(StatusClass::ALL) {
            *slot = query(&mut session, class).map_err(|e| {
                warn!("Status probe aborted at {}: {}", class, e);
                AgentError::ProbeAborted {
                    class,
                    source: Box::new(e),
                }
            })?;
        }
        drop(session);

        let [printer, offline, error, paper] = responses;
        let report = StatusReport::from_responses(printer, offline, error, paper);
        if report.is_ready() {
            info!("Printer {} is ready", target);
        } else {
            info!("Printer {} reports problems: {:?}", target, report.problems());
        }
        Ok(report)
    }
}

fn query(session: &mut DeviceSession<'_>, class: StatusClass) -> Result<u8> {
    session.write_command(&class.command())?;
    let response = session.read_packet()?;
    debug!("{} response: {:02x?}", class, response);
    response
        .first()
        .copied()
        .ok_or_else(|| AgentError::Io(format!("empty response to {}", class)))
}
