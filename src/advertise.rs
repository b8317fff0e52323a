use crate::config::AppConfig;
use crate::errors::{AgentError, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use std::net::{IpAddr, Ipv4Addr};
use tracing::{info, warn};

const SERVICE_TYPE: &str = "_http._tcp.local.";

/// mDNS registration of the agent; unregistered by `stop`.
pub struct ServiceAdvertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

/// LAN address the agent is reachable on, loopback if none is found.
pub fn lan_ip() -> IpAddr {
    local_ip_address::local_ip().unwrap_or_else(|e| {
        warn!("Could not detect LAN address ({}), advertising loopback", e);
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    })
}

/// mDNS host names are fully qualified with a trailing dot.
fn host_name(domain: &str) -> String {
    if domain.ends_with('.') {
        domain.to_string()
    } else {
        format!("{}.", domain)
    }
}

impl ServiceAdvertisement {
    pub fn register(config: &AppConfig) -> Result<Self> {
        let ip = lan_ip();
        let daemon = ServiceDaemon::new()
            .map_err(|e| AgentError::Io(format!("Failed to create mDNS daemon: {}", e)))?;

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &config.service_name,
            &host_name(&config.service_domain),
            ip,
            config.port,
            &[("path", "/")][..],
        )
        .map_err(|e| AgentError::Config(format!("Invalid mDNS service info: {}", e)))?;
        let fullname = service.get_fullname().to_string();

        daemon
            .register(service)
            .map_err(|e| AgentError::Io(format!("Failed to register mDNS service: {}", e)))?;

        info!(
            "mDNS service published: {} -> {}:{} ({})",
            fullname, ip, config.port, config.service_domain
        );
        Ok(Self { daemon, fullname })
    }

    pub fn stop(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("Failed to unregister mDNS service: {}", e);
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!("Failed to stop mDNS daemon: {}", e);
        }
        info!("mDNS service unregistered");
    }
}
