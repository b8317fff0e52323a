use crate::config::AppConfig;
use crate::errors::{AgentError, Result};
use rusb::{Context, DeviceHandle, Direction, TransferType, UsbContext};
use serde::Serialize;
use std::fmt;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Printer interface (standard for receipt printers)
const PRINTER_INTERFACE: u8 = 0;

/// Read chunk size for raw TCP printers (no packet framing on a socket)
const NETWORK_READ_CHUNK: usize = 64;

/// Where a job or probe is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeviceTarget {
    Usb { vendor_id: u16, product_id: u16 },
    Network { address: String },
}

impl DeviceTarget {
    /// Build a USB target from hex ids such as `"0fe6"` or `"0x0FE6"`.
    pub fn usb_from_hex(vendor_id: &str, product_id: &str) -> Result<Self> {
        Ok(DeviceTarget::Usb {
            vendor_id: parse_hex_id("vendor_id", vendor_id)?,
            product_id: parse_hex_id("product_id", product_id)?,
        })
    }

    /// Build a raw TCP target from `host:port`.
    pub fn network(address: &str) -> Result<Self> {
        let address = address.trim();
        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            AgentError::InvalidFormat(format!("address must be host:port, got {:?}", address))
        })?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(AgentError::InvalidFormat(format!(
                "address must be host:port, got {:?}",
                address
            )));
        }
        Ok(DeviceTarget::Network {
            address: address.to_string(),
        })
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceTarget::Usb {
                vendor_id,
                product_id,
            } => write!(f, "usb {:04x}:{:04x}", vendor_id, product_id),
            DeviceTarget::Network { address } => write!(f, "tcp {}", address),
        }
    }
}

fn parse_hex_id(field: &str, value: &str) -> Result<u16> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(AgentError::InvalidFormat(format!("{} is empty", field)));
    }
    u16::from_str_radix(digits, 16).map_err(|_| {
        AgentError::InvalidFormat(format!("{} is not a 16-bit hex id: {:?}", field, value))
    })
}

/// Timeouts applied to every device exchange.
#[derive(Debug, Clone, Copy)]
pub struct TransportTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for TransportTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(3),
            read: Duration::from_secs(2),
            write: Duration::from_secs(5),
        }
    }
}

impl From<&AppConfig> for TransportTimeouts {
    fn from(config: &AppConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_timeout_ms),
            read: Duration::from_millis(config.read_timeout_ms),
            write: Duration::from_millis(config.write_timeout_ms),
        }
    }
}

/// An open, exclusively claimed command/response channel to one printer.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceConnection: Send {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read one response chunk of at most `max_len` bytes.
    fn read_response(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Natural response chunk size (USB wMaxPacketSize).
    fn max_packet_size(&self) -> usize;

    /// Release the device. Idempotent; failures are logged, never returned.
    fn close(&mut self);
}

/// Opens connections to printers.
pub trait DeviceTransport: Send + Sync {
    fn open(&self, target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>>;
}

/// Real transport: libusb for USB targets, blocking sockets for TCP targets.
pub struct SystemTransport {
    usb_context: Option<Context>,
    timeouts: TransportTimeouts,
}

impl SystemTransport {
    /// Without a working libusb the transport still serves TCP targets.
    pub fn new(timeouts: TransportTimeouts) -> Self {
        info!("Initializing USB context");
        let usb_context = match Context::new() {
            Ok(context) => Some(context),
            Err(e) => {
                warn!("Failed to initialize USB context, USB printers unavailable: {}", e);
                None
            }
        };
        Self {
            usb_context,
            timeouts,
        }
    }

    pub fn usb_context(&self) -> Option<&Context> {
        self.usb_context.as_ref()
    }
}

impl DeviceTransport for SystemTransport {
    fn open(&self, target: &DeviceTarget) -> Result<Box<dyn DeviceConnection>> {
        let connection: Box<dyn DeviceConnection> = match target {
            DeviceTarget::Usb {
                vendor_id,
                product_id,
            } => Box::new(UsbConnection::open(
                self.usb_context
                    .as_ref()
                    .ok_or_else(|| AgentError::Io("USB backend is not available".to_string()))?,
                *vendor_id,
                *product_id,
                self.timeouts,
            )?),
            DeviceTarget::Network { address } => {
                Box::new(TcpConnection::open(address, self.timeouts)?)
            }
        };
        Ok(connection)
    }
}

// =============================================================================
// USB
// =============================================================================

/// Endpoint facts needed to pick the command/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkEndpoints {
    pub out_address: u8,
    pub in_address: u8,
    pub in_max_packet_size: u16,
}

/// Pick the first bulk OUT and first bulk IN endpoint.
pub fn select_bulk_endpoints(endpoints: &[EndpointInfo]) -> Result<BulkEndpoints> {
    let bulk = |direction: Direction| {
        endpoints
            .iter()
            .find(|ep| ep.transfer_type == TransferType::Bulk && ep.direction == direction)
    };

    match (bulk(Direction::Out), bulk(Direction::In)) {
        (Some(out_ep), Some(in_ep)) => Ok(BulkEndpoints {
            out_address: out_ep.address,
            in_address: in_ep.address,
            in_max_packet_size: in_ep.max_packet_size,
        }),
        (out_ep, in_ep) => Err(AgentError::EndpointsNotFound(format!(
            "bulk OUT {}, bulk IN {}",
            if out_ep.is_some() { "present" } else { "missing" },
            if in_ep.is_some() { "present" } else { "missing" },
        ))),
    }
}

pub struct UsbConnection {
    handle: DeviceHandle<Context>,
    endpoints: BulkEndpoints,
    write_timeout: Duration,
    label: String,
    closed: bool,
}

impl UsbConnection {
    pub fn open(
        context: &Context,
        vendor_id: u16,
        product_id: u16,
        timeouts: TransportTimeouts,
    ) -> Result<Self> {
        let label = format!("{:04x}:{:04x}", vendor_id, product_id);

        let devices = context
            .devices()
            .map_err(|e| AgentError::from_usb("enumerate devices", e))?;
        let device = devices
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .map(|desc| desc.vendor_id() == vendor_id && desc.product_id() == product_id)
                    .unwrap_or(false)
            })
            .ok_or_else(|| AgentError::NotFound(format!("no USB device {}", label)))?;

        let mut handle = device.open().map_err(|e| {
            if e == rusb::Error::Access {
                warn!("USB access denied for {}. Check udev rules or driver assignment.", label);
            }
            AgentError::from_usb("open device", e)
        })?;

        // Some platforms bind no kernel driver to printer interfaces at all.
        match handle.kernel_driver_active(PRINTER_INTERFACE) {
            Ok(true) => {
                if let Err(e) = handle.detach_kernel_driver(PRINTER_INTERFACE) {
                    warn!("Failed to detach kernel driver from {}: {} (continuing)", label, e);
                } else {
                    debug!("Detached kernel driver from {}", label);
                }
            }
            Ok(false) => {}
            Err(e) => debug!("Kernel driver query unsupported for {}: {}", label, e),
        }

        if let Ok(0) = handle.active_configuration() {
            if let Err(e) = handle.set_active_configuration(1) {
                warn!("Failed to set configuration on {}: {} (continuing)", label, e);
            }
        }

        let config = device
            .active_config_descriptor()
            .map_err(|e| AgentError::from_usb("read config descriptor", e))?;
        let endpoints: Vec<EndpointInfo> = config
            .interfaces()
            .find(|interface| interface.number() == PRINTER_INTERFACE)
            .and_then(|interface| interface.descriptors().next())
            .map(|setting| {
                setting
                    .endpoint_descriptors()
                    .map(|ep| EndpointInfo {
                        address: ep.address(),
                        direction: ep.direction(),
                        transfer_type: ep.transfer_type(),
                        max_packet_size: ep.max_packet_size(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let endpoints = select_bulk_endpoints(&endpoints)?;

        handle.claim_interface(PRINTER_INTERFACE).map_err(|e| {
            if e == rusb::Error::Access || e == rusb::Error::Busy {
                warn!("Cannot claim USB interface on {}: {} (another process may hold it)", label, e);
            }
            AgentError::from_usb("claim interface", e)
        })?;

        info!(
            "Opened USB printer {} (OUT 0x{:02x}, IN 0x{:02x}, packet {})",
            label, endpoints.out_address, endpoints.in_address, endpoints.in_max_packet_size
        );

        Ok(Self {
            handle,
            endpoints,
            write_timeout: timeouts.write,
            label,
            closed: false,
        })
    }
}

impl DeviceConnection for UsbConnection {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < bytes.len() {
            let written = self
                .handle
                .write_bulk(self.endpoints.out_address, &bytes[offset..], self.write_timeout)
                .map_err(|e| AgentError::from_usb("bulk write", e))?;
            if written == 0 {
                return Err(AgentError::Io(format!("bulk write to {} made no progress", self.label)));
            }
            offset += written;
        }
        debug!("Wrote {} bytes to {}", bytes.len(), self.label);
        Ok(())
    }

    fn read_response(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; max_len];
        let read = self
            .handle
            .read_bulk(self.endpoints.in_address, &mut buffer, timeout)
            .map_err(|e| AgentError::from_usb("bulk read", e))?;
        buffer.truncate(read);
        debug!("Read {} bytes from {}", read, self.label);
        Ok(buffer)
    }

    fn max_packet_size(&self) -> usize {
        usize::from(self.endpoints.in_max_packet_size)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.handle.release_interface(PRINTER_INTERFACE) {
            warn!("[CLEANUP] Failed to release interface on {}: {}", self.label, e);
        }
        if let Err(e) = self.handle.reset() {
            warn!("[CLEANUP] Failed to reset {}: {}", self.label, e);
        }
        info!("USB resources released for {}", self.label);
    }
}

impl Drop for UsbConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Raw TCP (port 9100 style)
// =============================================================================

pub struct TcpConnection {
    stream: TcpStream,
    address: String,
    closed: bool,
}

impl TcpConnection {
    pub fn open(address: &str, timeouts: TransportTimeouts) -> Result<Self> {
        let addrs = address
            .to_socket_addrs()
            .map_err(|e| AgentError::NotFound(format!("cannot resolve {}: {}", address, e)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeouts.connect) {
                Ok(stream) => {
                    stream
                        .set_write_timeout(Some(timeouts.write))
                        .map_err(|e| AgentError::from_io("set write timeout", e))?;
                    stream.set_nodelay(true).ok();
                    info!("Connected to network printer {}", address);
                    return Ok(Self {
                        stream,
                        address: address.to_string(),
                        closed: false,
                    });
                }
                Err(e) => {
                    debug!("Connect to {} ({}) failed: {}", address, addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => AgentError::from_io(&format!("connect {}", address), e),
            None => AgentError::NotFound(format!("{} resolved to no addresses", address)),
        })
    }
}

impl DeviceConnection for TcpConnection {
    fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream
            .write_all(bytes)
            .and_then(|_| self.stream.flush())
            .map_err(|e| AgentError::from_io(&format!("send to {}", self.address), e))?;
        debug!("Sent {} bytes to {}", bytes.len(), self.address);
        Ok(())
    }

    fn read_response(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(|e| AgentError::from_io("set read timeout", e))?;
        let mut buffer = vec![0u8; max_len];
        let read = self
            .stream
            .read(&mut buffer)
            .map_err(|e| AgentError::from_io(&format!("receive from {}", self.address), e))?;
        if read == 0 && max_len > 0 {
            return Err(AgentError::Io(format!("{} closed the connection", self.address)));
        }
        buffer.truncate(read);
        Ok(buffer)
    }

    fn max_packet_size(&self) -> usize {
        NETWORK_READ_CHUNK
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("[CLEANUP] Socket shutdown for {}: {}", self.address, e);
        }
        info!("Network connection to {} closed", self.address);
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.close();
    }
}

// =============================================================================
// Exclusive access
// =============================================================================

/// Process-wide gate in front of the transport: at most one session is open
/// at a time, whether it belongs to a status probe or a print job.
pub struct DeviceAccess {
    transport: Arc<dyn DeviceTransport>,
    read_timeout: Duration,
    lock: Mutex<()>,
}

impl DeviceAccess {
    pub fn new(transport: Arc<dyn DeviceTransport>, read_timeout: Duration) -> Self {
        Self {
            transport,
            read_timeout,
            lock: Mutex::new(()),
        }
    }

    /// Block until the device is free, then open `target`.
    pub fn open(&self, target: &DeviceTarget) -> Result<DeviceSession<'_>> {
        // A panic inside a previous session leaves nothing to repair.
        let guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let connection = self.transport.open(target)?;
        Ok(DeviceSession {
            connection,
            read_timeout: self.read_timeout,
            _guard: guard,
        })
    }
}

/// Scoped handle: the connection is closed, and the device gate released,
/// when the session is dropped on any path.
pub struct DeviceSession<'a> {
    connection: Box<dyn DeviceConnection>,
    read_timeout: Duration,
    _guard: MutexGuard<'a, ()>,
}

impl DeviceSession<'_> {
    pub fn write_command(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection.write_command(bytes)
    }

    /// Read one packet-sized response chunk within the configured timeout.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let max_len = self.connection.max_packet_size().max(1);
        self.connection.read_response(max_len, self.read_timeout)
    }
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        self.connection.close();
    }
}
