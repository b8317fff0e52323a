use crate::status::StatusClass;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Printer not found: {0}")]
    NotFound(String),

    #[error("Could not find printer endpoints: {0}")]
    EndpointsNotFound(String),

    #[error("Printer did not answer: {0}")]
    Timeout(String),

    #[error("Device I/O failed: {0}")]
    Io(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Status probe aborted at {class}: {source}")]
    ProbeAborted {
        class: StatusClass,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Print queue is closed")]
    QueueClosed,

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Classify a libusb failure into the transport taxonomy.
    pub fn from_usb(context: &str, err: rusb::Error) -> Self {
        match err {
            rusb::Error::Timeout => AgentError::Timeout(format!("{}: {}", context, err)),
            rusb::Error::NotFound | rusb::Error::NoDevice => {
                AgentError::NotFound(format!("{}: {}", context, err))
            }
            _ => AgentError::Io(format!("{}: {}", context, err)),
        }
    }

    /// Classify a socket failure into the transport taxonomy.
    pub fn from_io(context: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                AgentError::Timeout(format!("{}: {}", context, err))
            }
            _ => AgentError::Io(format!("{}: {}", context, err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_timeout_is_distinct_from_io() {
        let err = AgentError::from_usb("read", rusb::Error::Timeout);
        assert!(matches!(err, AgentError::Timeout(_)));

        let err = AgentError::from_usb("read", rusb::Error::Pipe);
        assert!(matches!(err, AgentError::Io(_)));

        let err = AgentError::from_usb("open", rusb::Error::NoDevice);
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[test]
    fn test_socket_would_block_is_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::WouldBlock, "no data");
        assert!(matches!(AgentError::from_io("recv", io), AgentError::Timeout(_)));

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(AgentError::from_io("recv", io), AgentError::Io(_)));
    }

    #[test]
    fn test_probe_aborted_names_class() {
        let err = AgentError::ProbeAborted {
            class: StatusClass::ErrorStatus,
            source: Box::new(AgentError::Timeout("read: Operation timed out".to_string())),
        };
        let text = err.to_string();
        assert!(text.contains("Error Status"));
        assert!(text.contains("timed out"));
    }
}
