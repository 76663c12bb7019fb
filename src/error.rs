// src/error.rs
//
// Error kinds for the bridge. `Config` and `PortOpen` can only come out of
// startup and end the process; everything else is logged by the reader and the
// stream carries on.

use thiserror::Error;

use crate::protocol::Dialect;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Settings file missing, unreadable or failing validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serial port could not be opened (busy, absent, bad profile)
    #[error("Failed to open {port}: {message}")]
    PortOpen { port: String, message: String },

    /// Transient I/O failure while the port is open
    #[error("Read error on {port}: {message}")]
    Read { port: String, message: String },

    /// A record inside an ASTM block with too few fields; the record is skipped
    #[error("Malformed record ({reason}): {record}")]
    MalformedRecord { record: String, reason: String },

    /// A completed message lacking sample id, analyte or value
    #[error("Incomplete {dialect} message: {detail}")]
    IncompleteMessage { dialect: Dialect, detail: String },

    /// LIMS rejected or never received a result
    #[error("LIMS push failed for {test_code} (sample {sample_id}): {message}")]
    Push {
        sample_id: String,
        test_code: String,
        message: String,
    },
}

impl BridgeError {
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config(message.into())
    }

    pub fn port_open(port: &str, message: impl Into<String>) -> Self {
        BridgeError::PortOpen {
            port: port.to_string(),
            message: message.into(),
        }
    }

    pub fn read(port: &str, message: impl Into<String>) -> Self {
        BridgeError::Read {
            port: port.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(record: &str, reason: impl Into<String>) -> Self {
        BridgeError::MalformedRecord {
            record: record.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_message_names_dialect() {
        let err = BridgeError::IncompleteMessage {
            dialect: Dialect::KeyValue,
            detail: "Sample=None".to_string(),
        };
        assert_eq!(err.to_string(), "Incomplete KeyValue message: Sample=None");
    }

    #[test]
    fn test_display_names_the_port() {
        let err = BridgeError::read("/dev/ttyS1", "device reports readiness but returned no data");
        assert_eq!(
            err.to_string(),
            "Read error on /dev/ttyS1: device reports readiness but returned no data"
        );
    }
}
