// src/io/serial/port.rs
//
// ByteSource backed by a real serial port.

use serialport::SerialPort;
use std::io::Read;
use std::time::Duration;

use super::utils::SerialProfile;
use crate::error::BridgeError;
use crate::io::ByteSource;

/// Short read timeout; the reader only calls read() when bytes are waiting.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

pub struct SerialByteSource {
    profile: SerialProfile,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialByteSource {
    pub fn new(profile: SerialProfile) -> Self {
        SerialByteSource {
            profile,
            port: None,
        }
    }

    pub fn profile(&self) -> &SerialProfile {
        &self.profile
    }

    fn not_open(&self) -> BridgeError {
        BridgeError::read(&self.profile.port, "port is not open")
    }
}

impl ByteSource for SerialByteSource {
    fn name(&self) -> &str {
        &self.profile.port
    }

    fn open(&mut self) -> Result<(), BridgeError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.profile.port, self.profile.baud_rate)
            .data_bits(self.profile.sp_data_bits())
            .stop_bits(self.profile.sp_stop_bits())
            .parity(self.profile.sp_parity())
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| BridgeError::port_open(&self.profile.port, e.to_string()))?;

        tlog!("[serial] Opened {}", self.profile);
        self.port = Some(port);
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize, BridgeError> {
        let port = self.port.as_ref().ok_or_else(|| self.not_open())?;
        port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| BridgeError::read(&self.profile.port, e.to_string()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        let port = match self.port.as_mut() {
            Some(port) => port,
            None => return Err(BridgeError::read(&self.profile.port, "port is not open")),
        };
        match port.read(buf) {
            Ok(n) => Ok(n),
            // Timeout is expected for serial reads
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(BridgeError::read(&self.profile.port, e.to_string())),
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tlog!("[serial] Closed {}", self.profile.port);
        }
    }
}

/// Names of the serial ports the OS currently reports.
///
/// On macOS, /dev/tty.* devices are skipped in favour of /dev/cu.*; the tty
/// variants block on open waiting for carrier detect.
pub fn available_port_names() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| p.port_name)
            .filter(|_name| {
                #[cfg(target_os = "macos")]
                {
                    !_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .collect(),
        Err(e) => {
            tlog!("[serial] Failed to enumerate ports: {}", e);
            Vec::new()
        }
    }
}
