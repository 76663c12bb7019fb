// src/io/mod.rs
//
// Byte sources and the read loop that drives them.

pub mod reader;
pub mod serial;

use crate::error::BridgeError;

pub use reader::{BridgeReader, ReaderOptions, ReaderStats, ReaderSummary, StopReason};

/// A stream of raw analyzer bytes.
///
/// `read` is only called after `bytes_available` reported data, but may still
/// return 0 (the driver reported readiness and then delivered nothing).
pub trait ByteSource {
    /// Port name or other label for log lines
    fn name(&self) -> &str;
    fn open(&mut self) -> Result<(), BridgeError>;
    fn bytes_available(&mut self) -> Result<usize, BridgeError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError>;
    fn is_open(&self) -> bool;
    fn close(&mut self);
}
