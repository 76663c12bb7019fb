// src/io/reader.rs
//
// The bridge read loop: poll the byte source, decode, push, repeat.
//
// Runs on a blocking thread. Nothing in here is fatal; read errors, dropped
// messages and failed pushes are counted and logged, and the loop carries on
// until the stop flag is raised or the source reports closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::ByteSource;
use crate::lims::{LimsSink, RecordEmitter};
use crate::protocol::{Dialect, MessageDecoder};

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Debug)]
pub struct ReaderOptions {
    /// Sleep when nothing is waiting, after a zero-byte read and after a read error
    pub idle_sleep: Duration,
    pub read_buffer_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            idle_sleep: Duration::from_millis(100),
            read_buffer_size: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Stop flag raised
    Stopped,
    /// Byte source reported closed
    Disconnected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub bytes_read: u64,
    /// Messages that decoded into a measurement
    pub messages: u64,
    /// Messages dropped as incomplete
    pub rejected: u64,
    pub results_pushed: u64,
    pub push_failures: u64,
    pub read_errors: u64,
    /// Reads that returned nothing after readiness was reported
    pub empty_reads: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderSummary {
    pub reason: StopReason,
    pub stats: ReaderStats,
}

// ============================================================================
// Reader
// ============================================================================

/// Owns everything the loop touches: source, decoder buffers and emitter.
pub struct BridgeReader<S: ByteSource, K: LimsSink> {
    source: S,
    decoder: MessageDecoder,
    emitter: RecordEmitter<K>,
    options: ReaderOptions,
    stats: ReaderStats,
}

impl<S: ByteSource, K: LimsSink> BridgeReader<S, K> {
    pub fn new(source: S, dialect: Dialect, sink: K, options: ReaderOptions) -> Self {
        BridgeReader {
            source,
            decoder: MessageDecoder::new(dialect),
            emitter: RecordEmitter::new(dialect, sink),
            options,
            stats: ReaderStats::default(),
        }
    }

    pub fn sink(&self) -> &K {
        self.emitter.sink()
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Run until `stop_flag` is set or the source closes. The source is
    /// expected to be open already; it is closed on return.
    pub fn run(&mut self, stop_flag: &AtomicBool) -> ReaderSummary {
        let mut buf = vec![0u8; self.options.read_buffer_size.max(1)];

        tlog!(
            "[reader] Listening on {} ({})",
            self.source.name(),
            self.decoder.dialect()
        );

        let reason = loop {
            if stop_flag.load(Ordering::Relaxed) {
                break StopReason::Stopped;
            }
            if !self.source.is_open() {
                break StopReason::Disconnected;
            }

            let available = match self.source.bytes_available() {
                Ok(n) => n,
                Err(e) => {
                    self.stats.read_errors += 1;
                    tlog!("[reader] {}", e);
                    self.idle();
                    continue;
                }
            };
            if available == 0 {
                self.idle();
                continue;
            }

            let want = available.min(buf.len());
            match self.source.read(&mut buf[..want]) {
                Ok(0) => {
                    self.stats.empty_reads += 1;
                    tlog!(
                        "[reader] Warning: {} reported {} bytes waiting but read returned none",
                        self.source.name(),
                        available
                    );
                    self.idle();
                }
                Ok(n) => {
                    self.stats.bytes_read += n as u64;
                    self.dispatch(&buf[..n]);
                }
                Err(e) => {
                    self.stats.read_errors += 1;
                    tlog!("[reader] {}", e);
                    self.idle();
                }
            }
        };

        self.finish(reason)
    }

    fn idle(&self) {
        std::thread::sleep(self.options.idle_sleep);
    }

    fn dispatch(&mut self, chunk: &[u8]) {
        for outcome in self.decoder.feed(chunk) {
            let measurement = match outcome {
                Ok(measurement) => measurement,
                Err(e) => {
                    self.stats.rejected += 1;
                    tlog!("[reader] Warning: dropping message: {}", e);
                    continue;
                }
            };

            self.stats.messages += 1;
            for pushed in self.emitter.emit_measurement(measurement) {
                match pushed {
                    Ok(()) => self.stats.results_pushed += 1,
                    Err(_) => self.stats.push_failures += 1,
                }
            }
        }
    }

    fn finish(&mut self, reason: StopReason) -> ReaderSummary {
        let pending = self.decoder.discard_pending();
        if !pending.is_empty() {
            tlog!(
                "[reader] Discarding partial message ({} bytes, {} records)",
                pending.bytes,
                pending.records
            );
        }
        self.source.close();

        let summary = ReaderSummary {
            reason,
            stats: self.stats,
        };
        tlog!(
            "[reader] Stopped ({:?}): {} bytes, {} messages, {} rejected, {} pushed, {} push failures, {} read errors",
            summary.reason,
            summary.stats.bytes_read,
            summary.stats.messages,
            summary.stats.rejected,
            summary.stats.results_pushed,
            summary.stats.push_failures,
            summary.stats.read_errors
        );
        summary
    }
}
