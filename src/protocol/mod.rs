// src/protocol/mod.rs
//
// Analyzer output dialects and the decoding pipeline shared by both:
// reassembler -> sanitizer -> dialect parser -> Measurement.
//
// The decoder owns the AssemblyBuffer (inside the reassembler) and, for ASTM,
// the BlockBuffer (inside the parser). Nothing else mutates either.

pub mod astm;
pub mod keyvalue;
pub mod sanitize;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::BridgeError;
use crate::io::serial::FrameReassembler;

pub use sanitize::sanitize;

/// Suffix appended to the analyte code of the rate companion result
pub const RATE_SUFFIX: &str = "_RATE";

// ============================================================================
// Types
// ============================================================================

/// Output dialect spoken by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// Pipe-delimited records, `H|` header to `L|` terminator
    Astm,
    /// One comma-delimited `Key=,Value` blob ending with a `Date=` field
    #[serde(alias = "keyvalue")]
    KeyValue,
}

impl Default for Dialect {
    fn default() -> Self {
        Dialect::Astm
    }
}

impl Dialect {
    /// Wire baud rate the analyzer uses for this dialect (8-N-1 in both cases)
    pub fn default_baud_rate(self) -> u32 {
        match self {
            Dialect::Astm => 19200,
            Dialect::KeyValue => 9600,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Astm => f.write_str("ASTM"),
            Dialect::KeyValue => f.write_str("KeyValue"),
        }
    }
}

/// Everything a completed message yielded for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub sample_id: String,
    pub analyte_code: String,
    pub value: String,
    pub rate: Option<String>,
    pub unit: Option<String>,
    pub flag: Option<String>,
    pub timestamp: Option<String>,
    /// Reference range, when the analyzer reported one
    pub bounds: Option<(f64, f64)>,
}

impl Measurement {
    /// Expand into the results pushed to the LIMS: the primary first, then the
    /// `_RATE` companion when a rate was captured.
    pub fn into_results(self) -> Vec<ExtractedResult> {
        let mut results = Vec::with_capacity(2);
        let rate = self.rate.map(|rate| ExtractedResult {
            sample_id: self.sample_id.clone(),
            analyte_code: format!("{}{}", self.analyte_code, RATE_SUFFIX),
            value: rate,
            unit: None,
            flag: None,
            timestamp: self.timestamp.clone(),
            bounds: None,
        });
        results.push(ExtractedResult {
            sample_id: self.sample_id,
            analyte_code: self.analyte_code,
            value: self.value,
            unit: self.unit,
            flag: self.flag,
            timestamp: self.timestamp,
            bounds: self.bounds,
        });
        results.extend(rate);
        results
    }
}

/// One value bound for the LIMS.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedResult {
    pub sample_id: String,
    pub analyte_code: String,
    pub value: String,
    pub unit: Option<String>,
    pub flag: Option<String>,
    pub timestamp: Option<String>,
    pub bounds: Option<(f64, f64)>,
}

impl ExtractedResult {
    /// Sample id, analyte code and value are all non-empty
    pub fn is_complete(&self) -> bool {
        !self.sample_id.is_empty() && !self.analyte_code.is_empty() && !self.value.is_empty()
    }
}

/// Fields captured while scanning a message. Later captures overwrite earlier ones.
#[derive(Debug, Default, Clone)]
pub(crate) struct Capture {
    pub sample_id: Option<String>,
    pub analyte_code: Option<String>,
    pub value: Option<String>,
    pub rate: Option<String>,
    pub unit: Option<String>,
    pub flag: Option<String>,
    pub timestamp: Option<String>,
    pub bounds: Option<(f64, f64)>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Capture {
    /// Validate required fields and produce the Measurement.
    pub fn finish(self, dialect: Dialect) -> Result<Measurement, BridgeError> {
        let detail = format!(
            "Sample={:?}, Analyte={:?}, Value={:?}",
            self.sample_id, self.analyte_code, self.value
        );
        match (
            non_empty(self.sample_id),
            non_empty(self.analyte_code),
            non_empty(self.value),
        ) {
            (Some(sample_id), Some(analyte_code), Some(value)) => Ok(Measurement {
                sample_id,
                analyte_code,
                value,
                rate: non_empty(self.rate),
                unit: non_empty(self.unit),
                flag: non_empty(self.flag),
                timestamp: non_empty(self.timestamp),
                bounds: self.bounds,
            }),
            _ => Err(BridgeError::IncompleteMessage { dialect, detail }),
        }
    }
}

/// Per-message decode result: a Measurement, or the reason it was dropped
pub type MessageOutcome = Result<Measurement, BridgeError>;

/// Bytes and records held back waiting for the rest of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingState {
    pub bytes: usize,
    pub records: usize,
}

impl PendingState {
    pub fn is_empty(&self) -> bool {
        self.bytes == 0 && self.records == 0
    }
}

// ============================================================================
// Message Decoder
// ============================================================================

/// Stateful decoder turning raw serial chunks into per-message outcomes.
pub struct MessageDecoder {
    dialect: Dialect,
    reassembler: FrameReassembler,
    astm: astm::AstmParser,
}

impl MessageDecoder {
    pub fn new(dialect: Dialect) -> Self {
        MessageDecoder {
            dialect,
            reassembler: FrameReassembler::new(dialect),
            astm: astm::AstmParser::new(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Feed one chunk. Returns one outcome per message completed by this chunk,
    /// in stream order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<MessageOutcome> {
        let mut outcomes = Vec::new();

        for frame in self.reassembler.feed(chunk) {
            let text = sanitize(&frame);
            if text.is_empty() {
                continue;
            }

            match self.dialect {
                Dialect::Astm => {
                    tlog!("[astm] Received line: {}", text);
                    if let Some(outcome) = self.astm.push_record(&text) {
                        outcomes.push(outcome);
                    }
                }
                Dialect::KeyValue => {
                    tlog!("[keyvalue] Received frame: {}", text);
                    outcomes.push(keyvalue::parse_frame(&text));
                }
            }
        }

        outcomes
    }

    /// Feed one chunk and keep only the results, logging dropped messages.
    pub fn feed_chunk(&mut self, chunk: &[u8]) -> Vec<ExtractedResult> {
        self.feed(chunk)
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(measurement) => Some(measurement.into_results()),
                Err(e) => {
                    tlog!("[decoder] Dropping message: {}", e);
                    None
                }
            })
            .flatten()
            .collect()
    }

    /// What is buffered towards a message that has not completed yet
    pub fn pending(&self) -> PendingState {
        PendingState {
            bytes: self.reassembler.pending_len(),
            records: self.astm.buffered_records(),
        }
    }

    /// Drop any partially received message, returning what was discarded.
    pub fn discard_pending(&mut self) -> PendingState {
        let pending = self.pending();
        self.reassembler.take_pending();
        self.astm.reset();
        pending
    }
}
