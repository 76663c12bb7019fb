// src/protocol/keyvalue.rs
//
// Parser for the comma-delimited report dialect:
//
//   SampleID=,S77,Analyte=,ALP-1,Conc=,120,Unit=,U/L,Flag=,H,Rate=,0.4,Date=,2024-01-01 10:00
//
// Keys and values are separate tokens. Every adjacent token pair is inspected,
// not just even/odd pairs, so a stray comma between a key and its value only
// costs the pair it breaks.

use super::{Capture, Dialect, Measurement};
use crate::error::BridgeError;

pub const SAMPLE_KEY: &str = "SampleID=";
pub const ANALYTE_KEY: &str = "Analyte=";
pub const CONC_KEY: &str = "Conc=";
pub const RATE_KEY: &str = "Rate=";
pub const UNIT_KEY: &str = "Unit=";
pub const FLAG_KEY: &str = "Flag=";
/// Timestamp key, also the end-of-message sentinel
pub const DATE_KEY: &str = "Date=";

const TOKEN_SEPARATOR: char = ',';

/// Parse one sanitized frame. The last occurrence of each key wins.
/// Incomplete frames are returned as errors, not logged.
pub fn parse_frame(frame: &str) -> Result<Measurement, BridgeError> {
    let tokens: Vec<&str> = frame.split(TOKEN_SEPARATOR).collect();
    let mut capture = Capture::default();
    let mut sample_ids = 0usize;

    for pair in tokens.windows(2) {
        let value = pair[1].to_string();
        match pair[0] {
            SAMPLE_KEY => {
                sample_ids += 1;
                capture.sample_id = Some(value);
            }
            ANALYTE_KEY => capture.analyte_code = Some(alphanumeric(&value)),
            CONC_KEY => capture.value = Some(value),
            RATE_KEY => capture.rate = Some(value),
            UNIT_KEY => capture.unit = Some(value),
            FLAG_KEY => capture.flag = Some(value),
            DATE_KEY => capture.timestamp = Some(value),
            _ => {}
        }
    }

    // Two reports landed in one buffer before the sentinel check ran
    if sample_ids > 1 {
        tlog!(
            "[keyvalue] Frame holds {} SampleID fields, only the last report is kept",
            sample_ids
        );
    }

    capture.finish(Dialect::KeyValue)
}

fn alphanumeric(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}
