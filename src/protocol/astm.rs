// src/protocol/astm.rs
//
// ASTM block parser for the AIA-360 result upload.
//
// A block runs from the `H|` header record to the `L|` terminator record:
//
//   H|\^&
//   P|1
//   O|1|<sample_id>||^^^<analyte_code>
//   R|1|^^^<analyte>|<value>|<unit>|<range>|<flag>|...|<completed_at>
//   R|2|^^^<analyte>|<rate>|...
//   L|1|N
//
// Records arrive already sanitized, one per call.

use super::{Capture, Dialect, Measurement};
use crate::error::BridgeError;

const HEADER_PREFIX: &str = "H|";
const TERMINATOR_PREFIX: &str = "L|";
const ORDER_PREFIX: &str = "O|";
const PRIMARY_RESULT_PREFIX: &str = "R|1|";
const RATE_RESULT_PREFIX: &str = "R|2|";

const FIELD_SEPARATOR: char = '|';
const COMPONENT_SEPARATOR: char = '^';

// Field positions (0-indexed, record type at 0)
const ORDER_SAMPLE_ID: usize = 2;
const ORDER_TEST_ID: usize = 4;
const TEST_ID_ANALYTE: usize = 3;
const RESULT_VALUE: usize = 3;
const RESULT_UNIT: usize = 4;
const RESULT_RANGE: usize = 5;
const RESULT_FLAG: usize = 6;
const RESULT_COMPLETED_AT: usize = 12;

/// A block longer than this never saw its terminator and is dropped
pub const MAX_BLOCK_RECORDS: usize = 256;

// ============================================================================
// Block State Machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Between blocks; everything but a header is ignored
    Idle,
    /// Header seen, buffering until the terminator
    Collecting,
}

/// Holds the BlockBuffer and drives extraction when a block completes.
pub struct AstmParser {
    state: BlockState,
    block: Vec<String>,
}

impl Default for AstmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AstmParser {
    pub fn new() -> Self {
        AstmParser {
            state: BlockState::Idle,
            block: Vec::new(),
        }
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn buffered_records(&self) -> usize {
        self.block.len()
    }

    /// Drop the block in progress and return to Idle.
    pub fn reset(&mut self) {
        self.block.clear();
        self.state = BlockState::Idle;
    }

    /// Feed one sanitized record.
    /// Returns an outcome only when the record terminates a block.
    pub fn push_record(&mut self, record: &str) -> Option<Result<Measurement, BridgeError>> {
        if record.is_empty() {
            return None;
        }

        // A header always starts a fresh block, even mid-block
        if record.starts_with(HEADER_PREFIX) {
            if self.state == BlockState::Collecting {
                tlog!(
                    "[astm] New header before terminator, discarding {} buffered records",
                    self.block.len()
                );
            }
            self.block.clear();
            self.block.push(record.to_string());
            self.state = BlockState::Collecting;
            return None;
        }

        match self.state {
            BlockState::Idle => None,
            BlockState::Collecting => {
                self.block.push(record.to_string());
                if !record.starts_with(TERMINATOR_PREFIX) {
                    if self.block.len() > MAX_BLOCK_RECORDS {
                        tlog!(
                            "[astm] Warning: {} records without a terminator, discarding block",
                            self.block.len()
                        );
                        self.reset();
                    }
                    return None;
                }
                let block = std::mem::take(&mut self.block);
                self.state = BlockState::Idle;
                Some(extract_block(block.as_slice()))
            }
        }
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// Values read from an `R|1|` record
#[derive(Debug, Clone, PartialEq)]
struct PrimaryResult {
    value: String,
    unit: Option<String>,
    bounds: Option<(f64, f64)>,
    flag: Option<String>,
    completed_at: Option<String>,
}

/// Scan a completed block. Later `O|`, `R|1|`, `R|2|` records overwrite
/// earlier ones; malformed records are skipped. An incomplete block is
/// returned as an error for the caller to log.
pub fn extract_block<S: AsRef<str>>(records: &[S]) -> Result<Measurement, BridgeError> {
    let mut capture = Capture::default();

    for record in records {
        let record: &str = record.as_ref();
        let outcome = if record.starts_with(ORDER_PREFIX) {
            parse_order_record(record).map(|(sample_id, analyte_code)| {
                capture.sample_id = Some(sample_id);
                if analyte_code.is_some() {
                    capture.analyte_code = analyte_code;
                }
            })
        } else if record.starts_with(PRIMARY_RESULT_PREFIX) {
            parse_primary_record(record).map(|primary| {
                capture.value = Some(primary.value);
                capture.unit = primary.unit;
                capture.bounds = primary.bounds;
                capture.flag = primary.flag;
                capture.timestamp = primary.completed_at;
            })
        } else if record.starts_with(RATE_RESULT_PREFIX) {
            result_value(record).map(|rate| capture.rate = Some(rate))
        } else {
            Ok(())
        };

        if let Err(e) = outcome {
            tlog!("[astm] Skipping record: {}", e);
        }
    }

    capture.finish(Dialect::Astm)
}

/// Returns the sample id and, when the test id has enough components, the analyte code.
fn parse_order_record(record: &str) -> Result<(String, Option<String>), BridgeError> {
    let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();
    if fields.len() <= ORDER_TEST_ID {
        return Err(BridgeError::malformed(
            record,
            format!("order record needs {} fields, has {}", ORDER_TEST_ID + 1, fields.len()),
        ));
    }

    let components: Vec<&str> = fields[ORDER_TEST_ID].split(COMPONENT_SEPARATOR).collect();
    let analyte_code = components.get(TEST_ID_ANALYTE).map(|c| c.to_string());
    if analyte_code.is_none() {
        tlog!(
            "[astm] Test id '{}' has no analyte component, keeping previous analyte",
            fields[ORDER_TEST_ID]
        );
    }

    Ok((fields[ORDER_SAMPLE_ID].to_string(), analyte_code))
}

fn result_value(record: &str) -> Result<String, BridgeError> {
    record
        .split(FIELD_SEPARATOR)
        .nth(RESULT_VALUE)
        .map(str::to_string)
        .ok_or_else(|| BridgeError::malformed(record, "result record has no value field"))
}

fn parse_primary_record(record: &str) -> Result<PrimaryResult, BridgeError> {
    let value = result_value(record)?;
    let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();
    let optional = |idx: usize| {
        fields
            .get(idx)
            .filter(|f| !f.is_empty())
            .map(|f| f.to_string())
    };

    Ok(PrimaryResult {
        value,
        unit: optional(RESULT_UNIT),
        bounds: fields.get(RESULT_RANGE).and_then(|r| parse_reference_range(r)),
        flag: optional(RESULT_FLAG),
        completed_at: optional(RESULT_COMPLETED_AT),
    })
}

/// Parse a `low-high` reference range such as `0.27-4.2`.
/// Anything else (open ranges, `<5`, text) yields `None`.
pub fn parse_reference_range(range: &str) -> Option<(f64, f64)> {
    let range = range.trim();
    // Skip the first byte so a leading minus on the low bound is not taken as the separator
    let split_at = range.char_indices().skip(1).find(|&(_, c)| c == '-')?.0;
    let low: f64 = range[..split_at].trim().parse().ok()?;
    let high: f64 = range[split_at + 1..].trim().parse().ok()?;
    if low <= high {
        Some((low, high))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut AstmParser, records: &[&str]) -> Vec<Result<Measurement, BridgeError>> {
        records
            .iter()
            .filter_map(|r| parser.push_record(r))
            .collect()
    }

    #[test]
    fn test_block_state_transitions() {
        let mut parser = AstmParser::new();
        assert_eq!(parser.state(), BlockState::Idle);

        assert!(parser.push_record("H|\\|^&").is_none());
        assert_eq!(parser.state(), BlockState::Collecting);

        assert!(parser.push_record("").is_none());
        assert_eq!(parser.buffered_records(), 1);

        assert!(parser.push_record("O|1|S1||^^^AFP").is_none());
        assert!(parser.push_record("R|1|^^^AFP|3.1").is_none());
        let outcome = parser.push_record("L|1|N").expect("terminator completes block");

        assert_eq!(outcome.unwrap().sample_id, "S1");
        assert_eq!(parser.state(), BlockState::Idle);
        assert_eq!(parser.buffered_records(), 0);
    }

    #[test]
    fn test_records_outside_block_are_ignored() {
        let mut parser = AstmParser::new();
        let outcomes = feed_all(
            &mut parser,
            &["O|1|S1||^^^AFP", "R|1|^^^AFP|3.1", "L|1|N", "P|1"],
        );

        assert!(outcomes.is_empty());
        assert_eq!(parser.state(), BlockState::Idle);
        assert_eq!(parser.buffered_records(), 0);
    }

    #[test]
    fn test_header_restarts_block() {
        let mut parser = AstmParser::new();
        let outcomes = feed_all(
            &mut parser,
            &[
                "H|\\|^&",
                "O|1|STALE||^^^AFP",
                "R|1|^^^AFP|9.9",
                "H|\\|^&",
                "O|1|FRESH||^^^CEA",
                "R|1|^^^CEA|1.0",
                "L|1|N",
            ],
        );

        assert_eq!(outcomes.len(), 1);
        let measurement = outcomes[0].as_ref().unwrap();
        assert_eq!(measurement.sample_id, "FRESH");
        assert_eq!(measurement.analyte_code, "CEA");
        assert_eq!(measurement.value, "1.0");
    }

    #[test]
    fn test_field_positions() {
        let measurement = extract_block(&[
            "H|\\|^&",
            "O|1|S12345|SER|A^B^C^GLU|R",
            "R|1|^^^GLU|5.6|mmol/L|3.9-6.1|N||F||||20240101100000",
            "L|1|N",
        ])
        .unwrap();

        assert_eq!(measurement.sample_id, "S12345");
        assert_eq!(measurement.analyte_code, "GLU");
        assert_eq!(measurement.value, "5.6");
        assert_eq!(measurement.unit.as_deref(), Some("mmol/L"));
        assert_eq!(measurement.bounds, Some((3.9, 6.1)));
        assert_eq!(measurement.flag.as_deref(), Some("N"));
        assert_eq!(measurement.timestamp.as_deref(), Some("20240101100000"));
        assert_eq!(measurement.rate, None);
    }

    #[test]
    fn test_last_capture_wins() {
        let measurement = extract_block(&[
            "H|\\|^&",
            "O|1|S1||^^^AFP",
            "R|1|^^^AFP|1.0",
            "R|2|^^^AFP|0.1",
            "O|2|S2||^^^CEA",
            "R|1|^^^CEA|2.0",
            "R|2|^^^CEA|0.2",
            "L|1|N",
        ])
        .unwrap();

        assert_eq!(measurement.sample_id, "S2");
        assert_eq!(measurement.analyte_code, "CEA");
        assert_eq!(measurement.value, "2.0");
        assert_eq!(measurement.rate.as_deref(), Some("0.2"));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let measurement = extract_block(&[
            "H|\\|^&",
            "O|1|S1||^^^AFP",
            "O|2|TRUNCATED",
            "R|1|^^^AFP|4.4",
            "R|2|",
            "L|1|N",
        ])
        .unwrap();

        assert_eq!(measurement.sample_id, "S1");
        assert_eq!(measurement.value, "4.4");
        assert_eq!(measurement.rate, None);
    }

    #[test]
    fn test_short_test_id_keeps_previous_analyte() {
        let measurement = extract_block(&[
            "H|\\|^&",
            "O|1|S1||^^^AFP",
            "O|1|S1B||^^",
            "R|1|^^^AFP|4.4",
            "L|1|N",
        ])
        .unwrap();

        assert_eq!(measurement.sample_id, "S1B");
        assert_eq!(measurement.analyte_code, "AFP");
    }

    #[test]
    fn test_missing_order_or_result_is_incomplete() {
        let no_order = extract_block(&["H|\\|^&", "R|1|^^^AFP|4.4", "L|1|N"]);
        assert!(matches!(no_order, Err(BridgeError::IncompleteMessage { .. })));

        let no_result = extract_block(&["H|\\|^&", "O|1|S1||^^^AFP", "R|2|^^^AFP|0.3", "L|1|N"]);
        assert!(matches!(no_result, Err(BridgeError::IncompleteMessage { .. })));

        let empty_value = extract_block(&["H|\\|^&", "O|1|S1||^^^AFP", "R|1|^^^AFP|", "L|1|N"]);
        assert!(matches!(empty_value, Err(BridgeError::IncompleteMessage { .. })));
    }

    #[test]
    fn test_empty_rate_is_absent() {
        let measurement = extract_block(&[
            "H|\\|^&",
            "O|1|S1||^^^AFP",
            "R|1|^^^AFP|4.4",
            "R|2|^^^AFP||",
            "L|1|N",
        ])
        .unwrap();

        assert_eq!(measurement.rate, None);
        assert_eq!(measurement.into_results().len(), 1);
    }

    #[test]
    fn test_parse_reference_range() {
        assert_eq!(parse_reference_range("0.27-4.2"), Some((0.27, 4.2)));
        assert_eq!(parse_reference_range(" 10 - 20 "), Some((10.0, 20.0)));
        assert_eq!(parse_reference_range("-5-5"), Some((-5.0, 5.0)));
        assert_eq!(parse_reference_range("<5"), None);
        assert_eq!(parse_reference_range("5-1"), None);
        assert_eq!(parse_reference_range(""), None);
        assert_eq!(parse_reference_range("normal"), None);
    }

    #[test]
    fn test_unterminated_block_is_capped() {
        let mut parser = AstmParser::new();
        assert!(parser.push_record("H|\\|^&").is_none());

        for _ in 0..MAX_BLOCK_RECORDS * 4 {
            assert!(parser.push_record("C|1|comment").is_none());
            assert!(parser.buffered_records() <= MAX_BLOCK_RECORDS);
        }

        // Back to Idle: a stray terminator yields nothing, a fresh block still decodes
        assert_eq!(parser.state(), BlockState::Idle);
        assert!(parser.push_record("L|1|N").is_none());
        let outcomes = feed_all(
            &mut parser,
            &["H|\\|^&", "O|1|S7||^^^AFP", "R|1|^^^AFP|2.2", "L|1|N"],
        );
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].as_ref().unwrap().sample_id, "S7");
    }
}
