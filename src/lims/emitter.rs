// src/lims/emitter.rs
//
// Turns extracted results into bundles and pushes them, one bundle per result.
// Push failures are logged and returned; there is no retry.

use super::{LimsSink, ResultBundle};
use crate::error::BridgeError;
use crate::protocol::{Dialect, ExtractedResult, Measurement};

pub struct RecordEmitter<K: LimsSink> {
    dialect: Dialect,
    sink: K,
}

impl<K: LimsSink> RecordEmitter<K> {
    pub fn new(dialect: Dialect, sink: K) -> Self {
        RecordEmitter { dialect, sink }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_sink(self) -> K {
        self.sink
    }

    /// Push a single result synchronously.
    pub fn emit(&mut self, result: &ExtractedResult) -> Result<(), BridgeError> {
        if !result.is_complete() {
            return Err(BridgeError::IncompleteMessage {
                dialect: self.dialect,
                detail: format!("refusing to push {:?}", result),
            });
        }

        let bundle = ResultBundle::for_result(result);
        match self.sink.push(&bundle) {
            Ok(()) => {
                tlog!(
                    "[lims] Result pushed: {}={} for sample: {}",
                    result.analyte_code,
                    result.value,
                    result.sample_id
                );
                Ok(())
            }
            Err(e) => {
                tlog!("[lims] Error sending result for {}: {}", result.analyte_code, e);
                Err(e)
            }
        }
    }

    /// Push the primary result and then its rate companion, if any.
    /// A failed primary does not hold back the rate.
    pub fn emit_measurement(&mut self, measurement: Measurement) -> Vec<Result<(), BridgeError>> {
        measurement
            .into_results()
            .iter()
            .map(|result| self.emit(result))
            .collect()
    }
}
