// src/lims/mod.rs
//
// Result bundles handed to the LIMS and the sink interface that receives them.
//
// Serialized shape (camelCase, one result per bundle):
// {
//   "patientRecord": { "frameNumber": 0, "patientId": "S77", "patientName": "Unknown", ... },
//   "resultsRecords": [ { "testCode": "ALP1", "resultValue": "120", "minimumValue": 0.0, ... } ]
// }

pub mod emitter;
pub mod http;

use serde::Serialize;

use crate::error::BridgeError;
use crate::protocol::ExtractedResult;

pub use emitter::RecordEmitter;
pub use http::HttpLimsSink;

/// Bounds used when the analyzer reported no reference range
pub const DEFAULT_BOUNDS: (f64, f64) = (0.0, 9999.0);
pub const SPECIMEN_TYPE: &str = "Serum";
pub const UNKNOWN_PATIENT_NAME: &str = "Unknown";

// ============================================================================
// Bundle Types
// ============================================================================

/// The analyzer knows samples, not patients: the sample id stands in as the
/// patient identifier and everything else stays blank.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub frame_number: u32,
    pub patient_id: String,
    pub additional_id: String,
    pub patient_name: String,
    pub patient_sex: String,
    pub patient_birth_date: String,
    pub patient_address: String,
    pub patient_phone: String,
    pub attending_doctor: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub frame_number: u32,
    pub test_code: String,
    pub result_value: String,
    pub minimum_value: f64,
    pub maximum_value: f64,
    pub flag: String,
    pub specimen_type: String,
    pub result_units: String,
    pub result_date_time: String,
    pub sample_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub patient_record: PatientRecord,
    pub results_records: Vec<ResultRecord>,
}

impl ResultBundle {
    /// Wrap a single extracted result.
    pub fn for_result(result: &ExtractedResult) -> Self {
        let (minimum_value, maximum_value) = result.bounds.unwrap_or(DEFAULT_BOUNDS);

        ResultBundle {
            patient_record: PatientRecord {
                frame_number: 0,
                patient_id: result.sample_id.clone(),
                additional_id: String::new(),
                patient_name: UNKNOWN_PATIENT_NAME.to_string(),
                patient_sex: String::new(),
                patient_birth_date: String::new(),
                patient_address: String::new(),
                patient_phone: String::new(),
                attending_doctor: String::new(),
            },
            results_records: vec![ResultRecord {
                frame_number: 0,
                test_code: result.analyte_code.clone(),
                result_value: result.value.clone(),
                minimum_value,
                maximum_value,
                flag: result.flag.clone().unwrap_or_default(),
                specimen_type: SPECIMEN_TYPE.to_string(),
                result_units: result.unit.clone().unwrap_or_default(),
                result_date_time: result.timestamp.clone().unwrap_or_default(),
                sample_id: result.sample_id.clone(),
            }],
        }
    }

    pub fn sample_id(&self) -> &str {
        &self.patient_record.patient_id
    }

    /// Test code of the first result, for log lines and errors
    pub fn test_code(&self) -> &str {
        self.results_records
            .first()
            .map(|r| r.test_code.as_str())
            .unwrap_or("")
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Destination for result bundles. `push` blocks until the LIMS answered.
pub trait LimsSink {
    fn push(&mut self, bundle: &ResultBundle) -> Result<(), BridgeError>;
}

impl BridgeError {
    pub fn push(bundle: &ResultBundle, message: impl Into<String>) -> Self {
        BridgeError::Push {
            sample_id: bundle.sample_id().to_string(),
            test_code: bundle.test_code().to_string(),
            message: message.into(),
        }
    }
}
