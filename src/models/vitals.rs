use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Vital-sign snapshot pushed by a patient during a consultation.
///
/// All fields are optional so partial readings from consumer devices
/// still go through. Unknown measurement keys are preserved verbatim
/// for the clinical sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalSigns {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_pressure: Option<BloodPressure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oxygen_saturation: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
}

/// Record persisted to the clinical data store for each accepted
/// vitals push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VitalsRecord {
    pub record_id: String,
    pub room_id: String,
    pub patient_id: String,
    pub vitals: VitalSigns,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
