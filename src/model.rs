use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Disease,
    Pest,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Disease => "disease",
            ScanType::Pest => "pest",
        }
    }
}

/// Severity grade reported by the diagnosis service.
///
/// Parsing is case-insensitive and anything unrecognised becomes `Invalid`,
/// so a malformed diagnosis never fails deserialization of a whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Healthy,
    Low,
    Medium,
    High,
    #[default]
    Invalid,
}

impl Severity {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "healthy" => Severity::Healthy,
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            _ => Severity::Invalid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Healthy => "healthy",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Invalid => "invalid",
        }
    }
}

impl From<String> for Severity {
    fn from(raw: String) -> Self {
        Severity::parse(&raw)
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnosis as returned by the AI service.
///
/// Disease payloads carry `diseaseName`/`pathogen`, pest payloads carry
/// `pestName`/`count`. Anything else the service sends is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disease_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathogen: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pest_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub treatments: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Diagnosis {
    pub fn scan_type(&self) -> ScanType {
        if self.pest_name.is_some() {
            ScanType::Pest
        } else {
            ScanType::Disease
        }
    }

    pub fn subject_name(&self) -> Option<&str> {
        match self.scan_type() {
            ScanType::Disease => self.disease_name.as_deref(),
            ScanType::Pest => self.pest_name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    // Assigned by the history service once persisted
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "scanType")]
    pub scan_type: ScanType,
    #[serde(rename = "name", default)]
    pub subject_name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub confidence: f64,
    #[serde(rename = "date", default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
    #[serde(rename = "image", default)]
    pub image_ref: String, // data URI or URL
    #[serde(rename = "resultData", default)]
    pub result_payload: Diagnosis,
}

impl ScanRecord {
    pub fn from_diagnosis(diagnosis: Diagnosis, image_ref: String) -> Self {
        Self {
            id: None,
            scan_type: diagnosis.scan_type(),
            subject_name: diagnosis.subject_name().unwrap_or("Unknown").to_string(),
            severity: diagnosis.severity,
            confidence: normalize_confidence(diagnosis.confidence.unwrap_or(0.0)),
            captured_at: Utc::now(),
            image_ref,
            result_payload: diagnosis,
        }
    }
}

/// Maps a raw confidence onto `[0, 1]`. Percent values (`1 < c <= 100`) are
/// scaled down first.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    let scaled = if raw > 1.0 && raw <= 100.0 {
        raw / 100.0
    } else {
        raw
    };
    scaled.clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub qr_code_id: String,
    pub product_name: String,
    pub manufacturer: String,
    pub batch_number: String,
    pub is_authentic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub product_name: String,
    pub manufacturer: String,
    #[serde(default)]
    pub batch_number: String,
}

pub const DEFAULT_BATCH: &str = "BATCH-001";

/// Text read off a product label. Either field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_number: Option<String>,
}

impl RegistrationForm {
    /// Trims every field, rejects a missing name or manufacturer and fills
    /// in [`DEFAULT_BATCH`] when no batch was given.
    /// Copies non-blank label values over the form; blank ones keep what was
    /// already typed.
    pub fn prefill(&mut self, label: &LabelFields) {
        let read = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(manufacturer) = read(&label.manufacturer) {
            self.manufacturer = manufacturer;
        }
        if let Some(batch_number) = read(&label.batch_number) {
            self.batch_number = batch_number;
        }
    }

    pub fn normalized(&self) -> Result<RegistrationForm, &'static str> {
        let product_name = self.product_name.trim();
        let manufacturer = self.manufacturer.trim();
        if product_name.is_empty() {
            return Err("Product name is required");
        }
        if manufacturer.is_empty() {
            return Err("Manufacturer is required");
        }
        let batch_number = match self.batch_number.trim() {
            "" => DEFAULT_BATCH,
            batch => batch,
        };
        Ok(RegistrationForm {
            product_name: product_name.to_string(),
            manufacturer: manufacturer.to_string(),
            batch_number: batch_number.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Farmer,
    Expert,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Role,
}
