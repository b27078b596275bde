use crate::model::{CurrentUser, Diagnosis, LabelFields, ScanRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Service returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Failed to decode response: {0}")]
    Decode(String),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Local state unavailable: {0}")]
    State(String),
}

/// Per-user scan history kept by the backend.
///
/// Every mutating call returns the full updated list, newest first as the
/// server stores it.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, user_id: &str, record: &ScanRecord) -> Result<Vec<ScanRecord>, ServiceError>;

    async fn list(&self, user_id: &str) -> Result<Vec<ScanRecord>, ServiceError>;

    async fn delete(&self, user_id: &str, scan_id: &str) -> Result<Vec<ScanRecord>, ServiceError>;
}

#[async_trait]
pub trait DiagnosisService: Send + Sync {
    /// Sends a leaf image (data URI) and the language the answer should be
    /// written in; returns the structured diagnosis.
    async fn diagnose(&self, image_data_uri: &str, language: &str) -> Result<Diagnosis, ServiceError>;

    /// Field pest monitoring: pest name, count, severity and treatments for
    /// a trap or canopy photo.
    async fn monitor(&self, image_data_uri: &str, language: &str) -> Result<Diagnosis, ServiceError>;
}

#[async_trait]
pub trait LabelReader: Send + Sync {
    /// Reads manufacturer and batch text off a product label photo.
    async fn read_label(&self, image_data_uri: &str) -> Result<LabelFields, ServiceError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignupRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: CurrentUser,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthSession, ServiceError>;

    /// `identifier` is either an email address or a phone number.
    async fn login(&self, identifier: &str, password: &str) -> Result<AuthSession, ServiceError>;
}
