use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::client::{read_json, ApiClient};
use crate::model::Diagnosis;
use crate::traits::{DiagnosisService, ServiceError};

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Serialize)]
struct DiagnoseRequest<'a> {
    image: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct DiagnoseResponse {
    diagnosis: Option<Diagnosis>,
}

#[derive(Deserialize)]
struct MonitorResponse {
    monitoring: Option<Diagnosis>,
}

/// Client for the AI engine's `/api/scans/diagnose` and
/// `/api/scans/monitor` endpoints.
pub struct DiagnosisClient {
    api: ApiClient,
}

impl DiagnosisClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

impl DiagnosisClient {
    async fn analyze<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        image_data_uri: &str,
        language: &str,
    ) -> Result<T, ServiceError> {
        if !image_data_uri.starts_with("data:") {
            return Err(ServiceError::InvalidInput(
                "image must be a data URI".to_string(),
            ));
        }

        let response = self
            .api
            .http()
            .post(self.api.url(path))
            .json(&DiagnoseRequest {
                image: image_data_uri,
                language,
            })
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl DiagnosisService for DiagnosisClient {
    #[instrument(skip(self, image_data_uri))]
    async fn diagnose(&self, image_data_uri: &str, language: &str) -> Result<Diagnosis, ServiceError> {
        let start = std::time::Instant::now();
        let body: DiagnoseResponse = self
            .analyze("/api/scans/diagnose", image_data_uri, language)
            .await?;
        let diagnosis = body
            .diagnosis
            .ok_or_else(|| ServiceError::Decode("response has no diagnosis".to_string()))?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            scan_type = diagnosis.scan_type().as_str(),
            severity = %diagnosis.severity,
            "Diagnosis received"
        );
        Ok(diagnosis)
    }

    #[instrument(skip(self, image_data_uri))]
    async fn monitor(&self, image_data_uri: &str, language: &str) -> Result<Diagnosis, ServiceError> {
        let start = std::time::Instant::now();
        let body: MonitorResponse = self
            .analyze("/api/scans/monitor", image_data_uri, language)
            .await?;
        let monitoring = body
            .monitoring
            .ok_or_else(|| ServiceError::Decode("response has no monitoring result".to_string()))?;

        info!(
            duration_ms = start.elapsed().as_millis() as u64,
            pest = monitoring.pest_name.as_deref().unwrap_or("none"),
            count = ?monitoring.count,
            severity = %monitoring.severity,
            "Monitoring result received"
        );
        Ok(monitoring)
    }
}
