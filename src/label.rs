use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, instrument};

use crate::client::{read_json, ApiClient};
use crate::model::LabelFields;
use crate::traits::{LabelReader, ServiceError};

#[derive(Serialize)]
struct ReadLabelRequest<'a> {
    image: &'a str,
}

/// Client for the backend's `/api/vision/read-label` endpoint, used to
/// pre-fill the registration form from a photo of the product label.
pub struct LabelClient {
    api: ApiClient,
}

impl LabelClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl LabelReader for LabelClient {
    #[instrument(skip_all)]
    async fn read_label(&self, image_data_uri: &str) -> Result<LabelFields, ServiceError> {
        if !image_data_uri.starts_with("data:") {
            return Err(ServiceError::InvalidInput(
                "image must be a data URI".to_string(),
            ));
        }

        let response = self
            .api
            .http()
            .post(self.api.url("/api/vision/read-label"))
            .json(&ReadLabelRequest {
                image: image_data_uri,
            })
            .send()
            .await?;
        let fields: LabelFields = read_json(response).await?;

        info!(
            manufacturer = fields.manufacturer.is_some(),
            batch = fields.batch_number.is_some(),
            "Label read"
        );
        Ok(fields)
    }
}
