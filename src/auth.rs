use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::client::{read_json, ApiClient};
use crate::traits::{AuthSession, CredentialStore, ServiceError, SignupRequest};

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

/// Client for the credential store's `/api/auth` endpoints.
pub struct AuthClient {
    api: ApiClient,
}

impl AuthClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl CredentialStore for AuthClient {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthSession, ServiceError> {
        if request.name.trim().is_empty() || request.password.is_empty() {
            return Err(ServiceError::InvalidInput(
                "name and password are required".to_string(),
            ));
        }
        if request.email.is_none() && request.phone.is_none() {
            return Err(ServiceError::InvalidInput(
                "an email address or phone number is required".to_string(),
            ));
        }

        let response = self
            .api
            .http()
            .post(self.api.url("/api/auth/signup"))
            .json(request)
            .send()
            .await?;
        let session: AuthSession = read_json(response).await?;
        info!(user_id = %session.user.id, "Account created");
        Ok(session)
    }

    async fn login(&self, identifier: &str, password: &str) -> Result<AuthSession, ServiceError> {
        let response = self
            .api
            .http()
            .post(self.api.url("/api/auth/login"))
            .json(&LoginRequest {
                identifier: identifier.trim(),
                password,
            })
            .send()
            .await?;
        let session: AuthSession = read_json(response).await?;
        info!(user_id = %session.user.id, "Signed in");
        Ok(session)
    }
}
