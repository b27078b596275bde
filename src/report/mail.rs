//! Mail relay over the backend's `/api/send-report` endpoint.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use super::traits::{EmailReport, MailRelay};
use crate::client::{check_status, ApiClient};
use crate::traits::ServiceError;

pub struct HttpMailRelay {
    api: ApiClient,
}

impl HttpMailRelay {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MailRelay for HttpMailRelay {
    /// Multipart `{file, to?, subject, body}`. Without `to` the server sends
    /// to its configured default recipient.
    async fn send(&self, email: &EmailReport) -> Result<(), ServiceError> {
        let file = Part::bytes(email.attachment.bytes.clone())
            .file_name(email.attachment.filename.clone())
            .mime_str(email.attachment.mime)?;

        let mut form = Form::new().part("file", file);
        if let Some(to) = &email.to {
            form = form.text("to", to.clone());
        }
        let form = form
            .text("subject", email.subject.clone())
            .text("body", email.body.clone());

        let response = self
            .api
            .http()
            .post(self.api.url("/api/send-report"))
            .multipart(form)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
