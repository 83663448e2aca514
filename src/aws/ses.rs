// SES v2 notifier

use crate::backup::BackupResult;
use crate::notification::{EmailTemplates, Notifier, NotifyError, RunStatus};
use async_trait::async_trait;
use aws_sdk_sesv2::error::DisplayErrorContext;
use aws_sdk_sesv2::types::{Body, Content, Destination, EmailContent, Message};
use aws_sdk_sesv2::Client;
use tracing::{info, instrument};

const CHARSET: &str = "UTF-8";

/// Sends run notifications as HTML e-mail
pub struct SesNotifier {
    client: Client,
    sender: String,
    recipient: String,
    templates: EmailTemplates,
}

impl SesNotifier {
    /// Send from `sender` to `recipient` through `client`.
    pub fn new(client: Client, sender: &str, recipient: &str) -> Result<Self, NotifyError> {
        Ok(Self {
            client,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            templates: EmailTemplates::new()?,
        })
    }

    fn content(data: String) -> Result<Content, NotifyError> {
        Content::builder()
            .data(data)
            .charset(CHARSET)
            .build()
            .map_err(|e| NotifyError::Build(e.to_string()))
    }
}

#[async_trait]
impl Notifier for SesNotifier {
    #[instrument(skip(self, result), fields(db = %result.db_identifier))]
    async fn deliver(&self, result: &BackupResult, status: RunStatus) -> Result<(), NotifyError> {
        let email = self.templates.render(result, status)?;

        let message = Message::builder()
            .subject(Self::content(email.subject.clone())?)
            .body(Body::builder().html(Self::content(email.html_body)?).build())
            .build();

        self.client
            .send_email()
            .from_email_address(&self.sender)
            .destination(Destination::builder().to_addresses(&self.recipient).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(DisplayErrorContext(&e).to_string()))?;

        info!("Sent notification '{}' to {}", email.subject, self.recipient);
        Ok(())
    }
}
