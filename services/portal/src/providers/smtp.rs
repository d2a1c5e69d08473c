//! Per-user SMTP sending
//!
//! Customers bring their own SMTP credentials; the password is stored sealed
//! and only decrypted at send time.

use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use voxway_core::{EncryptionKey, Result, VoxwayError};

use crate::types::UserSmtpSettings;

#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub mime: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub attachments: Vec<EmailAttachment>,
}

/// Send an email through the user's own SMTP server.
pub async fn send_user_email(
    settings: &UserSmtpSettings,
    key: &EncryptionKey,
    email: &OutgoingEmail,
) -> Result<()> {
    let password = settings.password.open_string(key)?;
    let creds = Credentials::new(settings.username.clone(), password);

    let transport = if settings.secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| VoxwayError::Provider(format!("SMTP relay setup: {}", e)))?
            .port(settings.port as u16)
            .credentials(creds)
            .build()
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
            .port(settings.port as u16)
            .credentials(creds)
            .build()
    };

    let from = settings
        .from_address
        .parse()
        .map_err(|_| VoxwayError::Validation(format!("Invalid from address: {}", settings.from_address)))?;
    let to = email
        .to
        .parse()
        .map_err(|_| VoxwayError::Validation(format!("Invalid recipient: {}", email.to)))?;

    let builder = Message::builder().from(from).to(to).subject(&email.subject);

    let message = if email.attachments.is_empty() {
        builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.body_text.clone())
            .map_err(|e| VoxwayError::Internal(format!("Message build: {}", e)))?
    } else {
        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body_text.clone()));
        for attachment in &email.attachments {
            let content_type = ContentType::parse(&attachment.mime)
                .unwrap_or_else(|_| ContentType::parse("application/octet-stream").expect("valid mime"));
            multipart = multipart.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            );
        }
        builder
            .multipart(multipart)
            .map_err(|e| VoxwayError::Internal(format!("Message build: {}", e)))?
    };

    transport
        .send(message)
        .await
        .map_err(|e| VoxwayError::Provider(format!("SMTP send failed: {}", e)))?;

    Ok(())
}
