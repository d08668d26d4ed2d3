//! Notification transport.
//!
//! A thin seam over the local mail relay. The controller scrubs the
//! recipient list before it reaches a mailer; transports only turn
//! (recipients, subject, body) into a message. Tests use the recording
//! implementation.

use crate::config::MailConfig;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address {address}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("cannot build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("smtp submission failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

pub trait Mailer {
    fn send(&mut self, recipients: &[String], subject: &str, body: &str) -> Result<(), MailError>;
}

/// Plain-text submission to a local relay, no TLS, no authentication.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(mail: &MailConfig) -> Result<Self, MailError> {
        let from: Mailbox = mail.from.parse().map_err(|source| MailError::Address {
            address: mail.from.clone(),
            source,
        })?;
        let transport = SmtpTransport::builder_dangerous(&mail.relay)
            .port(mail.port)
            .build();
        Ok(Self { transport, from })
    }
}

impl Mailer for SmtpMailer {
    fn send(&mut self, recipients: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for recipient in recipients {
            let mailbox: Mailbox =
                recipient.parse().map_err(|source| MailError::Address {
                    address: recipient.clone(),
                    source,
                })?;
            builder = builder.to(mailbox);
        }
        let message = builder.body(body.to_string())?;
        self.transport.send(&message)?;
        debug!(recipients = %recipients.join(","), "sent notification");
        Ok(())
    }
}

/// Test mailer that records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    pub sent: Vec<SentMail>,
}

#[derive(Debug, Clone)]
pub struct SentMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Mailer for RecordingMailer {
    fn send(&mut self, recipients: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        self.sent.push(SentMail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}
