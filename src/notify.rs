//! Completion emails for successful imports.
//!
//! Mail goes out after the import has committed and never affects the HTTP
//! response: send failures are logged and dropped.

use crate::config::NotifyConfig;
use crate::import::ImportOutcome;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

pub const COMPLETION_SUBJECT: &str = "CSV Upload Successful";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("failed to send message: {0}")]
    Send(String),
}

/// Something told about each file that finished importing.
#[rocket::async_trait]
pub trait Notifier: Send + Sync {
    async fn upload_succeeded(&self, outcome: &ImportOutcome) -> Result<(), NotifyError>;
}

/// Sends one plain-text email per imported file over any lettre transport.
pub struct MailNotifier<T> {
    transport: T,
    from: Mailbox,
    to: Mailbox,
}

impl<T> MailNotifier<T> {
    pub fn new(transport: T, from: &str, to: &str) -> Result<Self, NotifyError> {
        Ok(Self {
            transport,
            from: parse_mailbox(from)?,
            to: parse_mailbox(to)?,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn completion_message(&self, outcome: &ImportOutcome) -> Result<Message, NotifyError> {
        let body = format!(
            "The file '{}' was uploaded and processed successfully.\n\n\
             {} rows were imported into table {}.\n",
            outcome.file_name, outcome.rows_imported, outcome.table_name
        );

        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(COMPLETION_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?)
    }
}

#[rocket::async_trait]
impl<T> Notifier for MailNotifier<T>
where
    T: AsyncTransport + Send + Sync,
    T::Ok: Send,
    T::Error: Display + Send,
{
    async fn upload_succeeded(&self, outcome: &ImportOutcome) -> Result<(), NotifyError> {
        let message = self.completion_message(outcome)?;
        self.transport
            .send(message)
            .await
            .map_err(|err| NotifyError::Send(err.to_string()))?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}

fn smtp_transport(
    config: &NotifyConfig,
    host: &str,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let builder = if config.smtp_tls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
    };
    let mut builder = builder.port(config.smtp_port);

    if let (Some(user), Some(password)) = (&config.smtp_user, &config.smtp_password) {
        builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
    }

    Ok(builder.build())
}

/// Managed handle the upload route reports finished files to.
#[derive(Clone, Default)]
pub struct Notifications {
    notifier: Option<Arc<dyn Notifier>>,
}

impl Notifications {
    pub fn disabled() -> Self {
        Self { notifier: None }
    }

    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier: Some(notifier),
        }
    }

    /// SMTP notifications when both a host and a recipient are configured.
    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let (Some(host), Some(to)) = (config.smtp_host.as_deref(), config.to.as_deref()) else {
            return Ok(Self::disabled());
        };

        let transport = smtp_transport(config, host)?;
        let notifier = MailNotifier::new(transport, config.sender().unwrap_or(to), to)?;
        log::info!(
            "completion emails go to {} via {}:{}",
            to,
            host,
            config.smtp_port
        );
        Ok(Self::new(Arc::new(notifier)))
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Send the completion notice in the background.
    pub fn upload_succeeded(&self, outcome: &ImportOutcome) -> Option<JoinHandle<()>> {
        let notifier = self.notifier.clone()?;
        let outcome = outcome.clone();

        Some(tokio::spawn(async move {
            match notifier.upload_succeeded(&outcome).await {
                Ok(()) => log::info!("completion email sent for {}", outcome.file_name),
                Err(err) => log::warn!(
                    "failed to send completion email for {}: {}",
                    outcome.file_name,
                    err
                ),
            }
        }))
    }
}
