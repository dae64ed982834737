use crate::composer::MailMessage;
use crate::traits::MailTransport;
use crate::types::TransportError;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSendmailTransport, AsyncTransport, Message, Tokio1Executor};
use std::ffi::OsString;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

pub const DEFAULT_SENDMAIL: &str = "/usr/lib/sendmail";

const SEPARATOR: &str = "--------------------------------------------------------------------------------";

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address.parse().map_err(|source| TransportError::Address {
        address: address.to_string(),
        source,
    })
}

/// Serializes an addressed [`MailMessage`] into a lettre [`Message`].
pub fn to_wire(message: &MailMessage) -> Result<Message, TransportError> {
    let to = message.to.as_deref().ok_or(TransportError::MissingRecipient)?;
    let content_type = ContentType::parse(&message.content_type)
        .map_err(|e| TransportError::ContentType(e.to_string()))?;

    Ok(Message::builder()
        .from(parse_mailbox(&message.from)?)
        .to(parse_mailbox(to)?)
        .subject(message.subject.as_str())
        .header(content_type)
        .body(message.body.clone())?)
}

/// Per-item delivery tally.
#[derive(Debug, Default)]
pub struct DeliverySummary {
    pub delivered: usize,
    pub failed: Vec<(String, TransportError)>,
}

/// Fans one composed message out to every subscriber of a feed.
pub struct Dispatcher {
    transport: Arc<dyn MailTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn MailTransport>) -> Self {
        Self { transport }
    }

    pub async fn deliver(&self, message: &MailMessage, recipient: &str) -> Result<(), TransportError> {
        debug!("Sending mail to {}", recipient);
        self.transport.send(&message.addressed_to(recipient)).await
    }

    /// Attempts every recipient, whatever happens to the others.
    pub async fn deliver_all(&self, message: &MailMessage, recipients: &[String]) -> DeliverySummary {
        let mut summary = DeliverySummary::default();

        for recipient in recipients {
            match self.deliver(message, recipient).await {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    error!("Delivery of {:?} to {} failed: {}", message.subject, recipient, e);
                    summary.failed.push((recipient.clone(), e));
                }
            }
        }

        summary
    }
}

/// Pipes messages into a sendmail-compatible binary. A non-zero exit is a failure.
pub struct SendmailTransport {
    inner: AsyncSendmailTransport<Tokio1Executor>,
}

impl SendmailTransport {
    pub fn new(command: impl Into<OsString>) -> Self {
        Self {
            inner: AsyncSendmailTransport::<Tokio1Executor>::new_with_command(command),
        }
    }
}

#[async_trait]
impl MailTransport for SendmailTransport {
    async fn send(&self, message: &MailMessage) -> Result<(), TransportError> {
        let email = to_wire(message)?;
        self.inner.send(email).await?;
        Ok(())
    }
}

/// Dry-run transport: writes each formatted message followed by a blank line and a separator.
pub struct StdoutTransport<W = std::io::Stdout> {
    out: Mutex<W>,
}

impl StdoutTransport {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl Default for StdoutTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> StdoutTransport<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_writer(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<W: Write + Send> MailTransport for StdoutTransport<W> {
    async fn send(&self, message: &MailMessage) -> Result<(), TransportError> {
        let email = to_wire(message)?;
        let formatted = email.formatted();

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        write!(
            out,
            "{}\n\n{}\n",
            String::from_utf8_lossy(&formatted).trim_end(),
            SEPARATOR
        )
        .and_then(|()| out.flush())
        .map_err(|e| TransportError::Rejected(format!("dry-run output: {}", e)))?;
        Ok(())
    }
}

/// The transport a pass actually uses: dry runs never reach `live`.
pub fn transport_for(dry_run: bool, live: Arc<dyn MailTransport>) -> Arc<dyn MailTransport> {
    if dry_run {
        debug!("Dry run, printing messages instead of sending them");
        Arc::new(StdoutTransport::new())
    } else {
        live
    }
}
