//! Email channel.
//!
//! Messages go to the configured SMTP relay over a plain connection, with
//! optional AUTH. `dryRun` logs the message instead of sending it.
//!
//! Required keys: `host`, `from`.
//! Optional: `port`, `username`, `password`, `subject`, `timeoutMs`, `dryRun`.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use uuid::Uuid;

use super::{flag, Sender, SenderFactory};
use crate::error::{DispatchError, Result};
use crate::notification::{RenderedContent, SendRequest, SenderConfiguration};
use crate::registry::Discoverable;

pub const EMAIL_CHANNEL: &str = "email";

const DEFAULT_SMTP_PORT: u16 = 25;
const DEFAULT_SUBJECT: &str = "Notification";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
struct SmtpSettings {
    host: String,
    port: u16,
    from: Mailbox,
    subject: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    dry_run: bool,
}

impl SmtpSettings {
    fn from_config(config: &SenderConfiguration) -> Result<Self> {
        let host = config.require("host")?.to_string();
        let raw_from = config.require("from")?;
        let from = raw_from.parse::<Mailbox>().map_err(|e| {
            DispatchError::Configuration(format!("'from' is not an email address: {} ({})", raw_from, e))
        })?;

        let port = match config.get("port") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                DispatchError::Configuration(format!("invalid SMTP port '{}'", raw))
            })?,
            None => DEFAULT_SMTP_PORT,
        };

        let timeout = match config.get("timeoutMs") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                DispatchError::Configuration(format!("invalid timeoutMs '{}'", raw))
            })?,
            None => DEFAULT_TIMEOUT_MS,
        };

        let username = config.get("username").map(str::to_string);
        let password = config.get("password").map(str::to_string);
        if username.is_some() != password.is_some() {
            return Err(DispatchError::Configuration(
                "'username' and 'password' must be set together".into(),
            ));
        }

        Ok(Self {
            host,
            port,
            from,
            subject: config.get("subject").unwrap_or(DEFAULT_SUBJECT).to_string(),
            username,
            password,
            timeout: Duration::from_millis(timeout),
            dry_run: flag(config, "dryRun")?,
        })
    }

    fn transport(&self) -> AsyncSmtpTransport<Tokio1Executor> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(self.host.as_str())
            .port(self.port)
            .timeout(Some(self.timeout));
        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        builder.build()
    }

    /// `<uuid@domain-of-from>`
    fn message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }
}

/// Map an SMTP failure. Permanent (5xx) replies and client-side errors are
/// final; 4xx replies, timeouts and connection failures may be retried.
fn smtp_error(err: lettre::transport::smtp::Error) -> DispatchError {
    let message = format!("smtp relay: {}", err);
    if err.is_permanent() || err.is_client() {
        DispatchError::Provider(message)
    } else {
        DispatchError::TransientProvider(message)
    }
}

struct SmtpClient {
    settings: SmtpSettings,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

#[derive(Default)]
pub struct EmailSender {
    client: OnceLock<SmtpClient>,
}

impl EmailSender {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sender for EmailSender {
    fn channel_type(&self) -> &str {
        EMAIL_CHANNEL
    }

    async fn configure(&self, config: &SenderConfiguration) -> Result<()> {
        let settings = SmtpSettings::from_config(config)?;
        let transport = settings.transport();
        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            from = %settings.from,
            dry_run = settings.dry_run,
            "Email sender configured"
        );
        self.client
            .set(SmtpClient { settings, transport })
            .map_err(|_| DispatchError::Configuration("email sender already configured".into()))
    }

    async fn send(&self, request: &SendRequest, content: &RenderedContent) -> Result<String> {
        let SmtpClient { settings, transport } = self
            .client
            .get()
            .ok_or_else(|| DispatchError::Configuration("email sender used before configure".into()))?;

        let to = request.target().parse::<Mailbox>().map_err(|_| {
            DispatchError::Provider(format!("invalid recipient address: {}", request.target()))
        })?;
        let message_id = settings.message_id();

        if settings.dry_run {
            tracing::info!(
                channel = EMAIL_CHANNEL,
                request_id = %request.request_id(),
                to = %to,
                message_id = %message_id,
                body_len = content.body.len(),
                "Dry run, email not sent"
            );
            return Ok(message_id);
        }

        let email = Message::builder()
            .from(settings.from.clone())
            .to(to)
            .subject(settings.subject.as_str())
            .message_id(Some(message_id.clone()))
            .header(ContentType::TEXT_PLAIN)
            .body(content.body.clone())
            .map_err(|e| DispatchError::Provider(format!("cannot build email: {}", e)))?;

        let response = transport.send(email).await.map_err(smtp_error)?;

        tracing::info!(
            channel = EMAIL_CHANNEL,
            request_id = %request.request_id(),
            relay = %format!("{}:{}", settings.host, settings.port),
            authenticated = settings.username.is_some(),
            code = %response.code(),
            message_id = %message_id,
            "Email accepted by relay"
        );

        Ok(message_id)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EmailSenderFactory;

impl Discoverable for EmailSenderFactory {
    fn kind(&self) -> &str {
        EMAIL_CHANNEL
    }
}

impl SenderFactory for EmailSenderFactory {
    fn create(&self) -> Result<Arc<dyn Sender>> {
        Ok(Arc::new(EmailSender::new()))
    }
}
