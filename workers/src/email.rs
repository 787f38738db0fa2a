use async_trait::async_trait;
use lettre::{
    message::Mailbox,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use task_core::{
    clients::{EmailMessage, EmailSender},
    error::{CoreError, Result},
};

/// SMTP-backed implementation of the email capability.
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from_address: &str,
    ) -> Result<Self> {
        let from: Mailbox = from_address
            .parse()
            .map_err(|e| CoreError::Configuration(format!("invalid from address: {e}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| CoreError::Configuration(format!("SMTP relay: {e}")))?
            .port(port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        // an unparseable recipient can never succeed; don't ask for retries
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|_| CoreError::Permanent(format!("invalid recipient: {}", message.to)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&message.subject)
            .body(message.body.clone())
            .map_err(|e| CoreError::Permanent(format!("message build failed: {e}")))?;

        self.transport.send(email).await.map_err(|e| {
            if e.is_permanent() {
                CoreError::Permanent(format!("relay rejected message: {e}"))
            } else {
                CoreError::Transient(format!("relay unavailable: {e}"))
            }
        })?;
        Ok(())
    }
}
