//! Email delivery abstraction.
//!
//! The auth flows only need "deliver this template to this address, or tell
//! me you could not". The default sender for local dev is [`LogMailer`],
//! which logs the payload and reports success; real transports (SMTP, an
//! API relay) implement [`Mailer`] outside this crate.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver a templated message or return an error if delivery is
    /// impossible. Callers decide whether a failure is fatal.
    async fn send_email(
        &self,
        address: &str,
        template: &str,
        variables: &serde_json::Value,
    ) -> Result<()>;
}

/// Local dev sender that logs instead of sending real email.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_email(
        &self,
        address: &str,
        template: &str,
        variables: &serde_json::Value,
    ) -> Result<()> {
        info!(
            to_email = %address,
            template = %template,
            payload = %variables,
            "email send stub"
        );
        Ok(())
    }
}
