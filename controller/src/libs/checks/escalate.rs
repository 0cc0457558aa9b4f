//! Delivers escalation and recovery notifications

use async_trait::async_trait;
use serde_json::json;
use tracing::{event, Level};
use vigil::conf::Escalation;
use vigil::models::{write_timestamp, CheckConfig, CheckStatus, EscalationTarget};
use vigil::Error;

/// Where a scheduler sends escalations and recoveries
#[async_trait]
pub trait Escalator: Send + Sync {
    /// Notify this check's targets of an escalation or recovery
    ///
    /// # Arguments
    ///
    /// * `config` - The config of the check being escalated
    /// * `status` - The status snapshot at escalation time
    /// * `recovery` - Whether this is a recovery rather then an escalation
    async fn notify(
        &self,
        config: &CheckConfig,
        status: &CheckStatus,
        recovery: bool,
    ) -> Result<(), Error>;
}

/// Render a notification body from a check's template
///
/// # Arguments
///
/// * `config` - The config of the check being escalated
/// * `status` - The status snapshot at escalation time
pub fn render_body(config: &CheckConfig, status: &CheckStatus) -> String {
    // a check that has never completed an attempt has no last check time
    let last_check = match &status.last_check {
        Some(last_check) => write_timestamp(last_check),
        None => "never".to_owned(),
    };
    config
        .escalation_template
        .replace("{name}", &config.name)
        .replace("{namespace}", &config.namespace)
        .replace("{status}", status.status.as_str())
        .replace("{attempt}", &status.attempt.to_string())
        .replace("{max_attempts}", &config.max_attempts.to_string())
        .replace("{last_check}", &last_check)
        .replace("{logs}", &status.logs)
}

/// Render a notification subject line
///
/// # Arguments
///
/// * `config` - The config of the check being escalated
/// * `status` - The status snapshot at escalation time
pub fn render_subject(config: &CheckConfig, status: &CheckStatus) -> String {
    format!(
        "vigil {}: {}/{}",
        status.status, config.namespace, config.name
    )
}

/// The reference escalator delivering email and webhook notifications
pub struct Notifier {
    /// The http client notifications are sent with
    client: reqwest::Client,
    /// The delivery settings
    settings: Escalation,
}

impl Notifier {
    /// Create a new notifier
    ///
    /// # Arguments
    ///
    /// * `settings` - The escalation delivery settings
    pub fn new(settings: &Escalation) -> Self {
        Notifier {
            client: reqwest::Client::new(),
            settings: settings.clone(),
        }
    }

    /// Send a notification email through the mail API
    ///
    /// # Arguments
    ///
    /// * `to` - The address to send to
    /// * `subject` - The subject line to set
    /// * `body` - The rendered notification body
    async fn email(&self, to: &str, subject: &str, body: &str) -> Result<(), Error> {
        // email targets require mail settings and a token
        let settings = match &self.settings.mail {
            Some(settings) => settings,
            None => return Err(Error::new("no mail settings are configured")),
        };
        let token = match settings.token() {
            Some(token) => token,
            None => return Err(Error::new("no mail api token is configured")),
        };
        // build the mail api payload
        let payload = json!({
            "personalizations": [{"to": [{"email": to}]}],
            "from": {"email": settings.from},
            "subject": subject,
            "content": [{"type": "text/html", "value": body}]
        });
        // send our message
        let resp = self
            .client
            .post("https://api.sendgrid.com/v3/mail/send")
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        // anything other then success means the message may not be delivered
        if !resp.status().is_success() {
            return Err(Error::new(format!("mail api returned {}", resp.status())));
        }
        Ok(())
    }

    /// POST a notification to a webhook
    ///
    /// # Arguments
    ///
    /// * `url` - The url to POST to
    /// * `config` - The config of the check being escalated
    /// * `status` - The status snapshot at escalation time
    /// * `recovery` - Whether this is a recovery
    /// * `body` - The rendered notification body
    async fn webhook(
        &self,
        url: &str,
        config: &CheckConfig,
        status: &CheckStatus,
        recovery: bool,
        body: &str,
    ) -> Result<(), Error> {
        // build the webhook payload
        let payload = json!({
            "check": config.name,
            "namespace": config.namespace,
            "status": status.status.as_str(),
            "attempt": status.attempt,
            "recovery": recovery,
            "body": body,
        });
        let resp = self.client.post(url).json(&payload).send().await?;
        if !resp.status().is_success() {
            return Err(Error::new(format!("webhook returned {}", resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl Escalator for Notifier {
    /// Notify this check's targets of an escalation or recovery
    ///
    /// # Arguments
    ///
    /// * `config` - The config of the check being escalated
    /// * `status` - The status snapshot at escalation time
    /// * `recovery` - Whether this is a recovery rather then an escalation
    async fn notify(
        &self,
        config: &CheckConfig,
        status: &CheckStatus,
        recovery: bool,
    ) -> Result<(), Error> {
        // render the notification once for all targets
        let body = render_body(config, status);
        let subject = render_subject(config, status);
        // every target gets an attempt; one failed delivery must not
        // starve the independent targets after it
        let mut failed = None;
        for target in &config.escalations {
            let sent = match target {
                EscalationTarget::Email { email } => self.email(email, &subject, &body).await,
                EscalationTarget::Webhook { webhook } => {
                    self.webhook(webhook, config, status, recovery, &body).await
                }
            };
            match sent {
                Ok(()) => event!(
                    Level::INFO,
                    check = %config.key(),
                    target = ?target,
                    recovery,
                    "notification sent"
                ),
                Err(error) => {
                    event!(
                        Level::WARN,
                        check = %config.key(),
                        target = ?target,
                        recovery,
                        error = %error,
                        "notification failed"
                    );
                    failed = Some(error);
                }
            }
        }
        // surface the last failure once every target has been attempted
        match failed {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
