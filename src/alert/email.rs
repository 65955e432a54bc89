//! SMTP delivery for monitoring alerts.

use async_trait::async_trait;
use lettre::{
    message::{header, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info};

use crate::alert::{AlertChannel, AlertContext, AlertError};
use crate::config::EmailConfig;

/// Email alert channel backed by an async SMTP transport
pub struct EmailAlertChannel {
    smtp_transport: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    from_name: String,
    template_engine: handlebars::Handlebars<'static>,
}

impl EmailAlertChannel {
    pub fn new(config: &EmailConfig) -> Result<Self, AlertError> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());

        let smtp_transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| AlertError::Config(format!("Invalid SMTP host: {}", e)))?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        let mut template_engine = handlebars::Handlebars::new();
        template_engine
            .register_template_string(
                "monitoring_alert",
                include_str!("../../templates/email/monitoring_alert.hbs"),
            )
            .map_err(|e| AlertError::Template(format!("Failed to register template: {}", e)))?;

        Ok(Self {
            smtp_transport,
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
            template_engine,
        })
    }

    fn render_html(&self, context: &AlertContext) -> Result<String, AlertError> {
        let data = serde_json::json!({
            "site_url": context.site_url,
            "new_risk_flags": context.diff.new_risk_flags,
            "new_external_hosts": context.diff.new_external_hosts,
            "new_cookies": context.diff.new_cookies,
            "has_risk_flags": !context.diff.new_risk_flags.is_empty(),
            "has_external_hosts": !context.diff.new_external_hosts.is_empty(),
            "has_cookies": !context.diff.new_cookies.is_empty(),
        });

        self.template_engine
            .render("monitoring_alert", &data)
            .map_err(|e| AlertError::Template(format!("Failed to render template: {}", e)))
    }

    /// Create plain text version from HTML
    fn html_to_text(html: &str) -> String {
        html.replace("<br>", "\n")
            .replace("<br/>", "\n")
            .replace("<br />", "\n")
            .replace("</p>", "\n\n")
            .replace("</li>", "\n")
            .replace("</div>", "\n")
            .split('<')
            .enumerate()
            .filter_map(|(i, s)| {
                if i == 0 {
                    Some(s.to_string())
                } else {
                    s.split_once('>').map(|(_, text)| text.to_string())
                }
            })
            .collect::<Vec<String>>()
            .join("")
            .trim()
            .to_string()
    }
}

#[async_trait]
impl AlertChannel for EmailAlertChannel {
    async fn send_alert(&self, recipient: &str, context: &AlertContext) -> Result<(), AlertError> {
        info!(recipient = %recipient, site = %context.site_url, "sending monitoring alert");

        let html_body = self.render_html(context)?;
        let text_body = Self::html_to_text(&html_body);

        let email = Message::builder()
            .from(
                format!("{} <{}>", self.from_name, self.from_address)
                    .parse()
                    .map_err(|e| AlertError::Config(format!("Invalid from address: {}", e)))?,
            )
            .to(recipient
                .parse()
                .map_err(|e| AlertError::Recipient(format!("Invalid recipient email: {}", e)))?)
            .subject(format!("Privacy changes detected on {}", context.site_url))
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(text_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AlertError::Send(format!("Failed to build email: {}", e)))?;

        match self.smtp_transport.send(email).await {
            Ok(_) => {
                info!(recipient = %recipient, "alert sent");
                Ok(())
            }
            Err(e) => {
                error!(recipient = %recipient, error = %e, "failed to send alert");
                Err(AlertError::Send(format!("SMTP error: {}", e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::diff::ScanDiff;

    fn channel() -> EmailAlertChannel {
        EmailAlertChannel::new(&EmailConfig::default()).unwrap()
    }

    fn context() -> AlertContext {
        AlertContext {
            site_url: "https://example.com/".to_string(),
            diff: ScanDiff {
                has_changes: true,
                new_risk_flags: vec!["now loads an analytics tag".to_string()],
                new_external_hosts: vec!["www.googletagmanager.com".to_string()],
                new_cookies: vec!["_ga (.example.com)".to_string()],
            },
        }
    }

    #[test]
    fn test_render_includes_all_regressions() {
        let html = channel().render_html(&context()).unwrap();
        assert!(html.contains("https://example.com/"));
        assert!(html.contains("now loads an analytics tag"));
        assert!(html.contains("www.googletagmanager.com"));
        assert!(html.contains("_ga (.example.com)"));
    }

    #[test]
    fn test_render_omits_empty_sections() {
        let mut ctx = context();
        ctx.diff.new_cookies.clear();
        let html = channel().render_html(&ctx).unwrap();
        assert!(!html.contains("New cookies"));
    }

    #[test]
    fn test_html_to_text() {
        let html = "<p>Hello <strong>World</strong></p><ul><li>item</li></ul>";
        let text = EmailAlertChannel::html_to_text(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("item"));
        assert!(!text.contains("<p>"));
    }
}
