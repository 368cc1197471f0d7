// src/mailer.rs
//
// Transactional email through the Brevo HTTP API (POST /v3/smtp/email).
// Authorization: `api-key` header.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("brevo api error status={status} body={body}")]
    Api { status: u16, body: String },
}

#[derive(Clone)]
pub struct Mailer {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    sender_email: String,
    sender_name: String,
}

#[derive(Debug, Clone)]
pub struct EmailDraft {
    pub subject: String,
    pub html: String,
}

impl EmailDraft {
    pub fn to(self, email: &str, name: &str) -> Email {
        Email {
            to_email: email.to_string(),
            to_name: name.to_string(),
            subject: self.subject,
            html: self.html,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Email {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub html: String,
}

#[derive(Serialize)]
struct Contact<'a> {
    email: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest<'a> {
    sender: Contact<'a>,
    to: [Contact<'a>; 1],
    subject: &'a str,
    html_content: &'a str,
}

impl Mailer {
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        sender_email: impl Into<String>,
        sender_name: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            sender_email: sender_email.into(),
            sender_name: sender_name.into(),
        }
    }

    /// A mailer that only logs.
    pub fn disabled() -> Self {
        Self::new("http://localhost", None, "no-reply@wastewise.local", "WasteWise")
    }

    pub async fn send(&self, email: Email) -> Result<(), MailError> {
        let Some(api_key) = self.api_key.as_deref() else {
            log::info!(
                "mail disabled, skipping to={} subject={:?}",
                email.to_email,
                email.subject
            );
            return Ok(());
        };

        let body = SendRequest {
            sender: Contact {
                email: &self.sender_email,
                name: &self.sender_name,
            },
            to: [Contact {
                email: &email.to_email,
                name: &email.to_name,
            }],
            subject: &email.subject,
            html_content: &email.html,
        };

        let resp = self
            .http
            .post(format!("{}/v3/smtp/email", self.api_base))
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::Api {
                status: status.as_u16(),
                body,
            });
        }

        log::info!("mail sent to={} subject={:?}", email.to_email, email.subject);
        Ok(())
    }

    /// Fire-and-forget variant for request handlers.
    pub fn send_in_background(&self, email: Email) {
        let mailer = self.clone();
        tokio::spawn(async move {
            let to = email.to_email.clone();
            if let Err(e) = mailer.send(email).await {
                log::warn!("mail to={to} failed: {e}");
            }
        });
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub mod templates {
    use chrono::NaiveDate;

    use super::{escape, EmailDraft};

    pub fn registration_approved(name: &str) -> EmailDraft {
        EmailDraft {
            subject: "Your WasteWise account is approved".to_string(),
            html: format!(
                "<p>Hi {},</p><p>Your registration has been approved. \
                 You can now sign in and choose a collection plan.</p>",
                escape(name)
            ),
        }
    }

    pub fn registration_rejected(name: &str, reason: &str) -> EmailDraft {
        EmailDraft {
            subject: "Your WasteWise registration".to_string(),
            html: format!(
                "<p>Hi {},</p><p>We could not approve your registration.</p><p>Reason: {}</p>",
                escape(name),
                escape(reason)
            ),
        }
    }

    pub fn payment_receipt(
        name: &str,
        receipt_number: &str,
        invoice_number: &str,
        amount: &str,
        currency: &str,
    ) -> EmailDraft {
        EmailDraft {
            subject: format!("Official receipt {receipt_number}"),
            html: format!(
                "<p>Hi {},</p><p>We received your payment of {} {} for invoice {}.</p>\
                 <p>Receipt number: <b>{}</b></p>",
                escape(name),
                escape(currency),
                escape(amount),
                escape(invoice_number),
                escape(receipt_number)
            ),
        }
    }

    pub fn invoice_issued(name: &str, amount: &str, currency: &str, due: NaiveDate) -> EmailDraft {
        EmailDraft {
            subject: "New collection invoice".to_string(),
            html: format!(
                "<p>Hi {},</p><p>Your invoice for {} {} is due on {}.</p>",
                escape(name),
                escape(currency),
                escape(amount),
                due.format("%B %-d, %Y")
            ),
        }
    }

    pub fn subscription_suspended(name: &str) -> EmailDraft {
        EmailDraft {
            subject: "Collection service suspended".to_string(),
            html: format!(
                "<p>Hi {},</p><p>Your collection service is suspended because of an overdue \
                 invoice. Pay the outstanding balance to resume pickups.</p>",
                escape(name)
            ),
        }
    }

    pub fn subscription_cancelled(name: &str) -> EmailDraft {
        EmailDraft {
            subject: "Collection subscription cancelled".to_string(),
            html: format!(
                "<p>Hi {},</p><p>Your collection subscription has been cancelled.</p>",
                escape(name)
            ),
        }
    }
}
