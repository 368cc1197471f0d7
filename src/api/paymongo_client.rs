// src/api/paymongo_client.rs
//
// Minimal client for the PayMongo REST API (https://api.paymongo.com).
// Authorization: HTTP basic with the secret key as username.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug)]
pub enum PayMongoError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    InvalidResponse(String),
}

impl fmt::Display for PayMongoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayMongoError::Http(e) => write!(f, "http error: {e}"),
            PayMongoError::Api { status, body } => {
                write!(f, "paymongo api error status={status} body={body}")
            }
            PayMongoError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl std::error::Error for PayMongoError {}

impl From<reqwest::Error> for PayMongoError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

#[derive(Clone)]
pub struct PayMongoClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineItem {
    /// Centavos.
    pub amount: i64,
    pub currency: String,
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckoutSessionRequest {
    pub line_items: Vec<LineItem>,
    pub payment_method_types: Vec<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub reference_number: String,
    pub description: String,
    pub send_email_receipt: bool,
    pub show_description: bool,
    pub show_line_items: bool,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct Envelope<T> {
    data: EnvelopeData<T>,
}

#[derive(Serialize)]
struct EnvelopeData<T> {
    attributes: T,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    data: CheckoutSessionData,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionData {
    id: String,
    attributes: CheckoutSessionAttributes,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionAttributes {
    checkout_url: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub checkout_url: String,
    pub status: Option<String>,
}

impl PayMongoClient {
    pub fn new(api_base: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        req: CreateCheckoutSessionRequest,
    ) -> Result<CheckoutSession, PayMongoError> {
        let resp = self
            .http
            .post(format!("{}/v1/checkout_sessions", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&Envelope {
                data: EnvelopeData { attributes: req },
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(PayMongoError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = serde_json::from_str::<CheckoutSessionResponse>(&body)
            .map_err(|e| PayMongoError::InvalidResponse(format!("{e}; body={body}")))?;

        Ok(CheckoutSession {
            id: parsed.data.id,
            checkout_url: parsed.data.attributes.checkout_url,
            status: parsed.data.attributes.status,
        })
    }
}
