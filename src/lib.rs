pub mod api;
pub mod billing;
pub mod collections;
pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod lifecycle;
pub mod mailer;
pub mod models;
pub mod ocr;
pub mod queue;
pub mod s3_utils;
pub mod ws;

use chrono::NaiveDate;
use sqlx::PgPool;

use crate::api::auth::JwtKeys;
use crate::api::paymongo_client::PayMongoClient;
use crate::mailer::Mailer;
use crate::ocr::MockOcr;
use crate::s3_utils::ReceiptStorage;
use crate::ws::CollectionHub;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub jwt: JwtKeys,
    pub storage: ReceiptStorage,
    pub paymongo: PayMongoClient,
    pub paymongo_webhook_secret: String,
    pub app_base_url: String,
    pub mailer: Mailer,
    pub ocr: MockOcr,
    /// Verify receipts in the request when no queue worker runs.
    pub inline_ocr: bool,
    pub invoice_due_days: i64,
    pub ws_hub: actix::Addr<CollectionHub>,
}

/// Calendar date on the server's local clock. Billing and the collection
/// status store are keyed on it.
pub fn local_today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Installs the fmt subscriber (`RUST_LOG`, default `info`). `log` records
/// from this crate and its dependencies are bridged into it.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
