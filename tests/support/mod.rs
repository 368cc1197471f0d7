#![allow(dead_code)]

use actix::Actor;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client as S3Client;
use sqlx::{PgPool, Row};
use std::env;
use std::sync::OnceLock;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use wastewise::api::auth::JwtKeys;
use wastewise::api::paymongo_client::PayMongoClient;
use wastewise::mailer::Mailer;
use wastewise::ocr::MockOcr;
use wastewise::s3_utils::ReceiptStorage;
use wastewise::ws::CollectionHub;
use wastewise::AppState;

pub const WEBHOOK_SECRET: &str = "whsk_test_secret";

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Recreates the database named by `TEST_DATABASE_URL` and migrates it.
/// `None` when the variable is unset, so DB tests skip on machines without Postgres.
pub async fn init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };
    let (admin_url, db_name) =
        split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url)
        .await
        .expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    if let Err(e) = sqlx::query(&create_sql).execute(&admin_pool).await {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url)
        .await
        .expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    Some(TestDb { pool, _guard: guard })
}

/// `hex(HMAC-SHA256(secret, "<timestamp>.<body>"))`, the value PayMongo puts in
/// the `te`/`li` slots of `Paymongo-Signature`.
pub fn paymongo_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Static-credential S3 client aimed at `endpoint` (an httpmock server in tests).
pub fn s3_client(endpoint: &str) -> S3Client {
    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(Credentials::new("test", "test", None, None, "tests"))
        .endpoint_url(endpoint)
        .force_path_style(true)
        .build();
    S3Client::from_conf(config)
}

/// State with every outside service pointed at `provider_base`. Mail is disabled
/// and OCR never fails unless a test swaps in its own [`MockOcr`].
pub fn build_state(pool: PgPool, provider_base: &str) -> AppState {
    AppState {
        pool,
        jwt: JwtKeys::new("test-jwt-secret", 1),
        storage: ReceiptStorage::new(
            s3_client(provider_base),
            "test-bucket".to_string(),
            "https://cdn.example.com".to_string(),
        ),
        paymongo: PayMongoClient::new(provider_base, "sk_test_123"),
        paymongo_webhook_secret: WEBHOOK_SECRET.to_string(),
        app_base_url: "http://localhost:8080".to_string(),
        mailer: Mailer::disabled(),
        ocr: MockOcr::new(0.0),
        inline_ocr: true,
        invoice_due_days: 7,
        ws_hub: CollectionHub::new().start(),
    }
}

pub async fn seed_barangay(pool: &PgPool, name: &str) -> i32 {
    sqlx::query_scalar("INSERT INTO barangays (name, city) VALUES ($1, 'Quezon City') RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("insert barangay")
}

async fn seed_user(pool: &PgPool, role: &str, approval: &str) -> i32 {
    let suffix = Uuid::new_v4().simple().to_string();
    sqlx::query(
        r#"INSERT INTO users (username, email, password_hash, full_name, role, approval_status)
           VALUES ($1, $2, 'hash', $3, $4, $5)
           RETURNING id"#,
    )
    .bind(format!("{role}_{}", &suffix[..8]))
    .bind(format!("{role}_{suffix}@example.com"))
    .bind(format!("Test {role}"))
    .bind(role)
    .bind(approval)
    .fetch_one(pool)
    .await
    .expect("insert user")
    .get("id")
}

pub async fn seed_resident(pool: &PgPool, barangay_id: i32, approval: &str) -> i32 {
    let user_id = seed_user(pool, "resident", approval).await;
    sqlx::query("INSERT INTO addresses (user_id, barangay_id, street) VALUES ($1, $2, '12 Mabini St')")
        .bind(user_id)
        .bind(barangay_id)
        .execute(pool)
        .await
        .expect("insert address");
    user_id
}

pub async fn seed_admin(pool: &PgPool) -> i32 {
    seed_user(pool, "admin", "approved").await
}

/// Returns `(user_id, collector_id)`.
pub async fn seed_collector(pool: &PgPool, barangay_id: Option<i32>) -> (i32, i32) {
    let user_id = seed_user(pool, "collector", "approved").await;
    let collector_id: i32 =
        sqlx::query_scalar("INSERT INTO collectors (user_id) VALUES ($1) RETURNING id")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .expect("insert collector");
    if let Some(barangay_id) = barangay_id {
        sqlx::query("INSERT INTO collector_assignments (collector_id, barangay_id) VALUES ($1, $2)")
            .bind(collector_id)
            .bind(barangay_id)
            .execute(pool)
            .await
            .expect("insert assignment");
    }
    (user_id, collector_id)
}
