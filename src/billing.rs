// src/billing.rs

use chrono::{Duration, NaiveDate};
use sqlx::{PgConnection, PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{unique_violation, ApiError};
use crate::models::{
    text_col, Invoice, Receipt, Subscription, SubscriptionStatus, INVOICE_COLUMNS,
    RECEIPT_COLUMNS, SUBSCRIPTION_COLUMNS,
};

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::NotFound(what) => ApiError::not_found(format!("{what} not found")),
            BillingError::Rejected(msg) => ApiError::BadRequest(msg),
            BillingError::Db(e) => ApiError::from(e),
        }
    }
}

/// `INV-20261015-3F9A1C2B`: prefix, issue date, first 8 hex digits of `id`.
pub fn document_number(prefix: &str, date: NaiveDate, id: Uuid) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("{prefix}-{}-{}", date.format("%Y%m%d"), &simple[..8])
}

/// `15050` -> `"150.50"`.
pub fn format_centavos(centavos: i64) -> String {
    format!("{}.{:02}", centavos / 100, centavos % 100)
}

/// Subscription status once a payment lands.
pub fn status_after_payment(
    current: SubscriptionStatus,
    other_outstanding: bool,
) -> SubscriptionStatus {
    match current {
        SubscriptionStatus::PendingPayment => SubscriptionStatus::Active,
        SubscriptionStatus::Suspended if !other_outstanding => SubscriptionStatus::Active,
        other => other,
    }
}

/// Starts a `pending_payment` subscription and issues its first invoice.
pub async fn subscribe(
    pool: &PgPool,
    user_id: i32,
    plan_slug: &str,
    today: NaiveDate,
    invoice_due_days: i64,
) -> Result<(Subscription, Invoice), BillingError> {
    let approved: Option<String> =
        sqlx::query_scalar("SELECT approval_status FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    match approved.as_deref() {
        None => return Err(BillingError::NotFound("user")),
        Some("approved") => {}
        Some(_) => {
            return Err(BillingError::Rejected(
                "account is not approved yet".to_string(),
            ))
        }
    }

    let plan = sqlx::query(
        r#"SELECT id, price::text AS price, currency, billing_cycle_days
           FROM subscription_plans
           WHERE slug = $1 AND is_active = true"#,
    )
    .bind(plan_slug)
    .fetch_optional(pool)
    .await?
    .ok_or(BillingError::NotFound("plan"))?;

    let plan_id: i32 = plan.get("id");
    let price: String = plan.get("price");
    let currency: String = plan.get("currency");
    let cycle: i32 = plan.get("billing_cycle_days");

    let period_end = today + Duration::days(i64::from(cycle));
    let due_date = today + Duration::days(invoice_due_days);

    let mut tx = pool.begin().await?;

    let subscription_id: i32 = match sqlx::query_scalar(
        r#"INSERT INTO subscriptions
           (user_id, plan_id, status, current_period_start, current_period_end, created_on)
           VALUES ($1, $2, 'pending_payment', $3, $4, $3)
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(plan_id)
    .bind(today)
    .bind(period_end)
    .fetch_one(&mut *tx)
    .await
    {
        Ok(id) => id,
        Err(e) if unique_violation(&e) == Some("subscriptions_one_live_per_user") => {
            return Err(BillingError::Rejected(
                "you already have a subscription".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    let invoice_id: i32 = sqlx::query_scalar(
        r#"INSERT INTO invoices
           (invoice_number, subscription_id, user_id, amount, currency, status,
            period_start, period_end, due_date)
           VALUES ($1, $2, $3, $4::numeric, $5, 'unpaid', $6, $7, $8)
           RETURNING id"#,
    )
    .bind(document_number("INV", today, Uuid::new_v4()))
    .bind(subscription_id)
    .bind(user_id)
    .bind(&price)
    .bind(&currency)
    .bind(today)
    .bind(period_end)
    .bind(due_date)
    .fetch_one(&mut *tx)
    .await?;

    let subscription = fetch_subscription(&mut tx, subscription_id).await?;
    let invoice = fetch_invoice(&mut tx, invoice_id).await?;

    tx.commit().await?;

    log::info!(
        "subscription created user_id={user_id} subscription_id={subscription_id} plan={plan_slug}"
    );
    Ok((subscription, invoice))
}

/// Cancels the caller's live subscription and voids invoices not yet overdue.
pub async fn cancel_subscription(
    pool: &PgPool,
    user_id: i32,
) -> Result<Subscription, BillingError> {
    let mut tx = pool.begin().await?;

    let id: i32 = sqlx::query_scalar(
        r#"UPDATE subscriptions
           SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
           WHERE user_id = $1 AND status <> 'cancelled'
           RETURNING id"#,
    )
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(BillingError::NotFound("subscription"))?;

    sqlx::query(
        r#"UPDATE invoices SET status = 'void'
           WHERE subscription_id = $1 AND status = 'unpaid'"#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let subscription = fetch_subscription(&mut tx, id).await?;
    tx.commit().await?;

    log::info!("subscription cancelled user_id={user_id} subscription_id={id}");
    Ok(subscription)
}

#[derive(Debug)]
pub enum ConfirmOutcome {
    Confirmed {
        user_id: i32,
        receipt: Receipt,
        invoice_number: String,
        subscription_status: SubscriptionStatus,
    },
    AlreadyProcessed {
        status: String,
    },
}

/// Confirms a pending payment: marks the invoice paid, issues a receipt and
/// moves the subscription per [`status_after_payment`]. Runs on the caller's
/// transaction.
pub async fn confirm_payment(
    conn: &mut PgConnection,
    payment_id: i32,
    reviewer: Option<i32>,
    today: NaiveDate,
) -> Result<ConfirmOutcome, BillingError> {
    let payment = sqlx::query(
        r#"SELECT invoice_id, user_id, status, amount::text AS amount, currency
           FROM payments
           WHERE id = $1
           FOR UPDATE"#,
    )
    .bind(payment_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(BillingError::NotFound("payment"))?;

    let status: String = payment.get("status");
    if status != "pending" {
        return Ok(ConfirmOutcome::AlreadyProcessed { status });
    }

    let invoice_id: i32 = payment.get("invoice_id");
    let user_id: i32 = payment.get("user_id");
    let amount: String = payment.get("amount");
    let currency: String = payment.get("currency");

    // Subscription before invoice, the same order cancel and expiry use.
    let sub = sqlx::query(
        r#"SELECT s.id, s.status, p.billing_cycle_days
           FROM invoices i
           JOIN subscriptions s ON s.id = i.subscription_id
           JOIN subscription_plans p ON p.id = s.plan_id
           WHERE i.id = $1
           FOR UPDATE OF s"#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;
    let subscription_id: i32 = sub.get("id");
    let current: SubscriptionStatus = text_col(&sub, "status")?;
    let cycle: i32 = sub.get("billing_cycle_days");

    sqlx::query(
        r#"UPDATE payments
           SET status = 'confirmed', confirmed_at = NOW(), reviewed_by = $2
           WHERE id = $1"#,
    )
    .bind(payment_id)
    .bind(reviewer)
    .execute(&mut *conn)
    .await?;

    let invoice = sqlx::query(
        r#"UPDATE invoices
           SET status = 'paid', paid_at = NOW()
           WHERE id = $1
           RETURNING invoice_number"#,
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;
    let invoice_number: String = invoice.get("invoice_number");

    let receipt = sqlx::query_as::<_, Receipt>(&format!(
        r#"INSERT INTO receipts AS r
           (receipt_number, payment_id, invoice_id, user_id, amount, currency)
           VALUES ($1, $2, $3, $4, $5::numeric, $6)
           RETURNING {RECEIPT_COLUMNS}"#
    ))
    .bind(document_number("OR", today, Uuid::new_v4()))
    .bind(payment_id)
    .bind(invoice_id)
    .bind(user_id)
    .bind(&amount)
    .bind(&currency)
    .fetch_one(&mut *conn)
    .await?;

    let outstanding: i64 = sqlx::query_scalar(
        r#"SELECT COUNT(*) FROM invoices
           WHERE subscription_id = $1 AND status IN ('unpaid', 'overdue')"#,
    )
    .bind(subscription_id)
    .fetch_one(&mut *conn)
    .await?;

    let next = status_after_payment(current, outstanding > 0);
    match (current, next) {
        (SubscriptionStatus::PendingPayment, SubscriptionStatus::Active) => {
            // Service starts on the day the first invoice is paid.
            let period_end = today + Duration::days(i64::from(cycle));
            sqlx::query(
                r#"UPDATE subscriptions
                   SET status = 'active', current_period_start = $2, current_period_end = $3,
                       updated_at = NOW()
                   WHERE id = $1"#,
            )
            .bind(subscription_id)
            .bind(today)
            .bind(period_end)
            .execute(&mut *conn)
            .await?;

            sqlx::query(
                r#"UPDATE invoices SET period_start = $2, period_end = $3
                   WHERE id = $1"#,
            )
            .bind(invoice_id)
            .bind(today)
            .bind(period_end)
            .execute(&mut *conn)
            .await?;
        }
        (SubscriptionStatus::Suspended, SubscriptionStatus::Active) => {
            sqlx::query(
                r#"UPDATE subscriptions
                   SET status = 'active', suspended_at = NULL, suspended_on = NULL,
                       updated_at = NOW()
                   WHERE id = $1"#,
            )
            .bind(subscription_id)
            .execute(&mut *conn)
            .await?;
        }
        _ => {}
    }

    log::info!(
        "payment confirmed payment_id={payment_id} invoice={invoice_number} receipt={} subscription {current} -> {next}",
        receipt.receipt_number
    );

    Ok(ConfirmOutcome::Confirmed {
        user_id,
        receipt,
        invoice_number,
        subscription_status: next,
    })
}

async fn fetch_subscription(
    conn: &mut PgConnection,
    id: i32,
) -> Result<Subscription, sqlx::Error> {
    sqlx::query_as::<_, Subscription>(&format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions s WHERE s.id = $1"
    ))
    .bind(id)
    .fetch_one(conn)
    .await
}

async fn fetch_invoice(conn: &mut PgConnection, id: i32) -> Result<Invoice, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {INVOICE_COLUMNS} FROM invoices i WHERE i.id = $1"
    ))
    .bind(id)
    .fetch_one(conn)
    .await
}
