// src/db.rs

use std::collections::HashMap;

use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::error::ApiError;
use crate::models::{
    Address, ApprovalStatus, Barangay, Collector, Invoice, InvoiceStatus, Payment, Receipt,
    Role, Subdivision, Subscription, SubscriptionPlan, User, INVOICE_COLUMNS, PAYMENT_COLUMNS,
    PLAN_COLUMNS, RECEIPT_COLUMNS, SUBSCRIPTION_COLUMNS, USER_COLUMNS,
};

const ADDRESS_SELECT: &str = r#"SELECT a.id, a.user_id, a.barangay_id, b.name AS barangay_name,
                  a.subdivision_id, sd.name AS subdivision_name,
                  a.street, a.block_lot, a.landmark
           FROM addresses a
           JOIN barangays b ON b.id = a.barangay_id
           LEFT JOIN subdivisions sd ON sd.id = a.subdivision_id"#;

pub async fn get_user(pool: &PgPool, id: i32) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_users(
    pool: &PgPool,
    role: Option<Role>,
    status: Option<ApprovalStatus>,
) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"SELECT {USER_COLUMNS}
           FROM users u
           WHERE ($1::text IS NULL OR u.role = $1)
             AND ($2::text IS NULL OR u.approval_status = $2)
           ORDER BY u.created_at DESC"#
    ))
    .bind(role.map(|r| r.as_str()))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await
}

pub async fn get_address(pool: &PgPool, user_id: i32) -> Result<Option<Address>, sqlx::Error> {
    sqlx::query_as::<_, Address>(&format!("{ADDRESS_SELECT} WHERE a.user_id = $1"))
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Barangay must exist and the subdivision, if any, must belong to it.
pub async fn check_location(
    pool: &PgPool,
    barangay_id: i32,
    subdivision_id: Option<i32>,
) -> Result<(), ApiError> {
    let barangay_exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM barangays WHERE id = $1)")
            .bind(barangay_id)
            .fetch_one(pool)
            .await?;
    if !barangay_exists {
        return Err(ApiError::bad_request("unknown barangay"));
    }

    if let Some(subdivision_id) = subdivision_id {
        let belongs: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM subdivisions WHERE id = $1 AND barangay_id = $2)",
        )
        .bind(subdivision_id)
        .bind(barangay_id)
        .fetch_one(pool)
        .await?;
        if !belongs {
            return Err(ApiError::bad_request(
                "subdivision does not belong to barangay",
            ));
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
pub struct BarangayWithSubdivisions {
    #[serde(flatten)]
    pub barangay: Barangay,
    pub subdivisions: Vec<Subdivision>,
}

pub async fn list_barangays(pool: &PgPool) -> Result<Vec<BarangayWithSubdivisions>, sqlx::Error> {
    let barangays = sqlx::query_as::<_, Barangay>("SELECT id, name, city FROM barangays ORDER BY name")
        .fetch_all(pool)
        .await?;
    let subdivisions = sqlx::query_as::<_, Subdivision>(
        "SELECT id, barangay_id, name FROM subdivisions ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut by_barangay: HashMap<i32, Vec<Subdivision>> = HashMap::new();
    for sd in subdivisions {
        by_barangay.entry(sd.barangay_id).or_default().push(sd);
    }

    Ok(barangays
        .into_iter()
        .map(|b| BarangayWithSubdivisions {
            subdivisions: by_barangay.remove(&b.id).unwrap_or_default(),
            barangay: b,
        })
        .collect())
}

#[derive(Debug, Serialize)]
pub struct PendingRegistration {
    #[serde(flatten)]
    pub user: User,
    pub address: Option<Address>,
}

pub async fn list_pending_registrations(
    pool: &PgPool,
) -> Result<Vec<PendingRegistration>, sqlx::Error> {
    let users = sqlx::query_as::<_, User>(&format!(
        r#"SELECT {USER_COLUMNS}
           FROM users u
           WHERE u.role = 'resident' AND u.approval_status = 'pending'
           ORDER BY u.created_at ASC, u.id ASC"#
    ))
    .fetch_all(pool)
    .await?;

    let ids: Vec<i32> = users.iter().map(|u| u.id).collect();
    let addresses = sqlx::query_as::<_, Address>(&format!("{ADDRESS_SELECT} WHERE a.user_id = ANY($1)"))
        .bind(&ids)
        .fetch_all(pool)
        .await?;
    let mut by_user: HashMap<i32, Address> =
        addresses.into_iter().map(|a| (a.user_id, a)).collect();

    Ok(users
        .into_iter()
        .map(|user| PendingRegistration {
            address: by_user.remove(&user.id),
            user,
        })
        .collect())
}

/// Approves or rejects a pending resident. `None` when no such pending resident exists.
pub async fn decide_registration(
    pool: &PgPool,
    user_id: i32,
    decision: ApprovalStatus,
    reason: Option<&str>,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"UPDATE users AS u
           SET approval_status = $2, rejection_reason = $3, updated_at = NOW()
           WHERE u.id = $1 AND u.role = 'resident' AND u.approval_status = 'pending'
           RETURNING {USER_COLUMNS}"#
    ))
    .bind(user_id)
    .bind(decision.as_str())
    .bind(reason)
    .fetch_optional(pool)
    .await
}

async fn collector_barangays(pool: &PgPool, collector_id: i32) -> Result<Vec<Barangay>, sqlx::Error> {
    sqlx::query_as::<_, Barangay>(
        r#"SELECT b.id, b.name, b.city
           FROM collector_assignments ca
           JOIN barangays b ON b.id = ca.barangay_id
           WHERE ca.collector_id = $1
           ORDER BY b.name"#,
    )
    .bind(collector_id)
    .fetch_all(pool)
    .await
}

async fn find_collectors(
    pool: &PgPool,
    id: Option<i32>,
    user_id: Option<i32>,
) -> Result<Vec<Collector>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT c.id, c.user_id, u.username, u.full_name, c.vehicle_plate, c.is_active
           FROM collectors c
           JOIN users u ON u.id = c.user_id
           WHERE ($1::int IS NULL OR c.id = $1)
             AND ($2::int IS NULL OR c.user_id = $2)
           ORDER BY u.full_name"#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut collectors = Vec::with_capacity(rows.len());
    for r in rows {
        let collector_id: i32 = r.get("id");
        collectors.push(Collector {
            id: collector_id,
            user_id: r.get("user_id"),
            username: r.get("username"),
            full_name: r.get("full_name"),
            vehicle_plate: r.get("vehicle_plate"),
            is_active: r.get("is_active"),
            barangays: collector_barangays(pool, collector_id).await?,
        });
    }
    Ok(collectors)
}

pub async fn list_collectors(pool: &PgPool) -> Result<Vec<Collector>, sqlx::Error> {
    find_collectors(pool, None, None).await
}

pub async fn get_collector(pool: &PgPool, id: i32) -> Result<Option<Collector>, sqlx::Error> {
    Ok(find_collectors(pool, Some(id), None).await?.into_iter().next())
}

pub async fn get_collector_by_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<Collector>, sqlx::Error> {
    Ok(find_collectors(pool, None, Some(user_id))
        .await?
        .into_iter()
        .next())
}

pub async fn list_active_plans(pool: &PgPool) -> Result<Vec<SubscriptionPlan>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionPlan>(&format!(
        r#"SELECT {PLAN_COLUMNS}
           FROM subscription_plans p
           WHERE p.is_active = true
           ORDER BY p.price ASC"#
    ))
    .fetch_all(pool)
    .await
}

pub async fn get_plan(pool: &PgPool, id: i32) -> Result<Option<SubscriptionPlan>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionPlan>(&format!(
        "SELECT {PLAN_COLUMNS} FROM subscription_plans p WHERE p.id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// The caller's subscription that is not cancelled, with its plan.
pub async fn get_live_subscription(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<(Subscription, SubscriptionPlan)>, sqlx::Error> {
    let subscription = sqlx::query_as::<_, Subscription>(&format!(
        r#"SELECT {SUBSCRIPTION_COLUMNS}
           FROM subscriptions s
           WHERE s.user_id = $1 AND s.status <> 'cancelled'"#
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    let Some(subscription) = subscription else {
        return Ok(None);
    };
    let plan = get_plan(pool, subscription.plan_id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(Some((subscription, plan)))
}

pub async fn list_user_invoices(pool: &PgPool, user_id: i32) -> Result<Vec<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        r#"SELECT {INVOICE_COLUMNS}
           FROM invoices i
           WHERE i.user_id = $1
           ORDER BY i.created_at DESC, i.id DESC"#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_invoice(pool: &PgPool, id: i32) -> Result<Option<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!("SELECT {INVOICE_COLUMNS} FROM invoices i WHERE i.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_invoices(
    pool: &PgPool,
    status: Option<InvoiceStatus>,
) -> Result<Vec<Invoice>, sqlx::Error> {
    sqlx::query_as::<_, Invoice>(&format!(
        r#"SELECT {INVOICE_COLUMNS}
           FROM invoices i
           WHERE ($1::text IS NULL OR i.status = $1)
           ORDER BY i.due_date DESC, i.id DESC"#
    ))
    .bind(status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await
}

pub async fn list_invoice_payments(
    pool: &PgPool,
    invoice_id: i32,
) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"SELECT {PAYMENT_COLUMNS}
           FROM payments pm
           WHERE pm.invoice_id = $1
           ORDER BY pm.created_at DESC"#
    ))
    .bind(invoice_id)
    .fetch_all(pool)
    .await
}

pub async fn list_invoice_receipts(
    pool: &PgPool,
    invoice_id: i32,
) -> Result<Vec<Receipt>, sqlx::Error> {
    sqlx::query_as::<_, Receipt>(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts r WHERE r.invoice_id = $1 ORDER BY r.issued_at"
    ))
    .bind(invoice_id)
    .fetch_all(pool)
    .await
}

pub async fn list_user_receipts(pool: &PgPool, user_id: i32) -> Result<Vec<Receipt>, sqlx::Error> {
    sqlx::query_as::<_, Receipt>(&format!(
        "SELECT {RECEIPT_COLUMNS} FROM receipts r WHERE r.user_id = $1 ORDER BY r.issued_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn get_payment(pool: &PgPool, id: i32) -> Result<Option<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!("SELECT {PAYMENT_COLUMNS} FROM payments pm WHERE pm.id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_user_payments(pool: &PgPool, user_id: i32) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"SELECT {PAYMENT_COLUMNS}
           FROM payments pm
           WHERE pm.user_id = $1
           ORDER BY pm.created_at DESC"#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn list_pending_manual_payments(pool: &PgPool) -> Result<Vec<Payment>, sqlx::Error> {
    sqlx::query_as::<_, Payment>(&format!(
        r#"SELECT {PAYMENT_COLUMNS}
           FROM payments pm
           WHERE pm.method = 'gcash_manual' AND pm.status = 'pending'
           ORDER BY pm.created_at ASC"#
    ))
    .fetch_all(pool)
    .await
}
