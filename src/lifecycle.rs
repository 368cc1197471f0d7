// src/lifecycle.rs
//
// Date-threshold job over subscriptions: marks invoices overdue, renews
// billing periods, suspends for non-payment and cancels long suspensions.

use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::billing::document_number;
use crate::mailer::{templates, Mailer};
use crate::models::{text_col, SubscriptionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub invoice_due_days: i64,
    pub suspend_grace_days: i64,
    pub cancel_after_suspended_days: i64,
    pub pending_expiry_days: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            invoice_due_days: 7,
            suspend_grace_days: 3,
            cancel_after_suspended_days: 30,
            pending_expiry_days: 14,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub status: SubscriptionStatus,
    pub created_on: NaiveDate,
    pub current_period_end: NaiveDate,
    pub billing_cycle_days: i64,
    pub suspended_on: Option<NaiveDate>,
    /// Earliest due date among unpaid or overdue invoices.
    pub oldest_outstanding_due: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    None,
    /// First invoice never paid; the subscription is dropped.
    Expire,
    Suspend,
    Cancel,
    Renew {
        period_start: NaiveDate,
        period_end: NaiveDate,
        due_date: NaiveDate,
    },
}

pub fn next_transition(
    snapshot: &SubscriptionSnapshot,
    today: NaiveDate,
    policy: &LifecyclePolicy,
) -> Transition {
    match snapshot.status {
        SubscriptionStatus::PendingPayment => {
            if (today - snapshot.created_on).num_days() >= policy.pending_expiry_days {
                Transition::Expire
            } else {
                Transition::None
            }
        }
        SubscriptionStatus::Active => {
            let past_grace = snapshot
                .oldest_outstanding_due
                .is_some_and(|due| (today - due).num_days() > policy.suspend_grace_days);
            if past_grace {
                return Transition::Suspend;
            }
            if snapshot.current_period_end <= today {
                let period_start = snapshot.current_period_end;
                return Transition::Renew {
                    period_start,
                    period_end: period_start + Duration::days(snapshot.billing_cycle_days),
                    due_date: period_start + Duration::days(policy.invoice_due_days),
                };
            }
            Transition::None
        }
        SubscriptionStatus::Suspended => {
            let suspended_on = snapshot.suspended_on.unwrap_or(today);
            if (today - suspended_on).num_days() >= policy.cancel_after_suspended_days {
                Transition::Cancel
            } else {
                Transition::None
            }
        }
        SubscriptionStatus::Cancelled => Transition::None,
    }
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct LifecycleReport {
    pub overdue: u64,
    pub renewed: u64,
    pub suspended: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub failed: u64,
}

struct Candidate {
    subscription_id: i32,
    user_id: i32,
    email: String,
    full_name: String,
    price: String,
    currency: String,
    snapshot: SubscriptionSnapshot,
}

pub async fn run_once(
    pool: &PgPool,
    policy: &LifecyclePolicy,
    today: NaiveDate,
    mailer: &Mailer,
) -> Result<LifecycleReport, sqlx::Error> {
    let mut report = LifecycleReport::default();

    report.overdue = sqlx::query(
        r#"UPDATE invoices
           SET status = 'overdue'
           WHERE status = 'unpaid' AND due_date < $1"#,
    )
    .bind(today)
    .execute(pool)
    .await?
    .rows_affected();

    for candidate in load_candidates(pool).await? {
        let transition = next_transition(&candidate.snapshot, today, policy);
        if transition == Transition::None {
            continue;
        }

        match apply(pool, &candidate, &transition, today).await {
            Ok(false) => {}
            Ok(true) => {
                match &transition {
                    Transition::Expire => report.expired += 1,
                    Transition::Suspend => report.suspended += 1,
                    Transition::Cancel => report.cancelled += 1,
                    Transition::Renew { .. } => report.renewed += 1,
                    Transition::None => {}
                }
                notify(mailer, &candidate, &transition).await;
            }
            Err(e) => {
                report.failed += 1;
                log::error!(
                    "lifecycle transition {:?} failed subscription_id={}: {e}",
                    transition,
                    candidate.subscription_id
                );
            }
        }
    }

    log::info!(
        "lifecycle run {today}: overdue={} renewed={} suspended={} cancelled={} expired={} failed={}",
        report.overdue,
        report.renewed,
        report.suspended,
        report.cancelled,
        report.expired,
        report.failed
    );

    Ok(report)
}

async fn load_candidates(pool: &PgPool) -> Result<Vec<Candidate>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT s.id, s.user_id, s.status, s.created_on,
                  s.current_period_end, s.suspended_on,
                  p.billing_cycle_days, p.price::text AS price, p.currency,
                  u.email, u.full_name,
                  (SELECT MIN(i.due_date) FROM invoices i
                   WHERE i.subscription_id = s.id
                     AND i.status IN ('unpaid', 'overdue')) AS oldest_due
           FROM subscriptions s
           JOIN subscription_plans p ON p.id = s.plan_id
           JOIN users u ON u.id = s.user_id
           WHERE s.status <> 'cancelled'
           ORDER BY s.id"#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            let cycle: i32 = r.try_get("billing_cycle_days")?;
            Ok(Candidate {
                subscription_id: r.try_get("id")?,
                user_id: r.try_get("user_id")?,
                email: r.try_get("email")?,
                full_name: r.try_get("full_name")?,
                price: r.try_get("price")?,
                currency: r.try_get("currency")?,
                snapshot: SubscriptionSnapshot {
                    status: text_col(r, "status")?,
                    created_on: r.try_get("created_on")?,
                    current_period_end: r.try_get("current_period_end")?,
                    billing_cycle_days: i64::from(cycle),
                    suspended_on: r.try_get("suspended_on")?,
                    oldest_outstanding_due: r.try_get("oldest_due")?,
                },
            })
        })
        .collect()
}

/// Returns whether the transition took effect. Each guard re-checks the
/// status so a concurrent payment wins over a stale snapshot.
async fn apply(
    pool: &PgPool,
    candidate: &Candidate,
    transition: &Transition,
    today: NaiveDate,
) -> Result<bool, sqlx::Error> {
    let id = candidate.subscription_id;
    let mut tx = pool.begin().await?;

    let applied = match transition {
        Transition::None => false,
        Transition::Expire => {
            let updated = sqlx::query(
                r#"UPDATE subscriptions
                   SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
                   WHERE id = $1 AND status = 'pending_payment'"#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 1 {
                sqlx::query(
                    r#"UPDATE invoices SET status = 'void'
                       WHERE subscription_id = $1 AND status IN ('unpaid', 'overdue')"#,
                )
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }

            updated == 1
        }
        Transition::Suspend => {
            sqlx::query(
                r#"UPDATE subscriptions
                   SET status = 'suspended', suspended_at = NOW(), suspended_on = $2,
                       updated_at = NOW()
                   WHERE id = $1 AND status = 'active'"#,
            )
            .bind(id)
            .bind(today)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1
        }
        Transition::Cancel => {
            sqlx::query(
                r#"UPDATE subscriptions
                   SET status = 'cancelled', cancelled_at = NOW(), updated_at = NOW()
                   WHERE id = $1 AND status = 'suspended'"#,
            )
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1
        }
        Transition::Renew {
            period_start,
            period_end,
            due_date,
        } => {
            let advanced = sqlx::query(
                r#"UPDATE subscriptions
                   SET current_period_start = $2, current_period_end = $3, updated_at = NOW()
                   WHERE id = $1 AND status = 'active' AND current_period_end = $2"#,
            )
            .bind(id)
            .bind(*period_start)
            .bind(*period_end)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if advanced == 1 {
                sqlx::query(
                    r#"INSERT INTO invoices
                       (invoice_number, subscription_id, user_id, amount, currency, status,
                        period_start, period_end, due_date)
                       VALUES ($1, $2, $3, $4::numeric, $5, 'unpaid', $6, $7, $8)
                       ON CONFLICT (subscription_id, period_start) DO NOTHING"#,
                )
                .bind(document_number("INV", *period_start, Uuid::new_v4()))
                .bind(id)
                .bind(candidate.user_id)
                .bind(&candidate.price)
                .bind(&candidate.currency)
                .bind(*period_start)
                .bind(*period_end)
                .bind(*due_date)
                .execute(&mut *tx)
                .await?;
            }

            advanced == 1
        }
    };

    tx.commit().await?;
    Ok(applied)
}

async fn notify(mailer: &Mailer, candidate: &Candidate, transition: &Transition) {
    let email = match transition {
        Transition::Suspend => templates::subscription_suspended(&candidate.full_name),
        Transition::Cancel | Transition::Expire => {
            templates::subscription_cancelled(&candidate.full_name)
        }
        Transition::Renew { due_date, .. } => templates::invoice_issued(
            &candidate.full_name,
            &candidate.price,
            &candidate.currency,
            *due_date,
        ),
        Transition::None => return,
    };

    if let Err(e) = mailer
        .send(email.to(&candidate.email, &candidate.full_name))
        .await
    {
        log::warn!(
            "lifecycle email failed user_id={} subscription_id={}: {e}",
            candidate.user_id,
            candidate.subscription_id
        );
    }
}

/// Runs the job in the background every `interval_secs`.
pub fn spawn(pool: PgPool, policy: LifecyclePolicy, mailer: Mailer, interval_secs: u64) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = run_once(&pool, &policy, crate::local_today(), &mailer).await {
                log::error!("lifecycle run error: {e}");
            }
            tokio::time::sleep(StdDuration::from_secs(interval_secs)).await;
        }
    });
}
