// src/models.rs

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Status-like columns are TEXT with a CHECK constraint; these enums mirror them.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(Role, "role", {
    Resident => "resident",
    Collector => "collector",
    Admin => "admin",
});

text_enum!(ApprovalStatus, "approval status", {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(SubscriptionStatus, "subscription status", {
    PendingPayment => "pending_payment",
    Active => "active",
    Suspended => "suspended",
    Cancelled => "cancelled",
});

text_enum!(InvoiceStatus, "invoice status", {
    Unpaid => "unpaid",
    Overdue => "overdue",
    Paid => "paid",
    Void => "void",
});

text_enum!(PaymentMethod, "payment method", {
    GcashManual => "gcash_manual",
    Paymongo => "paymongo",
});

text_enum!(PaymentStatus, "payment status", {
    Pending => "pending",
    Confirmed => "confirmed",
    Rejected => "rejected",
    Failed => "failed",
});

text_enum!(OcrStatus, "ocr status", {
    NotChecked => "not_checked",
    Matched => "matched",
    Mismatch => "mismatch",
    Unreadable => "unreadable",
});

text_enum!(CollectionStatus, "collection status", {
    Pending => "pending",
    InProgress => "in_progress",
    Collected => "collected",
    Missed => "missed",
});

text_enum!(WasteType, "waste type", {
    Biodegradable => "biodegradable",
    NonBiodegradable => "non_biodegradable",
    Recyclable => "recyclable",
    Residual => "residual",
    Mixed => "mixed",
});

pub(crate) fn text_col<T>(row: &PgRow, col: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = UnknownVariant>,
{
    let raw: String = row.try_get(col)?;
    raw.parse().map_err(|e| sqlx::Error::ColumnDecode {
        index: col.to_string(),
        source: Box::new(e),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub approval_status: ApprovalStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub const USER_COLUMNS: &str = "u.id, u.username, u.email, u.full_name, u.phone, u.role, \
     u.approval_status, u.rejection_reason, u.created_at";

impl FromRow<'_, PgRow> for User {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            username: r.try_get("username")?,
            email: r.try_get("email")?,
            full_name: r.try_get("full_name")?,
            phone: r.try_get("phone")?,
            role: text_col(r, "role")?,
            approval_status: text_col(r, "approval_status")?,
            rejection_reason: r.try_get("rejection_reason")?,
            created_at: r.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Barangay {
    pub id: i32,
    pub name: String,
    pub city: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Subdivision {
    pub id: i32,
    pub barangay_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Address {
    pub id: i32,
    pub user_id: i32,
    pub barangay_id: i32,
    pub barangay_name: String,
    pub subdivision_id: Option<i32>,
    pub subdivision_name: Option<String>,
    pub street: String,
    pub block_lot: Option<String>,
    pub landmark: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Collector {
    pub id: i32,
    pub user_id: i32,
    pub username: String,
    pub full_name: String,
    pub vehicle_plate: Option<String>,
    pub is_active: bool,
    pub barangays: Vec<Barangay>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionPlan {
    pub id: i32,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub price: String,
    pub currency: String,
    pub billing_cycle_days: i32,
    pub pickups_per_week: i32,
    pub is_active: bool,
}

pub const PLAN_COLUMNS: &str = "p.id, p.slug, p.name, p.description, p.price::text AS price, \
     p.currency, p.billing_cycle_days, p.pickups_per_week, p.is_active";

impl FromRow<'_, PgRow> for SubscriptionPlan {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            slug: r.try_get("slug")?,
            name: r.try_get("name")?,
            description: r.try_get("description")?,
            price: r.try_get("price")?,
            currency: r.try_get("currency")?,
            billing_cycle_days: r.try_get("billing_cycle_days")?,
            pickups_per_week: r.try_get("pickups_per_week")?,
            is_active: r.try_get("is_active")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i32,
    pub user_id: i32,
    pub plan_id: i32,
    pub status: SubscriptionStatus,
    pub current_period_start: NaiveDate,
    pub current_period_end: NaiveDate,
    pub suspended_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const SUBSCRIPTION_COLUMNS: &str = "s.id, s.user_id, s.plan_id, s.status, \
     s.current_period_start, s.current_period_end, s.suspended_at, s.cancelled_at, s.created_at";

impl FromRow<'_, PgRow> for Subscription {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            user_id: r.try_get("user_id")?,
            plan_id: r.try_get("plan_id")?,
            status: text_col(r, "status")?,
            current_period_start: r.try_get("current_period_start")?,
            current_period_end: r.try_get("current_period_end")?,
            suspended_at: r.try_get("suspended_at")?,
            cancelled_at: r.try_get("cancelled_at")?,
            created_at: r.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: i32,
    pub invoice_number: String,
    pub subscription_id: i32,
    pub user_id: i32,
    pub amount: String,
    pub currency: String,
    pub status: InvoiceStatus,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const INVOICE_COLUMNS: &str = "i.id, i.invoice_number, i.subscription_id, i.user_id, \
     i.amount::text AS amount, i.currency, i.status, i.period_start, i.period_end, i.due_date, \
     i.paid_at, i.created_at";

impl FromRow<'_, PgRow> for Invoice {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            invoice_number: r.try_get("invoice_number")?,
            subscription_id: r.try_get("subscription_id")?,
            user_id: r.try_get("user_id")?,
            amount: r.try_get("amount")?,
            currency: r.try_get("currency")?,
            status: text_col(r, "status")?,
            period_start: r.try_get("period_start")?,
            period_end: r.try_get("period_end")?,
            due_date: r.try_get("due_date")?,
            paid_at: r.try_get("paid_at")?,
            created_at: r.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: i32,
    pub invoice_id: i32,
    pub user_id: i32,
    pub method: PaymentMethod,
    pub provider_reference: String,
    pub amount: String,
    pub currency: String,
    pub status: PaymentStatus,
    pub receipt_image_url: Option<String>,
    pub ocr_status: OcrStatus,
    pub ocr_details: Option<serde_json::Value>,
    pub review_note: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const PAYMENT_COLUMNS: &str = "pm.id, pm.invoice_id, pm.user_id, pm.method, \
     pm.provider_reference, pm.amount::text AS amount, pm.currency, pm.status, \
     pm.receipt_image_url, pm.ocr_status, pm.ocr_details, pm.review_note, pm.confirmed_at, \
     pm.created_at";

impl FromRow<'_, PgRow> for Payment {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            invoice_id: r.try_get("invoice_id")?,
            user_id: r.try_get("user_id")?,
            method: text_col(r, "method")?,
            provider_reference: r.try_get("provider_reference")?,
            amount: r.try_get("amount")?,
            currency: r.try_get("currency")?,
            status: text_col(r, "status")?,
            receipt_image_url: r.try_get("receipt_image_url")?,
            ocr_status: text_col(r, "ocr_status")?,
            ocr_details: r.try_get("ocr_details")?,
            review_note: r.try_get("review_note")?,
            confirmed_at: r.try_get("confirmed_at")?,
            created_at: r.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Receipt {
    pub id: i32,
    pub receipt_number: String,
    pub payment_id: i32,
    pub invoice_id: i32,
    pub user_id: i32,
    pub amount: String,
    pub currency: String,
    pub issued_at: DateTime<Utc>,
}

pub const RECEIPT_COLUMNS: &str = "r.id, r.receipt_number, r.payment_id, r.invoice_id, \
     r.user_id, r.amount::text AS amount, r.currency, r.issued_at";

#[derive(Debug, Clone, Serialize)]
pub struct CollectionSchedule {
    pub id: i32,
    pub barangay_id: i32,
    /// 0 = Monday … 6 = Sunday.
    pub weekday: i16,
    pub waste_type: WasteType,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
}

pub const SCHEDULE_COLUMNS: &str =
    "cs.id, cs.barangay_id, cs.weekday, cs.waste_type, cs.start_time, cs.end_time, cs.is_active";

impl FromRow<'_, PgRow> for CollectionSchedule {
    fn from_row(r: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: r.try_get("id")?,
            barangay_id: r.try_get("barangay_id")?,
            weekday: r.try_get("weekday")?,
            waste_type: text_col(r, "waste_type")?,
            start_time: r.try_get("start_time")?,
            end_time: r.try_get("end_time")?,
            is_active: r.try_get("is_active")?,
        })
    }
}

/// A schedule together with its status for one calendar day.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDay {
    #[serde(flatten)]
    pub schedule: CollectionSchedule,
    pub barangay_name: String,
    pub collection_date: NaiveDate,
    pub status: CollectionStatus,
    pub note: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_use_column_spelling() {
        assert_eq!(SubscriptionStatus::PendingPayment.as_str(), "pending_payment");
        assert_eq!(
            "non_biodegradable".parse::<WasteType>().unwrap(),
            WasteType::NonBiodegradable
        );
        assert_eq!(
            serde_json::to_string(&CollectionStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn unknown_text_is_rejected() {
        let err = "deleted".parse::<PaymentStatus>().unwrap_err();
        assert_eq!(err.to_string(), "unknown payment status value: deleted");
    }
}
