// src/collections.rs
//
// Collection schedules and the per-day status label store.

use chrono::{Datelike, NaiveDate, NaiveTime};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;

use crate::error::ApiError;
use crate::models::{
    text_col, CollectionSchedule, CollectionStatus, ScheduleDay, WasteType, SCHEDULE_COLUMNS,
};

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("schedule not found")]
    NotFound,

    #[error("not scheduled today")]
    NotScheduledToday,

    #[error("collector is not assigned to this barangay")]
    NotAssigned,

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl From<CollectionError> for ApiError {
    fn from(e: CollectionError) -> Self {
        match e {
            CollectionError::NotFound => ApiError::not_found(e.to_string()),
            CollectionError::NotScheduledToday => ApiError::bad_request(e.to_string()),
            CollectionError::NotAssigned => ApiError::forbidden(e.to_string()),
            CollectionError::Db(e) => ApiError::from(e),
        }
    }
}

/// 0 = Monday … 6 = Sunday.
pub fn weekday_index(date: NaiveDate) -> i16 {
    date.weekday().num_days_from_monday() as i16
}

/// A stored label only counts for its own date; every new day starts pending.
pub fn status_for(
    date: NaiveDate,
    stored: Option<(NaiveDate, CollectionStatus)>,
) -> CollectionStatus {
    match stored {
        Some((stored_date, status)) if stored_date == date => status,
        _ => CollectionStatus::Pending,
    }
}

/// `HH:MM`, 24-hour.
pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub barangay_id: i32,
    pub weekday: i16,
    pub waste_type: WasteType,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl NewSchedule {
    pub fn parse(
        barangay_id: i32,
        weekday: i16,
        waste_type: WasteType,
        start_time: &str,
        end_time: &str,
    ) -> Result<Self, ApiError> {
        if !(0..=6).contains(&weekday) {
            return Err(ApiError::bad_request("weekday must be 0 (Monday) to 6 (Sunday)"));
        }
        let start_time = parse_time(start_time)
            .ok_or_else(|| ApiError::bad_request("start_time must be HH:MM"))?;
        let end_time =
            parse_time(end_time).ok_or_else(|| ApiError::bad_request("end_time must be HH:MM"))?;
        if start_time >= end_time {
            return Err(ApiError::bad_request("start_time must be before end_time"));
        }

        Ok(Self {
            barangay_id,
            weekday,
            waste_type,
            start_time,
            end_time,
        })
    }
}

pub async fn create_schedule(
    pool: &PgPool,
    new: &NewSchedule,
) -> Result<CollectionSchedule, sqlx::Error> {
    sqlx::query_as::<_, CollectionSchedule>(&format!(
        r#"INSERT INTO collection_schedules AS cs
           (barangay_id, weekday, waste_type, start_time, end_time)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING {SCHEDULE_COLUMNS}"#
    ))
    .bind(new.barangay_id)
    .bind(new.weekday)
    .bind(new.waste_type.as_str())
    .bind(new.start_time)
    .bind(new.end_time)
    .fetch_one(pool)
    .await
}

pub async fn list_schedules(
    pool: &PgPool,
    barangay_id: Option<i32>,
) -> Result<Vec<CollectionSchedule>, sqlx::Error> {
    sqlx::query_as::<_, CollectionSchedule>(&format!(
        r#"SELECT {SCHEDULE_COLUMNS}
           FROM collection_schedules cs
           WHERE ($1::int IS NULL OR cs.barangay_id = $1)
           ORDER BY cs.barangay_id, cs.weekday, cs.start_time"#
    ))
    .bind(barangay_id)
    .fetch_all(pool)
    .await
}

/// Soft delete. Returns false when the schedule does not exist.
pub async fn deactivate_schedule(pool: &PgPool, id: i32) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE collection_schedules SET is_active = false WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn weekly_schedule(
    pool: &PgPool,
    barangay_id: i32,
) -> Result<Vec<CollectionSchedule>, sqlx::Error> {
    sqlx::query_as::<_, CollectionSchedule>(&format!(
        r#"SELECT {SCHEDULE_COLUMNS}
           FROM collection_schedules cs
           WHERE cs.barangay_id = $1 AND cs.is_active = true
           ORDER BY cs.weekday, cs.start_time"#
    ))
    .bind(barangay_id)
    .fetch_all(pool)
    .await
}

pub async fn resident_barangay(pool: &PgPool, user_id: i32) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar("SELECT barangay_id FROM addresses WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn collector_barangay_ids(
    pool: &PgPool,
    collector_id: i32,
) -> Result<Vec<i32>, sqlx::Error> {
    sqlx::query_scalar("SELECT barangay_id FROM collector_assignments WHERE collector_id = $1")
        .bind(collector_id)
        .fetch_all(pool)
        .await
}

const SCHEDULE_DAY_SELECT: &str = r#"SELECT cs.id, cs.barangay_id, cs.weekday, cs.waste_type,
                  cs.start_time, cs.end_time, cs.is_active,
                  b.name AS barangay_name,
                  st.collection_date AS stored_date, st.status AS stored_status,
                  st.note, st.updated_at
           FROM collection_schedules cs
           JOIN barangays b ON b.id = cs.barangay_id
           LEFT JOIN collection_status st
                  ON st.schedule_id = cs.id AND st.collection_date = $2"#;

fn schedule_day(row: &PgRow, date: NaiveDate) -> Result<ScheduleDay, sqlx::Error> {
    let stored_date: Option<NaiveDate> = row.try_get("stored_date")?;
    let stored = match stored_date {
        Some(d) => Some((d, text_col::<CollectionStatus>(row, "stored_status")?)),
        None => None,
    };

    Ok(ScheduleDay {
        schedule: CollectionSchedule {
            id: row.try_get("id")?,
            barangay_id: row.try_get("barangay_id")?,
            weekday: row.try_get("weekday")?,
            waste_type: text_col(row, "waste_type")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            is_active: row.try_get("is_active")?,
        },
        barangay_name: row.try_get("barangay_name")?,
        collection_date: date,
        status: status_for(date, stored),
        note: row.try_get("note")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Active schedules falling on `date` in the given barangays, each with its status for that date.
pub async fn schedules_for_day(
    pool: &PgPool,
    barangay_ids: &[i32],
    date: NaiveDate,
) -> Result<Vec<ScheduleDay>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"{SCHEDULE_DAY_SELECT}
           WHERE cs.barangay_id = ANY($1) AND cs.weekday = $3 AND cs.is_active = true
           ORDER BY b.name, cs.start_time"#
    ))
    .bind(barangay_ids)
    .bind(date)
    .bind(weekday_index(date))
    .fetch_all(pool)
    .await?;

    rows.iter().map(|r| schedule_day(r, date)).collect()
}

/// Sets today's label for a schedule on behalf of a collector.
pub async fn update_status(
    pool: &PgPool,
    collector_id: i32,
    schedule_id: i32,
    status: CollectionStatus,
    note: Option<&str>,
    today: NaiveDate,
) -> Result<ScheduleDay, CollectionError> {
    let schedule = sqlx::query(
        "SELECT barangay_id, weekday FROM collection_schedules WHERE id = $1 AND is_active = true",
    )
    .bind(schedule_id)
    .fetch_optional(pool)
    .await?
    .ok_or(CollectionError::NotFound)?;

    let weekday: i16 = schedule.get("weekday");
    if weekday != weekday_index(today) {
        return Err(CollectionError::NotScheduledToday);
    }

    let barangay_id: i32 = schedule.get("barangay_id");
    let assigned: bool = sqlx::query_scalar(
        r#"SELECT EXISTS (
               SELECT 1 FROM collector_assignments
               WHERE collector_id = $1 AND barangay_id = $2)"#,
    )
    .bind(collector_id)
    .bind(barangay_id)
    .fetch_one(pool)
    .await?;
    if !assigned {
        return Err(CollectionError::NotAssigned);
    }

    sqlx::query(
        r#"INSERT INTO collection_status (schedule_id, collection_date, status, collector_id, note)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT (schedule_id, collection_date) DO UPDATE SET
               status = EXCLUDED.status,
               collector_id = EXCLUDED.collector_id,
               note = EXCLUDED.note,
               updated_at = NOW()"#,
    )
    .bind(schedule_id)
    .bind(today)
    .bind(status.as_str())
    .bind(collector_id)
    .bind(note)
    .execute(pool)
    .await?;

    let row = sqlx::query(&format!("{SCHEDULE_DAY_SELECT} WHERE cs.id = $1"))
        .bind(schedule_id)
        .bind(today)
        .fetch_one(pool)
        .await?;

    log::info!(
        "collection status schedule_id={schedule_id} date={today} status={status} collector_id={collector_id}"
    );
    Ok(schedule_day(&row, today)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn status_resets_on_a_new_day() {
        let today = date(2026, 10, 15);
        let yesterday = date(2026, 10, 14);

        assert_eq!(status_for(today, None), CollectionStatus::Pending);
        assert_eq!(
            status_for(today, Some((today, CollectionStatus::Collected))),
            CollectionStatus::Collected
        );
        assert_eq!(
            status_for(today, Some((yesterday, CollectionStatus::Missed))),
            CollectionStatus::Pending
        );
    }

    #[test]
    fn weekday_index_starts_on_monday() {
        assert_eq!(weekday_index(date(2026, 10, 12)), 0);
        assert_eq!(weekday_index(date(2026, 10, 15)), 3);
        assert_eq!(weekday_index(date(2026, 10, 18)), 6);
    }

    #[test]
    fn new_schedule_validation() {
        assert!(NewSchedule::parse(1, 2, WasteType::Mixed, "06:00", "09:30").is_ok());
        assert!(NewSchedule::parse(1, 7, WasteType::Mixed, "06:00", "09:30").is_err());
        assert!(NewSchedule::parse(1, 2, WasteType::Mixed, "09:30", "06:00").is_err());
        assert!(NewSchedule::parse(1, 2, WasteType::Mixed, "6am", "09:30").is_err());
    }
}
