use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_models::AppError;

pub const MIN_DURATION_MINUTES: i32 = 5;
pub const MAX_DURATION_MINUTES: i32 = 480;
pub const DEFAULT_DURATION_MINUTES: i32 = 30;
pub const DEFAULT_BUFFER_MINUTES: i32 = 0;
pub const DEFAULT_ADVANCE_BOOKING_DAYS: i32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Recurring,
    OneOff,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Recurring => write!(f, "recurring"),
            RuleKind::OneOff => write!(f, "one_off"),
        }
    }
}

/// A declarative availability window for one doctor. Recurring rules carry a
/// day-of-week, a time-of-day range and a validity date range; one-off rules
/// carry an absolute UTC interval. The unused field group stays `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub kind: RuleKind,
    pub day_of_week: Option<i32>, // 0 = Sunday, 1 = Monday, etc.
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>, // None = open-ended
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityRule {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self.kind {
            RuleKind::Recurring => {
                let day = self.day_of_week.ok_or_else(|| {
                    ScheduleError::Validation("Recurring rule requires day_of_week".to_string())
                })?;
                if !(0..=6).contains(&day) {
                    return Err(ScheduleError::Validation(
                        "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                    ));
                }
                let (start, end) = match (self.start_time, self.end_time) {
                    (Some(start), Some(end)) => (start, end),
                    _ => {
                        return Err(ScheduleError::Validation(
                            "Recurring rule requires start_time and end_time".to_string(),
                        ))
                    }
                };
                if start >= end {
                    return Err(ScheduleError::Validation(
                        "Start time must be before end time".to_string(),
                    ));
                }
                let valid_from = self.valid_from.ok_or_else(|| {
                    ScheduleError::Validation("Recurring rule requires valid_from".to_string())
                })?;
                if let Some(valid_to) = self.valid_to {
                    if valid_to < valid_from {
                        return Err(ScheduleError::Validation(
                            "valid_to must not be before valid_from".to_string(),
                        ));
                    }
                }
                Ok(())
            }
            RuleKind::OneOff => match (self.start_at, self.end_at) {
                (Some(start), Some(end)) if start < end => Ok(()),
                (Some(_), Some(_)) => Err(ScheduleError::Validation(
                    "Start time must be before end time".to_string(),
                )),
                _ => Err(ScheduleError::Validation(
                    "One-off rule requires absolute start_at and end_at".to_string(),
                )),
            },
        }
    }

    /// Whether any interval this rule generates intersects `[start, end)`.
    /// Used to refuse mutations that would orphan booked appointments.
    pub fn covers_interval(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        match self.kind {
            RuleKind::OneOff => match (self.start_at, self.end_at) {
                (Some(rule_start), Some(rule_end)) => start < rule_end && end > rule_start,
                _ => false,
            },
            RuleKind::Recurring => {
                let (day, rule_start, rule_end, valid_from) = match (
                    self.day_of_week,
                    self.start_time,
                    self.end_time,
                    self.valid_from,
                ) {
                    (Some(d), Some(s), Some(e), Some(f)) => (d, s, e, f),
                    _ => return false,
                };
                let date = start.date_naive();
                if crate::services::materializer::weekday_index(date) != day {
                    return false;
                }
                if date < valid_from {
                    return false;
                }
                if let Some(valid_to) = self.valid_to {
                    if date > valid_to {
                        return false;
                    }
                }
                let window_start = date.and_time(rule_start).and_utc();
                let window_end = date.and_time(rule_end).and_utc();
                start < window_end && end > window_start
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRuleRequest {
    pub kind: RuleKind,
    pub day_of_week: Option<i32>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

impl CreateRuleRequest {
    pub fn one_off(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        Self {
            kind: RuleKind::OneOff,
            day_of_week: None,
            start_time: None,
            end_time: None,
            valid_from: None,
            valid_to: None,
            start_at: Some(start_at),
            end_at: Some(end_at),
        }
    }

    pub fn into_rule(self, doctor_id: Uuid, now: DateTime<Utc>) -> Result<AvailabilityRule, ScheduleError> {
        let rule = AvailabilityRule {
            id: Uuid::new_v4(),
            doctor_id,
            kind: self.kind,
            day_of_week: self.day_of_week,
            start_time: self.start_time,
            end_time: self.end_time,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            start_at: self.start_at,
            end_at: self.end_at,
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;
        Ok(rule)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateRuleRequest {
    pub day_of_week: Option<i32>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
}

impl UpdateRuleRequest {
    /// Applies the provided fields over the stored rule; the merged rule is
    /// re-validated before any write.
    pub fn apply_to(&self, mut rule: AvailabilityRule, now: DateTime<Utc>) -> Result<AvailabilityRule, ScheduleError> {
        if let Some(day) = self.day_of_week {
            rule.day_of_week = Some(day);
        }
        if let Some(start) = self.start_time {
            rule.start_time = Some(start);
        }
        if let Some(end) = self.end_time {
            rule.end_time = Some(end);
        }
        if let Some(from) = self.valid_from {
            rule.valid_from = Some(from);
        }
        if let Some(to) = self.valid_to {
            rule.valid_to = Some(to);
        }
        if let Some(start) = self.start_at {
            rule.start_at = Some(start);
        }
        if let Some(end) = self.end_at {
            rule.end_at = Some(end);
        }
        rule.updated_at = now;
        rule.validate()?;
        Ok(rule)
    }
}

/// Per-doctor slot sizing. At most one row per doctor; absence means the
/// defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotTemplate {
    pub doctor_id: Uuid,
    pub duration_minutes: i32,
    pub buffer_minutes: i32,
    pub advance_booking_days: i32,
    pub updated_at: DateTime<Utc>,
}

impl SlotTemplate {
    pub fn defaults(doctor_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            doctor_id,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            buffer_minutes: DEFAULT_BUFFER_MINUTES,
            advance_booking_days: DEFAULT_ADVANCE_BOOKING_DAYS,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
            return Err(ScheduleError::Validation(format!(
                "Slot duration must be between {} and {} minutes",
                MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
            )));
        }
        if self.buffer_minutes < 0 {
            return Err(ScheduleError::Validation(
                "Buffer minutes must not be negative".to_string(),
            ));
        }
        if self.advance_booking_days < 1 {
            return Err(ScheduleError::Validation(
                "Advance booking window must be at least 1 day".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTemplateRequest {
    pub duration_minutes: i32,
    pub buffer_minutes: i32,
    pub advance_booking_days: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    Unavailable,
    Available,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Unavailable => write!(f, "unavailable"),
            ExceptionKind::Available => write!(f, "available"),
        }
    }
}

/// Date-bound override. `doctor_id = None` applies to every doctor; absent
/// times cover the whole day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleException {
    pub id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub kind: ExceptionKind,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate, // inclusive
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleException {
    pub fn applies_to(&self, doctor_id: Uuid) -> bool {
        self.doctor_id.map_or(true, |id| id == doctor_id)
    }

    pub fn covers_date(&self, date: NaiveDate) -> bool {
        date >= self.date_from && date <= self.date_to
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.date_to < self.date_from {
            return Err(ScheduleError::Validation(
                "date_to must not be before date_from".to_string(),
            ));
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start >= end => Err(ScheduleError::Validation(
                "Start time must be before end time".to_string(),
            )),
            (Some(_), None) | (None, Some(_)) => Err(ScheduleError::Validation(
                "Exception times must be provided together or not at all".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateExceptionRequest {
    pub doctor_id: Option<Uuid>,
    pub kind: ExceptionKind,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

impl CreateExceptionRequest {
    pub fn into_exception(self, now: DateTime<Utc>) -> Result<ScheduleException, ScheduleError> {
        let exception = ScheduleException {
            id: Uuid::new_v4(),
            doctor_id: self.doctor_id,
            kind: self.kind,
            date_from: self.date_from,
            date_to: self.date_to,
            start_time: self.start_time,
            end_time: self.end_time,
            reason: self.reason,
            created_at: now,
        };
        exception.validate()?;
        Ok(exception)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum SlotProvenance {
    Rule(Uuid),
    Exception(Uuid),
}

/// A concrete bookable interval. Slots exist only as materializer output;
/// they are never persisted until an appointment claims the exact tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub provenance: SlotProvenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Non-cancelled appointments own their slot tuple.
    pub fn claims_slot(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn pending(
        doctor_id: Uuid,
        patient_id: Uuid,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id,
            start_time,
            end_time,
            status: AppointmentStatus::Pending,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One time-of-day window submitted to bulk authoring; paired with each
/// requested date to form an independent one-off rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeSpec {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    pub created: usize,
    pub failed: usize,
    pub skipped: usize,
    pub first_error: Option<String>,
}

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<ScheduleError> for AppError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Validation(msg) => AppError::ValidationError(msg),
            ScheduleError::Conflict(msg) => AppError::Conflict(msg),
            ScheduleError::SlotUnavailable(msg) => AppError::SlotUnavailable(msg),
            ScheduleError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            ScheduleError::Database(msg) => AppError::Database(msg),
        }
    }
}
