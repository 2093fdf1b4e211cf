use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentStatus, AvailabilityRule, ScheduleError, ScheduleException, SlotTemplate,
};

pub mod memory;
pub mod postgrest;

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The non-cancelled appointment key `(doctor_id, start_time, end_time)`
    /// already exists. Exactly one concurrent claimant sees success; the
    /// rest see this.
    #[error("Slot already claimed for doctor {doctor_id} at {start_time}")]
    UniqueViolation {
        doctor_id: Uuid,
        start_time: DateTime<Utc>,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ScheduleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation { doctor_id, start_time } => ScheduleError::SlotUnavailable(
                format!("slot at {} for doctor {} is already booked", start_time, doctor_id),
            ),
            StoreError::NotFound(what) => ScheduleError::NotFound(what),
            StoreError::Backend(msg) => ScheduleError::Database(msg),
        }
    }
}

/// Durable storage required by the scheduling core. Implementations must
/// enforce uniqueness of the non-cancelled appointment tuple inside
/// `claim_slot`; callers never do check-then-write around it.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, StoreError>;
    async fn update_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, StoreError>;
    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StoreError>;
    async fn rule(&self, rule_id: Uuid) -> Result<Option<AvailabilityRule>, StoreError>;
    async fn rules_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityRule>, StoreError>;

    async fn template(&self, doctor_id: Uuid) -> Result<Option<SlotTemplate>, StoreError>;
    async fn upsert_template(&self, template: SlotTemplate) -> Result<SlotTemplate, StoreError>;

    async fn insert_exception(
        &self,
        exception: ScheduleException,
    ) -> Result<ScheduleException, StoreError>;
    /// Exceptions for this doctor plus global rows, restricted to date
    /// ranges intersecting `[from, to]` (inclusive).
    async fn exceptions_in_range(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, StoreError>;

    /// Atomic check-and-claim of the appointment's slot tuple.
    async fn claim_slot(&self, appointment: Appointment) -> Result<Appointment, StoreError>;
    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError>;
    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, StoreError>;
    /// Appointments for the doctor whose interval intersects `[from, to)`,
    /// any status.
    async fn appointments_in_range(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;
    /// Appointments for the doctor not yet ended at `from` (in progress or
    /// upcoming), any status.
    async fn appointments_from(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError>;
}
