use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentStatus, AvailabilityRule, ScheduleException, SlotTemplate,
};
use crate::store::{ScheduleStore, StoreError};

type ClaimKey = (Uuid, DateTime<Utc>, DateTime<Utc>);

#[derive(Default)]
struct Inner {
    rules: HashMap<Uuid, AvailabilityRule>,
    templates: HashMap<Uuid, SlotTemplate>,
    exceptions: HashMap<Uuid, ScheduleException>,
    appointments: HashMap<Uuid, Appointment>,
    // Non-cancelled slot ownership. Checked and written under the same lock,
    // which is what makes claim_slot atomic here.
    claims: HashMap<ClaimKey, Uuid>,
}

/// In-memory `ScheduleStore`. A single mutex serializes claims, standing in
/// for the unique index a SQL backend would use.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn update_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.rules.contains_key(&rule.id) {
            return Err(StoreError::NotFound("Availability rule".to_string()));
        }
        inner.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .rules
            .remove(&rule_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound("Availability rule".to_string()))
    }

    async fn rule(&self, rule_id: Uuid) -> Result<Option<AvailabilityRule>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.rules.get(&rule_id).cloned())
    }

    async fn rules_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityRule>, StoreError> {
        let inner = self.inner.lock().await;
        let mut rules: Vec<AvailabilityRule> = inner
            .rules
            .values()
            .filter(|rule| rule.doctor_id == doctor_id)
            .cloned()
            .collect();
        rules.sort_by_key(|rule| rule.created_at);
        Ok(rules)
    }

    async fn template(&self, doctor_id: Uuid) -> Result<Option<SlotTemplate>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.templates.get(&doctor_id).cloned())
    }

    async fn upsert_template(&self, template: SlotTemplate) -> Result<SlotTemplate, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.templates.insert(template.doctor_id, template.clone());
        Ok(template)
    }

    async fn insert_exception(
        &self,
        exception: ScheduleException,
    ) -> Result<ScheduleException, StoreError> {
        let mut inner = self.inner.lock().await;
        inner.exceptions.insert(exception.id, exception.clone());
        Ok(exception)
    }

    async fn exceptions_in_range(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, StoreError> {
        let inner = self.inner.lock().await;
        let mut exceptions: Vec<ScheduleException> = inner
            .exceptions
            .values()
            .filter(|ex| ex.applies_to(doctor_id) && ex.date_from <= to && ex.date_to >= from)
            .cloned()
            .collect();
        exceptions.sort_by_key(|ex| (ex.date_from, ex.created_at));
        Ok(exceptions)
    }

    async fn claim_slot(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let key = (
            appointment.doctor_id,
            appointment.start_time,
            appointment.end_time,
        );
        let mut inner = self.inner.lock().await;
        if inner.claims.contains_key(&key) {
            debug!(
                "Claim rejected: doctor {} slot {} already owned",
                appointment.doctor_id, appointment.start_time
            );
            return Err(StoreError::UniqueViolation {
                doctor_id: appointment.doctor_id,
                start_time: appointment.start_time,
            });
        }
        inner.claims.insert(key, appointment.id);
        inner.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.appointments.get(&appointment_id).cloned())
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut appointment = inner
            .appointments
            .get(&appointment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("Appointment".to_string()))?;

        appointment.status = status;
        if notes.is_some() {
            appointment.notes = notes;
        }
        appointment.updated_at = Utc::now();

        let key = (
            appointment.doctor_id,
            appointment.start_time,
            appointment.end_time,
        );
        if !status.claims_slot() && inner.claims.get(&key) == Some(&appointment_id) {
            inner.claims.remove(&key);
        }

        inner.appointments.insert(appointment_id, appointment.clone());
        Ok(appointment)
    }

    async fn appointments_in_range(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let inner = self.inner.lock().await;
        let mut appointments: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|apt| apt.doctor_id == doctor_id && apt.start_time < to && apt.end_time > from)
            .cloned()
            .collect();
        appointments.sort_by_key(|apt| apt.start_time);
        Ok(appointments)
    }

    async fn appointments_from(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let inner = self.inner.lock().await;
        let mut appointments: Vec<Appointment> = inner
            .appointments
            .values()
            .filter(|apt| apt.doctor_id == doctor_id && apt.end_time > from)
            .cloned()
            .collect();
        appointments.sort_by_key(|apt| apt.start_time);
        Ok(appointments)
    }
}
