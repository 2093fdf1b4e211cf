use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{DbError, PostgrestClient};

use crate::models::{
    Appointment, AppointmentStatus, AvailabilityRule, ScheduleException, SlotTemplate,
};
use crate::store::{ScheduleStore, StoreError};

/// `ScheduleStore` over a PostgREST row API. The appointment table carries a
/// partial unique index on `(doctor_id, start_time, end_time)` for rows with
/// `status <> 'cancelled'`; `claim_slot` is a single insert against it, so
/// the database is the serialization point.
pub struct PostgrestStore {
    client: PostgrestClient,
}

impl PostgrestStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: PostgrestClient::new(config),
        }
    }

    fn first_row<T>(mut rows: Vec<T>, what: &str) -> Result<T, StoreError> {
        if rows.is_empty() {
            return Err(StoreError::Backend(format!("{} write returned no rows", what)));
        }
        Ok(rows.remove(0))
    }
}

fn map_db_error(err: DbError) -> StoreError {
    match err {
        DbError::NotFound(what) => StoreError::NotFound(what),
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl ScheduleStore for PostgrestStore {
    async fn insert_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, StoreError> {
        debug!("Inserting availability rule {} for doctor {}", rule.id, rule.doctor_id);

        let rows: Vec<AvailabilityRule> = self
            .client
            .request_returning(
                Method::POST,
                "/rest/v1/availability_rules",
                Some(serde_json::to_value(&rule).map_err(|e| StoreError::Backend(e.to_string()))?),
            )
            .await
            .map_err(map_db_error)?;

        Self::first_row(rows, "Availability rule")
    }

    async fn update_rule(&self, rule: AvailabilityRule) -> Result<AvailabilityRule, StoreError> {
        let path = format!("/rest/v1/availability_rules?id=eq.{}", rule.id);
        let rows: Vec<AvailabilityRule> = self
            .client
            .request_returning(
                Method::PATCH,
                &path,
                Some(serde_json::to_value(&rule).map_err(|e| StoreError::Backend(e.to_string()))?),
            )
            .await
            .map_err(map_db_error)?;

        if rows.is_empty() {
            return Err(StoreError::NotFound("Availability rule".to_string()));
        }
        Self::first_row(rows, "Availability rule")
    }

    async fn delete_rule(&self, rule_id: Uuid) -> Result<(), StoreError> {
        let path = format!("/rest/v1/availability_rules?id=eq.{}", rule_id);
        let _: Vec<Value> = self
            .client
            .request(Method::DELETE, &path, None)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    async fn rule(&self, rule_id: Uuid) -> Result<Option<AvailabilityRule>, StoreError> {
        let path = format!("/rest/v1/availability_rules?id=eq.{}", rule_id);
        let rows: Vec<AvailabilityRule> = self
            .client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().next())
    }

    async fn rules_for_doctor(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityRule>, StoreError> {
        let path = format!(
            "/rest/v1/availability_rules?doctor_id=eq.{}&order=created_at.asc",
            doctor_id
        );
        self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)
    }

    async fn template(&self, doctor_id: Uuid) -> Result<Option<SlotTemplate>, StoreError> {
        let path = format!("/rest/v1/slot_templates?doctor_id=eq.{}", doctor_id);
        let rows: Vec<SlotTemplate> = self
            .client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_template(&self, template: SlotTemplate) -> Result<SlotTemplate, StoreError> {
        let body = serde_json::to_value(&template).map_err(|e| StoreError::Backend(e.to_string()))?;

        // Update-then-insert; at most one row per doctor is enforced by the
        // table's primary key on doctor_id.
        let path = format!("/rest/v1/slot_templates?doctor_id=eq.{}", template.doctor_id);
        let updated: Vec<SlotTemplate> = self
            .client
            .request_returning(Method::PATCH, &path, Some(body.clone()))
            .await
            .map_err(map_db_error)?;

        if let Some(row) = updated.into_iter().next() {
            return Ok(row);
        }

        let rows: Vec<SlotTemplate> = self
            .client
            .request_returning(Method::POST, "/rest/v1/slot_templates", Some(body))
            .await
            .map_err(map_db_error)?;
        Self::first_row(rows, "Slot template")
    }

    async fn insert_exception(
        &self,
        exception: ScheduleException,
    ) -> Result<ScheduleException, StoreError> {
        let rows: Vec<ScheduleException> = self
            .client
            .request_returning(
                Method::POST,
                "/rest/v1/schedule_exceptions",
                Some(serde_json::to_value(&exception).map_err(|e| StoreError::Backend(e.to_string()))?),
            )
            .await
            .map_err(map_db_error)?;
        Self::first_row(rows, "Schedule exception")
    }

    async fn exceptions_in_range(
        &self,
        doctor_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleException>, StoreError> {
        // Doctor-scoped rows plus global rows (doctor_id null), date ranges
        // intersecting [from, to].
        let path = format!(
            "/rest/v1/schedule_exceptions?or=(doctor_id.eq.{},doctor_id.is.null)&date_from=lte.{}&date_to=gte.{}&order=date_from.asc",
            doctor_id, to, from
        );
        self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)
    }

    async fn claim_slot(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        debug!(
            "Claiming slot {} - {} for doctor {}",
            appointment.start_time, appointment.end_time, appointment.doctor_id
        );

        let body = serde_json::to_value(&appointment).map_err(|e| StoreError::Backend(e.to_string()))?;
        let result: Result<Vec<Appointment>, DbError> = self
            .client
            .request_returning(Method::POST, "/rest/v1/appointments", Some(body))
            .await;

        match result {
            Ok(rows) => Self::first_row(rows, "Appointment"),
            Err(DbError::UniqueViolation(_)) => Err(StoreError::UniqueViolation {
                doctor_id: appointment.doctor_id,
                start_time: appointment.start_time,
            }),
            Err(other) => Err(map_db_error(other)),
        }
    }

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Appointment> = self
            .client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().next())
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        status: AppointmentStatus,
        notes: Option<String>,
    ) -> Result<Appointment, StoreError> {
        let mut update_data = serde_json::Map::new();
        update_data.insert("status".to_string(), json!(status.to_string()));
        if let Some(notes) = notes {
            update_data.insert("notes".to_string(), json!(notes));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Appointment> = self
            .client
            .request_returning(Method::PATCH, &path, Some(Value::Object(update_data)))
            .await
            .map_err(map_db_error)?;

        if rows.is_empty() {
            return Err(StoreError::NotFound("Appointment".to_string()));
        }
        Self::first_row(rows, "Appointment")
    }

    async fn appointments_in_range(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&start_time=lt.{}&end_time=gt.{}&order=start_time.asc",
            doctor_id,
            to.to_rfc3339(),
            from.to_rfc3339()
        );
        self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)
    }

    async fn appointments_from(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&end_time=gt.{}&order=start_time.asc",
            doctor_id,
            // `+` in the RFC 3339 offset would be decoded as a space in a
            // query string, so it has to be percent-encoded.
            from.to_rfc3339().replace('+', "%2B")
        );
        self.client
            .request(Method::GET, &path, None)
            .await
            .map_err(map_db_error)
    }
}
