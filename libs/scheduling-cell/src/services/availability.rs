use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use shared_utils::Clock;

use crate::models::{
    AvailabilityRule, CreateExceptionRequest, CreateRuleRequest, ScheduleError, ScheduleException,
    Slot, UpdateRuleRequest,
};
use crate::services::materializer;
use crate::services::template::TemplateService;
use crate::store::ScheduleStore;

/// Rule and exception authoring plus the read side: materialized,
/// past-filtered, unbooked slots for a query window.
pub struct AvailabilityService {
    store: Arc<dyn ScheduleStore>,
    templates: TemplateService,
    clock: Arc<dyn Clock>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        let templates = TemplateService::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            templates,
            clock,
        }
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    pub async fn create_rule(
        &self,
        doctor_id: Uuid,
        request: CreateRuleRequest,
    ) -> Result<AvailabilityRule, ScheduleError> {
        debug!("Creating {} availability rule for doctor {}", request.kind, doctor_id);

        let rule = request.into_rule(doctor_id, self.clock.now())?;
        Ok(self.store.insert_rule(rule).await?)
    }

    /// Updates a rule after checking that its stored shape no longer covers
    /// any non-cancelled appointment still in progress or upcoming; those
    /// bookings were minted from the old shape and must not be orphaned.
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        request: UpdateRuleRequest,
    ) -> Result<AvailabilityRule, ScheduleError> {
        debug!("Updating availability rule {}", rule_id);

        let current = self
            .store
            .rule(rule_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound("Availability rule".to_string()))?;

        self.ensure_no_dependent_appointments(&current).await?;

        let updated = request.apply_to(current, self.clock.now())?;
        Ok(self.store.update_rule(updated).await?)
    }

    pub async fn delete_rule(&self, rule_id: Uuid) -> Result<(), ScheduleError> {
        debug!("Deleting availability rule {}", rule_id);

        let rule = self
            .store
            .rule(rule_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound("Availability rule".to_string()))?;

        self.ensure_no_dependent_appointments(&rule).await?;

        Ok(self.store.delete_rule(rule_id).await?)
    }

    pub async fn create_exception(
        &self,
        request: CreateExceptionRequest,
    ) -> Result<ScheduleException, ScheduleError> {
        debug!(
            "Creating {} exception for {} from {} to {}",
            request.kind,
            request
                .doctor_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "all doctors".to_string()),
            request.date_from,
            request.date_to
        );

        let exception = request.into_exception(self.clock.now())?;
        Ok(self.store.insert_exception(exception).await?)
    }

    /// Materialized, past-filtered slots with booked tuples removed. The
    /// query window is clamped to the doctor's advance-booking horizon.
    pub async fn get_available_slots(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Slot>, ScheduleError> {
        let now = self.clock.now();
        let template = self.templates.resolve(doctor_id).await?;

        let horizon = now + Duration::days(template.advance_booking_days as i64);
        let to = to.min(horizon);
        if to <= from {
            return Ok(Vec::new());
        }

        let mut slots = self.materialized_slots(doctor_id, from, to, now).await?;

        let appointments = self.store.appointments_in_range(doctor_id, from, to).await?;
        let claimed: HashSet<(DateTime<Utc>, DateTime<Utc>)> = appointments
            .iter()
            .filter(|apt| apt.status.claims_slot())
            .map(|apt| (apt.start_time, apt.end_time))
            .collect();
        slots.retain(|slot| !claimed.contains(&(slot.start_time, slot.end_time)));

        debug!("Found {} available slots for doctor {}", slots.len(), doctor_id);
        Ok(slots)
    }

    /// Materialization without the horizon clamp or booked-slot filter; the
    /// booking path uses this to check a slot still exists before claiming.
    pub(crate) async fn materialized_slots(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Slot>, ScheduleError> {
        if to <= from {
            return Ok(Vec::new());
        }

        let template = self.templates.resolve(doctor_id).await?;
        let rules = self.store.rules_for_doctor(doctor_id).await?;
        let exceptions = self
            .store
            .exceptions_in_range(doctor_id, from.date_naive(), to.date_naive())
            .await?;

        Ok(materializer::materialize(
            doctor_id,
            &rules,
            &exceptions,
            &template,
            from,
            to,
            now,
        ))
    }

    async fn ensure_no_dependent_appointments(
        &self,
        rule: &AvailabilityRule,
    ) -> Result<(), ScheduleError> {
        let now = self.clock.now();
        let appointments = self.store.appointments_from(rule.doctor_id, now).await?;

        let dependent = appointments
            .iter()
            .filter(|apt| apt.status.claims_slot())
            .any(|apt| rule.covers_interval(apt.start_time, apt.end_time));

        if dependent {
            return Err(ScheduleError::Conflict(
                "Rule covers booked appointments; cancel them first".to_string(),
            ));
        }
        Ok(())
    }
}
