use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_utils::Clock;

use crate::models::{Appointment, AppointmentStatus, ScheduleError};
use crate::services::availability::AvailabilityService;
use crate::store::{ScheduleStore, StoreError};

/// Reservation: the atomic claim of exactly one materialized slot by exactly
/// one appointment. Losing the race is reported, never retried here.
pub struct BookingService {
    store: Arc<dyn ScheduleStore>,
    availability: AvailabilityService,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    pub fn new(store: Arc<dyn ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        let availability = AvailabilityService::new(Arc::clone(&store), Arc::clone(&clock));
        Self {
            store,
            availability,
            clock,
        }
    }

    /// Claims `(doctor_id, start, end)` for the patient. Fails with
    /// `SlotUnavailable` when the tuple is not a currently materialized slot
    /// (a concurrent exception or rule change may have removed it) or when
    /// another non-cancelled appointment already owns it.
    pub async fn book_slot(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        patient_id: Uuid,
    ) -> Result<Appointment, ScheduleError> {
        info!(
            "Booking slot {} - {} with doctor {} for patient {}",
            start, end, doctor_id, patient_id
        );

        let now = self.clock.now();
        let slots = self
            .availability
            .materialized_slots(doctor_id, start, end, now)
            .await?;
        let exists = slots
            .iter()
            .any(|slot| slot.start_time == start && slot.end_time == end);
        if !exists {
            warn!("Slot {} for doctor {} is no longer materialized", start, doctor_id);
            return Err(ScheduleError::SlotUnavailable(format!(
                "slot at {} for doctor {} does not exist",
                start, doctor_id
            )));
        }

        let appointment = Appointment::pending(doctor_id, patient_id, start, end, now);
        match self.store.claim_slot(appointment).await {
            Ok(appointment) => {
                info!("Appointment {} booked for slot {}", appointment.id, start);
                Ok(appointment)
            }
            Err(err @ StoreError::UniqueViolation { .. }) => {
                warn!("Lost reservation race for doctor {} at {}", doctor_id, start);
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Transitions the appointment to `Cancelled`, freeing its slot tuple
    /// for re-materialization.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<Appointment, ScheduleError> {
        debug!("Cancelling appointment {}", appointment_id);

        let current = self.get_appointment(appointment_id).await?;

        match current.status {
            AppointmentStatus::Completed => {
                return Err(ScheduleError::Validation(
                    "Cannot cancel completed appointment".to_string(),
                ))
            }
            AppointmentStatus::Cancelled => {
                return Err(ScheduleError::Validation(
                    "Appointment is already cancelled".to_string(),
                ))
            }
            _ => {}
        }

        let notes = reason.map(|r| format!("Cancelled: {}", r));
        let cancelled = self
            .store
            .update_appointment_status(appointment_id, AppointmentStatus::Cancelled, notes)
            .await?;

        info!("Appointment {} cancelled", appointment_id);
        Ok(cancelled)
    }

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, ScheduleError> {
        self.store
            .appointment(appointment_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound("Appointment".to_string()))
    }
}
