use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use shared_utils::Clock;

use crate::models::{ScheduleError, SlotTemplate, UpsertTemplateRequest};
use crate::store::ScheduleStore;

/// Resolves per-doctor slot sizing, falling back to the defaults when no
/// template row exists.
pub struct TemplateService {
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
}

impl TemplateService {
    pub fn new(store: Arc<dyn ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn resolve(&self, doctor_id: Uuid) -> Result<SlotTemplate, ScheduleError> {
        let stored = self.store.template(doctor_id).await?;
        Ok(stored.unwrap_or_else(|| SlotTemplate::defaults(doctor_id, self.clock.now())))
    }

    /// Creates or replaces the doctor's template. Out-of-range fields are
    /// rejected before any write happens.
    pub async fn upsert(
        &self,
        doctor_id: Uuid,
        request: UpsertTemplateRequest,
    ) -> Result<SlotTemplate, ScheduleError> {
        debug!("Upserting slot template for doctor {}", doctor_id);

        let template = SlotTemplate {
            doctor_id,
            duration_minutes: request.duration_minutes,
            buffer_minutes: request.buffer_minutes,
            advance_booking_days: request.advance_booking_days,
            updated_at: self.clock.now(),
        };
        template.validate()?;

        Ok(self.store.upsert_template(template).await?)
    }
}
