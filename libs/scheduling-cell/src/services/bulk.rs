use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{debug, info};
use uuid::Uuid;

use shared_utils::Clock;

use crate::models::{BatchResult, CreateRuleRequest, ScheduleError, TimeSpec};
use crate::store::ScheduleStore;

/// Bulk rule authoring: one independent one-off rule per `(date, time_spec)`
/// pair. Best-effort by design; a failed pair never rolls back the others.
pub struct BulkAuthoringService {
    store: Arc<dyn ScheduleStore>,
    clock: Arc<dyn Clock>,
}

impl BulkAuthoringService {
    pub fn new(store: Arc<dyn ScheduleStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Pairs whose start has already elapsed at submission are silently
    /// skipped. When every pair is skipped the call fails as a whole; any
    /// other mix proceeds and the counts report the outcome.
    pub async fn create_many(
        &self,
        doctor_id: Uuid,
        dates: &[NaiveDate],
        time_specs: &[TimeSpec],
    ) -> Result<BatchResult, ScheduleError> {
        debug!(
            "Bulk authoring {} date(s) x {} time spec(s) for doctor {}",
            dates.len(),
            time_specs.len(),
            doctor_id
        );

        if dates.is_empty() || time_specs.is_empty() {
            return Err(ScheduleError::Validation(
                "No dates or time specs provided".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut skipped = 0usize;
        let mut submissions = Vec::new();

        for date in dates {
            for spec in time_specs {
                let start = date.and_time(spec.start_time).and_utc();
                if start <= now {
                    skipped += 1;
                    continue;
                }
                let end = date.and_time(spec.end_time).and_utc();
                submissions.push(CreateRuleRequest::one_off(start, end));
            }
        }

        if submissions.is_empty() {
            return Err(ScheduleError::Validation(
                "All requested slots are in the past".to_string(),
            ));
        }

        // Keys never collide across pairs, so the writes can run
        // concurrently with no coordination.
        let results = join_all(submissions.into_iter().map(|request| {
            let store = Arc::clone(&self.store);
            async move {
                let rule = request.into_rule(doctor_id, now)?;
                store.insert_rule(rule).await.map_err(ScheduleError::from)
            }
        }))
        .await;

        let mut batch = BatchResult {
            skipped,
            ..BatchResult::default()
        };
        for result in results {
            match result {
                Ok(_) => batch.created += 1,
                Err(err) => {
                    batch.failed += 1;
                    if batch.first_error.is_none() {
                        batch.first_error = Some(err.to_string());
                    }
                }
            }
        }

        info!(
            "Bulk authoring for doctor {}: {} created, {} failed, {} skipped",
            doctor_id, batch.created, batch.failed, batch.skipped
        );
        Ok(batch)
    }
}
