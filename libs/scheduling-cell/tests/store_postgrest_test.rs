// libs/scheduling-cell/tests/store_postgrest_test.rs
//
// PostgrestStore against a mocked row API: wire shapes, status mapping and
// the unique-violation claim path.

use assert_matches::assert_matches;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::Appointment;
use scheduling_cell::{PostgrestStore, ScheduleStore, StoreError};
use shared_config::AppConfig;

struct TestSetup {
    mock_server: MockServer,
    store: PostgrestStore,
}

fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

impl TestSetup {
    async fn new() -> Self {
        let mock_server = MockServer::start().await;
        let config = AppConfig::with_database(mock_server.uri(), "test-service-key");
        let store = PostgrestStore::new(&config);
        Self { mock_server, store }
    }
}

fn appointment_row(appointment: &Appointment) -> serde_json::Value {
    json!({
        "id": appointment.id,
        "doctor_id": appointment.doctor_id,
        "patient_id": appointment.patient_id,
        "start_time": appointment.start_time.to_rfc3339(),
        "end_time": appointment.end_time.to_rfc3339(),
        "status": "pending",
        "notes": null,
        "created_at": appointment.created_at.to_rfc3339(),
        "updated_at": appointment.updated_at.to_rfc3339(),
    })
}

#[tokio::test]
async fn template_row_is_fetched_by_doctor() {
    let setup = TestSetup::new().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/slot_templates"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "doctor_id": doctor_id,
            "duration_minutes": 20,
            "buffer_minutes": 10,
            "advance_booking_days": 14,
            "updated_at": "2025-06-01T00:00:00Z",
        }])))
        .mount(&setup.mock_server)
        .await;

    let template = setup.store.template(doctor_id).await.unwrap().unwrap();
    assert_eq!(template.duration_minutes, 20);
    assert_eq!(template.buffer_minutes, 10);
    assert_eq!(template.advance_booking_days, 14);
}

#[tokio::test]
async fn missing_template_row_is_none() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/slot_templates"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let template = setup.store.template(Uuid::new_v4()).await.unwrap();
    assert!(template.is_none());
}

#[tokio::test]
async fn claim_slot_returns_the_stored_appointment() {
    let setup = TestSetup::new().await;
    let appointment = Appointment::pending(
        Uuid::new_v4(),
        Uuid::new_v4(),
        dt(2025, 6, 10, 9, 0),
        dt(2025, 6, 10, 9, 30),
        dt(2025, 6, 1, 0, 0),
    );

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!([appointment_row(&appointment)])),
        )
        .mount(&setup.mock_server)
        .await;

    let stored = setup.store.claim_slot(appointment.clone()).await.unwrap();
    assert_eq!(stored.id, appointment.id);
    assert_eq!(stored.start_time, appointment.start_time);
}

#[tokio::test]
async fn conflicting_insert_maps_to_unique_violation() {
    let setup = TestSetup::new().await;
    let appointment = Appointment::pending(
        Uuid::new_v4(),
        Uuid::new_v4(),
        dt(2025, 6, 10, 9, 0),
        dt(2025, 6, 10, 9, 30),
        dt(2025, 6, 1, 0, 0),
    );
    let doctor_id = appointment.doctor_id;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "code": "23505",
            "message": "duplicate key value violates unique constraint",
        })))
        .mount(&setup.mock_server)
        .await;

    let result = setup.store.claim_slot(appointment).await;
    assert_matches!(
        result,
        Err(StoreError::UniqueViolation { doctor_id: d, start_time })
            if d == doctor_id && start_time == dt(2025, 6, 10, 9, 0)
    );
}

#[tokio::test]
async fn rules_query_scopes_by_doctor() {
    let setup = TestSetup::new().await;
    let doctor_id = Uuid::new_v4();
    let rule_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": rule_id,
            "doctor_id": doctor_id,
            "kind": "one_off",
            "day_of_week": null,
            "start_time": null,
            "end_time": null,
            "valid_from": null,
            "valid_to": null,
            "start_at": "2025-06-10T09:00:00Z",
            "end_at": "2025-06-10T10:00:00Z",
            "created_at": "2025-06-01T00:00:00Z",
            "updated_at": "2025-06-01T00:00:00Z",
        }])))
        .mount(&setup.mock_server)
        .await;

    let rules = setup.store.rules_for_doctor(doctor_id).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, rule_id);
    assert_eq!(rules[0].start_at, Some(dt(2025, 6, 10, 9, 0)));
}

#[tokio::test]
async fn exceptions_query_includes_global_rows() {
    let setup = TestSetup::new().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/schedule_exceptions"))
        .and(query_param(
            "or",
            format!("(doctor_id.eq.{},doctor_id.is.null)", doctor_id),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": Uuid::new_v4(),
            "doctor_id": null,
            "kind": "unavailable",
            "date_from": "2025-06-10",
            "date_to": "2025-06-10",
            "start_time": null,
            "end_time": null,
            "reason": "public holiday",
            "created_at": "2025-06-01T00:00:00Z",
        }])))
        .mount(&setup.mock_server)
        .await;

    let exceptions = setup
        .store
        .exceptions_in_range(
            doctor_id,
            chrono::NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].doctor_id.is_none());
    assert!(exceptions[0].applies_to(doctor_id));
}

#[tokio::test]
async fn updating_a_missing_appointment_is_not_found() {
    let setup = TestSetup::new().await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let result = setup
        .store
        .update_appointment_status(
            Uuid::new_v4(),
            scheduling_cell::models::AppointmentStatus::Cancelled,
            None,
        )
        .await;
    assert_matches!(result, Err(StoreError::NotFound(_)));
}

#[tokio::test]
async fn open_ended_appointment_query_selects_by_end_time() {
    let setup = TestSetup::new().await;
    let doctor_id = Uuid::new_v4();
    let from = dt(2025, 6, 10, 9, 15);

    // In-progress rows must be included, so the lower bound is on end_time.
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("end_time", format!("gt.{}", from.to_rfc3339())))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&setup.mock_server)
        .await;

    let appointments = setup.store.appointments_from(doctor_id, from).await.unwrap();
    assert!(appointments.is_empty());
}

#[tokio::test]
async fn backend_errors_surface_with_status() {
    let setup = TestSetup::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/availability_rules"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&setup.mock_server)
        .await;

    let result = setup.store.rules_for_doctor(Uuid::new_v4()).await;
    assert_matches!(result, Err(StoreError::Backend(_)));
}
