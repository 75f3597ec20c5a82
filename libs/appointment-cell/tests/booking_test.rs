use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use appointment_cell::models::*;
use appointment_cell::services::AppointmentBookingService;
use shared_config::AppConfig;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig, TestUser};
use sms_cell::{SmsAdapter, SmsError, SmsSendResult, SmsService};

const USER_TOKEN: &str = "user-token";

/// Records every message instead of sending it.
#[derive(Default)]
struct RecordingAdapter {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingAdapter {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsAdapter for RecordingAdapter {
    fn provider(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, to: &str, message: &str) -> Result<SmsSendResult, SmsError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), message.to_string()));

        Ok(SmsSendResult {
            success: true,
            provider: "recording".to_string(),
            message_id: Some(format!("rec_{}", sent.len())),
            status: Some("sent".to_string()),
            result: None,
        })
    }
}

struct Fixture {
    server: MockServer,
    config: AppConfig,
    sms: Arc<RecordingAdapter>,
    patient: TestUser,
    staff: TestUser,
    facility_id: Uuid,
    appointment_id: Uuid,
}

impl Fixture {
    async fn new() -> Self {
        let server = MockServer::start().await;
        let config = TestConfig::with_supabase_url(&server.uri()).to_app_config();

        Self {
            server,
            config,
            sms: Arc::new(RecordingAdapter::default()),
            patient: TestUser::patient("patient@example.com"),
            staff: TestUser::staff("staff@example.com"),
            facility_id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
        }
    }

    fn service(&self) -> AppointmentBookingService {
        AppointmentBookingService::new(&self.config).with_sms(SmsService::with_adapter(self.sms.clone()))
    }

    fn appointment(&self, scheduled_at: DateTime<Utc>, status: &str) -> Value {
        MockSupabaseResponses::appointment_row(
            self.appointment_id,
            self.patient.uuid(),
            self.facility_id,
            None,
            scheduled_at,
            status,
        )
    }

    async fn mount_appointment(&self, row: Value) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("id", format!("eq.{}", self.appointment_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([row])))
            .mount(&self.server)
            .await;
    }

    async fn mount_facility(&self) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/facilities"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([MockSupabaseResponses::facility_row(self.facility_id, "Amani Clinic")])),
            )
            .mount(&self.server)
            .await;
    }

    async fn mount_patient_profile(&self, phone: Option<&str>, consent_sms: bool) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", format!("eq.{}", self.patient.id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                MockSupabaseResponses::profile_row(self.patient.uuid(), "patient", phone, consent_sms)
            ])))
            .mount(&self.server)
            .await;
    }

    async fn mount_occupants(&self, occupants: Value, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path("/rest/v1/appointments"))
            .and(query_param("select", "id,scheduled_at,status"))
            .and(query_param("facility_id", format!("eq.{}", self.facility_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(occupants))
            .expect(expected_calls)
            .mount(&self.server)
            .await;
    }

    async fn expect_no_writes(&self) {
        Mock::given(method("PATCH"))
            .and(path("/rest/v1/appointments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&self.server)
            .await;
    }
}

/// Matches a reminder upsert whose row array satisfies `check`.
fn upsert_rows(
    check: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
) -> impl Fn(&Request) -> bool + Send + Sync + 'static {
    move |request: &Request| {
        serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|body| body.as_array().map(|rows| check(rows)))
            .unwrap_or(false)
    }
}

fn future_slot(days: i64) -> DateTime<Utc> {
    (Utc::now() + Duration::days(days)).with_nanosecond(0).unwrap()
}

fn create_request(fixture: &Fixture, scheduled_at: DateTime<Utc>) -> CreateAppointmentRequest {
    serde_json::from_value(json!({
        "facilityId": fixture.facility_id,
        "service": "General Consultation",
        "scheduledAt": scheduled_at.to_rfc3339(),
    }))
    .unwrap()
}

fn staff_attempt(staff_id: &str, original: DateTime<Utc>, proposed: DateTime<Utc>) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "requested_by": "staff",
        "requested_by_id": staff_id,
        "original_time": original.to_rfc3339(),
        "proposed_time": proposed.to_rfc3339(),
        "reason": "Doctor unavailable",
        "status": "pending",
        "responded_by": null,
        "responded_at": null,
        "created_at": Utc::now().to_rfc3339(),
    })
}

#[tokio::test]
async fn create_books_pending_appointment_and_arms_three_reminders() {
    let fixture = Fixture::new().await;
    let scheduled_at = future_slot(3);

    fixture.mount_facility().await;
    fixture.mount_occupants(json!([]), 1).await;
    fixture.mount_patient_profile(Some("+255712345678"), true).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .and(header("Authorization", format!("Bearer {}", USER_TOKEN).as_str()))
        .and(body_partial_json(json!({
            "patient_id": fixture.patient.id,
            "status": "pending",
            "version": 1
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([fixture.appointment(scheduled_at, "pending")])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/reminders"))
        .and(query_param("on_conflict", "appointment_id,offset"))
        .and(upsert_rows(|rows| rows.len() == 3))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let appointment = fixture
        .service()
        .create_appointment(&fixture.patient.to_user(), create_request(&fixture, scheduled_at), USER_TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.scheduled_at, scheduled_at);
}

#[tokio::test]
async fn create_skips_reminders_without_consent() {
    let fixture = Fixture::new().await;
    let scheduled_at = future_slot(3);

    fixture.mount_facility().await;
    fixture.mount_occupants(json!([]), 1).await;
    fixture.mount_patient_profile(Some("+255712345678"), false).await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([fixture.appointment(scheduled_at, "pending")])))
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/reminders"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&fixture.server)
        .await;

    fixture
        .service()
        .create_appointment(&fixture.patient.to_user(), create_request(&fixture, scheduled_at), USER_TOKEN)
        .await
        .unwrap();
}

#[tokio::test]
async fn create_rejects_a_taken_slot_without_inserting() {
    let fixture = Fixture::new().await;
    let scheduled_at = future_slot(3);

    fixture.mount_facility().await;
    fixture
        .mount_occupants(
            json!([{
                "id": Uuid::new_v4(),
                "scheduled_at": (scheduled_at + Duration::minutes(15)).to_rfc3339(),
                "status": "confirmed"
            }]),
            1,
        )
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(0)
        .mount(&fixture.server)
        .await;

    let err = fixture
        .service()
        .create_appointment(&fixture.patient.to_user(), create_request(&fixture, scheduled_at), USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::SlotUnavailable { conflicts: 1 });
}

#[tokio::test]
async fn create_validates_before_touching_the_store() {
    let fixture = Fixture::new().await;
    let service = fixture.service();
    let user = fixture.patient.to_user();

    let past = create_request(&fixture, Utc::now() - Duration::hours(1));
    assert_matches!(
        service.create_appointment(&user, past, USER_TOKEN).await,
        Err(AppointmentError::ValidationError(_))
    );

    let mut blank = create_request(&fixture, future_slot(2));
    blank.service = "   ".to_string();
    assert_matches!(
        service.create_appointment(&user, blank, USER_TOKEN).await,
        Err(AppointmentError::ValidationError(_))
    );

    let received = fixture.server.received_requests().await.unwrap_or_default();
    assert!(received.is_empty());
}

#[tokio::test]
async fn create_for_unknown_facility_is_not_found() {
    let fixture = Fixture::new().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/facilities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .service()
        .create_appointment(&fixture.patient.to_user(), create_request(&fixture, future_slot(2)), USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::FacilityNotFound);
}

#[tokio::test]
async fn confirm_outside_pending_is_rejected_without_writing() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(fixture.appointment(future_slot(2), "confirmed")).await;
    fixture.expect_no_writes().await;

    let err = fixture
        .service()
        .confirm_appointment(fixture.appointment_id, &fixture.staff.to_user(), USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        AppointmentError::InvalidTransition { from: AppointmentStatus::Confirmed, .. }
    );
}

#[tokio::test]
async fn stale_version_surfaces_as_concurrent_modification() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(fixture.appointment(future_slot(2), "pending")).await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", fixture.appointment_id)))
        .and(query_param("version", "eq.1"))
        .and(body_partial_json(json!({ "status": "confirmed", "version": 2 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let err = fixture
        .service()
        .confirm_appointment(fixture.appointment_id, &fixture.staff.to_user(), USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::ConcurrentModification);
}

#[tokio::test]
async fn staff_proposal_into_a_taken_slot_changes_nothing() {
    let fixture = Fixture::new().await;
    let original = future_slot(2);
    let proposed = future_slot(4);

    fixture.mount_appointment(fixture.appointment(original, "confirmed")).await;
    fixture
        .mount_occupants(
            json!([{ "id": Uuid::new_v4(), "scheduled_at": proposed.to_rfc3339(), "status": "pending" }]),
            1,
        )
        .await;
    fixture.expect_no_writes().await;

    let request: RescheduleRequest =
        serde_json::from_value(json!({ "newTime": proposed.to_rfc3339() })).unwrap();

    let err = fixture
        .service()
        .propose_reschedule_as_staff(fixture.appointment_id, &fixture.staff.to_user(), request, USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::SlotUnavailable { conflicts: 1 });
}

#[tokio::test]
async fn patient_request_moves_appointment_to_staff_review() {
    let fixture = Fixture::new().await;
    let proposed = future_slot(5);

    fixture.mount_appointment(fixture.appointment(future_slot(2), "confirmed")).await;
    fixture.mount_occupants(json!([]), 1).await;

    let mut saved = fixture.appointment(future_slot(2), "pending_staff_review");
    saved["version"] = json!(2);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("version", "eq.1"))
        .and(body_partial_json(json!({ "status": "pending_staff_review" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([saved])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let request: RescheduleRequest = serde_json::from_value(json!({
        "newTime": proposed.to_rfc3339(),
        "reason": "Travelling"
    }))
    .unwrap();

    let (appointment, attempt) = fixture
        .service()
        .request_reschedule_as_patient(fixture.appointment_id, &fixture.patient.to_user(), request, USER_TOKEN)
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::PendingStaffReview);
    assert_eq!(attempt.requested_by, RescheduleRequester::Patient);
    assert_eq!(attempt.proposed_time, proposed);
    assert_eq!(attempt.reason.as_deref(), Some("Travelling"));
}

#[tokio::test]
async fn another_patient_cannot_answer_a_staff_proposal() {
    let fixture = Fixture::new().await;
    let original = future_slot(2);
    let mut row = fixture.appointment(original, "reschedule_pending_patient");
    row["reschedule_history"] = json!([staff_attempt(&fixture.staff.id, original, future_slot(4))]);

    fixture.mount_appointment(row).await;
    fixture.expect_no_writes().await;

    let stranger = TestUser::patient("stranger@example.com");
    let err = fixture
        .service()
        .respond_to_reschedule(fixture.appointment_id, &stranger.to_user(), RescheduleAction::Approve, USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Forbidden(_));
}

#[tokio::test]
async fn approving_a_proposal_moves_the_time_and_rearms_reminders() {
    let fixture = Fixture::new().await;
    let original = future_slot(2);
    let proposed = future_slot(4);

    let mut row = fixture.appointment(original, "reschedule_pending_patient");
    row["reschedule_history"] = json!([staff_attempt(&fixture.staff.id, original, proposed)]);
    fixture.mount_appointment(row.clone()).await;
    fixture.mount_occupants(json!([]), 1).await;
    fixture.mount_patient_profile(Some("+255712345678"), true).await;

    let mut saved = row;
    saved["status"] = json!("confirmed");
    saved["scheduled_at"] = json!(proposed.to_rfc3339());
    saved["version"] = json!(2);

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("version", "eq.1"))
        .and(body_partial_json(json!({
            "status": "confirmed",
            "scheduled_at": proposed.to_rfc3339()
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([saved])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/reminders"))
        .and(upsert_rows(|rows| {
            rows.len() == 3
                && rows
                    .iter()
                    .all(|row| row["patient_phone"] == "+255712345678" && row["status"] == "scheduled")
        }))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let (appointment, attempt) = fixture
        .service()
        .respond_to_reschedule(
            fixture.appointment_id,
            &fixture.patient.to_user(),
            RescheduleAction::Approve,
            USER_TOKEN,
        )
        .await
        .unwrap();

    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(appointment.scheduled_at, proposed);
    assert_eq!(attempt.status, AttemptStatus::Approved);
    assert_eq!(attempt.responded_by.as_deref(), Some(fixture.patient.id.as_str()));
}

#[tokio::test]
async fn history_is_hidden_from_other_patients() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(fixture.appointment(future_slot(2), "confirmed")).await;

    let stranger = TestUser::patient("stranger@example.com");
    let err = fixture
        .service()
        .get_reschedule_history(fixture.appointment_id, &stranger.to_user(), USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Forbidden(_));
}

#[tokio::test]
async fn staff_cannot_list_another_facility() {
    let fixture = Fixture::new().await;
    let mut profile = MockSupabaseResponses::profile_row(fixture.staff.uuid(), "staff", None, false);
    profile["facility_id"] = json!(Uuid::new_v4());

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([profile])))
        .mount(&fixture.server)
        .await;

    let err = fixture
        .service()
        .list_facility_appointments(fixture.facility_id, &fixture.staff.to_user(), USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::Forbidden(_));
}

#[tokio::test]
async fn dashboard_filters_by_time_block_and_fills_gaps() {
    let fixture = Fixture::new().await;
    let day = Utc::now().date_naive();
    let at = |hour: u32| Utc.from_utc_datetime(&day.and_hms_opt(hour, 0, 0).unwrap());

    let morning_patient = Uuid::new_v4();
    let rows = json!([
        MockSupabaseResponses::appointment_row(Uuid::new_v4(), morning_patient, fixture.facility_id, None, at(8), "confirmed"),
        MockSupabaseResponses::appointment_row(Uuid::new_v4(), Uuid::new_v4(), fixture.facility_id, None, at(13), "pending"),
        MockSupabaseResponses::appointment_row(Uuid::new_v4(), Uuid::new_v4(), fixture.facility_id, None, at(18), "pending"),
    ]);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("order", "scheduled_at.asc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .expect(1)
        .mount(&fixture.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&fixture.server)
        .await;
    fixture.mount_facility().await;

    let query = StaffDashboardQuery {
        time_block: Some("morning".to_string()),
        status: Some("all".to_string()),
        ..Default::default()
    };

    let summaries = fixture.service().staff_dashboard(query, USER_TOKEN).await.unwrap();

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].patient.id, morning_patient);
    assert_eq!(summaries[0].patient.name, "Unknown");
    assert_eq!(summaries[0].patient.phone, "N/A");
    assert_eq!(summaries[0].facility.name, "Amani Clinic");
    assert_eq!(summaries[0].specialist, "General Consultation");
}

#[tokio::test]
async fn dashboard_rejects_unknown_status_filter() {
    let fixture = Fixture::new().await;
    let query = StaffDashboardQuery {
        status: Some("archived".to_string()),
        ..Default::default()
    };

    assert_matches!(
        fixture.service().staff_dashboard(query, USER_TOKEN).await,
        Err(AppointmentError::ValidationError(_))
    );
}

#[tokio::test]
async fn test_sms_ignores_consent_and_records_the_send() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(fixture.appointment(future_slot(1), "confirmed")).await;
    fixture.mount_patient_profile(Some("+255712345678"), false).await;
    fixture.mount_facility().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/reminders"))
        .and(upsert_rows(|rows| {
            rows.len() == 1
                && rows[0]["offset"] == "2h"
                && rows[0]["status"] == "sent"
                && rows[0]["provider_message_id"] == "rec_1"
        }))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
        .expect(1)
        .mount(&fixture.server)
        .await;

    let outcome = fixture
        .service()
        .send_test_sms(fixture.appointment_id, USER_TOKEN)
        .await
        .unwrap();

    assert!(outcome.sms.success);
    let sent = fixture.sms.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "+255712345678");
    assert!(sent[0].1.starts_with("Test SMS: Hello Test patient"));
    assert!(sent[0].1.contains("Amani Clinic"));
}

#[tokio::test]
async fn test_sms_needs_a_phone_number() {
    let fixture = Fixture::new().await;
    fixture.mount_appointment(fixture.appointment(future_slot(1), "confirmed")).await;
    fixture.mount_patient_profile(None, true).await;
    fixture.mount_facility().await;

    let err = fixture
        .service()
        .send_test_sms(fixture.appointment_id, USER_TOKEN)
        .await
        .unwrap_err();

    assert_matches!(err, AppointmentError::ValidationError(_));
    assert!(fixture.sms.sent().is_empty());
}
