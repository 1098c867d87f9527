use async_trait::async_trait;
use lnmt_auth::{AuthPolicy, AuthStorage};
use lnmt_events::EventBus;
use lnmt_health::{CheckRunner, HealPolicy, HealthStorage, ProbeKind, RecoveryRunner};
use lnmt_sched::{JobFnRegistry, SchedStorage};
use lnmt_store::{AuditLog, MemoryKvStore};
use lnmt_tracker::{DetectionSettings, NullSource, TrackerStorage};

use super::*;
use crate::error::ApiErrorCode;

struct OkChecks;

#[async_trait]
impl CheckRunner for OkChecks {
    async fn run(&self, _kind: &ProbeKind) -> (HealthStatus, String) {
        (HealthStatus::Ok, "ok".to_owned())
    }
}

struct NoRecovery;

#[async_trait]
impl RecoveryRunner for NoRecovery {
    async fn submit(&self, _job_id: &JobId) -> Result<(), String> {
        Ok(())
    }
}

fn service() -> ApiService {
    let store: Arc<dyn lnmt_store::KvStore> = Arc::new(MemoryKvStore::new());
    let events = EventBus::new();
    let audit = AuditLog::new(Arc::clone(&store));

    let auth = Arc::new(AuthEngine::new(
        AuthStorage::new(Arc::clone(&store)),
        audit.clone(),
        events.clone(),
        AuthPolicy::default(),
    ));
    auth.create_user("system", "admin", "s3cret!", "", Role::Admin)
        .unwrap();
    auth.create_user("system", "viewer", "s3cret!", "", Role::Viewer)
        .unwrap();

    let functions = JobFnRegistry::new();
    functions
        .register_fn("noop", |_| async { Ok(String::new()) })
        .unwrap();
    let scheduler = lnmt_sched::Scheduler::new(
        SchedStorage::new(Arc::clone(&store)),
        functions,
        events.clone(),
        audit.clone(),
        chrono_tz_utc(),
        2,
    );

    let tracker = Arc::new(DeviceTracker::new(
        TrackerStorage::new(Arc::clone(&store)),
        audit,
        events.clone(),
        DetectionSettings::default(),
        "/nonexistent/leases",
        120,
        Arc::new(NullSource),
        Arc::new(NullSource),
        Arc::new(NullSource),
    ));

    let health = Arc::new(HealthMonitor::new(
        HealthStorage::new(store),
        events,
        Arc::new(OkChecks),
        Arc::new(NoRecovery),
        HealPolicy::default(),
    ));

    ApiService::new(auth, scheduler, tracker, health)
}

fn chrono_tz_utc() -> chrono_tz::Tz {
    chrono_tz::Tz::UTC
}

fn login(service: &ApiService, username: &str) -> String {
    service
        .login(&LoginRequest {
            username: username.to_owned(),
            password: "s3cret!".to_owned(),
            remember_me: false,
        })
        .unwrap()
        .token
}

fn job_body(id: &str) -> CreateJobRequest {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": id,
        "target": "noop",
        "schedule": "*/5 * * * *"
    }))
    .unwrap()
}

#[tokio::test]
async fn test_login_returns_token_and_user() {
    let service = service();
    let response = service
        .login(&LoginRequest {
            username: "admin".to_owned(),
            password: "s3cret!".to_owned(),
            remember_me: false,
        })
        .unwrap();
    assert_eq!(response.user.username, "admin");
    assert_eq!(response.user.role, Role::Admin);
    assert_eq!(response.expires_in, 1800);
}

#[tokio::test]
async fn test_bad_login_maps_to_unauthenticated() {
    let service = service();
    let err = service
        .login(&LoginRequest {
            username: "admin".to_owned(),
            password: "wrong".to_owned(),
            remember_me: false,
        })
        .unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Unauthenticated);
}

#[tokio::test]
async fn test_missing_bearer_rejected() {
    let service = service();
    let err = service.list_jobs("").unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Unauthenticated);

    let err = service.list_jobs("not-a-real-token").unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Unauthenticated);
}

#[tokio::test]
async fn test_job_crud_through_api() {
    let service = service();
    let token = login(&service, "admin");

    service.create_job(&token, job_body("nightly")).unwrap();
    let jobs = service.list_jobs(&token).unwrap();
    assert_eq!(jobs.len(), 1);

    // Duplicate registration maps to conflict.
    let err = service.create_job(&token, job_body("nightly")).unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Conflict);

    let run = service.run_job(&token, "nightly").unwrap();
    assert_eq!(run.job_id, JobId::new("nightly"));
    service.scheduler.await_idle().await;

    let history = service.history(&token, Some("nightly"), 10).unwrap();
    assert_eq!(history.len(), 1);

    service.delete_job(&token, "nightly").unwrap();
    assert!(service.list_jobs(&token).unwrap().is_empty());

    let err = service.delete_job(&token, "nightly").unwrap_err();
    assert_eq!(err.code, ApiErrorCode::NotFound);
}

#[tokio::test]
async fn test_viewer_cannot_mutate() {
    let service = service();
    let token = login(&service, "viewer");

    let err = service.create_job(&token, job_body("x")).unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Forbidden);

    // Reads are fine.
    service.list_jobs(&token).unwrap();
    service.devices(&token).unwrap();
    service.health(&token).unwrap();
}

#[tokio::test]
async fn test_refresh_rotates_token() {
    let service = service();
    let token = login(&service, "admin");

    let fresh = service.refresh(&token).unwrap();
    assert_ne!(fresh.token, token);

    // Old token no longer authenticates.
    let err = service.list_jobs(&token).unwrap_err();
    assert_eq!(err.code, ApiErrorCode::Unauthenticated);
    service.list_jobs(&fresh.token).unwrap();
}

#[tokio::test]
async fn test_device_history_maps_errors() {
    let service = service();
    let token = login(&service, "admin");

    let err = service.device_history(&token, "not-a-mac").unwrap_err();
    assert_eq!(err.code, ApiErrorCode::BadRequest);

    let err = service
        .device_history(&token, "aa:bb:cc:dd:ee:99")
        .unwrap_err();
    assert_eq!(err.code, ApiErrorCode::NotFound);
}

#[tokio::test]
async fn test_health_endpoint_shape() {
    let service = service();
    let token = login(&service, "viewer");

    let health = service.health(&token).unwrap();
    assert!(health.healthy);

    let metrics = service.health_metrics(&token).unwrap();
    assert!(metrics["scheduler"]["in_flight"].is_number());
}
