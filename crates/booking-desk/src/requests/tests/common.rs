use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::LifecycleConfig;
use crate::requests::domain::{
    BookingRequest, BookingSubmission, NewBookingRequest, ProfessionalRef, RequestId,
    RequestStatus,
};
use crate::requests::retry::RetryPolicy;
use crate::requests::store::{
    IdentityProvider, RequestFilter, RequestPatch, RequestStore, StoreError, TransitionAlert,
    TransitionAlerts,
};
use crate::requests::{RequestDesk, StatusTransitionScheduler};

pub(super) const DWELL: Duration = Duration::from_secs(10);
pub(super) const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(60);

pub(super) fn retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(100),
        backoff_factor: 2,
        max_backoff: Duration::from_secs(1),
    }
}

pub(super) fn lifecycle() -> LifecycleConfig {
    LifecycleConfig {
        dwell: DWELL,
        store_retry: retry_policy(),
        idempotency_window: IDEMPOTENCY_WINDOW,
    }
}

pub(super) fn submission() -> BookingSubmission {
    BookingSubmission::new(
        Some("p1".to_string()),
        NaiveDate::from_ymd_opt(2024, 5, 1),
        NaiveTime::from_hms_opt(14, 0, 0),
        "123 Main",
    )
}

pub(super) fn created_at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 20, 9, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn record(id: &str, status: RequestStatus, minute: u32) -> BookingRequest {
    BookingRequest {
        id: RequestId(id.to_string()),
        professional_ref: ProfessionalRef("p1".to_string()),
        scheduled_date: NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date"),
        scheduled_time: NaiveTime::from_hms_opt(14, 0, 0).expect("valid time"),
        address: "123 Main".to_string(),
        status,
        created_at: created_at(minute),
        requested_by: None,
    }
}

/// Past the dwell interval, so a paused clock fires every timer armed before the call.
pub(super) async fn elapse_dwell() {
    tokio::time::sleep(DWELL + Duration::from_millis(1)).await;
}

#[derive(Default)]
struct StoreState {
    records: BTreeMap<RequestId, BookingRequest>,
    next_id: u64,
    create_calls: u32,
    query_calls: u32,
    updates: Vec<(RequestId, RequestStatus)>,
    create_failures: VecDeque<StoreError>,
    query_failures: VecDeque<StoreError>,
    update_failures: VecDeque<StoreError>,
    stale_snapshot: Option<Vec<BookingRequest>>,
    create_delay: Option<Duration>,
    update_delay: Option<Duration>,
}

/// In-memory store that records every call and can replay scripted failures.
#[derive(Default, Clone)]
pub(super) struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().expect("store mutex poisoned")
    }

    pub(super) fn seed(&self, record: BookingRequest) {
        self.state().records.insert(record.id.clone(), record);
    }

    /// Mutate a record behind the scheduler's back, as another client would.
    pub(super) fn set_status(&self, id: &str, status: RequestStatus) {
        let mut state = self.state();
        let record = state
            .records
            .get_mut(&RequestId(id.to_string()))
            .expect("record present");
        record.status = status;
    }

    pub(super) fn status_of(&self, id: &str) -> Option<RequestStatus> {
        self.state()
            .records
            .get(&RequestId(id.to_string()))
            .map(|record| record.status)
    }

    pub(super) fn create_calls(&self) -> u32 {
        self.state().create_calls
    }

    pub(super) fn query_calls(&self) -> u32 {
        self.state().query_calls
    }

    pub(super) fn updates(&self) -> Vec<(RequestId, RequestStatus)> {
        self.state().updates.clone()
    }

    pub(super) fn fail_creates(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.state().create_failures.extend(errors);
    }

    pub(super) fn fail_queries(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.state().query_failures.extend(errors);
    }

    pub(super) fn fail_updates(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.state().update_failures.extend(errors);
    }

    /// Serve this snapshot from every query, regardless of writes.
    pub(super) fn serve_stale(&self, snapshot: Vec<BookingRequest>) {
        self.state().stale_snapshot = Some(snapshot);
    }

    pub(super) fn delay_creates(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    /// Apply updates immediately but hold back the acknowledgement.
    pub(super) fn delay_updates(&self, delay: Duration) {
        self.state().update_delay = Some(delay);
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn create(&self, request: NewBookingRequest) -> Result<RequestId, StoreError> {
        let delay = {
            let mut state = self.state();
            state.create_calls += 1;
            if let Some(error) = state.create_failures.pop_front() {
                return Err(error);
            }
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.next_id += 1;
        let id = RequestId(format!("r{}", state.next_id));
        state
            .records
            .insert(id.clone(), request.into_request(id.clone()));
        Ok(id)
    }

    async fn query(
        &self,
        filter: Option<RequestFilter>,
    ) -> Result<Vec<BookingRequest>, StoreError> {
        let mut state = self.state();
        state.query_calls += 1;
        if let Some(error) = state.query_failures.pop_front() {
            return Err(error);
        }
        let source: Vec<BookingRequest> = match &state.stale_snapshot {
            Some(snapshot) => snapshot.clone(),
            None => state.records.values().cloned().collect(),
        };
        Ok(source
            .into_iter()
            .filter(|record| filter.as_ref().map_or(true, |filter| filter.matches(record)))
            .collect())
    }

    async fn update(&self, id: &RequestId, patch: RequestPatch) -> Result<(), StoreError> {
        let delay = {
            let mut state = self.state();
            if let Some(error) = state.update_failures.pop_front() {
                return Err(error);
            }
            let record = state
                .records
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if !record.status.can_transition_to(patch.status) {
                return Err(StoreError::Conflict {
                    id: id.clone(),
                    current: record.status,
                });
            }
            record.status = patch.status;
            state.updates.push((id.clone(), patch.status));
            state.update_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAlerts {
    events: Arc<Mutex<Vec<TransitionAlert>>>,
}

impl MemoryAlerts {
    pub(super) fn events(&self) -> Vec<TransitionAlert> {
        self.events.lock().expect("alert mutex poisoned").clone()
    }
}

impl TransitionAlerts for MemoryAlerts {
    fn publish(&self, alert: TransitionAlert) {
        self.events
            .lock()
            .expect("alert mutex poisoned")
            .push(alert);
    }
}

pub(super) struct SignedIn(pub(super) &'static str);

impl IdentityProvider for SignedIn {
    fn current_user(&self) -> Option<String> {
        Some(self.0.to_string())
    }
}

pub(super) fn build_scheduler() -> (
    StatusTransitionScheduler<MemoryStore, MemoryAlerts>,
    Arc<MemoryStore>,
    Arc<MemoryAlerts>,
) {
    let store = Arc::new(MemoryStore::default());
    let alerts = Arc::new(MemoryAlerts::default());
    let scheduler =
        StatusTransitionScheduler::new(store.clone(), alerts.clone(), DWELL, retry_policy());
    (scheduler, store, alerts)
}

pub(super) fn build_desk() -> (
    Arc<RequestDesk<MemoryStore, SignedIn, MemoryAlerts>>,
    Arc<MemoryStore>,
) {
    let store = Arc::new(MemoryStore::default());
    let desk = RequestDesk::new(
        store.clone(),
        Arc::new(SignedIn("casey@example.com")),
        Arc::new(MemoryAlerts::default()),
        &lifecycle(),
    );
    (Arc::new(desk), store)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 16 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
