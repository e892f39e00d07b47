use async_trait::async_trait;
use booking_desk::requests::{
    BookingRequest, IdentityProvider, NewBookingRequest, RequestFilter, RequestId, RequestPatch,
    RequestStore, StoreError,
};
use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Process-local request store used by the service and the CLI tools.
#[derive(Default)]
pub(crate) struct InMemoryRequestStore {
    records: Mutex<HashMap<RequestId, BookingRequest>>,
    sequence: AtomicU64,
}

impl InMemoryRequestStore {
    pub(crate) fn with_records(records: Vec<BookingRequest>) -> Self {
        let records: HashMap<RequestId, BookingRequest> = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        let sequence = AtomicU64::new(records.len() as u64);
        Self {
            records: Mutex::new(records),
            sequence,
        }
    }

    fn records(&self) -> Result<MutexGuard<'_, HashMap<RequestId, BookingRequest>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Permanent("request store mutex poisoned".to_string()))
    }

    fn next_id(&self) -> RequestId {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        RequestId(format!("req-{id:06}"))
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, request: NewBookingRequest) -> Result<RequestId, StoreError> {
        let mut guard = self.records()?;
        let mut id = self.next_id();
        while guard.contains_key(&id) {
            id = self.next_id();
        }
        guard.insert(id.clone(), request.into_request(id.clone()));
        Ok(id)
    }

    async fn query(
        &self,
        filter: Option<RequestFilter>,
    ) -> Result<Vec<BookingRequest>, StoreError> {
        let guard = self.records()?;
        Ok(guard
            .values()
            .filter(|record| filter.as_ref().map_or(true, |filter| filter.matches(record)))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &RequestId, patch: RequestPatch) -> Result<(), StoreError> {
        let mut guard = self.records()?;
        let record = guard
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !record.status.can_transition_to(patch.status) {
            return Err(StoreError::Conflict {
                id: id.clone(),
                current: record.status,
            });
        }
        record.status = patch.status;
        Ok(())
    }
}

/// Identity supplied on the command line.
#[derive(Debug, Clone, Default)]
pub(crate) struct StaticIdentity(pub(crate) Option<String>);

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Load a JSON array of stored booking requests. Records without a status load as Pending.
pub(crate) fn load_records(path: &Path) -> Result<Vec<BookingRequest>, std::io::Error> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(std::io::Error::from)
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
