use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{BookingRequest, NewBookingRequest, ProfessionalRef, RequestId, RequestStatus};

/// Durable storage for booking requests. Records are never deleted.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a complete record and return the identifier assigned to it.
    async fn create(&self, request: NewBookingRequest) -> Result<RequestId, StoreError>;

    /// Return every record matching `filter`, or all records when `None`.
    async fn query(&self, filter: Option<RequestFilter>)
        -> Result<Vec<BookingRequest>, StoreError>;

    /// Apply `patch` atomically. A record that already left Pending must be reported as
    /// [`StoreError::Conflict`] rather than overwritten.
    async fn update(&self, id: &RequestId, patch: RequestPatch) -> Result<(), StoreError>;

    /// Authoritative single-record read.
    async fn fetch(&self, id: &RequestId) -> Result<BookingRequest, StoreError> {
        self.query(Some(RequestFilter::by_id(id.clone())))
            .await?
            .into_iter()
            .find(|record| &record.id == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// Optional narrowing applied by [`RequestStore::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub id: Option<RequestId>,
    pub status: Option<RequestStatus>,
    pub professional_ref: Option<ProfessionalRef>,
}

impl RequestFilter {
    pub fn by_id(id: RequestId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &BookingRequest) -> bool {
        self.id.as_ref().map_or(true, |id| id == &record.id)
            && self.status.map_or(true, |status| status == record.status)
            && self
                .professional_ref
                .as_ref()
                .map_or(true, |professional| professional == &record.professional_ref)
    }
}

/// Partial update; only status changes are ever issued by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestPatch {
    pub status: RequestStatus,
}

impl RequestPatch {
    pub fn status(status: RequestStatus) -> Self {
        Self { status }
    }
}

/// Store failure, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store temporarily unavailable: {0}")]
    Transient(String),
    #[error("store rejected the operation: {0}")]
    Permanent(String),
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("request {id} is already {}", .current.label())]
    Conflict { id: RequestId, current: RequestStatus },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Signed-in identity used to attribute submissions.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<String>;
}

/// Identity provider for contexts without a signed-in user.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn current_user(&self) -> Option<String> {
        None
    }
}

/// Outbound hook for scheduler failures that exhausted their retries.
pub trait TransitionAlerts: Send + Sync {
    fn publish(&self, alert: TransitionAlert);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionAlert {
    pub request_id: RequestId,
    pub target: RequestStatus,
    pub attempts: u32,
    pub error: String,
    pub raised_at: DateTime<Utc>,
}

/// Default alert sink that reports through the tracing pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlerts;

impl TransitionAlerts for TracingAlerts {
    fn publish(&self, alert: TransitionAlert) {
        tracing::error!(
            request_id = %alert.request_id,
            target = alert.target.label(),
            attempts = alert.attempts,
            error = %alert.error,
            "scheduled status transition abandoned"
        );
    }
}
