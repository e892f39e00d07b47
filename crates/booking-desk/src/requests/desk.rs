use std::sync::Arc;

use crate::config::LifecycleConfig;

use super::domain::{BookingRequest, RequestId, RequestStatus};
use super::query::{RequestListQuery, RequestListing};
use super::scheduler::{ObservationScope, StatusTransitionScheduler};
use super::service::{RequestSubmissionService, SubmissionError};
use super::store::{IdentityProvider, RequestStore, StoreError, TransitionAlerts};

/// Wires submission, scheduling, and listing over one store for a long-lived consumer.
///
/// The desk owns an observation scope; dropping the desk cancels every transition it armed
/// that has not fired yet.
pub struct RequestDesk<S, I, A> {
    service: RequestSubmissionService<S, I>,
    query: RequestListQuery<S, A>,
    scope: ObservationScope<S, A>,
}

impl<S, I, A> RequestDesk<S, I, A>
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    pub fn new(store: Arc<S>, identity: Arc<I>, alerts: Arc<A>, config: &LifecycleConfig) -> Self {
        let scheduler = StatusTransitionScheduler::new(
            Arc::clone(&store),
            alerts,
            config.dwell,
            config.store_retry.clone(),
        );
        let service =
            RequestSubmissionService::new(Arc::clone(&store), identity, config.store_retry.clone())
                .with_idempotency_window(config.idempotency_window);
        let query = RequestListQuery::new(store, scheduler.clone(), config.store_retry.clone());
        let scope = scheduler.scope();

        Self {
            service,
            query,
            scope,
        }
    }

    pub fn service(&self) -> &RequestSubmissionService<S, I> {
        &self.service
    }

    pub fn scheduler(&self) -> &StatusTransitionScheduler<S, A> {
        self.scope.scheduler()
    }

    /// Listing as shown to the consumer; Pending entries get their dwell timer armed.
    pub async fn list(&self) -> Result<RequestListing, StoreError> {
        self.query.list_observed(&self.scope).await
    }

    /// Single record, with any fired transition merged in and observed like a listed one.
    pub async fn get(&self, id: &RequestId) -> Result<BookingRequest, SubmissionError> {
        let mut record = self.service.get(id).await?;
        if record.is_pending() {
            if let Some(status) = self.scheduler().settled_status(id) {
                record.status = status;
            }
        }
        self.scope.observe(&record);
        Ok(record)
    }

    /// Explicit accept/reject/cancel; a resolved request's timer is released.
    pub async fn resolve(
        &self,
        id: &RequestId,
        target: RequestStatus,
    ) -> Result<BookingRequest, SubmissionError> {
        let record = self.service.resolve(id, target).await?;
        self.scheduler().release(id);
        Ok(record)
    }
}
