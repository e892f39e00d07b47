use std::cmp::Ordering;
use std::sync::Arc;

use super::domain::BookingRequest;
use super::retry::{with_retry, RetryError, RetryPolicy};
use super::scheduler::{ObservationScope, StatusTransitionScheduler};
use super::store::{RequestFilter, RequestStore, StoreError, TransitionAlerts};

/// Read path over the store, merged with transitions the scheduler already applied.
pub struct RequestListQuery<S, A> {
    store: Arc<S>,
    scheduler: StatusTransitionScheduler<S, A>,
    retry: RetryPolicy,
}

impl<S, A> RequestListQuery<S, A>
where
    S: RequestStore + 'static,
    A: TransitionAlerts + 'static,
{
    pub fn new(store: Arc<S>, scheduler: StatusTransitionScheduler<S, A>, retry: RetryPolicy) -> Self {
        Self {
            store,
            scheduler,
            retry,
        }
    }

    /// All requests, newest first; ties are ordered by id.
    pub async fn list(&self) -> Result<RequestListing, StoreError> {
        self.list_with(None).await
    }

    pub async fn list_with(
        &self,
        filter: Option<RequestFilter>,
    ) -> Result<RequestListing, StoreError> {
        let store = Arc::clone(&self.store);
        let records = with_retry(&self.retry, "query", None, move || {
            let store = Arc::clone(&store);
            let filter = filter.clone();
            async move { store.query(filter).await }
        })
        .await
        .map_err(|err| match err {
            RetryError::Store { source, .. } => source,
            RetryError::Cancelled => StoreError::Transient("query cancelled".to_string()),
        })?;

        let settled = self.scheduler.settled();
        let mut entries: Vec<BookingRequest> = records
            .into_iter()
            .map(|mut record| {
                // an eventually-consistent read may still report Pending after the timer fired
                if record.is_pending() {
                    if let Some(status) = settled.get(&record.id) {
                        record.status = *status;
                    }
                }
                record
            })
            .collect();
        entries.sort_by(listing_order);

        Ok(RequestListing {
            entries: entries.into(),
        })
    }

    /// List, then observe every Pending entry through `scope`.
    pub async fn list_observed(
        &self,
        scope: &ObservationScope<S, A>,
    ) -> Result<RequestListing, StoreError> {
        let listing = self.list().await?;
        scope.observe_all(listing.iter().filter(|request| request.is_pending()));
        Ok(listing)
    }
}

fn listing_order(left: &BookingRequest, right: &BookingRequest) -> Ordering {
    right
        .created_at
        .cmp(&left.created_at)
        .then_with(|| left.id.cmp(&right.id))
}

/// Ordered snapshot returned by [`RequestListQuery`]; iterating it never touches the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestListing {
    entries: Arc<[BookingRequest]>,
}

impl RequestListing {
    pub fn iter(&self) -> std::slice::Iter<'_, BookingRequest> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_vec(&self) -> Vec<BookingRequest> {
        self.entries.to_vec()
    }
}

impl<'a> IntoIterator for &'a RequestListing {
    type Item = &'a BookingRequest;
    type IntoIter = std::slice::Iter<'a, BookingRequest>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
