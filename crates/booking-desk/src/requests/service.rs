use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info};

use super::domain::{
    BookingRequest, BookingRequestDraft, BookingSubmission, IdempotencyToken, NewBookingRequest,
    RequestId, RequestStatus,
};
use super::retry::{with_retry, RetryError, RetryPolicy};
use super::store::{IdentityProvider, RequestPatch, RequestStore, StoreError};
use super::validation::{RequestValidator, ValidationError};

type SubmissionSlot = Arc<OnceCell<BookingRequest>>;

const DEFAULT_IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(600);

struct RememberedSubmission {
    slot: SubmissionSlot,
    first_seen: Instant,
}

/// Turns validated submissions into persisted booking requests and applies explicit
/// accept/reject/cancel actions through the same store contract as the scheduler.
pub struct RequestSubmissionService<S, I> {
    validator: RequestValidator,
    store: Arc<S>,
    identity: Arc<I>,
    retry: RetryPolicy,
    idempotency_window: Duration,
    submissions: Mutex<HashMap<IdempotencyToken, RememberedSubmission>>,
}

impl<S, I> RequestSubmissionService<S, I>
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
{
    pub fn new(store: Arc<S>, identity: Arc<I>, retry: RetryPolicy) -> Self {
        Self {
            validator: RequestValidator,
            store,
            identity,
            retry,
            idempotency_window: DEFAULT_IDEMPOTENCY_WINDOW,
            submissions: Mutex::new(HashMap::new()),
        }
    }

    /// Forget tokens this long after they were first submitted.
    pub fn with_idempotency_window(mut self, window: Duration) -> Self {
        self.idempotency_window = window;
        self
    }

    /// Validate and persist a submission.
    ///
    /// Calls sharing an idempotency token within the idempotency window create at most one
    /// record; every caller receives that record. A failed attempt leaves the token free for
    /// another try.
    pub async fn submit(
        &self,
        submission: BookingSubmission,
    ) -> Result<BookingRequest, SubmissionError> {
        let draft = self.validator.validate(&submission)?;
        let token = draft.idempotency_token;
        let slot = self.slot_for(token);

        let mut created_here = false;
        let created = &mut created_here;
        let request = slot
            .get_or_try_init(move || async move {
                *created = true;
                self.create(draft).await
            })
            .await?;

        if !created_here {
            debug!(request_id = %request.id, token = %token.0, "duplicate submission collapsed");
        }
        Ok(request.clone())
    }

    async fn create(&self, draft: BookingRequestDraft) -> Result<BookingRequest, SubmissionError> {
        let payload = NewBookingRequest::from_draft(draft, self.identity.current_user(), Utc::now());

        let store = Arc::clone(&self.store);
        let attempt_payload = payload.clone();
        let id = with_retry(&self.retry, "create", None, move || {
            let store = Arc::clone(&store);
            let payload = attempt_payload.clone();
            async move { store.create(payload).await }
        })
        .await
        .map_err(SubmissionError::from_retry)?;

        info!(
            request_id = %id,
            professional = %payload.professional_ref.0,
            "booking request created"
        );
        Ok(payload.into_request(id))
    }

    fn slot_for(&self, token: IdempotencyToken) -> SubmissionSlot {
        let now = Instant::now();
        let window = self.idempotency_window;
        let mut guard = self
            .submissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // a slot still referenced elsewhere belongs to a submission in flight
        guard.retain(|_, remembered| {
            now.duration_since(remembered.first_seen) < window
                || Arc::strong_count(&remembered.slot) > 1
        });

        let remembered = guard.entry(token).or_insert_with(|| RememberedSubmission {
            slot: SubmissionSlot::default(),
            first_seen: now,
        });
        Arc::clone(&remembered.slot)
    }

    #[cfg(test)]
    pub(crate) fn remembered_submissions(&self) -> usize {
        self.submissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Fetch the authoritative record.
    pub async fn get(&self, id: &RequestId) -> Result<BookingRequest, SubmissionError> {
        let store = Arc::clone(&self.store);
        let id = id.clone();
        with_retry(&self.retry, "fetch", None, move || {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.fetch(&id).await }
        })
        .await
        .map_err(SubmissionError::from_retry)
    }

    pub async fn accept(&self, id: &RequestId) -> Result<BookingRequest, SubmissionError> {
        self.resolve(id, RequestStatus::Accepted).await
    }

    pub async fn reject(&self, id: &RequestId) -> Result<BookingRequest, SubmissionError> {
        self.resolve(id, RequestStatus::Rejected).await
    }

    pub async fn cancel(&self, id: &RequestId) -> Result<BookingRequest, SubmissionError> {
        self.resolve(id, RequestStatus::Cancelled).await
    }

    /// Move a Pending request to a terminal status.
    pub async fn resolve(
        &self,
        id: &RequestId,
        target: RequestStatus,
    ) -> Result<BookingRequest, SubmissionError> {
        let mut record = self.get(id).await?;
        if !record.status.can_transition_to(target) {
            return Err(SubmissionError::InvalidTransition {
                id: id.clone(),
                from: record.status,
                to: target,
            });
        }

        let store = Arc::clone(&self.store);
        let update_id = id.clone();
        let outcome = with_retry(&self.retry, "update", None, move || {
            let store = Arc::clone(&store);
            let id = update_id.clone();
            async move { store.update(&id, RequestPatch::status(target)).await }
        })
        .await;

        match outcome {
            Ok(()) => {}
            Err(RetryError::Store {
                source: StoreError::Conflict { current, .. },
                ..
            }) => {
                return Err(SubmissionError::InvalidTransition {
                    id: id.clone(),
                    from: current,
                    to: target,
                })
            }
            Err(err) => return Err(SubmissionError::from_retry(err)),
        }

        info!(request_id = %id, status = target.label(), "booking request resolved");
        record.status = target;
        Ok(record)
    }
}

/// Error raised by the submission service.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{source} (after {attempts} attempt(s))")]
    Store { source: StoreError, attempts: u32 },
    #[error("request {id} cannot move from {} to {}", .from.label(), .to.label())]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
}

impl SubmissionError {
    fn from_retry(err: RetryError) -> Self {
        match err {
            RetryError::Store { source, attempts } => Self::Store { source, attempts },
            // submissions never pass a cancellation token
            RetryError::Cancelled => Self::Store {
                source: StoreError::Transient("operation cancelled".to_string()),
                attempts: 0,
            },
        }
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            SubmissionError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}
