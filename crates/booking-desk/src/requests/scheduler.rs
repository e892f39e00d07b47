//! Dwell-timer driven Pending → Accepted transitions.
//!
//! Every observed Pending request gets at most one armed handle. A handle moves through
//! `Armed → Firing → Fired`, or is removed (cancelled) without touching the store. Fired
//! markers are kept for the scheduler's lifetime so a stale read of the same request can
//! never arm a second transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::domain::{BookingRequest, RequestId, RequestStatus};
use super::retry::{with_retry, RetryError, RetryPolicy};
use super::store::{RequestPatch, RequestStore, StoreError, TransitionAlert, TransitionAlerts};

const TARGET_STATUS: RequestStatus = RequestStatus::Accepted;

/// Identifies the consumer that armed a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

/// Public view of a request's handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Armed,
    Firing,
    Fired,
}

/// Result of observing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// A new timer was armed.
    Armed,
    /// The request already had a live handle, or its firing handle's result was observed;
    /// nothing changed.
    ConcurrencyNoop,
    /// The request already transitioned through this scheduler.
    AlreadyFired,
    /// The request left Pending by another path; its live handle was cancelled.
    Disarmed,
    /// Non-Pending request without a handle.
    Ignored,
}

enum HandleEntry {
    Armed {
        generation: u64,
        scope: ScopeId,
        token: CancellationToken,
    },
    Firing {
        generation: u64,
        scope: ScopeId,
        token: CancellationToken,
    },
    Fired {
        at: DateTime<Utc>,
    },
}

impl HandleEntry {
    fn state(&self) -> HandleState {
        match self {
            HandleEntry::Armed { .. } => HandleState::Armed,
            HandleEntry::Firing { .. } => HandleState::Firing,
            HandleEntry::Fired { .. } => HandleState::Fired,
        }
    }

    fn generation(&self) -> Option<u64> {
        match self {
            HandleEntry::Armed { generation, .. } | HandleEntry::Firing { generation, .. } => {
                Some(*generation)
            }
            HandleEntry::Fired { .. } => None,
        }
    }

    fn live_token(&self) -> Option<&CancellationToken> {
        match self {
            HandleEntry::Armed { token, .. } | HandleEntry::Firing { token, .. } => Some(token),
            HandleEntry::Fired { .. } => None,
        }
    }

    fn scope(&self) -> Option<ScopeId> {
        match self {
            HandleEntry::Armed { scope, .. } | HandleEntry::Firing { scope, .. } => Some(*scope),
            HandleEntry::Fired { .. } => None,
        }
    }
}

struct SchedulerInner<S, A> {
    store: Arc<S>,
    alerts: Arc<A>,
    dwell: Duration,
    retry: RetryPolicy,
    handles: Mutex<HashMap<RequestId, HandleEntry>>,
    next_generation: AtomicU64,
    next_scope: AtomicU64,
}

/// Arms one-shot dwell timers for observed Pending requests.
pub struct StatusTransitionScheduler<S, A> {
    inner: Arc<SchedulerInner<S, A>>,
}

impl<S, A> Clone for StatusTransitionScheduler<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> StatusTransitionScheduler<S, A>
where
    S: RequestStore + 'static,
    A: TransitionAlerts + 'static,
{
    pub fn new(store: Arc<S>, alerts: Arc<A>, dwell: Duration, retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                alerts,
                dwell,
                retry,
                handles: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                next_scope: AtomicU64::new(1),
            }),
        }
    }

    pub fn dwell(&self) -> Duration {
        self.inner.dwell
    }

    /// Open a consumer scope. Dropping it cancels every unfired handle it armed.
    pub fn scope(&self) -> ObservationScope<S, A> {
        let id = ScopeId(self.inner.next_scope.fetch_add(1, Ordering::Relaxed));
        ObservationScope {
            scheduler: self.clone(),
            id,
        }
    }

    /// Must be called from within a tokio runtime; arming spawns the timer task.
    fn observe_in(&self, scope: ScopeId, request: &BookingRequest) -> ObserveOutcome {
        let mut handles = self.inner.lock_handles();

        match handles.get(&request.id) {
            Some(HandleEntry::Fired { .. }) => return ObserveOutcome::AlreadyFired,
            Some(_) if request.is_pending() => return ObserveOutcome::ConcurrencyNoop,
            // this timer's own update may already be visible; `complete` records it
            Some(HandleEntry::Firing { .. }) if request.status == TARGET_STATUS => {
                return ObserveOutcome::ConcurrencyNoop
            }
            Some(entry) => {
                if let Some(token) = entry.live_token() {
                    token.cancel();
                }
                handles.remove(&request.id);
                debug!(
                    request_id = %request.id,
                    status = request.status.label(),
                    "request left pending elsewhere; handle cancelled"
                );
                return ObserveOutcome::Disarmed;
            }
            None if !request.is_pending() => return ObserveOutcome::Ignored,
            None => {}
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        handles.insert(
            request.id.clone(),
            HandleEntry::Armed {
                generation,
                scope,
                token: token.clone(),
            },
        );
        drop(handles);

        debug!(request_id = %request.id, dwell = ?self.inner.dwell, "transition armed");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_timer(inner, request.id.clone(), generation, token));
        ObserveOutcome::Armed
    }

    /// Cancel the handle for `id` if it has not fired yet.
    pub fn release(&self, id: &RequestId) -> bool {
        let mut handles = self.inner.lock_handles();
        let live = handles.get(id).and_then(HandleEntry::live_token).cloned();
        match live {
            Some(token) => {
                token.cancel();
                handles.remove(id);
                true
            }
            None => false,
        }
    }

    /// Cancel every unfired handle, regardless of scope.
    pub fn shutdown(&self) -> usize {
        let mut handles = self.inner.lock_handles();
        let mut cancelled = 0;
        handles.retain(|_, entry| match entry.live_token() {
            Some(token) => {
                token.cancel();
                cancelled += 1;
                false
            }
            None => true,
        });
        cancelled
    }

    pub fn handle_state(&self, id: &RequestId) -> Option<HandleState> {
        self.inner.lock_handles().get(id).map(HandleEntry::state)
    }

    /// Status applied by a fired transition, if any.
    pub fn settled_status(&self, id: &RequestId) -> Option<RequestStatus> {
        match self.inner.lock_handles().get(id) {
            Some(HandleEntry::Fired { .. }) => Some(TARGET_STATUS),
            _ => None,
        }
    }

    /// Snapshot of every fired transition.
    pub fn settled(&self) -> HashMap<RequestId, RequestStatus> {
        self.inner
            .lock_handles()
            .iter()
            .filter_map(|(id, entry)| match entry {
                HandleEntry::Fired { .. } => Some((id.clone(), TARGET_STATUS)),
                _ => None,
            })
            .collect()
    }

    pub fn fired_at(&self, id: &RequestId) -> Option<DateTime<Utc>> {
        match self.inner.lock_handles().get(id) {
            Some(HandleEntry::Fired { at }) => Some(*at),
            _ => None,
        }
    }

    pub fn live_handles(&self) -> usize {
        self.inner
            .lock_handles()
            .values()
            .filter(|entry| entry.live_token().is_some())
            .count()
    }
}

impl<S, A> SchedulerInner<S, A> {
    fn lock_handles(&self) -> MutexGuard<'_, HashMap<RequestId, HandleEntry>> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release_scope(&self, scope: ScopeId) -> usize {
        let mut handles = self.lock_handles();
        let mut cancelled = 0;
        handles.retain(|_, entry| {
            if entry.scope() != Some(scope) {
                return true;
            }
            if let Some(token) = entry.live_token() {
                token.cancel();
            }
            cancelled += 1;
            false
        });
        cancelled
    }

    /// Armed → Firing, only if the handle still belongs to this timer.
    fn begin_firing(&self, id: &RequestId, generation: u64) -> bool {
        let mut handles = self.lock_handles();
        let Some(entry) = handles.get_mut(id) else {
            return false;
        };
        let next = match entry {
            HandleEntry::Armed {
                generation: current,
                scope,
                token,
            } if *current == generation && !token.is_cancelled() => HandleEntry::Firing {
                generation,
                scope: *scope,
                token: token.clone(),
            },
            _ => return false,
        };
        *entry = next;
        true
    }

    /// Firing → Fired. Returns false when the handle was released mid-flight.
    fn complete(&self, id: &RequestId, generation: u64) -> bool {
        let mut handles = self.lock_handles();
        let ours = matches!(
            handles.get(id),
            Some(HandleEntry::Firing { generation: current, .. }) if *current == generation
        );
        if ours {
            handles.insert(id.clone(), HandleEntry::Fired { at: Utc::now() });
        }
        ours
    }

    /// Drop the handle without recording a transition. Returns false if it was already gone.
    fn discard(&self, id: &RequestId, generation: u64) -> bool {
        let mut handles = self.lock_handles();
        let ours = handles.get(id).and_then(HandleEntry::generation) == Some(generation);
        if ours {
            handles.remove(id);
        }
        ours
    }
}

impl<S, A> SchedulerInner<S, A>
where
    S: RequestStore,
    A: TransitionAlerts,
{
    fn abandon(&self, id: &RequestId, generation: u64, error: StoreError, attempts: u32) {
        if !self.discard(id, generation) {
            return;
        }
        self.alerts.publish(TransitionAlert {
            request_id: id.clone(),
            target: TARGET_STATUS,
            attempts,
            error: error.to_string(),
            raised_at: Utc::now(),
        });
    }
}

async fn run_timer<S, A>(
    inner: Arc<SchedulerInner<S, A>>,
    id: RequestId,
    generation: u64,
    token: CancellationToken,
) where
    S: RequestStore + 'static,
    A: TransitionAlerts + 'static,
{
    tokio::select! {
        _ = token.cancelled() => {
            debug!(request_id = %id, "handle released before dwell elapsed");
            return;
        }
        _ = tokio::time::sleep(inner.dwell) => {}
    }

    if !inner.begin_firing(&id, generation) {
        return;
    }

    let store = Arc::clone(&inner.store);
    let fetch_id = id.clone();
    let current = with_retry(&inner.retry, "fetch", Some(&token), move || {
        let store = Arc::clone(&store);
        let id = fetch_id.clone();
        async move { store.fetch(&id).await }
    })
    .await;

    match current {
        Ok(record) if record.is_pending() => {}
        Ok(record) => {
            inner.discard(&id, generation);
            debug!(
                request_id = %id,
                status = record.status.label(),
                "request no longer pending; transition skipped"
            );
            return;
        }
        Err(RetryError::Cancelled) => return,
        Err(RetryError::Store { source, attempts }) => {
            inner.abandon(&id, generation, source, attempts);
            return;
        }
    }

    if token.is_cancelled() {
        return;
    }

    let store = Arc::clone(&inner.store);
    let update_id = id.clone();
    let outcome = with_retry(&inner.retry, "update", Some(&token), move || {
        let store = Arc::clone(&store);
        let id = update_id.clone();
        async move { store.update(&id, RequestPatch::status(TARGET_STATUS)).await }
    })
    .await;

    match outcome {
        Ok(()) => {
            if inner.complete(&id, generation) {
                info!(
                    request_id = %id,
                    status = TARGET_STATUS.label(),
                    "scheduled transition applied"
                );
            } else {
                debug!(request_id = %id, "transition result discarded; handle was released");
            }
        }
        Err(RetryError::Store {
            source: StoreError::Conflict { current, .. },
            ..
        }) => {
            inner.discard(&id, generation);
            debug!(
                request_id = %id,
                status = current.label(),
                "request resolved elsewhere while firing"
            );
        }
        Err(RetryError::Cancelled) => {}
        Err(RetryError::Store { source, attempts }) => {
            inner.abandon(&id, generation, source, attempts);
        }
    }
}

/// A consumer's view onto the scheduler; owns the handles it arms.
pub struct ObservationScope<S, A> {
    scheduler: StatusTransitionScheduler<S, A>,
    id: ScopeId,
}

impl<S, A> ObservationScope<S, A>
where
    S: RequestStore + 'static,
    A: TransitionAlerts + 'static,
{
    pub fn id(&self) -> ScopeId {
        self.id
    }

    pub fn observe(&self, request: &BookingRequest) -> ObserveOutcome {
        self.scheduler.observe_in(self.id, request)
    }

    /// Observe each request; returns how many new timers were armed.
    pub fn observe_all<'a, I>(&self, requests: I) -> usize
    where
        I: IntoIterator<Item = &'a BookingRequest>,
    {
        requests
            .into_iter()
            .filter(|request| self.observe(request) == ObserveOutcome::Armed)
            .count()
    }

    pub fn scheduler(&self) -> &StatusTransitionScheduler<S, A> {
        &self.scheduler
    }

    /// Tear the scope down explicitly; equivalent to dropping it.
    pub fn release(self) {}
}

impl<S, A> Drop for ObservationScope<S, A> {
    fn drop(&mut self) {
        let cancelled = self.scheduler.inner.release_scope(self.id);
        if cancelled > 0 {
            debug!(scope = self.id.0, cancelled, "observation scope released");
        }
    }
}
