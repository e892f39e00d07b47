//! Booking-request lifecycle: validation, submission, timed transitions, and listing.

pub mod desk;
pub mod domain;
pub mod query;
pub(crate) mod retry;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod validation;

#[cfg(test)]
mod tests;

pub use desk::RequestDesk;
pub use domain::{
    parse_time, BookingRequest, BookingRequestDraft, BookingRequestView, BookingSubmission,
    IdempotencyToken, NewBookingRequest, ProfessionalRef, RequestId, RequestStatus,
};
pub use query::{RequestListQuery, RequestListing};
pub use retry::RetryPolicy;
pub use router::request_router;
pub use scheduler::{
    HandleState, ObservationScope, ObserveOutcome, ScopeId, StatusTransitionScheduler,
};
pub use service::{RequestSubmissionService, SubmissionError};
pub use store::{
    Anonymous, IdentityProvider, RequestFilter, RequestPatch, RequestStore, StoreError,
    TracingAlerts, TransitionAlert, TransitionAlerts,
};
pub use validation::{RequestValidator, RequiredField, ValidationError};
