use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::desk::RequestDesk;
use super::domain::{BookingRequestView, BookingSubmission, RequestId, RequestStatus};
use super::service::SubmissionError;
use super::store::{IdentityProvider, RequestStore, StoreError, TransitionAlerts};

type DeskState<S, I, A> = State<Arc<RequestDesk<S, I, A>>>;

/// Router builder exposing HTTP endpoints for booking requests.
pub fn request_router<S, I, A>(desk: Arc<RequestDesk<S, I, A>>) -> Router
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    Router::new()
        .route(
            "/api/v1/requests",
            post(submit_handler::<S, I, A>).get(list_handler::<S, I, A>),
        )
        .route("/api/v1/requests/:request_id", get(get_handler::<S, I, A>))
        .route(
            "/api/v1/requests/:request_id/accept",
            post(accept_handler::<S, I, A>),
        )
        .route(
            "/api/v1/requests/:request_id/reject",
            post(reject_handler::<S, I, A>),
        )
        .route(
            "/api/v1/requests/:request_id/cancel",
            post(cancel_handler::<S, I, A>),
        )
        .with_state(desk)
}

pub(crate) async fn submit_handler<S, I, A>(
    State(desk): DeskState<S, I, A>,
    axum::Json(submission): axum::Json<BookingSubmission>,
) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    match desk.service().submit(submission).await {
        Ok(request) => (StatusCode::ACCEPTED, axum::Json(request.view())).into_response(),
        Err(error) => submission_error_response(error),
    }
}

pub(crate) async fn list_handler<S, I, A>(State(desk): DeskState<S, I, A>) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    match desk.list().await {
        Ok(listing) => {
            let views: Vec<BookingRequestView> =
                listing.iter().map(|request| request.view()).collect();
            (StatusCode::OK, axum::Json(json!({ "requests": views }))).into_response()
        }
        Err(error) => store_error_response(&error),
    }
}

pub(crate) async fn get_handler<S, I, A>(
    State(desk): DeskState<S, I, A>,
    Path(request_id): Path<String>,
) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    match desk.get(&RequestId(request_id)).await {
        Ok(request) => (StatusCode::OK, axum::Json(request.view())).into_response(),
        Err(error) => submission_error_response(error),
    }
}

pub(crate) async fn accept_handler<S, I, A>(
    state: DeskState<S, I, A>,
    Path(request_id): Path<String>,
) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    resolve(state, request_id, RequestStatus::Accepted).await
}

pub(crate) async fn reject_handler<S, I, A>(
    state: DeskState<S, I, A>,
    Path(request_id): Path<String>,
) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    resolve(state, request_id, RequestStatus::Rejected).await
}

pub(crate) async fn cancel_handler<S, I, A>(
    state: DeskState<S, I, A>,
    Path(request_id): Path<String>,
) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    resolve(state, request_id, RequestStatus::Cancelled).await
}

async fn resolve<S, I, A>(
    State(desk): DeskState<S, I, A>,
    request_id: String,
    target: RequestStatus,
) -> Response
where
    S: RequestStore + 'static,
    I: IdentityProvider + 'static,
    A: TransitionAlerts + 'static,
{
    let id = RequestId(request_id);
    match desk.resolve(&id, target).await {
        Ok(request) => (StatusCode::OK, axum::Json(request.view())).into_response(),
        Err(error) => submission_error_response(error),
    }
}

fn submission_error_response(error: SubmissionError) -> Response {
    match error {
        SubmissionError::Validation(validation) => {
            let missing: Vec<&'static str> =
                validation.missing.iter().map(|field| field.label()).collect();
            let payload = json!({
                "error": validation.to_string(),
                "missing": missing,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        SubmissionError::InvalidTransition { .. } => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        SubmissionError::Store { ref source, .. } => {
            let status = store_status(source);
            let payload = json!({ "error": error.to_string() });
            (status, axum::Json(payload)).into_response()
        }
    }
}

fn store_error_response(error: &StoreError) -> Response {
    let payload = json!({ "error": error.to_string() });
    (store_status(error), axum::Json(payload)).into_response()
}

fn store_status(error: &StoreError) -> StatusCode {
    match error {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Permanent(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
