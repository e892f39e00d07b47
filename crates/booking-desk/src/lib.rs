//! Booking-request lifecycle core.
//!
//! Submissions are validated and persisted through an injected [`requests::RequestStore`];
//! observed Pending requests are advanced to Accepted by a dwell timer that fires at most
//! once per request.

pub mod config;
pub mod error;
pub mod requests;
pub mod telemetry;
