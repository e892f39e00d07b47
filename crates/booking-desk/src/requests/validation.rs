use std::fmt;

use serde::Serialize;

use super::domain::{BookingRequestDraft, BookingSubmission, ProfessionalRef};

/// Fields a booking submission cannot be created without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    ProfessionalRef,
    ScheduledDate,
    ScheduledTime,
    Address,
}

impl RequiredField {
    pub const fn label(self) -> &'static str {
        match self {
            RequiredField::ProfessionalRef => "professional_ref",
            RequiredField::ScheduledDate => "scheduled_date",
            RequiredField::ScheduledTime => "scheduled_time",
            RequiredField::Address => "address",
        }
    }
}

/// User-correctable submission error listing every missing field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("missing required fields: {}", join_labels(.missing))]
pub struct ValidationError {
    pub missing: Vec<RequiredField>,
}

fn join_labels(fields: &[RequiredField]) -> String {
    fields
        .iter()
        .map(|field| field.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pure completeness check applied before anything reaches the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestValidator;

impl RequestValidator {
    pub fn validate(
        &self,
        submission: &BookingSubmission,
    ) -> Result<BookingRequestDraft, ValidationError> {
        let mut missing = Vec::new();

        let professional_ref = submission
            .professional_ref
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if professional_ref.is_none() {
            missing.push(RequiredField::ProfessionalRef);
        }
        if submission.scheduled_date.is_none() {
            missing.push(RequiredField::ScheduledDate);
        }
        if submission.scheduled_time.is_none() {
            missing.push(RequiredField::ScheduledTime);
        }
        let address = submission.address.trim();
        if address.is_empty() {
            missing.push(RequiredField::Address);
        }

        match (
            professional_ref,
            submission.scheduled_date,
            submission.scheduled_time,
        ) {
            (Some(professional_ref), Some(scheduled_date), Some(scheduled_time))
                if missing.is_empty() =>
            {
                Ok(BookingRequestDraft {
                    professional_ref: ProfessionalRef(professional_ref.to_string()),
                    scheduled_date,
                    scheduled_time,
                    address: address.to_string(),
                    idempotency_token: submission.idempotency_token,
                })
            }
            _ => Err(ValidationError { missing }),
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
