use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;
use uuid::Uuid;

/// Store-assigned identifier for a booking request.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the professional a request is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfessionalRef(pub String);

/// Token minted once per user action so repeated submits collapse into one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyToken(pub Uuid);

impl IdempotencyToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Lifecycle status of a booking request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl RequestStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Transitions only leave Pending, and only towards a terminal status.
    pub const fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!(self, RequestStatus::Pending) && next.is_terminal()
    }
}

/// Raw booking form as captured by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSubmission {
    #[serde(default)]
    pub professional_ref: Option<String>,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default, with = "optional_time")]
    pub scheduled_time: Option<NaiveTime>,
    #[serde(default)]
    pub address: String,
    /// Clients retrying the same user action must resend this token. A body without one is
    /// given a fresh token, so its retries create separate records.
    #[serde(default = "minted_token")]
    pub idempotency_token: IdempotencyToken,
}

fn minted_token() -> IdempotencyToken {
    let token = IdempotencyToken::generate();
    debug!(token = %token.0, "submission carried no idempotency token; minted one");
    token
}

impl BookingSubmission {
    pub fn new(
        professional_ref: Option<String>,
        scheduled_date: Option<NaiveDate>,
        scheduled_time: Option<NaiveTime>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            professional_ref,
            scheduled_date,
            scheduled_time,
            address: address.into(),
            idempotency_token: IdempotencyToken::generate(),
        }
    }
}

/// A submission that passed validation; every required field is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequestDraft {
    pub professional_ref: ProfessionalRef,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub address: String,
    pub idempotency_token: IdempotencyToken,
}

/// Immutable creation payload handed to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookingRequest {
    pub professional_ref: ProfessionalRef,
    pub scheduled_date: NaiveDate,
    #[serde(serialize_with = "serialize_time")]
    pub scheduled_time: NaiveTime,
    pub address: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub requested_by: Option<String>,
    pub idempotency_token: IdempotencyToken,
}

impl NewBookingRequest {
    pub fn from_draft(
        draft: BookingRequestDraft,
        requested_by: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            professional_ref: draft.professional_ref,
            scheduled_date: draft.scheduled_date,
            scheduled_time: draft.scheduled_time,
            address: draft.address,
            status: RequestStatus::Pending,
            created_at,
            requested_by,
            idempotency_token: draft.idempotency_token,
        }
    }

    pub fn into_request(self, id: RequestId) -> BookingRequest {
        BookingRequest {
            id,
            professional_ref: self.professional_ref,
            scheduled_date: self.scheduled_date,
            scheduled_time: self.scheduled_time,
            address: self.address,
            status: self.status,
            created_at: self.created_at,
            requested_by: self.requested_by,
        }
    }
}

/// Persisted booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: RequestId,
    pub professional_ref: ProfessionalRef,
    pub scheduled_date: NaiveDate,
    #[serde(serialize_with = "serialize_time", deserialize_with = "deserialize_time")]
    pub scheduled_time: NaiveTime,
    pub address: String,
    // documents written before status tracking carry no status at all
    #[serde(default)]
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl BookingRequest {
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }

    pub fn view(&self) -> BookingRequestView {
        BookingRequestView {
            id: self.id.clone(),
            professional_ref: self.professional_ref.0.clone(),
            scheduled_date: self.scheduled_date,
            scheduled_time: self.scheduled_time.format(TIME_FORMAT).to_string(),
            address: self.address.clone(),
            status: self.status.label(),
            created_at: self.created_at,
        }
    }
}

/// Public representation rendered by HTTP and CLI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookingRequestView {
    pub id: RequestId,
    pub professional_ref: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: String,
    pub address: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

const TIME_FORMAT: &str = "%H:%M";

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    let trimmed = raw.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, TIME_FORMAT))
        .map_err(|err| format!("failed to parse '{raw}' as HH:MM ({err})"))
}

fn serialize_time<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&time.format(TIME_FORMAT).to_string())
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_time(&raw).map_err(serde::de::Error::custom)
}

mod optional_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match time {
            Some(time) => super::serialize_time(time, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(deserializer)?;
        opt.filter(|value| !value.trim().is_empty())
            .map(|value| super::parse_time(&value).map_err(serde::de::Error::custom))
            .transpose()
    }
}
