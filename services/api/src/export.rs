use crate::infra::{load_records, InMemoryRequestStore};
use booking_desk::error::AppError;
use booking_desk::requests::{
    BookingRequest, RequestFilter, RequestListQuery, RequestListing, RequestStatus, RetryPolicy,
    StatusTransitionScheduler, StoreError, TracingAlerts,
};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct ExportArgs {
    /// JSON array of stored booking requests
    #[arg(long)]
    pub(crate) input: PathBuf,
    /// Destination CSV file (defaults to stdout)
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
    /// Only export requests in this status
    #[arg(long, value_enum)]
    pub(crate) status: Option<StatusArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum StatusArg {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl From<StatusArg> for RequestStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => RequestStatus::Pending,
            StatusArg::Accepted => RequestStatus::Accepted,
            StatusArg::Rejected => RequestStatus::Rejected,
            StatusArg::Cancelled => RequestStatus::Cancelled,
        }
    }
}

#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: &'a str,
    professional_ref: &'a str,
    scheduled_date: String,
    scheduled_time: String,
    address: &'a str,
    status: &'static str,
    created_at: String,
    requested_by: &'a str,
}

impl<'a> From<&'a BookingRequest> for ExportRow<'a> {
    fn from(request: &'a BookingRequest) -> Self {
        Self {
            id: &request.id.0,
            professional_ref: &request.professional_ref.0,
            scheduled_date: request.scheduled_date.format("%Y-%m-%d").to_string(),
            scheduled_time: request.scheduled_time.format("%H:%M").to_string(),
            address: &request.address,
            status: request.status.label(),
            created_at: request.created_at.to_rfc3339(),
            requested_by: request.requested_by.as_deref().unwrap_or(""),
        }
    }
}

pub(crate) async fn run_export(args: ExportArgs) -> Result<(), AppError> {
    let records = load_records(&args.input)?;
    let filter = args
        .status
        .map(|status| RequestFilter::default().with_status(status.into()));
    let listing = ordered_listing(records, filter).await?;

    let exported = match args.output {
        Some(path) => write_csv(&listing, File::create(path)?)?,
        None => write_csv(&listing, io::stdout().lock())?,
    };
    eprintln!("exported {exported} booking request(s)");
    Ok(())
}

async fn ordered_listing(
    records: Vec<BookingRequest>,
    filter: Option<RequestFilter>,
) -> Result<RequestListing, StoreError> {
    let store = Arc::new(InMemoryRequestStore::with_records(records));
    // offline listing: nothing is observed, so no timers are ever armed
    let scheduler = StatusTransitionScheduler::new(
        Arc::clone(&store),
        Arc::new(TracingAlerts),
        Duration::ZERO,
        RetryPolicy::none(),
    );
    RequestListQuery::new(store, scheduler, RetryPolicy::none())
        .list_with(filter)
        .await
}

/// Returns the number of rows written.
fn write_csv<W: Write>(listing: &RequestListing, out: W) -> Result<usize, AppError> {
    let mut writer = csv::Writer::from_writer(out);
    for request in listing {
        writer
            .serialize(ExportRow::from(request))
            .map_err(io::Error::from)?;
    }
    writer.flush()?;
    Ok(listing.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_desk::requests::{ProfessionalRef, RequestId};
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    fn record(id: &str, status: RequestStatus, minute: u32) -> BookingRequest {
        BookingRequest {
            id: RequestId(id.to_string()),
            professional_ref: ProfessionalRef("p1".to_string()),
            scheduled_date: NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date"),
            scheduled_time: NaiveTime::from_hms_opt(14, 0, 0).expect("valid time"),
            address: "123 Main".to_string(),
            status,
            created_at: Utc
                .with_ymd_and_hms(2024, 4, 1, 9, minute, 0)
                .single()
                .expect("valid timestamp"),
            requested_by: None,
        }
    }

    #[tokio::test]
    async fn export_writes_newest_first_with_header() {
        let records = vec![
            record("a", RequestStatus::Pending, 1),
            record("b", RequestStatus::Accepted, 5),
            record("c", RequestStatus::Cancelled, 3),
        ];
        let listing = ordered_listing(records, None).await.expect("listing");
        let mut out = Vec::new();
        let written = write_csv(&listing, &mut out).expect("export succeeds");
        assert_eq!(written, 3);

        let text = String::from_utf8(out).expect("utf8 csv");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "id,professional_ref,scheduled_date,scheduled_time,address,status,created_at,requested_by"
        );
        assert!(lines[1].starts_with("b,p1,2024-05-01,14:00,123 Main,accepted,"));
        assert!(lines[2].starts_with("c,"));
        assert!(lines[3].starts_with("a,"));
    }

    #[tokio::test]
    async fn export_honours_status_filter() {
        let records = vec![
            record("a", RequestStatus::Pending, 1),
            record("b", RequestStatus::Accepted, 5),
        ];
        let filter = Some(RequestFilter::default().with_status(StatusArg::Pending.into()));
        let listing = ordered_listing(records, filter).await.expect("listing");
        let mut out = Vec::new();
        let written = write_csv(&listing, &mut out).expect("export succeeds");
        assert_eq!(written, 1);
        let text = String::from_utf8(out).expect("utf8 csv");
        assert!(text.lines().nth(1).expect("row").starts_with("a,"));
    }
}
