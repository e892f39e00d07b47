use crate::infra::{parse_date, InMemoryRequestStore, StaticIdentity};
use booking_desk::config::LifecycleConfig;
use booking_desk::error::AppError;
use booking_desk::requests::{
    parse_time, BookingSubmission, RequestDesk, RequestListing, RequestStatus, RetryPolicy,
    SubmissionError, TracingAlerts,
};
use chrono::{Duration as DateOffset, Local, NaiveDate, NaiveTime};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Professional the booking is addressed to
    #[arg(long, default_value = "pro-001")]
    pub(crate) professional: String,
    /// Appointment date (YYYY-MM-DD). Defaults to tomorrow.
    #[arg(long, value_parser = parse_date)]
    pub(crate) date: Option<NaiveDate>,
    /// Appointment time (HH:MM). Defaults to 10:00.
    #[arg(long, value_parser = parse_time)]
    pub(crate) time: Option<NaiveTime>,
    /// Service address
    #[arg(long, default_value = "1 Demo Street")]
    pub(crate) address: String,
    /// Seconds a request stays pending before it is accepted
    #[arg(long, default_value_t = 2)]
    pub(crate) dwell_secs: u64,
    /// Cancel the request before the dwell interval elapses
    #[arg(long)]
    pub(crate) cancel: bool,
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let dwell = Duration::from_secs(args.dwell_secs);
    let config = LifecycleConfig {
        dwell,
        store_retry: RetryPolicy::default(),
        ..LifecycleConfig::default()
    };
    let desk = RequestDesk::new(
        Arc::new(InMemoryRequestStore::default()),
        Arc::new(StaticIdentity(Some("demo".to_string()))),
        Arc::new(TracingAlerts),
        &config,
    );

    println!("Booking request lifecycle demo");
    println!("  Dwell interval: {}s", dwell.as_secs());

    let incomplete = BookingSubmission::new(None, None, None, "  ");
    match desk.service().submit(incomplete).await {
        Err(SubmissionError::Validation(err)) => println!("  Empty form rejected: {err}"),
        Err(err) => return Err(err.into()),
        Ok(request) => println!("  Unexpected acceptance of empty form: {}", request.id),
    }

    let date = args
        .date
        .unwrap_or_else(|| Local::now().date_naive() + DateOffset::days(1));
    let time = args.time.or_else(|| NaiveTime::from_hms_opt(10, 0, 0));
    let submission =
        BookingSubmission::new(Some(args.professional), Some(date), time, args.address);

    let first = desk.service().submit(submission.clone()).await?;
    let retried = desk.service().submit(submission).await?;
    println!(
        "  Submitted {} (duplicate submit returned {})",
        first.id, retried.id
    );

    render_listing("Before dwell", &desk.list().await?);

    if args.cancel {
        let cancelled = desk.resolve(&first.id, RequestStatus::Cancelled).await?;
        println!("  Cancelled {} before the timer fired", cancelled.id);
    }

    tokio::time::sleep(dwell + Duration::from_millis(250)).await;
    render_listing("After dwell", &desk.list().await?);

    let cancelled = desk.scheduler().shutdown();
    if cancelled > 0 {
        println!("  {cancelled} pending transition(s) cancelled on exit");
    }
    Ok(())
}

fn render_listing(heading: &str, listing: &RequestListing) {
    println!("\n{heading}");
    if listing.is_empty() {
        println!("  (no requests)");
        return;
    }
    for request in listing {
        let view = request.view();
        println!(
            "  {:<12} {:<10} {} {} {:<9} {}",
            view.id.to_string(),
            view.professional_ref,
            view.scheduled_date,
            view.scheduled_time,
            view.status,
            view.address
        );
    }
}
