//! Weekly hour totals and CSV export of time logs.

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::storage::models::TimeLog;

/// Monday 00:00 UTC of the week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_from_monday = now.weekday().num_days_from_monday() as i64;
    let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
    midnight - Duration::days(days_from_monday)
}

pub fn round2(v: f64) -> f64 { (v * 100.0).round() / 100.0 }

/// Hours each log overlaps the current week; open logs run until `now`.
pub fn weekly_hours<'a, I>(logs: I, now: DateTime<Utc>) -> f64
where
    I: IntoIterator<Item = &'a TimeLog>,
{
    let start = week_start(now);
    let end = start + Duration::days(7);
    let mut secs = 0i64;
    for log in logs {
        let out = log.clock_out.unwrap_or(now);
        if log.clock_in > end || out < start { continue; }
        let overlap = out.min(end) - log.clock_in.max(start);
        if overlap > Duration::zero() { secs += overlap.num_seconds(); }
    }
    round2(secs as f64 / 3600.0)
}

/// Inclusive date filter on the clock-in day.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ExportRange {
    pub fn contains(&self, log: &TimeLog) -> bool {
        let day = log.clock_in.date_naive();
        self.start.map_or(true, |s| day >= s) && self.end.map_or(true, |e| day <= e)
    }
}

pub fn export_filename(access_code: &str) -> String {
    format!("time_logs_{}.csv", access_code)
}

/// Render logs (already newest-first) as CSV. Open logs have empty clock-out and duration.
pub fn export_csv(logs: &[TimeLog], range: ExportRange) -> Result<String> {
    let mut w = csv::Writer::from_writer(Vec::new());
    w.write_record(["Date", "Clock In", "Clock Out", "Duration (hours)"]).context("writing csv header")?;
    for log in logs.iter().filter(|l| range.contains(l)) {
        let clock_out = log.clock_out.map(|t| t.format("%H:%M:%S").to_string()).unwrap_or_default();
        let duration = match log.duration() {
            Some(d) if d > Duration::zero() => format!("{:.2}", d.num_seconds() as f64 / 3600.0),
            _ => String::new(),
        };
        w.write_record([
            log.clock_in.format("%Y-%m-%d").to_string(),
            log.clock_in.format("%H:%M:%S").to_string(),
            clock_out,
            duration,
        ]).context("writing csv row")?;
    }
    let bytes = w.into_inner().context("flushing csv writer")?;
    String::from_utf8(bytes).context("csv output was not utf-8")
}
