// src/history.rs
// Picking history - buckets logged events into day/week/month/six-month views

use crate::events::{AlertEvent, EventStore, StoreError};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TimeFrame {
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "W")]
    Week,
    #[serde(rename = "M")]
    Month,
    #[serde(rename = "6M")]
    SixMonths,
}

#[derive(Debug, Error)]
#[error("Invalid time frame '{0}' (expected D, W, M or 6M)")]
pub struct InvalidTimeFrame(String);

impl FromStr for TimeFrame {
    type Err = InvalidTimeFrame;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" => Ok(TimeFrame::Day),
            "W" => Ok(TimeFrame::Week),
            "M" => Ok(TimeFrame::Month),
            "6M" => Ok(TimeFrame::SixMonths),
            _ => Err(InvalidTimeFrame(s.to_string())),
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            TimeFrame::Day => "D",
            TimeFrame::Week => "W",
            TimeFrame::Month => "M",
            TimeFrame::SixMonths => "6M",
        };
        f.write_str(code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub label: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub picks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub frame: TimeFrame,
    pub anchor: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub buckets: Vec<Bucket>,
    pub total: usize,
    /// First bucket with the highest count; `None` when nothing was logged
    pub most_active: Option<String>,
}

impl HistorySummary {
    /// "today" for the day view, "this W" etc. otherwise
    pub fn period_label(&self) -> String {
        match self.frame {
            TimeFrame::Day => "today".to_string(),
            frame => format!("this {}", frame),
        }
    }
}

/// Query window `[start, end)` for the frame containing `anchor`
pub fn range<Tz: TimeZone>(frame: TimeFrame, anchor: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let (start, end) = local_range(frame, anchor);
    (localize(tz, start), localize(tz, end))
}

/// Count events per bucket. Bucket boundaries are local midnights/hours in `tz`.
pub fn summarize<Tz: TimeZone>(
    frame: TimeFrame,
    anchor: NaiveDate,
    tz: &Tz,
    events: &[AlertEvent],
) -> HistorySummary {
    let (start, end) = range(frame, anchor, tz);

    let buckets: Vec<Bucket> = local_buckets(frame, anchor)
        .into_iter()
        .map(|(label, from, to)| {
            let start = localize(tz, from);
            let end = localize(tz, to);
            let picks = events
                .iter()
                .filter(|event| event.timestamp >= start && event.timestamp < end)
                .count();
            Bucket {
                label,
                start,
                end,
                picks,
            }
        })
        .collect();

    let total = buckets.iter().map(|b| b.picks).sum();
    let most_active = if total == 0 {
        None
    } else {
        let max = buckets.iter().map(|b| b.picks).max().unwrap_or(0);
        buckets.iter().find(|b| b.picks == max).map(|b| b.label.clone())
    };

    HistorySummary {
        frame,
        anchor,
        start,
        end,
        buckets,
        total,
        most_active,
    }
}

/// Fetch the frame's events from the store and summarize them
pub async fn load<Tz: TimeZone>(
    store: &dyn EventStore,
    frame: TimeFrame,
    anchor: NaiveDate,
    tz: &Tz,
) -> Result<HistorySummary, StoreError> {
    let (start, end) = range(frame, anchor, tz);
    tracing::debug!("Querying {} for {} .. {}", store.name(), start, end);

    let events = store.select_range(start, end).await?;
    Ok(summarize(frame, anchor, tz, &events))
}

/// Move the anchor one frame back (`direction < 0`) or forward.
/// Month steps clamp to the last day of the target month.
pub fn shift(frame: TimeFrame, anchor: NaiveDate, direction: i32) -> NaiveDate {
    let steps = direction.unsigned_abs();
    let moved = match frame {
        TimeFrame::Day => add_days(anchor, direction as i64),
        TimeFrame::Week => add_days(anchor, 7 * direction as i64),
        TimeFrame::Month => add_months(anchor, direction < 0, steps),
        TimeFrame::SixMonths => add_months(anchor, direction < 0, 6 * steps),
    };
    moved.unwrap_or(anchor)
}

fn add_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    date.checked_add_signed(Duration::days(days))
}

fn add_months(date: NaiveDate, backwards: bool, months: u32) -> Option<NaiveDate> {
    if backwards {
        date.checked_sub_months(Months::new(months))
    } else {
        date.checked_add_months(Months::new(months))
    }
}

fn week_start(anchor: NaiveDate) -> NaiveDate {
    anchor - Duration::days(anchor.weekday().num_days_from_sunday() as i64)
}

fn month_start(anchor: NaiveDate) -> NaiveDate {
    anchor.with_day(1).unwrap_or(anchor)
}

fn next_month(date: NaiveDate) -> NaiveDate {
    date.checked_add_months(Months::new(1)).unwrap_or(date)
}

fn local_range(frame: TimeFrame, anchor: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let (first, last_exclusive) = match frame {
        TimeFrame::Day => (anchor, anchor + Duration::days(1)),
        TimeFrame::Week => {
            let start = week_start(anchor);
            (start, start + Duration::days(7))
        }
        TimeFrame::Month => {
            let start = month_start(anchor);
            (start, next_month(start))
        }
        TimeFrame::SixMonths => {
            let this_month = month_start(anchor);
            let start = this_month
                .checked_sub_months(Months::new(5))
                .unwrap_or(this_month);
            (start, next_month(this_month))
        }
    };
    (midnight(first), midnight(last_exclusive))
}

fn local_buckets(frame: TimeFrame, anchor: NaiveDate) -> Vec<(String, NaiveDateTime, NaiveDateTime)> {
    let (start, end) = local_range(frame, anchor);
    let mut buckets = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let (label, next) = match frame {
            TimeFrame::Day => (cursor.format("%H:00").to_string(), cursor + Duration::hours(1)),
            TimeFrame::Week => (cursor.format("%a").to_string(), cursor + Duration::days(1)),
            TimeFrame::Month => (cursor.day().to_string(), cursor + Duration::days(1)),
            TimeFrame::SixMonths => (
                cursor.format("%b").to_string(),
                midnight(next_month(cursor.date())),
            ),
        };
        if next <= cursor {
            break;
        }
        buckets.push((label, cursor, next));
        cursor = next;
    }

    buckets
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(chrono::NaiveTime::MIN)
}

fn localize<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local).earliest() {
        Some(at) => at.with_timezone(&Utc),
        // Inside a DST gap; fall back to reading the wall time as UTC.
        None => Utc.from_utc_datetime(&local),
    }
}
