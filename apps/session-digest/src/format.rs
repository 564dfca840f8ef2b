//! Presentation helpers shared by the report and the subject line.

use crate::reconcile::{CategoryStats, Percentages};
use crate::repository::SpaceLevel;
use chrono::{DateTime, Duration, Utc};

pub const LONG_RUNNING_SECS: i64 = 20 * 3600;
const REASON_LIMIT: usize = 80;
const DAY_SECS: i64 = 24 * 3600;

/// Elapsed time as `HH:MM:SS`; hours are not wrapped at 24.
pub fn duration_hms(start: DateTime<Utc>, end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let secs = elapsed(start, end, now).num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Open-ended sessions are measured up to `now`.
pub fn elapsed(start: DateTime<Utc>, end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    end.unwrap_or(now) - start
}

pub fn duration_class(start: DateTime<Utc>, end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> &'static str {
    if elapsed(start, end, now).num_seconds() >= LONG_RUNNING_SECS {
        "bg-error"
    } else {
        ""
    }
}

pub fn datetime(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub fn date(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "None".to_string())
}

/// `Sunday, 06 February at 14:30`
pub fn title_date(value: DateTime<Utc>) -> String {
    value.format("%A, %d %B at %H:%M").to_string()
}

/// Long reasons are cut to their first sentence (at most 80 characters)
/// with the full text kept in a tooltip. Output is HTML.
pub fn reason(text: Option<&str>) -> String {
    let Some(text) = text else {
        return String::new();
    };
    if text.chars().count() <= REASON_LIMIT {
        return escape_html(text);
    }
    let flattened = text.replace('\n', " ");
    let sentence = flattened.split(". ").next().unwrap_or_default();
    let short: String = sentence.chars().take(REASON_LIMIT).collect();
    format!(
        "<abbr title=\"{}\">{}</abbr>",
        escape_html(&flattened),
        escape_html(&short)
    )
}

/// Decimal units, one fractional digit: `1.5GB`.
pub fn byte_size(bytes: i64) -> String {
    const UNITS: [&str; 8] = ["", "K", "M", "G", "T", "P", "E", "Z"];
    let mut value = bytes as f64;
    for unit in UNITS {
        if value.abs() < 1000.0 {
            return format!("{value:.1}{unit}B");
        }
        value /= 1000.0;
    }
    format!("{value:.1}YB")
}

/// Colour band for the age of the last successful restore point.
pub fn lps_class(last_point_of_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> &'static str {
    let Some(point) = last_point_of_success else {
        return "bg-error";
    };
    let age = (now - point).num_seconds();
    if age >= 7 * DAY_SECS {
        "bg-error"
    } else if age > 2 * DAY_SECS {
        "bg-warning"
    } else if age > DAY_SECS {
        "bg-info"
    } else if age < DAY_SECS {
        "fg-success"
    } else {
        ""
    }
}

/// Compares the restore points on disk with the configured retain cycles.
pub fn restore_point_class(restore_points: Option<i64>, retain_cycles: Option<i32>) -> &'static str {
    let (Some(points), Some(cycles)) = (restore_points, retain_cycles) else {
        return "";
    };
    let points = points as f64;
    let cycles = f64::from(cycles);
    if points > cycles * 1.2 {
        "bg-error"
    } else if points > cycles {
        "bg-warning"
    } else if points < cycles {
        "bg-info"
    } else {
        ""
    }
}

pub fn space_class(level: SpaceLevel) -> &'static str {
    match level {
        SpaceLevel::Critical => "bg-error",
        SpaceLevel::Low => "bg-warning",
        SpaceLevel::Ok => "",
    }
}

pub fn subject_line(stats: &CategoryStats, percentages: &Percentages) -> String {
    format!(
        "Morning check backup - T:{} | S:{} ({}%) | F:{} ({}%) | W:{} ({}%) | IP:{} ({}%)",
        stats.sessions,
        stats.success,
        percentages.success,
        stats.failed,
        percentages.failed,
        stats.warning,
        percentages.warning,
        stats.in_progress,
        percentages.in_progress,
    )
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
