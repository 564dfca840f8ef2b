use crate::digest::{MergedDigest, ServerDigest};
use crate::error::DigestError;
use crate::format::{
    byte_size, date, datetime, duration_class, duration_hms, escape_html, lps_class, reason,
    restore_point_class, space_class, subject_line, title_date,
};
use crate::reconcile::{CategoryStats, JobGroups, Percentages};
use crate::repository::{Repository, RepositoryGroup};
use crate::session::SessionRecord;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::Path;

const STYLE: &str = "body{font-family:sans-serif;font-size:13px}\
table{border-collapse:collapse;margin-bottom:16px}\
td,th{border:1px solid #ccc;padding:3px 6px}\
th{background:#eee}\
.bg-success{background:#c8e6c9}.bg-warning{background:#ffe0b2}\
.bg-error{background:#ffcdd2}.bg-info{background:#bbdefb}\
.fg-success{color:#2e7d32}";

/// Rendered report, ready to be written or handed to a mailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub html: String,
}

pub fn render(digest: &MergedDigest, comment: Option<&str>, now: DateTime<Utc>) -> Result<Report, DigestError> {
    let subject = subject_line(&digest.stats.backup, &digest.backup_percentages);
    let mut html = String::new();

    writeln!(html, "<!DOCTYPE html><html><head><meta charset=\"utf-8\">")?;
    writeln!(html, "<title>{}</title><style>{STYLE}</style></head><body>", escape_html(&subject))?;
    writeln!(
        html,
        "<h1 class=\"{}\">{} Morning check backup - {}</h1>",
        digest.health.css_class(),
        digest.health.emoji(),
        escape_html(&title_date(digest.generated_at))
    )?;
    if let Some(comment) = comment {
        writeln!(html, "<p><em>{}</em></p>", escape_html(comment))?;
    }

    write_summary(&mut html, "Backup", &digest.stats.backup, &digest.backup_percentages)?;
    write_summary(&mut html, "Tape", &digest.stats.tape, &digest.tape_percentages)?;

    for server in &digest.servers {
        writeln!(html, "<h2>{}</h2>", escape_html(&server.server_name))?;
        write_tapes(&mut html, &server.tape, now)?;
        write_sessions(&mut html, "In progress", &server.in_progress, false, now)?;
        write_sessions(&mut html, "Failed", &server.failed, true, now)?;
        write_repositories(&mut html, server)?;
    }

    let anomalies = &digest.anomalies;
    if anomalies.rejected_records + anomalies.unhandled_statuses + anomalies.skipped_repositories > 0 {
        writeln!(
            html,
            "<p>Rejected records: {} | Unhandled statuses: {} | Skipped repositories: {}</p>",
            anomalies.rejected_records, anomalies.unhandled_statuses, anomalies.skipped_repositories
        )?;
    }
    writeln!(html, "</body></html>")?;

    Ok(Report { subject, html })
}

pub async fn write(path: &Path, report: &Report) -> Result<(), DigestError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| DigestError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, report.html.as_bytes())
        .await
        .map_err(|source| DigestError::Write {
            path: path.to_path_buf(),
            source,
        })
}

fn write_summary(
    html: &mut String,
    title: &str,
    stats: &CategoryStats,
    percentages: &Percentages,
) -> std::fmt::Result {
    writeln!(html, "<h3>{title}</h3><table><tr>")?;
    writeln!(
        html,
        "<th>Sessions</th><th>Total</th><th>Success</th><th>Warning</th><th>Failed</th><th>In progress</th></tr><tr>"
    )?;
    writeln!(
        html,
        "<td>{}</td><td>{}</td><td>{} ({}%)</td><td>{} ({}%)</td><td>{} ({}%)</td><td>{} ({}%)</td>",
        stats.sessions,
        stats.total,
        stats.success,
        escape_html(&percentages.success.to_string()),
        stats.warning,
        escape_html(&percentages.warning.to_string()),
        stats.failed,
        escape_html(&percentages.failed.to_string()),
        stats.in_progress,
        escape_html(&percentages.in_progress.to_string()),
    )?;
    writeln!(html, "</tr></table>")
}

fn write_tapes(html: &mut String, tapes: &[SessionRecord], now: DateTime<Utc>) -> std::fmt::Result {
    if tapes.is_empty() {
        return Ok(());
    }
    writeln!(html, "<h3>Tape</h3><table><tr>")?;
    writeln!(
        html,
        "<th>Job</th><th>Status</th><th>Start</th><th>End</th><th>Duration</th><th>Media pool</th><th>Reason</th></tr>"
    )?;
    for tape in tapes {
        writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&tape.key.job_name),
            tape.outcome,
            datetime(Some(tape.start_time)),
            datetime(tape.end_time),
            duration_class(tape.start_time, tape.end_time, now),
            duration_hms(tape.start_time, tape.end_time, now),
            escape_html(tape.details.mediapool_name.as_deref().unwrap_or_default()),
            reason(tape.details.reason.as_deref()),
        )?;
    }
    writeln!(html, "</table>")
}

fn write_sessions(
    html: &mut String,
    title: &str,
    groups: &JobGroups,
    finished: bool,
    now: DateTime<Utc>,
) -> std::fmt::Result {
    if groups.is_empty() {
        return Ok(());
    }
    writeln!(html, "<h3>{title}</h3><table><tr>")?;
    writeln!(
        html,
        "<th>Job</th><th>Object</th><th>Type</th><th>Status</th><th>Start</th>{}<th>Duration</th>\
         <th>Last success</th><th>Restore points</th><th>Transport</th><th>Proxies</th><th>Storage</th>{}</tr>",
        if finished { "<th>End</th>" } else { "" },
        if finished { "<th>Reason</th>" } else { "" },
    )?;
    for (job_name, instances) in groups {
        for objects in instances.values() {
            for (object, session) in objects {
                let details = &session.details;
                let retain_cycles = session.retention.and_then(|policy| policy.retain_cycles);
                write!(
                    html,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td>",
                    escape_html(job_name),
                    escape_html(object),
                    details.job_type.map(|kind| kind.label()).unwrap_or("-"),
                    session.outcome,
                    datetime(Some(session.start_time)),
                )?;
                if finished {
                    write!(html, "<td>{}</td>", datetime(session.end_time))?;
                }
                write!(
                    html,
                    "<td class=\"{}\">{}</td><td class=\"{}\">{}</td><td class=\"{}\">{}</td><td>{}</td><td>{}</td><td>{}</td>",
                    duration_class(session.start_time, session.end_time, now),
                    duration_hms(session.start_time, session.end_time, now),
                    lps_class(session.last_point_of_success, now),
                    date(session.last_point_of_success),
                    restore_point_class(details.restore_points, retain_cycles),
                    details
                        .restore_points
                        .map(|points| points.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    details.transport_mode.map(|mode| mode.as_str()).unwrap_or("-"),
                    escape_html(&details.proxies.join(", ")),
                    escape_html(details.target_storage.as_deref().unwrap_or("-")),
                )?;
                if finished {
                    write!(html, "<td>{}</td>", reason(details.reason.as_deref()))?;
                }
                writeln!(html, "</tr>")?;
            }
        }
    }
    writeln!(html, "</table>")
}

/// Only repositories running low on space are listed.
fn write_repositories(html: &mut String, server: &ServerDigest) -> std::fmt::Result {
    let flagged: Vec<&RepositoryGroup> = server
        .repositories
        .values()
        .filter(|group| group.needs_attention())
        .collect();
    if flagged.is_empty() {
        return Ok(());
    }
    writeln!(html, "<h3>Repositories</h3><table><tr>")?;
    writeln!(
        html,
        "<th>Scale-out</th><th>Name</th><th>Host</th><th>Path</th><th>Free</th><th>Used</th><th>Total</th><th>Free %</th></tr>"
    )?;
    for group in flagged {
        match group {
            RepositoryGroup::Standalone { repository } => {
                write_repository_row(html, "-", repository)?;
            }
            RepositoryGroup::ScaleOut { name, extents } => {
                let capacity = group.capacity();
                writeln!(
                    html,
                    "<tr><td>{}</td><td colspan=\"3\"><strong>Scale-out total</strong></td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
                    escape_html(name),
                    byte_size(capacity.free),
                    byte_size(capacity.used),
                    byte_size(capacity.total),
                    space_class(capacity.space_level()),
                    capacity.free_percent(),
                )?;
                for extent in extents.values() {
                    write_repository_row(html, name, extent)?;
                }
            }
        }
    }
    writeln!(html, "</table>")
}

fn write_repository_row(html: &mut String, scale_out: &str, repository: &Repository) -> std::fmt::Result {
    let capacity = repository.capacity;
    writeln!(
        html,
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
        escape_html(scale_out),
        escape_html(&repository.name),
        escape_html(repository.host_name.as_deref().unwrap_or("-")),
        escape_html(repository.path.as_deref().unwrap_or("-")),
        byte_size(capacity.free),
        byte_size(capacity.used),
        byte_size(capacity.total),
        space_class(capacity.space_level()),
        capacity.free_percent(),
    )
}
