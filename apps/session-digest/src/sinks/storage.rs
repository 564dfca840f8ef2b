use crate::digest::{MergedDigest, ServerDigest};
use crate::error::DigestError;
use crate::repository::{Repository, RepositoryGroup};
use crate::session::SessionRecord;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS digest_runs (
        run_id uuid primary key,
        pipeline_id text null,
        generated_at timestamptz not null,
        comment text null,
        health text not null
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS digest_infos (
        id bigserial primary key,
        run_id uuid not null references digest_runs(run_id),
        server_name text not null,
        backup_sessions bigint not null,
        backup_total bigint not null,
        backup_success bigint not null,
        backup_warning bigint not null,
        backup_failed bigint not null,
        backup_running bigint not null,
        backup_pending bigint not null,
        backup_idle bigint not null,
        backup_undefined bigint not null,
        backup_in_progress bigint not null,
        tape_sessions bigint not null,
        tape_success bigint not null,
        tape_warning bigint not null,
        tape_failed bigint not null,
        tape_running bigint not null,
        tape_pending bigint not null,
        tape_idle bigint not null,
        tape_undefined bigint not null,
        tape_in_progress bigint not null,
        repositories bigint not null
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS digest_tapes (
        info_id bigint not null references digest_infos(id),
        job_name text not null,
        job_id text null,
        start_time timestamptz not null,
        end_time timestamptz null,
        status_code int not null,
        outcome text not null,
        reason text null,
        mediapool_name text null
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS digest_in_progress (
        info_id bigint not null references digest_infos(id),
        job_name text not null,
        job_id text null,
        object_name text not null,
        object_id text null,
        session_id text null,
        orig_session_id text null,
        start_time timestamptz not null,
        status_code int not null,
        outcome text not null,
        last_point_success timestamptz null,
        job_type text null,
        transport_mode text null,
        target_storage text null,
        proxies text null,
        restore_points bigint null,
        retain_days int null,
        retain_cycles int null,
        retention_maintenance boolean null
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS digest_failed (
        info_id bigint not null references digest_infos(id),
        job_name text not null,
        job_id text null,
        object_name text not null,
        object_id text null,
        session_id text null,
        orig_session_id text null,
        start_time timestamptz not null,
        end_time timestamptz null,
        status_code int not null,
        outcome text not null,
        reason text null,
        last_point_success timestamptz null,
        job_type text null,
        transport_mode text null,
        target_storage text null,
        proxies text null,
        restore_points bigint null,
        retain_days int null,
        retain_cycles int null,
        retention_maintenance boolean null
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS digest_repositories (
        info_id bigint not null references digest_infos(id),
        repository_id text null,
        name text not null,
        extent_name text null,
        description text null,
        kind text null,
        path text null,
        status text null,
        host_name text null,
        host_ip text null,
        scale_out_name text null,
        free bigint not null,
        total bigint not null,
        used bigint not null
    )
    "#,
];

/// Rows written and rows lost during one storage pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageSummary {
    pub inserted: u64,
    pub failed: u64,
}

impl StorageSummary {
    fn record(&mut self, table: &'static str, result: Result<(), sqlx::Error>) {
        match result {
            Ok(()) => self.inserted += 1,
            Err(err) => {
                self.failed += 1;
                tracing::warn!(table, error = %err, "digest row insert failed");
            }
        }
    }
}

pub async fn build_pool(database_url: &str, max_connections: u32) -> Result<PgPool, DigestError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), DigestError> {
    for statement in SCHEMA {
        sqlx::query(*statement).execute(pool).await?;
    }
    Ok(())
}

/// Stores the run and every server below it. Losing the run row aborts the
/// pass; any other failed row is logged, counted and skipped.
pub async fn store(
    pool: &PgPool,
    digest: &MergedDigest,
    pipeline_id: Option<&str>,
    comment: Option<&str>,
) -> Result<StorageSummary, DigestError> {
    sqlx::query(
        "INSERT INTO digest_runs (run_id, pipeline_id, generated_at, comment, health) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(digest.run_id)
    .bind(pipeline_id)
    .bind(digest.generated_at)
    .bind(comment)
    .bind(digest.health.as_str())
    .execute(pool)
    .await?;

    let mut summary = StorageSummary {
        inserted: 1,
        failed: 0,
    };
    for server in &digest.servers {
        let info_id = match insert_info(pool, digest, server).await {
            Ok(id) => {
                summary.inserted += 1;
                id
            }
            Err(err) => {
                summary.failed += 1;
                tracing::warn!(server = %server.server_name, error = %err, "digest info insert failed; skipping server rows");
                continue;
            }
        };

        for tape in &server.tape {
            summary.record("digest_tapes", insert_tape(pool, info_id, tape).await);
        }
        for session in server.in_progress.values().flat_map(|jobs| jobs.values()).flat_map(|objects| objects.values()) {
            summary.record("digest_in_progress", insert_in_progress(pool, info_id, session).await);
        }
        for session in server.failed.values().flat_map(|jobs| jobs.values()).flat_map(|objects| objects.values()) {
            summary.record("digest_failed", insert_failed(pool, info_id, session).await);
        }
        for group in server.repositories.values() {
            match group {
                RepositoryGroup::Standalone { repository } => {
                    summary.record("digest_repositories", insert_repository(pool, info_id, repository, None).await);
                }
                RepositoryGroup::ScaleOut { name, extents } => {
                    for extent in extents.values() {
                        summary.record(
                            "digest_repositories",
                            insert_repository(pool, info_id, extent, Some(name)).await,
                        );
                    }
                }
            }
        }
    }

    tracing::info!(inserted = summary.inserted, failed = summary.failed, "stored digest");
    Ok(summary)
}

async fn insert_info(pool: &PgPool, digest: &MergedDigest, server: &ServerDigest) -> Result<i64, sqlx::Error> {
    let backup = &server.stats.backup;
    let tape = &server.stats.tape;
    let count = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO digest_infos (
            run_id, server_name,
            backup_sessions, backup_total, backup_success, backup_warning, backup_failed,
            backup_running, backup_pending, backup_idle, backup_undefined, backup_in_progress,
            tape_sessions, tape_success, tape_warning, tape_failed,
            tape_running, tape_pending, tape_idle, tape_undefined, tape_in_progress,
            repositories
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
        RETURNING id
        "#,
    )
    .bind(digest.run_id)
    .bind(&server.server_name)
    .bind(count(backup.sessions))
    .bind(count(backup.total))
    .bind(count(backup.success))
    .bind(count(backup.warning))
    .bind(count(backup.failed))
    .bind(count(backup.running))
    .bind(count(backup.pending))
    .bind(count(backup.idle))
    .bind(count(backup.undefined))
    .bind(count(backup.in_progress))
    .bind(count(tape.sessions))
    .bind(count(tape.success))
    .bind(count(tape.warning))
    .bind(count(tape.failed))
    .bind(count(tape.running))
    .bind(count(tape.pending))
    .bind(count(tape.idle))
    .bind(count(tape.undefined))
    .bind(count(tape.in_progress))
    .bind(count(server.stats.repositories))
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn insert_tape(pool: &PgPool, info_id: i64, tape: &SessionRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO digest_tapes (info_id, job_name, job_id, start_time, end_time, status_code, outcome, reason, mediapool_name) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(info_id)
    .bind(&tape.key.job_name)
    .bind(tape.details.job_id.as_deref())
    .bind(tape.start_time)
    .bind(tape.end_time)
    .bind(tape.status_code)
    .bind(tape.outcome.as_str())
    .bind(tape.details.reason.as_deref())
    .bind(tape.details.mediapool_name.as_deref())
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_in_progress(pool: &PgPool, info_id: i64, session: &SessionRecord) -> Result<(), sqlx::Error> {
    let details = &session.details;
    let retention = session.retention.unwrap_or_default();
    sqlx::query(
        "INSERT INTO digest_in_progress (info_id, job_name, job_id, object_name, object_id, session_id, orig_session_id, \
         start_time, status_code, outcome, last_point_success, job_type, transport_mode, target_storage, proxies, \
         restore_points, retain_days, retain_cycles, retention_maintenance) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(info_id)
    .bind(&session.key.job_name)
    .bind(session.key.job_id.as_deref())
    .bind(session.key.object_label())
    .bind(details.object_id.as_deref())
    .bind(details.session_id.as_deref())
    .bind(details.orig_session_id.as_deref())
    .bind(session.start_time)
    .bind(session.status_code)
    .bind(session.outcome.as_str())
    .bind(session.last_point_of_success)
    .bind(details.job_type.map(|kind| kind.label()))
    .bind(details.transport_mode.map(|mode| mode.as_str()))
    .bind(details.target_storage.as_deref())
    .bind(joined(&details.proxies))
    .bind(details.restore_points)
    .bind(retention.retain_days)
    .bind(retention.retain_cycles)
    .bind(session.retention.map(|policy| policy.maintenance_enabled))
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_failed(pool: &PgPool, info_id: i64, session: &SessionRecord) -> Result<(), sqlx::Error> {
    let details = &session.details;
    let retention = session.retention.unwrap_or_default();
    sqlx::query(
        "INSERT INTO digest_failed (info_id, job_name, job_id, object_name, object_id, session_id, orig_session_id, \
         start_time, end_time, status_code, outcome, reason, last_point_success, job_type, transport_mode, \
         target_storage, proxies, restore_points, retain_days, retain_cycles, retention_maintenance) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
    )
    .bind(info_id)
    .bind(&session.key.job_name)
    .bind(session.key.job_id.as_deref())
    .bind(session.key.object_label())
    .bind(details.object_id.as_deref())
    .bind(details.session_id.as_deref())
    .bind(details.orig_session_id.as_deref())
    .bind(session.start_time)
    .bind(session.end_time)
    .bind(session.status_code)
    .bind(session.outcome.as_str())
    .bind(details.reason.as_deref())
    .bind(session.last_point_of_success)
    .bind(details.job_type.map(|kind| kind.label()))
    .bind(details.transport_mode.map(|mode| mode.as_str()))
    .bind(details.target_storage.as_deref())
    .bind(joined(&details.proxies))
    .bind(details.restore_points)
    .bind(retention.retain_days)
    .bind(retention.retain_cycles)
    .bind(session.retention.map(|policy| policy.maintenance_enabled))
    .execute(pool)
    .await?;
    Ok(())
}

async fn insert_repository(
    pool: &PgPool,
    info_id: i64,
    repository: &Repository,
    scale_out: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO digest_repositories (info_id, repository_id, name, extent_name, description, kind, path, status, \
         host_name, host_ip, scale_out_name, free, total, used) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(info_id)
    .bind(repository.id.as_deref())
    .bind(&repository.name)
    .bind(scale_out.map(|_| repository.name.as_str()))
    .bind(repository.description.as_deref())
    .bind(repository.kind.as_deref())
    .bind(repository.path.as_deref())
    .bind(repository.status.as_deref())
    .bind(repository.host_name.as_deref())
    .bind(repository.host_ip.as_deref())
    .bind(scale_out)
    .bind(repository.capacity.free)
    .bind(repository.capacity.total)
    .bind(repository.capacity.used)
    .execute(pool)
    .await?;
    Ok(())
}

fn joined(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}
