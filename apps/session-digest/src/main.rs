mod cli;

use crate::cli::{Cli, Commands, ProcessArgs, ReconcileArgs};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use session_digest::config::Config;
use session_digest::digest::{load_artifacts, load_export, MergedDigest, ServerDigest};
use session_digest::sinks::run_sinks;
use std::time::Instant;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,session_digest=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "session-digest"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn reconcile(args: ReconcileArgs, config: &Config) -> Result<()> {
    let mut export = load_export(&args.input).await?;
    if let Some(server) = args.server {
        export.server_name = Some(server);
    }
    let fallback = config.server_name.as_deref().unwrap_or("unknown");

    let digest = ServerDigest::build(export, fallback, Utc::now());
    let output = args
        .output
        .unwrap_or_else(|| config.artifacts_dir.join(format!("{}.json", digest.server_name)));
    digest
        .write(&output)
        .await
        .with_context(|| format!("writing digest for {}", digest.server_name))?;

    tracing::info!(
        server = %digest.server_name,
        output = %output.display(),
        run_id = %digest.run_id,
        "digest artifact written"
    );
    Ok(())
}

async fn process(args: ProcessArgs, mut config: Config) -> Result<()> {
    let started = Instant::now();
    if let Some(dir) = args.artifacts {
        config.artifacts_dir = dir;
    }
    if let Some(report) = args.report {
        config.report_path = report;
    }
    if args.comment.is_some() {
        config.comment = args.comment;
    }
    if args.no_metrics {
        config.disable_metrics = true;
    }
    if args.no_mail {
        config.disable_mail = true;
    }

    let digests = load_artifacts(&config.artifacts_dir).await?;
    let merged = MergedDigest::merge(digests, Utc::now());
    let client = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;

    let report = run_sinks(&merged, &config, &client, started.elapsed(), Utc::now()).await;
    let failures = report.failures();
    tracing::info!(
        servers = merged.servers.len(),
        health = merged.health.as_str(),
        failed_sinks = failures,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "process run finished"
    );
    if failures > 0 {
        bail!("{failures} sink(s) failed");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let result = match cli.command {
        Commands::Reconcile(args) => reconcile(args, &config).await,
        Commands::Process(args) => process(args, config.clone()).await,
    };
    if let Err(err) = &result {
        tracing::error!(error = %err, "session-digest failed");
    }

    if config.otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }
    result
}
