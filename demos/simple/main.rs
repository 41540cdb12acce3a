// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use profile_flush_exporter::{
    collector::{
        code_provenance::ProcMapsCodeProvenance, CollectorError, ProfileCollector,
        SerializedProfile,
    },
    recorder::Recorder,
    scheduler::Scheduler,
    transport::{
        engine::http::HttpExporterEngine,
        http::{HttpTransportBuilder, DEFAULT_UPLOAD_TIMEOUT},
        AgentSettings, Tag,
    },
};
use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use clap::Parser;

pub fn set_up_tracing() {
    use tracing_subscriber::{prelude::*, EnvFilter};

    let format = tracing_subscriber::fmt::layer().pretty();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(format)
        .with(filter)
        .init();
}

/// Parses a boolean environment variable the way the other profiling settings do.
fn env_to_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        Err(_) => default,
    }
}

fn parse_tag(s: &str) -> Result<Tag, String> {
    match s.split_once(':') {
        Some((name, value)) if !name.is_empty() => Ok(Tag::new(name, value)),
        _ => Err(format!("expected a tag as name:value, got {s:?}")),
    }
}

/// A stand-in collector that reports a fixed payload for every window.
struct FixedPayloadCollector {
    payload: Vec<u8>,
    window_start: DateTime<Utc>,
}

impl ProfileCollector for FixedPayloadCollector {
    fn serialize(&mut self) -> Result<Option<SerializedProfile>, CollectorError> {
        let finish = Utc::now();
        let start = std::mem::replace(&mut self.window_start, finish);
        Ok(Some(SerializedProfile {
            start,
            finish,
            data: self.payload.clone(),
        }))
    }

    fn is_idle(&self) -> bool {
        false
    }
}

/// Simple program to test the profile exporter
#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = AgentSettings::DEFAULT_HOSTNAME)]
    agent_host: String,
    #[arg(long, default_value_t = AgentSettings::DEFAULT_PORT)]
    agent_port: u16,
    #[arg(long)]
    ssl: bool,
    #[arg(long)]
    uds_path: Option<PathBuf>,
    /// Only used if DD_PROFILING_AGENTLESS is set
    #[arg(long)]
    site: Option<String>,
    /// Defaults to DD_API_KEY
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<Tag>,
    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration)]
    upload_timeout: Option<Duration>,
    #[arg(long, default_value = "60s")]
    #[clap(value_parser = humantime::parse_duration)]
    flush_interval: Duration,
    #[arg(long)]
    #[clap(value_parser = humantime::parse_duration)]
    duration: Option<Duration>,
    /// File whose contents are reported as the profile
    #[arg(long)]
    pprof_file: Option<PathBuf>,
    #[arg(long)]
    no_code_provenance: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    set_up_tracing();
    tracing::info!("main started");

    let agent_settings = AgentSettings {
        hostname: args.agent_host,
        port: args.agent_port,
        ssl: args.ssl,
        uds_path: args.uds_path,
        transport_options: None,
    };
    let mut transport = HttpTransportBuilder::default()
        .with_agent_settings(agent_settings)
        .with_upload_timeout(args.upload_timeout.unwrap_or(DEFAULT_UPLOAD_TIMEOUT))
        .with_agentless_allowed(env_to_bool("DD_PROFILING_AGENTLESS", false));
    if let Some(site) = args.site {
        transport = transport.with_site(site);
    }
    if let Some(api_key) = args.api_key.or_else(|| std::env::var("DD_API_KEY").ok()) {
        transport = transport.with_api_key(api_key);
    }
    for tag in args.tags {
        transport = transport.with_tag(tag.name, tag.value);
    }
    let transport = transport.build(HttpExporterEngine::new("rust"))?;
    tracing::info!(mode = ?transport.mode(), "created transport");

    let payload = match &args.pprof_file {
        Some(path) => tokio::fs::read(path).await?,
        None => b"not really a pprof".to_vec(),
    };
    let collector = FixedPayloadCollector {
        payload,
        window_start: Utc::now(),
    };
    let mut recorder = Recorder::builder().with_pprof_collector(collector);
    if !args.no_code_provenance {
        recorder = recorder.with_code_provenance(ProcMapsCodeProvenance::new());
    }

    tracing::info!("starting scheduler");
    let scheduler = Scheduler::builder()
        .with_recorder(recorder.build())
        .with_transport(transport)
        .with_flush_interval(args.flush_interval)
        .build()
        .spawn();

    match args.duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => tokio::signal::ctrl_c().await?,
    }
    tracing::info!("stopping scheduler");
    scheduler.stop().await?;

    Ok(())
}
