use std::sync::Arc;

use anyhow::{Context, Result};
use desk_cli::{validate_cli, Cli};
use desk_gateway::{run_gateway_server, GatewayServerConfig};
use desk_records::MemoryRecords;
use desk_slack_runtime::{SlackApiClient, SlackInboundRuntime, SlackInboundRuntimeConfig};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    validate_cli(&cli)?;
    let runtime = build_inbound_runtime(&cli)?;
    run_gateway_server(
        GatewayServerConfig {
            bind: cli.gateway_bind.clone(),
        },
        Arc::new(runtime),
    )
    .await
}

pub(crate) fn build_inbound_runtime(cli: &Cli) -> Result<SlackInboundRuntime> {
    let records = Arc::new(MemoryRecords::load(cli.records_path.clone()).with_context(|| {
        format!(
            "failed to load records from {}",
            cli.records_path.display()
        )
    })?);
    let client = SlackApiClient::new(
        cli.slack_api_base.clone(),
        cli.slack_request_timeout_ms,
        cli.slack_retry_max_attempts,
        cli.slack_retry_base_delay_ms,
    )?;
    tracing::info!(
        records_path = %cli.records_path.display(),
        state_dir = %cli.state_dir.display(),
        slack_api_base = %cli.slack_api_base,
        "starting slack inbound runtime"
    );

    SlackInboundRuntime::new(SlackInboundRuntimeConfig {
        client: Arc::new(client),
        authorizations: records.clone(),
        threads: records.clone(),
        records,
        state_dir: cli.state_dir.clone(),
        request_timeout_ms: cli.slack_request_timeout_ms,
        processed_event_cap: cli.slack_processed_event_cap,
        acknowledgement_text: cli.slack_acknowledgement_text.clone(),
    })
}
