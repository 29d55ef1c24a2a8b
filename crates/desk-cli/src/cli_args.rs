use std::path::PathBuf;

use clap::Parser;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Parser)]
#[command(
    name = "desk-daemon",
    about = "Slack inbound event gateway for the support inbox",
    version
)]
/// Public struct `Cli` used by the desk daemon.
pub struct Cli {
    #[arg(
        long = "gateway-bind",
        env = "DESK_GATEWAY_BIND",
        default_value = "127.0.0.1:8787",
        help = "Socket address the webhook gateway listens on"
    )]
    pub gateway_bind: String,

    #[arg(
        long = "state-dir",
        env = "DESK_STATE_DIR",
        default_value = ".desk/slack",
        help = "Directory for processed-event state, inbound log and dead-letter log"
    )]
    pub state_dir: PathBuf,

    #[arg(
        long = "records-path",
        env = "DESK_RECORDS_PATH",
        default_value = ".desk/records.json",
        help = "Record snapshot file holding authorizations, agents, customers, companies, conversations and threads"
    )]
    pub records_path: PathBuf,

    #[arg(
        long = "slack-api-base",
        env = "DESK_SLACK_API_BASE",
        default_value = "https://slack.com/api",
        help = "Base URL for the Slack Web API"
    )]
    pub slack_api_base: String,

    #[arg(
        long = "slack-request-timeout-ms",
        env = "DESK_SLACK_REQUEST_TIMEOUT_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Deadline applied to every Slack Web API call; an elapsed deadline drops the event"
    )]
    pub slack_request_timeout_ms: u64,

    #[arg(
        long = "slack-retry-max-attempts",
        env = "DESK_SLACK_RETRY_MAX_ATTEMPTS",
        default_value_t = 1,
        value_parser = parse_positive_usize,
        help = "Maximum HTTP attempts per Slack call for 429/5xx responses (1 disables retries)"
    )]
    pub slack_retry_max_attempts: usize,

    #[arg(
        long = "slack-retry-base-delay-ms",
        env = "DESK_SLACK_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64,
        help = "Base backoff delay between Slack retries"
    )]
    pub slack_retry_base_delay_ms: u64,

    #[arg(
        long = "slack-processed-event-cap",
        env = "DESK_SLACK_PROCESSED_EVENT_CAP",
        default_value_t = 10_000,
        value_parser = parse_positive_usize,
        help = "Number of recent delivery keys retained for duplicate suppression"
    )]
    pub slack_processed_event_cap: usize,

    #[arg(
        long = "slack-acknowledgement-text",
        env = "DESK_SLACK_ACKNOWLEDGEMENT_TEXT",
        help = "Optional reply posted into the Slack thread of every newly created conversation"
    )]
    pub slack_acknowledgement_text: Option<String>,
}
