//! Retry and error-rendering helpers for Slack Web API calls.

use std::future::Future;
use std::time::Duration;

use super::slack_inbound_error::SlackInboundError;

/// Bounds one Slack call; transport errors and elapsed deadlines both become `ExternalApiFailure`.
pub(super) async fn with_api_timeout<T, F>(
    timeout: Duration,
    operation: &'static str,
    call: F,
) -> Result<T, SlackInboundError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(SlackInboundError::api(operation, format!("{error:#}"))),
        Err(_) => Err(SlackInboundError::api(
            operation,
            format!("timed out after {}ms", timeout.as_millis()),
        )),
    }
}

pub(super) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?;
    let seconds = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

pub(super) fn retry_delay(
    base_delay_ms: u64,
    attempt: usize,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(delay) = retry_after {
        return delay.max(Duration::from_millis(base_delay_ms));
    }
    let exponent = attempt.saturating_sub(1).min(10) as u32;
    let scaled = base_delay_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(scaled.min(30_000))
}

pub(super) fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

pub(super) fn is_retryable_slack_status(status: u16) -> bool {
    status == 429 || status >= 500
}

pub(super) fn truncate_for_error(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}
