//! Slack Web API client used for identity, channel and parent-message lookups.
//!
//! `SlackChatClient` is the capability seam the router consumes; every call
//! returns Slack's own `{ok, ...}` envelope so callers decide what `ok: false`
//! means for them. `SlackApiClient` is the reqwest-backed implementation.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::slack_http_helpers::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SlackUserProfile {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SlackUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub tz: Option<String>,
    #[serde(default)]
    pub profile: SlackUserProfile,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SlackUserInfoResponse {
    pub ok: bool,
    #[serde(default)]
    pub user: Option<SlackUser>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SlackChannelText {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SlackChannel {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub purpose: SlackChannelText,
    #[serde(default)]
    pub topic: SlackChannelText,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SlackChannelInfoResponse {
    pub ok: bool,
    #[serde(default)]
    pub channel: Option<SlackChannel>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SlackHistoryMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl SlackHistoryMessage {
    pub fn is_bot_authored(&self) -> bool {
        self.bot_id
            .as_deref()
            .is_some_and(|bot_id| !bot_id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SlackMessageHistoryResponse {
    pub ok: bool,
    #[serde(default)]
    pub messages: Vec<SlackHistoryMessage>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SlackPostMessageRequest {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SlackPostMessageResponse {
    pub ok: bool,
    #[serde(default)]
    pub ts: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
/// Trait contract for the Slack Web API calls the inbound router depends on.
pub trait SlackChatClient: Send + Sync {
    async fn retrieve_user_info(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<SlackUserInfoResponse>;

    async fn retrieve_channel_info(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<SlackChannelInfoResponse>;

    /// Fetches the message at `ts` in `channel_id` (the root of a reply thread).
    async fn retrieve_message(
        &self,
        access_token: &str,
        channel_id: &str,
        ts: &str,
    ) -> Result<SlackMessageHistoryResponse>;

    /// Posts a message; `Ok(None)` means nothing was sent because no credentials were supplied.
    async fn send_message(
        &self,
        access_token: &str,
        request: &SlackPostMessageRequest,
    ) -> Result<Option<SlackPostMessageResponse>>;
}

#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(
        api_base: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("desk-slack-inbound"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-desk-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode slack {operation}"));
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "slack api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }
}

#[async_trait]
impl SlackChatClient for SlackApiClient {
    async fn retrieve_user_info(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<SlackUserInfoResponse> {
        self.request_json("users.info", || {
            self.http
                .get(format!("{}/users.info", self.api_base))
                .bearer_auth(access_token)
                .query(&[("user", user_id)])
        })
        .await
    }

    async fn retrieve_channel_info(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<SlackChannelInfoResponse> {
        self.request_json("conversations.info", || {
            self.http
                .get(format!("{}/conversations.info", self.api_base))
                .bearer_auth(access_token)
                .query(&[("channel", channel_id)])
        })
        .await
    }

    async fn retrieve_message(
        &self,
        access_token: &str,
        channel_id: &str,
        ts: &str,
    ) -> Result<SlackMessageHistoryResponse> {
        self.request_json("conversations.history", || {
            self.http
                .get(format!("{}/conversations.history", self.api_base))
                .bearer_auth(access_token)
                .query(&[
                    ("channel", channel_id),
                    ("latest", ts),
                    ("inclusive", "true"),
                    ("limit", "1"),
                ])
        })
        .await
    }

    async fn send_message(
        &self,
        access_token: &str,
        request: &SlackPostMessageRequest,
    ) -> Result<Option<SlackPostMessageResponse>> {
        if access_token.trim().is_empty() {
            return Ok(None);
        }
        let response: SlackPostMessageResponse = self
            .request_json("chat.postMessage", || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(access_token)
                    .json(request)
            })
            .await?;
        Ok(Some(response))
    }
}
