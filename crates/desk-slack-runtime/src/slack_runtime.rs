//! Slack inbound runtime that turns webhook bodies into routed inbox side effects.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use desk_core::{current_unix_timestamp_ms, JsonlEventLog};
use desk_records::{AuthorizationRegistry, InboxRecords, ThreadIndex};
use serde_json::{json, Value};

mod slack_api_client;
mod slack_channel_scope;
mod slack_event_payload;
mod slack_event_router;
mod slack_http_helpers;
mod slack_identity;
mod slack_inbound_error;
mod slack_state_store;

pub use slack_api_client::{
    SlackApiClient, SlackChannel, SlackChannelInfoResponse, SlackChannelText, SlackChatClient,
    SlackHistoryMessage, SlackMessageHistoryResponse, SlackPostMessageRequest,
    SlackPostMessageResponse, SlackUser, SlackUserInfoResponse, SlackUserProfile,
};
pub use slack_channel_scope::{
    ChannelScope, ChannelScopeQuery, ChannelScopeResolver, ResolvedChannel,
};
pub use slack_event_payload::{
    parse_slack_webhook_payload, parse_slack_webhook_value, SlackEventEnvelope,
    SlackInboundEvent, SlackJoinEvent, SlackMessageEvent, SlackPayloadError, SlackWebhookPayload,
};
pub use slack_event_router::{
    classify_event, requires_parent_lookup, IgnoreReason, ParentAuthorship, RouteEffect,
    RouteFacts, RouteOutcome, SlackEventRouter, SlackEventRouterConfig,
};
pub use slack_identity::{Actor, IdentityResolver, SlackProfile};
pub use slack_inbound_error::SlackInboundError;
use slack_state_store::SlackInboundStateStore;

const SLACK_INBOUND_STATE_SCHEMA_VERSION: u32 = 1;
pub const SLACK_INBOUND_STATE_FILE: &str = "state.json";
pub const SLACK_INBOUND_EVENT_LOG_FILE: &str = "inbound-events.jsonl";
pub const SLACK_DEAD_LETTER_LOG_FILE: &str = "dead-letter-events.jsonl";

#[derive(Clone)]
/// Runtime configuration for Slack inbound event handling.
pub struct SlackInboundRuntimeConfig {
    pub client: Arc<dyn SlackChatClient>,
    pub authorizations: Arc<dyn AuthorizationRegistry>,
    pub threads: Arc<dyn ThreadIndex>,
    pub records: Arc<dyn InboxRecords>,
    pub state_dir: PathBuf,
    pub request_timeout_ms: u64,
    pub processed_event_cap: usize,
    pub acknowledgement_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What happened to one webhook body.
pub enum WebhookDisposition {
    Challenge {
        challenge: String,
    },
    Duplicate {
        delivery_key: String,
    },
    Routed {
        delivery_key: String,
        effect: RouteEffect,
    },
    Dropped {
        delivery_key: String,
        reason_code: &'static str,
    },
    Rejected {
        reason: String,
    },
}

impl WebhookDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Challenge { .. } => "challenge",
            Self::Duplicate { .. } => "duplicate",
            Self::Routed { .. } => "routed",
            Self::Dropped { .. } => "dropped",
            Self::Rejected { .. } => "rejected",
        }
    }
}

pub struct SlackInboundRuntime {
    router: SlackEventRouter,
    state_store: Mutex<SlackInboundStateStore>,
    inbound_log: JsonlEventLog,
    dead_letter_log: JsonlEventLog,
    state_dir: PathBuf,
}

impl SlackInboundRuntime {
    pub fn new(config: SlackInboundRuntimeConfig) -> Result<Self> {
        let state_dir = config.state_dir.clone();
        std::fs::create_dir_all(&state_dir)
            .with_context(|| format!("failed to create {}", state_dir.display()))?;

        let state_store = SlackInboundStateStore::load(
            state_dir.join(SLACK_INBOUND_STATE_FILE),
            config.processed_event_cap,
        )?;
        let inbound_log = JsonlEventLog::open(state_dir.join(SLACK_INBOUND_EVENT_LOG_FILE))?;
        let dead_letter_log = JsonlEventLog::open(state_dir.join(SLACK_DEAD_LETTER_LOG_FILE))?;
        let router = SlackEventRouter::new(SlackEventRouterConfig {
            client: config.client,
            authorizations: config.authorizations,
            threads: config.threads,
            records: config.records,
            request_timeout: Duration::from_millis(config.request_timeout_ms.max(1)),
            acknowledgement_text: config.acknowledgement_text,
        });

        Ok(Self {
            router,
            state_store: Mutex::new(state_store),
            inbound_log,
            dead_letter_log,
            state_dir,
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Handles one raw webhook body. Never fails; every problem becomes a disposition.
    pub async fn handle_webhook_body(&self, raw: &str) -> WebhookDisposition {
        let payload = match parse_slack_webhook_payload(raw) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::debug!(error = %error, "rejected slack webhook body");
                return WebhookDisposition::Rejected {
                    reason: error.to_string(),
                };
            }
        };
        let envelope = match payload {
            SlackWebhookPayload::UrlVerification { challenge } => {
                return WebhookDisposition::Challenge { challenge }
            }
            SlackWebhookPayload::Unsupported { body_type } => {
                tracing::debug!(body_type = %body_type, "ignored unsupported slack webhook type");
                return WebhookDisposition::Rejected {
                    reason: format!("unsupported webhook type '{body_type}'"),
                };
            }
            SlackWebhookPayload::EventCallback(envelope) => envelope,
        };
        self.handle_event(envelope).await
    }

    pub async fn handle_event(&self, envelope: SlackEventEnvelope) -> WebhookDisposition {
        let delivery_key = envelope.delivery_key();
        match self.claim_delivery(&delivery_key) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(delivery_key = %delivery_key, "skipped duplicate slack delivery");
                return WebhookDisposition::Duplicate { delivery_key };
            }
            Err(error) => {
                // Routing still proceeds; only replay suppression is degraded.
                tracing::warn!(
                    delivery_key = %delivery_key,
                    error = %error,
                    "failed to persist slack delivery key"
                );
            }
        }

        let disposition = match self.router.route(&envelope).await {
            Ok(effect) => {
                if let RouteEffect::Ignored(reason) = &effect {
                    tracing::debug!(
                        delivery_key = %delivery_key,
                        event_kind = envelope.event.kind_label(),
                        reason = reason.as_str(),
                        "ignored slack event"
                    );
                }
                WebhookDisposition::Routed {
                    delivery_key: delivery_key.clone(),
                    effect,
                }
            }
            Err(error) => {
                tracing::warn!(
                    delivery_key = %delivery_key,
                    event_kind = envelope.event.kind_label(),
                    reason = error.reason_code(),
                    error = %error,
                    "dropped slack event"
                );
                self.append_log(
                    &self.dead_letter_log,
                    &json!({
                        "timestamp_unix_ms": current_unix_timestamp_ms(),
                        "delivery_key": delivery_key,
                        "reason_code": error.reason_code(),
                        "error": error.to_string(),
                        "payload": envelope.raw_payload,
                    }),
                );
                WebhookDisposition::Dropped {
                    delivery_key: delivery_key.clone(),
                    reason_code: error.reason_code(),
                }
            }
        };

        self.append_log(
            &self.inbound_log,
            &inbound_log_entry(&delivery_key, &envelope, &disposition),
        );
        disposition
    }

    fn claim_delivery(&self, delivery_key: &str) -> Result<bool> {
        let mut store = self
            .state_store
            .lock()
            .map_err(|_| anyhow!("slack inbound state mutex is poisoned"))?;
        if !store.claim(delivery_key) {
            return Ok(false);
        }
        store.save()?;
        Ok(true)
    }

    fn append_log(&self, log: &JsonlEventLog, entry: &Value) {
        if let Err(error) = log.append(entry) {
            tracing::warn!(
                path = %log.path().display(),
                error = %error,
                "failed to append slack event log"
            );
        }
    }
}

fn inbound_log_entry(
    delivery_key: &str,
    envelope: &SlackEventEnvelope,
    disposition: &WebhookDisposition,
) -> Value {
    let mut entry = json!({
        "timestamp_unix_ms": current_unix_timestamp_ms(),
        "delivery_key": delivery_key,
        "event_kind": envelope.event.kind_label(),
        "channel_id": envelope.event.channel_id(),
        "disposition": disposition.as_str(),
    });
    match disposition {
        WebhookDisposition::Routed { effect, .. } => {
            entry["effect"] = json!(effect.as_str());
            if let RouteEffect::Ignored(reason) = effect {
                entry["reason"] = json!(reason.as_str());
            }
        }
        WebhookDisposition::Dropped { reason_code, .. } => {
            entry["reason"] = json!(reason_code);
        }
        _ => {}
    }
    entry
}
