//! Slack Events API webhook parsing.
//!
//! The raw body is untrusted and loosely structured. Parsing reduces it to a
//! closed set of event shapes with their required fields checked up front;
//! any shape the router does not act on becomes `Unrecognized` rather than an
//! error.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const MESSAGE_EVENT_TYPE: &str = "message";
const CHANNEL_JOIN_SUBTYPE: &str = "channel_join";
const GROUP_JOIN_SUBTYPE: &str = "group_join";
const MESSAGE_SUBTYPES_WITH_AUTHOR: &[&str] = &["thread_broadcast", "file_share"];

#[derive(Debug, Error)]
/// Enumerates supported `SlackPayloadError` values.
pub enum SlackPayloadError {
    #[error("webhook body is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("event_callback body is missing its event object")]
    MissingEvent,
}

#[derive(Debug, Deserialize)]
struct SlackWebhookBody {
    #[serde(rename = "type", default)]
    body_type: String,
    #[serde(default)]
    challenge: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    is_ext_shared_channel: bool,
    #[serde(default)]
    event: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackRawEvent {
    #[serde(rename = "type", default)]
    event_type: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    inviter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackWebhookPayload {
    UrlVerification { challenge: String },
    EventCallback(SlackEventEnvelope),
    Unsupported { body_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackEventEnvelope {
    pub event_id: Option<String>,
    pub is_ext_shared_channel: bool,
    /// Top-level `team_id`; only trusted for team validation on externally shared channels.
    pub shared_team_id: Option<String>,
    pub event: SlackInboundEvent,
    pub raw_payload: Value,
}

impl SlackEventEnvelope {
    /// Key used for duplicate-delivery suppression.
    pub fn delivery_key(&self) -> String {
        if let Some(event_id) = self.event_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return event_id.to_string();
        }
        match &self.event {
            SlackInboundEvent::Message(message) => format!(
                "message:{}:{}:{}",
                message.channel_id,
                message.user_id,
                message.ts.as_deref().unwrap_or(message.thread_key())
            ),
            SlackInboundEvent::ChannelJoin(join) | SlackInboundEvent::GroupJoin(join) => {
                format!("join:{}:{}:{}", join.channel_id, join.user_id, join.ts)
            }
            SlackInboundEvent::Unrecognized { event_type, subtype } => format!(
                "unrecognized:{event_type}:{}",
                subtype.as_deref().unwrap_or_default()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackInboundEvent {
    Message(SlackMessageEvent),
    ChannelJoin(SlackJoinEvent),
    GroupJoin(SlackJoinEvent),
    Unrecognized {
        event_type: String,
        subtype: Option<String>,
    },
}

impl SlackInboundEvent {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::ChannelJoin(_) => "channel_join",
            Self::GroupJoin(_) => "group_join",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }

    pub fn channel_id(&self) -> Option<&str> {
        match self {
            Self::Message(message) => Some(message.channel_id.as_str()),
            Self::ChannelJoin(join) | Self::GroupJoin(join) => Some(join.channel_id.as_str()),
            Self::Unrecognized { .. } => None,
        }
    }

    pub fn team_id(&self) -> Option<&str> {
        match self {
            Self::Message(message) => Some(message.team_id.as_str()),
            Self::ChannelJoin(join) | Self::GroupJoin(join) => Some(join.team_id.as_str()),
            Self::Unrecognized { .. } => None,
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self, Self::ChannelJoin(_) | Self::GroupJoin(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackMessageEvent {
    pub channel_id: String,
    pub team_id: String,
    pub user_id: String,
    pub text: String,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
    pub bot_id: Option<String>,
}

impl SlackMessageEvent {
    /// A reply lives inside another message's thread (`thread_ts` set and not its own `ts`).
    pub fn is_reply(&self) -> bool {
        match (self.thread_ts.as_deref(), self.ts.as_deref()) {
            (Some(thread_ts), Some(ts)) => thread_ts != ts,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Thread key this message belongs to: the parent for replies, itself otherwise.
    pub fn thread_key(&self) -> &str {
        self.thread_ts
            .as_deref()
            .or(self.ts.as_deref())
            .unwrap_or_default()
    }

    pub fn is_bot_authored(&self, bot_user_id: &str) -> bool {
        let has_bot_id = self
            .bot_id
            .as_deref()
            .is_some_and(|bot_id| !bot_id.trim().is_empty());
        has_bot_id || (!bot_user_id.is_empty() && self.user_id == bot_user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackJoinEvent {
    pub channel_id: String,
    pub team_id: String,
    pub user_id: String,
    pub ts: String,
    pub inviter: Option<String>,
}

pub fn parse_slack_webhook_payload(raw: &str) -> Result<SlackWebhookPayload, SlackPayloadError> {
    let value = serde_json::from_str::<Value>(raw)?;
    parse_slack_webhook_value(value)
}

pub fn parse_slack_webhook_value(value: Value) -> Result<SlackWebhookPayload, SlackPayloadError> {
    let body = serde_json::from_value::<SlackWebhookBody>(value.clone())?;
    match body.body_type.as_str() {
        "url_verification" => Ok(SlackWebhookPayload::UrlVerification {
            challenge: body.challenge.unwrap_or_default(),
        }),
        "event_callback" => {
            let raw_event = body.event.ok_or(SlackPayloadError::MissingEvent)?;
            let raw_event = serde_json::from_value::<SlackRawEvent>(raw_event).unwrap_or_default();
            // The top-level team only stands in for a missing event team on unshared channels.
            let fallback_team_id = body
                .team_id
                .as_deref()
                .filter(|_| !body.is_ext_shared_channel);
            let event = normalize_raw_event(raw_event, fallback_team_id);
            Ok(SlackWebhookPayload::EventCallback(SlackEventEnvelope {
                event_id: body.event_id,
                is_ext_shared_channel: body.is_ext_shared_channel,
                shared_team_id: non_empty(body.team_id),
                event,
                raw_payload: value,
            }))
        }
        other => Ok(SlackWebhookPayload::Unsupported {
            body_type: other.to_string(),
        }),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn normalize_raw_event(raw: SlackRawEvent, fallback_team_id: Option<&str>) -> SlackInboundEvent {
    let unrecognized = |raw: &SlackRawEvent| SlackInboundEvent::Unrecognized {
        event_type: raw.event_type.clone(),
        subtype: raw.subtype.clone(),
    };
    if raw.event_type != MESSAGE_EVENT_TYPE {
        return unrecognized(&raw);
    }

    let Some(channel_id) = non_empty(raw.channel.clone()) else {
        return unrecognized(&raw);
    };
    let team_id = non_empty(raw.team.clone())
        .or_else(|| fallback_team_id.map(str::to_string))
        .unwrap_or_default();
    let user_id = non_empty(raw.user.clone());
    let ts = non_empty(raw.ts.clone());
    let thread_ts = non_empty(raw.thread_ts.clone());

    match raw.subtype.as_deref() {
        Some(CHANNEL_JOIN_SUBTYPE) | Some(GROUP_JOIN_SUBTYPE) => {
            let Some(user_id) = user_id else {
                return unrecognized(&raw);
            };
            let join = SlackJoinEvent {
                channel_id,
                team_id,
                user_id,
                ts: ts.unwrap_or_default(),
                inviter: non_empty(raw.inviter.clone()),
            };
            if raw.subtype.as_deref() == Some(CHANNEL_JOIN_SUBTYPE) {
                SlackInboundEvent::ChannelJoin(join)
            } else {
                SlackInboundEvent::GroupJoin(join)
            }
        }
        None => build_message_event(&raw, channel_id, team_id, user_id, ts, thread_ts),
        Some(subtype) if MESSAGE_SUBTYPES_WITH_AUTHOR.contains(&subtype) => {
            build_message_event(&raw, channel_id, team_id, user_id, ts, thread_ts)
        }
        Some(_) => unrecognized(&raw),
    }
}

fn build_message_event(
    raw: &SlackRawEvent,
    channel_id: String,
    team_id: String,
    user_id: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
) -> SlackInboundEvent {
    let bot_id = non_empty(raw.bot_id.clone());
    if ts.is_none() && thread_ts.is_none() {
        return SlackInboundEvent::Unrecognized {
            event_type: raw.event_type.clone(),
            subtype: raw.subtype.clone(),
        };
    }
    // Bot posts may omit `user`; keep them so the router can ignore them explicitly.
    let user_id = match (user_id, bot_id.as_ref()) {
        (Some(user_id), _) => user_id,
        (None, Some(_)) => String::new(),
        (None, None) => {
            return SlackInboundEvent::Unrecognized {
                event_type: raw.event_type.clone(),
                subtype: raw.subtype.clone(),
            }
        }
    };
    SlackInboundEvent::Message(SlackMessageEvent {
        channel_id,
        team_id,
        user_id,
        text: raw.text.clone().unwrap_or_default(),
        ts,
        thread_ts,
        bot_id,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn callback(event: Value) -> String {
        json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "team_id": "T1",
            "event": event,
        })
        .to_string()
    }

    fn parse_event(event: Value) -> SlackInboundEvent {
        match parse_slack_webhook_payload(&callback(event)).expect("parse") {
            SlackWebhookPayload::EventCallback(envelope) => envelope.event,
            other => panic!("expected event callback, got {other:?}"),
        }
    }

    #[test]
    fn unit_url_verification_returns_challenge() {
        let payload = parse_slack_webhook_payload(
            r#"{"type":"url_verification","challenge":"abc123","token":"x"}"#,
        )
        .expect("parse");
        assert_eq!(
            payload,
            SlackWebhookPayload::UrlVerification {
                challenge: "abc123".to_string()
            }
        );
    }

    #[test]
    fn unit_message_reply_keeps_thread_fields() {
        let event = parse_event(json!({
            "type": "message",
            "text": "hello",
            "channel": "C1",
            "team": "T1",
            "user": "U1",
            "ts": "200.2",
            "thread_ts": "100.1",
        }));
        let SlackInboundEvent::Message(message) = event else {
            panic!("expected message");
        };
        assert!(message.is_reply());
        assert_eq!(message.thread_key(), "100.1");
        assert_eq!(message.text, "hello");
    }

    #[test]
    fn unit_thread_root_with_matching_ts_is_not_a_reply() {
        let event = parse_event(json!({
            "type": "message",
            "channel": "C1",
            "user": "U1",
            "ts": "100.1",
            "thread_ts": "100.1",
        }));
        let SlackInboundEvent::Message(message) = event else {
            panic!("expected message");
        };
        assert!(!message.is_reply());
        assert_eq!(message.team_id, "T1");
    }

    #[test]
    fn unit_join_subtypes_map_to_join_variants() {
        let channel_join = parse_event(json!({
            "type": "message",
            "subtype": "channel_join",
            "channel": "C9",
            "team": "T1",
            "user": "UBOT",
            "inviter": "U1",
            "ts": "1.0",
        }));
        let SlackInboundEvent::ChannelJoin(join) = channel_join else {
            panic!("expected channel join");
        };
        assert_eq!(join.inviter.as_deref(), Some("U1"));

        let group_join = parse_event(json!({
            "type": "message",
            "subtype": "group_join",
            "channel": "G9",
            "user": "UBOT",
            "ts": "1.0",
        }));
        assert!(matches!(group_join, SlackInboundEvent::GroupJoin(_)));
        assert!(group_join.is_join());
    }

    #[test]
    fn regression_unknown_shapes_become_unrecognized() {
        let edited = parse_event(json!({
            "type": "message",
            "subtype": "message_changed",
            "channel": "C1",
            "ts": "1.0",
        }));
        assert!(matches!(
            edited,
            SlackInboundEvent::Unrecognized { ref subtype, .. } if subtype.as_deref() == Some("message_changed")
        ));

        let reaction = parse_event(json!({"type": "reaction_added", "user": "U1"}));
        assert_eq!(reaction.kind_label(), "unrecognized");

        let missing_channel = parse_event(json!({"type": "message", "user": "U1", "ts": "1.0"}));
        assert!(missing_channel.channel_id().is_none());

        let missing_author = parse_event(json!({"type": "message", "channel": "C1", "ts": "1.0"}));
        assert_eq!(missing_author.kind_label(), "unrecognized");
    }

    #[test]
    fn regression_bot_posts_without_user_are_kept_for_explicit_ignore() {
        let event = parse_event(json!({
            "type": "message",
            "channel": "C1",
            "bot_id": "B1",
            "ts": "1.0",
        }));
        let SlackInboundEvent::Message(message) = event else {
            panic!("expected message");
        };
        assert!(message.is_bot_authored("UBOT"));
    }

    #[test]
    fn unit_shared_channel_fields_are_captured() {
        let raw = json!({
            "type": "event_callback",
            "team_id": "T_HOME",
            "is_ext_shared_channel": true,
            "event": {"type": "message", "channel": "C1", "team": "T_EXTERNAL", "user": "U1", "ts": "1.0"},
        })
        .to_string();
        let SlackWebhookPayload::EventCallback(envelope) =
            parse_slack_webhook_payload(&raw).expect("parse")
        else {
            panic!("expected event callback");
        };
        assert!(envelope.is_ext_shared_channel);
        assert_eq!(envelope.shared_team_id.as_deref(), Some("T_HOME"));
        assert_eq!(envelope.event.team_id(), Some("T_EXTERNAL"));
        assert_eq!(envelope.delivery_key(), "message:C1:U1:1.0");
    }

    #[test]
    fn regression_replies_without_event_id_get_distinct_delivery_keys() {
        let envelope = |ts: &str| {
            let raw = json!({
                "type": "event_callback",
                "team_id": "T1",
                "event": {"type": "message", "channel": "C1", "user": "U1", "ts": ts, "thread_ts": "100.1"},
            })
            .to_string();
            let SlackWebhookPayload::EventCallback(envelope) =
                parse_slack_webhook_payload(&raw).expect("parse")
            else {
                panic!("expected event callback");
            };
            envelope
        };
        assert_eq!(envelope("200.1").delivery_key(), "message:C1:U1:200.1");
        assert_ne!(
            envelope("200.1").delivery_key(),
            envelope("300.1").delivery_key()
        );
    }

    #[test]
    fn regression_shared_channel_event_never_borrows_top_level_team() {
        let raw = json!({
            "type": "event_callback",
            "team_id": "T_HOME",
            "is_ext_shared_channel": true,
            "event": {"type": "message", "channel": "C1", "user": "U1", "ts": "1.0"},
        })
        .to_string();
        let SlackWebhookPayload::EventCallback(envelope) =
            parse_slack_webhook_payload(&raw).expect("parse")
        else {
            panic!("expected event callback");
        };
        assert_eq!(envelope.event.team_id(), Some(""));
        assert_eq!(envelope.shared_team_id.as_deref(), Some("T_HOME"));
    }

    #[test]
    fn regression_invalid_json_and_missing_event_are_errors() {
        assert!(matches!(
            parse_slack_webhook_payload("{not json"),
            Err(SlackPayloadError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_slack_webhook_payload(r#"{"type":"event_callback"}"#),
            Err(SlackPayloadError::MissingEvent)
        ));
        assert!(matches!(
            parse_slack_webhook_payload(r#"{"type":"app_rate_limited"}"#),
            Ok(SlackWebhookPayload::Unsupported { .. })
        ));
    }
}
