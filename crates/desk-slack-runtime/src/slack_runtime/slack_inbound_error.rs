use desk_records::{ConversationThread, RecordStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `SlackInboundError` values.
pub enum SlackInboundError {
    #[error("no authorization governs channel {channel_id}")]
    UnknownChannel { channel_id: String },
    #[error("event team {event_team} does not match authorization team {authorization_team}")]
    TeamMismatch {
        event_team: String,
        authorization_team: String,
    },
    #[error("could not resolve slack user {user_id}: {reason}")]
    IdentityResolutionFailure { user_id: String, reason: String },
    #[error("slack api {operation} failed: {detail}")]
    ExternalApiFailure {
        operation: &'static str,
        detail: String,
    },
    #[error(
        "thread {thread_ts} in channel {channel_id} was created concurrently by conversation {}",
        .winner.conversation_id
    )]
    DuplicateThreadRace {
        channel_id: String,
        thread_ts: String,
        winner: Box<ConversationThread>,
    },
    #[error(transparent)]
    Records(#[from] RecordStoreError),
}

impl SlackInboundError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownChannel { .. } => "unknown_channel",
            Self::TeamMismatch { .. } => "team_mismatch",
            Self::IdentityResolutionFailure { .. } => "identity_resolution_failure",
            Self::ExternalApiFailure { .. } => "external_api_failure",
            Self::DuplicateThreadRace { .. } => "duplicate_thread_race",
            Self::Records(_) => "record_store_failure",
        }
    }

    /// Silent errors end processing as an ignore; the rest drop the event.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::UnknownChannel { .. } | Self::TeamMismatch { .. })
    }

    pub(super) fn api(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::ExternalApiFailure {
            operation,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_reason_codes_and_silence_follow_variant() {
        let unknown = SlackInboundError::UnknownChannel {
            channel_id: "C1".to_string(),
        };
        assert_eq!(unknown.reason_code(), "unknown_channel");
        assert!(unknown.is_silent());

        let api = SlackInboundError::api("users.info", "user_not_found");
        assert_eq!(api.reason_code(), "external_api_failure");
        assert!(!api.is_silent());
        assert_eq!(api.to_string(), "slack api users.info failed: user_not_found");

        let store = SlackInboundError::from(RecordStoreError::Backend("disk full".to_string()));
        assert_eq!(store.reason_code(), "record_store_failure");
        assert!(!store.is_silent());
    }
}
