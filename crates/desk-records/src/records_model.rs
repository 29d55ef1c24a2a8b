//! Record types shared by the inbound routing engine and record stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `AuthorizationScope` values.
pub enum AuthorizationScope {
    Primary,
    Support,
}

impl AuthorizationScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Support => "support",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Channel-scoped Slack credential held by an account.
///
/// A support authorization with an empty `channel_id` is a workspace-wide
/// install: it governs channel joins anywhere in its team.
pub struct SlackAuthorization {
    pub account_id: String,
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    pub bot_user_id: String,
    #[serde(default)]
    pub authed_user_id: String,
    #[serde(default)]
    pub access_token: String,
    pub scope: AuthorizationScope,
}

impl SlackAuthorization {
    pub fn is_primary(&self) -> bool {
        self.scope == AuthorizationScope::Primary
    }

    pub fn is_workspace_install(&self) -> bool {
        self.channel_id.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageSource` values.
pub enum MessageSource {
    Slack,
    Chat,
}

impl MessageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationThread {
    pub id: String,
    pub account_id: String,
    pub conversation_id: String,
    pub external_channel_id: String,
    pub external_thread_id: String,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversationThread {
    pub account_id: String,
    pub conversation_id: String,
    pub external_channel_id: String,
    pub external_thread_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub account_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub assignee_id: Option<String>,
    pub source: MessageSource,
    #[serde(default)]
    pub read: bool,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub account_id: String,
    pub customer_id: String,
    pub source: MessageSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Partial conversation update; `None` fields are left untouched.
pub struct ConversationUpdate {
    pub assignee_id: Option<String>,
    pub read: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub account_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub body: String,
    pub source: MessageSource,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub account_id: String,
    pub conversation_id: String,
    pub customer_id: Option<String>,
    pub user_id: Option<String>,
    pub body: String,
    pub source: MessageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    pub id: String,
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub external_channel_id: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCompany {
    pub account_id: String,
    pub name: String,
    pub external_channel_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Customer {
    pub id: String,
    pub account_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub company_id: Option<String>,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub account_id: String,
    pub email: String,
    pub name: Option<String>,
    pub time_zone: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Agent (internal user) of an account.
pub struct AgentUser {
    pub id: String,
    pub account_id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Case-insensitive email comparison used for every identity match.
pub fn emails_match(left: &str, right: &str) -> bool {
    left.trim().eq_ignore_ascii_case(right.trim())
}
