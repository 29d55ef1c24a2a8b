//! Async store contracts consumed by the inbound routing engine.
//!
//! Persistence lives outside the routing core; these traits are the keyed
//! reads and idempotent writes it relies on. Uniqueness violations surface as
//! `Duplicate*` errors carrying the winning record so callers can fall back to
//! it instead of failing.

use async_trait::async_trait;
use thiserror::Error;

use crate::records_model::{
    AgentUser, Company, Conversation, ConversationThread, ConversationUpdate, Customer, Message,
    NewCompany, NewConversation, NewConversationThread, NewCustomer, NewMessage,
    SlackAuthorization,
};

#[derive(Debug, Error)]
/// Enumerates supported `RecordStoreError` values.
pub enum RecordStoreError {
    #[error(
        "conversation thread already exists for channel {} thread {}",
        .existing.external_channel_id,
        .existing.external_thread_id
    )]
    DuplicateThread { existing: Box<ConversationThread> },
    #[error("company {} already bound to channel {:?}", .existing.id, .existing.external_channel_id)]
    DuplicateCompany { existing: Box<Company> },
    #[error("customer {} already exists for email {}", .existing.id, .existing.email)]
    DuplicateCustomer { existing: Box<Customer> },
    #[error("authorization conflict: {0}")]
    AuthorizationConflict(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("record store backend failure: {0}")]
    Backend(String),
}

pub type RecordResult<T> = Result<T, RecordStoreError>;

#[async_trait]
/// Keyed reads over account-held Slack credentials. The routing core never writes these.
pub trait AuthorizationRegistry: Send + Sync {
    async fn find_authorization_by_channel(
        &self,
        channel_id: &str,
    ) -> RecordResult<Option<SlackAuthorization>>;

    async fn find_support_authorization(
        &self,
        account_id: &str,
        team_id: &str,
    ) -> RecordResult<Option<SlackAuthorization>>;

    async fn find_support_authorization_by_team(
        &self,
        team_id: &str,
    ) -> RecordResult<Option<SlackAuthorization>>;
}

#[async_trait]
/// Mapping from `(account, channel, thread_ts)` to the mirrored conversation.
pub trait ThreadIndex: Send + Sync {
    async fn find_thread(
        &self,
        account_id: &str,
        channel_id: &str,
        thread_ts: &str,
    ) -> RecordResult<Option<ConversationThread>>;

    /// Creates a thread link; returns `DuplicateThread` when the key is already taken.
    async fn create_thread(&self, thread: NewConversationThread)
        -> RecordResult<ConversationThread>;
}

#[async_trait]
pub trait InboxRecords: Send + Sync {
    async fn find_agent_by_email(
        &self,
        account_id: &str,
        email: &str,
    ) -> RecordResult<Option<AgentUser>>;

    async fn find_customer_by_email(
        &self,
        account_id: &str,
        email: &str,
    ) -> RecordResult<Option<Customer>>;

    async fn get_customer(&self, customer_id: &str) -> RecordResult<Option<Customer>>;

    /// Returns `DuplicateCustomer` when `(account_id, email)` is already taken.
    async fn create_customer(&self, customer: NewCustomer) -> RecordResult<Customer>;

    async fn set_customer_company(
        &self,
        customer_id: &str,
        company_id: &str,
    ) -> RecordResult<Customer>;

    async fn get_conversation(&self, conversation_id: &str) -> RecordResult<Option<Conversation>>;

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> RecordResult<Conversation>;

    async fn update_conversation(
        &self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> RecordResult<Conversation>;

    async fn delete_conversation(&self, conversation_id: &str) -> RecordResult<()>;

    async fn create_message(&self, message: NewMessage) -> RecordResult<Message>;

    async fn list_messages(&self, account_id: &str) -> RecordResult<Vec<Message>>;

    async fn find_company_by_channel(
        &self,
        account_id: &str,
        channel_id: &str,
    ) -> RecordResult<Option<Company>>;

    /// Every account's company bound to the channel; shared channels may carry several.
    async fn list_companies_by_channel(&self, channel_id: &str) -> RecordResult<Vec<Company>>;

    /// Returns `DuplicateCompany` when the account already has a company for the channel.
    async fn create_company(&self, company: NewCompany) -> RecordResult<Company>;

    async fn list_companies(&self, account_id: &str) -> RecordResult<Vec<Company>>;
}
