//! Snapshot-backed in-memory record store.
//!
//! Every mutation is applied under one lock and, when a snapshot path is set,
//! written through to disk atomically. Uniqueness keys mirror the database
//! constraints a production store would carry.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use desk_core::write_text_atomic;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records_model::{
    emails_match, AgentUser, AuthorizationScope, Company, Conversation, ConversationThread,
    ConversationUpdate, Customer, Message, NewCompany, NewConversation, NewConversationThread,
    NewCustomer, NewMessage, SlackAuthorization,
};
use crate::records_store::{
    AuthorizationRegistry, InboxRecords, RecordResult, RecordStoreError, ThreadIndex,
};

pub const RECORD_SNAPSHOT_SCHEMA_VERSION: u32 = 1;

fn record_snapshot_schema_version() -> u32 {
    RECORD_SNAPSHOT_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSnapshot {
    #[serde(default = "record_snapshot_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub authorizations: Vec<SlackAuthorization>,
    #[serde(default)]
    pub agents: Vec<AgentUser>,
    #[serde(default)]
    pub customers: Vec<Customer>,
    #[serde(default)]
    pub companies: Vec<Company>,
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub threads: Vec<ConversationThread>,
}

impl Default for RecordSnapshot {
    fn default() -> Self {
        Self {
            schema_version: RECORD_SNAPSHOT_SCHEMA_VERSION,
            authorizations: Vec::new(),
            agents: Vec::new(),
            customers: Vec::new(),
            companies: Vec::new(),
            conversations: Vec::new(),
            messages: Vec::new(),
            threads: Vec::new(),
        }
    }
}

fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

fn not_found(kind: &'static str, id: &str) -> RecordStoreError {
    RecordStoreError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecords {
    path: Option<PathBuf>,
    state: Mutex<RecordSnapshot>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: RecordSnapshot) -> Self {
        Self {
            path: None,
            state: Mutex::new(snapshot),
        }
    }

    /// Loads a snapshot file (or starts empty) and writes every later mutation back to it.
    pub fn load(path: PathBuf) -> Result<Self> {
        let snapshot = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read record snapshot {}", path.display()))?;
            serde_json::from_str::<RecordSnapshot>(&raw).with_context(|| {
                format!("failed to parse record snapshot {}", path.display())
            })?
        } else {
            RecordSnapshot::default()
        };
        if snapshot.schema_version != RECORD_SNAPSHOT_SCHEMA_VERSION {
            bail!(
                "unsupported record snapshot schema: expected {}, found {}",
                RECORD_SNAPSHOT_SCHEMA_VERSION,
                snapshot.schema_version
            );
        }
        validate_authorizations(&snapshot.authorizations)
            .with_context(|| format!("invalid record snapshot {}", path.display()))?;
        Ok(Self {
            path: Some(path),
            state: Mutex::new(snapshot),
        })
    }

    pub fn snapshot(&self) -> RecordResult<RecordSnapshot> {
        Ok(self.lock()?.clone())
    }

    pub fn insert_authorization(&self, authorization: SlackAuthorization) -> RecordResult<()> {
        let mut state = self.lock()?;
        let mut candidate = state.authorizations.clone();
        candidate.push(authorization);
        validate_authorizations(&candidate)?;
        state.authorizations = candidate;
        self.persist(&state)
    }

    pub fn insert_agent(&self, agent: AgentUser) -> RecordResult<()> {
        let mut state = self.lock()?;
        state.agents.retain(|existing| existing.id != agent.id);
        state.agents.push(agent);
        self.persist(&state)
    }

    fn lock(&self) -> RecordResult<MutexGuard<'_, RecordSnapshot>> {
        self.state
            .lock()
            .map_err(|_| RecordStoreError::Backend("record store mutex is poisoned".to_string()))
    }

    fn persist(&self, state: &RecordSnapshot) -> RecordResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let mut payload = serde_json::to_string_pretty(state)
            .map_err(|error| RecordStoreError::Backend(error.to_string()))?;
        payload.push('\n');
        write_text_atomic(path, &payload)
            .map_err(|error| RecordStoreError::Backend(format!("{error:#}")))
    }
}

fn validate_authorizations(authorizations: &[SlackAuthorization]) -> RecordResult<()> {
    for (index, authorization) in authorizations.iter().enumerate() {
        for other in &authorizations[index + 1..] {
            if other.account_id != authorization.account_id {
                continue;
            }
            if authorization.is_primary() && other.is_primary() {
                return Err(RecordStoreError::AuthorizationConflict(format!(
                    "account {} holds more than one primary authorization",
                    authorization.account_id
                )));
            }
            if authorization.scope == AuthorizationScope::Support
                && other.scope == AuthorizationScope::Support
                && authorization.channel_id == other.channel_id
            {
                return Err(RecordStoreError::AuthorizationConflict(format!(
                    "account {} holds duplicate support authorizations for channel '{}'",
                    authorization.account_id, authorization.channel_id
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl AuthorizationRegistry for MemoryRecords {
    async fn find_authorization_by_channel(
        &self,
        channel_id: &str,
    ) -> RecordResult<Option<SlackAuthorization>> {
        if channel_id.trim().is_empty() {
            return Ok(None);
        }
        let state = self.lock()?;
        // A primary binding wins over a support binding on the same channel.
        let mut matches = state
            .authorizations
            .iter()
            .filter(|authorization| authorization.channel_id == channel_id)
            .collect::<Vec<_>>();
        matches.sort_by_key(|authorization| !authorization.is_primary());
        Ok(matches.first().map(|authorization| (*authorization).clone()))
    }

    async fn find_support_authorization(
        &self,
        account_id: &str,
        team_id: &str,
    ) -> RecordResult<Option<SlackAuthorization>> {
        let state = self.lock()?;
        Ok(state
            .authorizations
            .iter()
            .filter(|authorization| {
                authorization.account_id == account_id
                    && authorization.team_id == team_id
                    && authorization.scope == AuthorizationScope::Support
            })
            .min_by_key(|authorization| !authorization.is_workspace_install())
            .cloned())
    }

    async fn find_support_authorization_by_team(
        &self,
        team_id: &str,
    ) -> RecordResult<Option<SlackAuthorization>> {
        let state = self.lock()?;
        Ok(state
            .authorizations
            .iter()
            .filter(|authorization| {
                authorization.team_id == team_id
                    && authorization.scope == AuthorizationScope::Support
            })
            .min_by_key(|authorization| !authorization.is_workspace_install())
            .cloned())
    }
}

#[async_trait]
impl ThreadIndex for MemoryRecords {
    async fn find_thread(
        &self,
        account_id: &str,
        channel_id: &str,
        thread_ts: &str,
    ) -> RecordResult<Option<ConversationThread>> {
        let state = self.lock()?;
        Ok(state
            .threads
            .iter()
            .find(|thread| {
                thread.account_id == account_id
                    && thread.external_channel_id == channel_id
                    && thread.external_thread_id == thread_ts
            })
            .cloned())
    }

    async fn create_thread(
        &self,
        thread: NewConversationThread,
    ) -> RecordResult<ConversationThread> {
        let mut state = self.lock()?;
        if let Some(existing) = state.threads.iter().find(|existing| {
            existing.account_id == thread.account_id
                && existing.external_channel_id == thread.external_channel_id
                && existing.external_thread_id == thread.external_thread_id
        }) {
            return Err(RecordStoreError::DuplicateThread {
                existing: Box::new(existing.clone()),
            });
        }
        let created = ConversationThread {
            id: new_record_id(),
            account_id: thread.account_id,
            conversation_id: thread.conversation_id,
            external_channel_id: thread.external_channel_id,
            external_thread_id: thread.external_thread_id,
            inserted_at: Utc::now(),
        };
        state.threads.push(created.clone());
        self.persist(&state)?;
        Ok(created)
    }
}

#[async_trait]
impl InboxRecords for MemoryRecords {
    async fn find_agent_by_email(
        &self,
        account_id: &str,
        email: &str,
    ) -> RecordResult<Option<AgentUser>> {
        let state = self.lock()?;
        Ok(state
            .agents
            .iter()
            .find(|agent| agent.account_id == account_id && emails_match(&agent.email, email))
            .cloned())
    }

    async fn find_customer_by_email(
        &self,
        account_id: &str,
        email: &str,
    ) -> RecordResult<Option<Customer>> {
        let state = self.lock()?;
        Ok(state
            .customers
            .iter()
            .find(|customer| {
                customer.account_id == account_id && emails_match(&customer.email, email)
            })
            .cloned())
    }

    async fn get_customer(&self, customer_id: &str) -> RecordResult<Option<Customer>> {
        let state = self.lock()?;
        Ok(state
            .customers
            .iter()
            .find(|customer| customer.id == customer_id)
            .cloned())
    }

    async fn create_customer(&self, customer: NewCustomer) -> RecordResult<Customer> {
        let mut state = self.lock()?;
        if let Some(existing) = state.customers.iter().find(|existing| {
            existing.account_id == customer.account_id
                && emails_match(&existing.email, &customer.email)
        }) {
            return Err(RecordStoreError::DuplicateCustomer {
                existing: Box::new(existing.clone()),
            });
        }
        let created = Customer {
            id: new_record_id(),
            account_id: customer.account_id,
            email: customer.email.trim().to_string(),
            name: customer.name,
            time_zone: customer.time_zone,
            external_id: customer.external_id,
            company_id: None,
            inserted_at: Utc::now(),
        };
        state.customers.push(created.clone());
        self.persist(&state)?;
        Ok(created)
    }

    async fn set_customer_company(
        &self,
        customer_id: &str,
        company_id: &str,
    ) -> RecordResult<Customer> {
        let mut state = self.lock()?;
        if !state.companies.iter().any(|company| company.id == company_id) {
            return Err(not_found("company", company_id));
        }
        let customer = state
            .customers
            .iter_mut()
            .find(|customer| customer.id == customer_id)
            .ok_or_else(|| not_found("customer", customer_id))?;
        customer.company_id = Some(company_id.to_string());
        let updated = customer.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    async fn get_conversation(&self, conversation_id: &str) -> RecordResult<Option<Conversation>> {
        let state = self.lock()?;
        Ok(state
            .conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
            .cloned())
    }

    async fn create_conversation(
        &self,
        conversation: NewConversation,
    ) -> RecordResult<Conversation> {
        let mut state = self.lock()?;
        let created = Conversation {
            id: new_record_id(),
            account_id: conversation.account_id,
            customer_id: conversation.customer_id,
            assignee_id: None,
            source: conversation.source,
            read: false,
            inserted_at: Utc::now(),
        };
        state.conversations.push(created.clone());
        self.persist(&state)?;
        Ok(created)
    }

    async fn update_conversation(
        &self,
        conversation_id: &str,
        update: ConversationUpdate,
    ) -> RecordResult<Conversation> {
        let mut state = self.lock()?;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
            .ok_or_else(|| not_found("conversation", conversation_id))?;
        if let Some(assignee_id) = update.assignee_id {
            conversation.assignee_id = Some(assignee_id);
        }
        if let Some(read) = update.read {
            conversation.read = read;
        }
        let updated = conversation.clone();
        self.persist(&state)?;
        Ok(updated)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> RecordResult<()> {
        let mut state = self.lock()?;
        let before = state.conversations.len();
        state
            .conversations
            .retain(|conversation| conversation.id != conversation_id);
        if state.conversations.len() == before {
            return Err(not_found("conversation", conversation_id));
        }
        state
            .messages
            .retain(|message| message.conversation_id != conversation_id);
        self.persist(&state)
    }

    async fn create_message(&self, message: NewMessage) -> RecordResult<Message> {
        let mut state = self.lock()?;
        if !state
            .conversations
            .iter()
            .any(|conversation| conversation.id == message.conversation_id)
        {
            return Err(not_found("conversation", &message.conversation_id));
        }
        let created = Message {
            id: new_record_id(),
            account_id: message.account_id,
            conversation_id: message.conversation_id,
            customer_id: message.customer_id,
            user_id: message.user_id,
            body: message.body,
            source: message.source,
            inserted_at: Utc::now(),
        };
        state.messages.push(created.clone());
        self.persist(&state)?;
        Ok(created)
    }

    async fn list_messages(&self, account_id: &str) -> RecordResult<Vec<Message>> {
        let state = self.lock()?;
        Ok(state
            .messages
            .iter()
            .filter(|message| message.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn find_company_by_channel(
        &self,
        account_id: &str,
        channel_id: &str,
    ) -> RecordResult<Option<Company>> {
        if channel_id.trim().is_empty() {
            return Ok(None);
        }
        let state = self.lock()?;
        Ok(state
            .companies
            .iter()
            .find(|company| {
                company.account_id == account_id
                    && company.external_channel_id.as_deref() == Some(channel_id)
            })
            .cloned())
    }

    async fn list_companies_by_channel(&self, channel_id: &str) -> RecordResult<Vec<Company>> {
        if channel_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let state = self.lock()?;
        Ok(state
            .companies
            .iter()
            .filter(|company| company.external_channel_id.as_deref() == Some(channel_id))
            .cloned()
            .collect())
    }

    async fn create_company(&self, company: NewCompany) -> RecordResult<Company> {
        let mut state = self.lock()?;
        if let Some(channel_id) = company.external_channel_id.as_deref() {
            if let Some(existing) = state.companies.iter().find(|existing| {
                existing.account_id == company.account_id
                    && existing.external_channel_id.as_deref() == Some(channel_id)
            }) {
                return Err(RecordStoreError::DuplicateCompany {
                    existing: Box::new(existing.clone()),
                });
            }
        }
        let created = Company {
            id: new_record_id(),
            account_id: company.account_id,
            name: company.name,
            external_channel_id: company.external_channel_id,
            inserted_at: Utc::now(),
        };
        state.companies.push(created.clone());
        self.persist(&state)?;
        Ok(created)
    }

    async fn list_companies(&self, account_id: &str) -> RecordResult<Vec<Company>> {
        let state = self.lock()?;
        Ok(state
            .companies
            .iter()
            .filter(|company| company.account_id == account_id)
            .cloned()
            .collect())
    }
}
