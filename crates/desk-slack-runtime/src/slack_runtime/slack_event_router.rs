//! Routing decision and side-effect application for inbound Slack events.
//!
//! Routing happens in two steps. `classify_event` is a pure function from the
//! facts gathered about an event (scope, existing thread, parent authorship)
//! to a `RouteOutcome`. `SlackEventRouter::apply` then performs the outcome's
//! writes. Only the gathering and applying steps touch collaborators.

use std::sync::Arc;
use std::time::Duration;

use desk_records::{
    AuthorizationRegistry, Company, Conversation, ConversationThread, ConversationUpdate,
    Customer, InboxRecords, MessageSource, NewCompany, NewConversation, NewConversationThread,
    NewMessage, RecordStoreError, SlackAuthorization, ThreadIndex,
};

use super::slack_api_client::{SlackChatClient, SlackPostMessageRequest};
use super::slack_channel_scope::{
    ChannelScope, ChannelScopeQuery, ChannelScopeResolver, ResolvedChannel,
};
use super::slack_event_payload::{
    SlackEventEnvelope, SlackInboundEvent, SlackJoinEvent, SlackMessageEvent,
};
use super::slack_http_helpers::with_api_timeout;
use super::slack_identity::{Actor, IdentityResolver, SlackProfile};
use super::slack_inbound_error::SlackInboundError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates supported `IgnoreReason` values.
pub enum IgnoreReason {
    UnknownChannel,
    TeamMismatch,
    UnsupportedEvent,
    BotAuthored,
    PrimaryChannelChatter,
    PrimaryChannelJoin,
    HumanThreadReply,
    ParentUnavailable,
    AgentTopLevelPost,
    AlreadyMirrored,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownChannel => "unknown_channel",
            Self::TeamMismatch => "team_mismatch",
            Self::UnsupportedEvent => "unsupported_event",
            Self::BotAuthored => "bot_authored",
            Self::PrimaryChannelChatter => "primary_channel_chatter",
            Self::PrimaryChannelJoin => "primary_channel_join",
            Self::HumanThreadReply => "human_thread_reply",
            Self::ParentUnavailable => "parent_unavailable",
            Self::AgentTopLevelPost => "agent_top_level_post",
            Self::AlreadyMirrored => "already_mirrored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Authorship of the root message a reply points at.
pub enum ParentAuthorship {
    Bot,
    Human,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    AppendToThread { thread: ConversationThread },
    OriginateFromBotReply { thread_ts: String },
    OriginateDirect { thread_ts: String },
    IgnoreReply,
    CreateCompany,
    Ignore(IgnoreReason),
}

impl RouteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppendToThread { .. } => "append_to_thread",
            Self::OriginateFromBotReply { .. } => "originate_from_bot_reply",
            Self::OriginateDirect { .. } => "originate_direct",
            Self::IgnoreReply => "ignore_reply",
            Self::CreateCompany => "create_company",
            Self::Ignore(_) => "ignore",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouteFacts<'a> {
    pub event: &'a SlackInboundEvent,
    pub scope: &'a ChannelScope,
    pub bot_user_id: &'a str,
    pub thread: Option<&'a ConversationThread>,
    pub parent: Option<ParentAuthorship>,
}

/// True when the outcome depends on who authored the parent message of a reply.
pub fn requires_parent_lookup(
    event: &SlackInboundEvent,
    scope: &ChannelScope,
    bot_user_id: &str,
    thread: Option<&ConversationThread>,
) -> bool {
    let SlackInboundEvent::Message(message) = event else {
        return false;
    };
    !matches!(scope, ChannelScope::Primary)
        && thread.is_none()
        && message.is_reply()
        && !message.is_bot_authored(bot_user_id)
}

pub fn classify_event(facts: RouteFacts<'_>) -> RouteOutcome {
    let is_primary = matches!(facts.scope, ChannelScope::Primary);
    let message = match facts.event {
        SlackInboundEvent::Unrecognized { .. } => {
            return RouteOutcome::Ignore(IgnoreReason::UnsupportedEvent)
        }
        SlackInboundEvent::ChannelJoin(_) | SlackInboundEvent::GroupJoin(_) => {
            if is_primary {
                return RouteOutcome::Ignore(IgnoreReason::PrimaryChannelJoin);
            }
            return RouteOutcome::CreateCompany;
        }
        SlackInboundEvent::Message(message) => message,
    };

    if message.is_bot_authored(facts.bot_user_id) {
        return RouteOutcome::Ignore(IgnoreReason::BotAuthored);
    }
    if let Some(thread) = facts.thread {
        if message.is_reply() {
            return RouteOutcome::AppendToThread {
                thread: thread.clone(),
            };
        }
        return RouteOutcome::Ignore(IgnoreReason::AlreadyMirrored);
    }
    if is_primary {
        return RouteOutcome::Ignore(IgnoreReason::PrimaryChannelChatter);
    }
    if !message.is_reply() {
        return match message.ts.as_deref() {
            Some(ts) => RouteOutcome::OriginateDirect {
                thread_ts: ts.to_string(),
            },
            None => RouteOutcome::Ignore(IgnoreReason::UnsupportedEvent),
        };
    }
    match facts.parent {
        Some(ParentAuthorship::Bot) => RouteOutcome::OriginateFromBotReply {
            thread_ts: message.thread_key().to_string(),
        },
        Some(ParentAuthorship::Human) => RouteOutcome::IgnoreReply,
        Some(ParentAuthorship::Missing) | None => {
            RouteOutcome::Ignore(IgnoreReason::ParentUnavailable)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Side effects performed for one routed event.
pub enum RouteEffect {
    Appended {
        conversation_id: String,
        message_id: String,
        assigned: bool,
    },
    Originated {
        conversation_id: String,
        message_id: String,
        thread_ts: String,
    },
    CompanyBound {
        company_id: String,
        created: bool,
    },
    Ignored(IgnoreReason),
}

impl RouteEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appended { .. } => "appended",
            Self::Originated { .. } => "originated",
            Self::CompanyBound { .. } => "company_bound",
            Self::Ignored(_) => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct SlackEventRouterConfig {
    pub client: Arc<dyn SlackChatClient>,
    pub authorizations: Arc<dyn AuthorizationRegistry>,
    pub threads: Arc<dyn ThreadIndex>,
    pub records: Arc<dyn InboxRecords>,
    pub request_timeout: Duration,
    pub acknowledgement_text: Option<String>,
}

#[derive(Clone)]
pub struct SlackEventRouter {
    client: Arc<dyn SlackChatClient>,
    threads: Arc<dyn ThreadIndex>,
    records: Arc<dyn InboxRecords>,
    scope_resolver: ChannelScopeResolver,
    identity: IdentityResolver,
    request_timeout: Duration,
    acknowledgement_text: Option<String>,
}

impl SlackEventRouter {
    pub fn new(config: SlackEventRouterConfig) -> Self {
        let scope_resolver =
            ChannelScopeResolver::new(config.authorizations.clone(), config.records.clone());
        let identity = IdentityResolver::new(
            config.client.clone(),
            config.records.clone(),
            config.request_timeout,
        );
        Self {
            client: config.client,
            threads: config.threads,
            records: config.records,
            scope_resolver,
            identity,
            request_timeout: config.request_timeout,
            acknowledgement_text: config
                .acknowledgement_text
                .filter(|text| !text.trim().is_empty()),
        }
    }

    /// Resolves scope, gathers routing facts, classifies and applies one event.
    pub async fn route(
        &self,
        envelope: &SlackEventEnvelope,
    ) -> Result<RouteEffect, SlackInboundError> {
        let event = &envelope.event;
        let (Some(channel_id), Some(event_team_id)) = (event.channel_id(), event.team_id()) else {
            return Ok(RouteEffect::Ignored(IgnoreReason::UnsupportedEvent));
        };

        let query = ChannelScopeQuery {
            channel_id,
            event_team_id,
            is_ext_shared_channel: envelope.is_ext_shared_channel,
            shared_team_id: envelope.shared_team_id.as_deref(),
            allow_team_install: event.is_join(),
        };
        let resolved = match self.scope_resolver.resolve(&query).await {
            Ok(resolved) => resolved,
            Err(SlackInboundError::UnknownChannel { .. }) => {
                return Ok(RouteEffect::Ignored(IgnoreReason::UnknownChannel))
            }
            Err(SlackInboundError::TeamMismatch { .. }) => {
                return Ok(RouteEffect::Ignored(IgnoreReason::TeamMismatch))
            }
            Err(error) => return Err(error),
        };
        let authorization = &resolved.authorization;

        let thread = match event {
            SlackInboundEvent::Message(message)
                if !message.is_bot_authored(&authorization.bot_user_id) =>
            {
                self.threads
                    .find_thread(&authorization.account_id, channel_id, message.thread_key())
                    .await?
            }
            _ => None,
        };

        let mut prefetched_profile = None;
        let mut parent = None;
        if requires_parent_lookup(
            event,
            &resolved.scope,
            &authorization.bot_user_id,
            thread.as_ref(),
        ) {
            if let SlackInboundEvent::Message(message) = event {
                // Neither lookup writes, so the profile is fetched alongside the parent.
                let (parent_result, profile_result) = tokio::join!(
                    self.fetch_parent_authorship(authorization, message),
                    self.identity
                        .fetch_profile(&message.user_id, authorization),
                );
                parent = Some(parent_result?);
                prefetched_profile = Some(profile_result);
            }
        }

        let outcome = classify_event(RouteFacts {
            event,
            scope: &resolved.scope,
            bot_user_id: &authorization.bot_user_id,
            thread: thread.as_ref(),
            parent,
        });
        tracing::debug!(
            account_id = %authorization.account_id,
            channel_id,
            scope = resolved.scope.as_str(),
            outcome = outcome.as_str(),
            "classified slack event"
        );
        self.apply(outcome, &resolved, event, prefetched_profile)
            .await
    }

    pub async fn apply(
        &self,
        outcome: RouteOutcome,
        resolved: &ResolvedChannel,
        event: &SlackInboundEvent,
        prefetched_profile: Option<Result<SlackProfile, SlackInboundError>>,
    ) -> Result<RouteEffect, SlackInboundError> {
        match (outcome, event) {
            (RouteOutcome::Ignore(reason), _) => Ok(RouteEffect::Ignored(reason)),
            (RouteOutcome::IgnoreReply, _) => {
                Ok(RouteEffect::Ignored(IgnoreReason::HumanThreadReply))
            }
            (RouteOutcome::AppendToThread { thread }, SlackInboundEvent::Message(message)) => {
                let author = self
                    .resolve_author(resolved, message, prefetched_profile)
                    .await?;
                self.append_to_thread(resolved, &thread.conversation_id, message, author)
                    .await
            }
            (
                RouteOutcome::OriginateFromBotReply { thread_ts },
                SlackInboundEvent::Message(message),
            ) => {
                self.originate(resolved, message, thread_ts, true, prefetched_profile)
                    .await
            }
            (RouteOutcome::OriginateDirect { thread_ts }, SlackInboundEvent::Message(message)) => {
                self.originate(resolved, message, thread_ts, false, prefetched_profile)
                    .await
            }
            (
                RouteOutcome::CreateCompany,
                SlackInboundEvent::ChannelJoin(join) | SlackInboundEvent::GroupJoin(join),
            ) => self.bind_company(resolved, join).await,
            _ => Ok(RouteEffect::Ignored(IgnoreReason::UnsupportedEvent)),
        }
    }

    async fn fetch_parent_authorship(
        &self,
        authorization: &SlackAuthorization,
        message: &SlackMessageEvent,
    ) -> Result<ParentAuthorship, SlackInboundError> {
        let parent_ts = message.thread_key();
        let response = with_api_timeout(
            self.request_timeout,
            "conversations.history",
            self.client.retrieve_message(
                &authorization.access_token,
                &message.channel_id,
                parent_ts,
            ),
        )
        .await?;
        if !response.ok {
            return Err(SlackInboundError::api(
                "conversations.history",
                response.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        let parent = response
            .messages
            .iter()
            .find(|candidate| candidate.ts.as_deref() == Some(parent_ts))
            .or_else(|| response.messages.first());
        Ok(match parent {
            Some(parent) if parent.is_bot_authored() => ParentAuthorship::Bot,
            Some(_) => ParentAuthorship::Human,
            None => ParentAuthorship::Missing,
        })
    }

    async fn resolve_author(
        &self,
        resolved: &ResolvedChannel,
        message: &SlackMessageEvent,
        prefetched_profile: Option<Result<SlackProfile, SlackInboundError>>,
    ) -> Result<Actor, SlackInboundError> {
        match prefetched_profile {
            Some(profile) => {
                self.identity
                    .resolve_profile(&profile?, &resolved.authorization)
                    .await
            }
            None => {
                self.identity
                    .resolve_author(&message.user_id, &resolved.authorization)
                    .await
            }
        }
    }

    async fn append_to_thread(
        &self,
        resolved: &ResolvedChannel,
        conversation_id: &str,
        message: &SlackMessageEvent,
        author: Actor,
    ) -> Result<RouteEffect, SlackInboundError> {
        let account_id = resolved.authorization.account_id.as_str();
        let (customer_id, user_id) = match &author {
            Actor::Agent(agent) => (None, Some(agent.id.clone())),
            Actor::Customer(customer) => {
                self.attach_company(resolved, customer).await?;
                (Some(customer.id.clone()), None)
            }
            Actor::Bot => return Ok(RouteEffect::Ignored(IgnoreReason::BotAuthored)),
        };
        let created = self
            .records
            .create_message(NewMessage {
                account_id: account_id.to_string(),
                conversation_id: conversation_id.to_string(),
                customer_id,
                user_id,
                body: message.text.clone(),
                source: MessageSource::Slack,
            })
            .await?;

        let mut assigned = false;
        if let (ChannelScope::Primary, Actor::Agent(agent)) = (&resolved.scope, &author) {
            let conversation = self.records.get_conversation(conversation_id).await?;
            if conversation.is_some_and(|conversation| conversation.assignee_id.is_none()) {
                self.records
                    .update_conversation(
                        conversation_id,
                        ConversationUpdate {
                            assignee_id: Some(agent.id.clone()),
                            read: Some(true),
                        },
                    )
                    .await?;
                assigned = true;
            }
        }
        tracing::debug!(
            conversation_id,
            author = author.kind_label(),
            scope = resolved.scope.as_str(),
            assigned,
            "appended slack message to conversation"
        );
        Ok(RouteEffect::Appended {
            conversation_id: conversation_id.to_string(),
            message_id: created.id,
            assigned,
        })
    }

    async fn originate(
        &self,
        resolved: &ResolvedChannel,
        message: &SlackMessageEvent,
        thread_ts: String,
        from_bot_reply: bool,
        prefetched_profile: Option<Result<SlackProfile, SlackInboundError>>,
    ) -> Result<RouteEffect, SlackInboundError> {
        let author = self
            .resolve_author(resolved, message, prefetched_profile)
            .await?;
        tracing::debug!(
            channel_id = %message.channel_id,
            thread_ts = %thread_ts,
            author = author.kind_label(),
            from_bot_reply,
            "originating conversation from slack message"
        );
        let customer = match author {
            Actor::Customer(customer) => customer,
            Actor::Agent(_) => return Ok(RouteEffect::Ignored(IgnoreReason::AgentTopLevelPost)),
            Actor::Bot => return Ok(RouteEffect::Ignored(IgnoreReason::BotAuthored)),
        };
        self.attach_company(resolved, &customer).await?;

        let conversation = match self
            .open_conversation(resolved, &message.channel_id, &thread_ts, &customer)
            .await
        {
            Ok(conversation) => conversation,
            Err(SlackInboundError::DuplicateThreadRace { winner, .. }) => {
                tracing::debug!(
                    channel_id = %message.channel_id,
                    thread_ts = %thread_ts,
                    winner_conversation_id = %winner.conversation_id,
                    "thread created concurrently; using winning conversation"
                );
                if !from_bot_reply {
                    return Ok(RouteEffect::Ignored(IgnoreReason::AlreadyMirrored));
                }
                return self
                    .append_to_thread(
                        resolved,
                        &winner.conversation_id,
                        message,
                        Actor::Customer(customer),
                    )
                    .await;
            }
            Err(error) => return Err(error),
        };

        let created = self
            .records
            .create_message(NewMessage {
                account_id: resolved.authorization.account_id.clone(),
                conversation_id: conversation.id.clone(),
                customer_id: Some(customer.id.clone()),
                user_id: None,
                body: message.text.clone(),
                source: MessageSource::Slack,
            })
            .await?;
        self.send_acknowledgement(resolved, &message.channel_id, &thread_ts)
            .await;
        Ok(RouteEffect::Originated {
            conversation_id: conversation.id,
            message_id: created.id,
            thread_ts,
        })
    }

    /// Creates the conversation and claims its thread key, undoing the conversation when the key is taken.
    async fn open_conversation(
        &self,
        resolved: &ResolvedChannel,
        channel_id: &str,
        thread_ts: &str,
        customer: &Customer,
    ) -> Result<Conversation, SlackInboundError> {
        let account_id = resolved.authorization.account_id.as_str();
        let conversation = self
            .records
            .create_conversation(NewConversation {
                account_id: account_id.to_string(),
                customer_id: customer.id.clone(),
                source: MessageSource::Slack,
            })
            .await?;
        let claimed = self
            .threads
            .create_thread(NewConversationThread {
                account_id: account_id.to_string(),
                conversation_id: conversation.id.clone(),
                external_channel_id: channel_id.to_string(),
                external_thread_id: thread_ts.to_string(),
            })
            .await;
        match claimed {
            Ok(_) => Ok(conversation),
            Err(RecordStoreError::DuplicateThread { existing }) => {
                self.records.delete_conversation(&conversation.id).await?;
                Err(SlackInboundError::DuplicateThreadRace {
                    channel_id: channel_id.to_string(),
                    thread_ts: thread_ts.to_string(),
                    winner: existing,
                })
            }
            Err(error) => {
                if let Err(cleanup_error) = self.records.delete_conversation(&conversation.id).await
                {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        error = %cleanup_error,
                        "failed to remove conversation after thread create failure"
                    );
                }
                Err(error.into())
            }
        }
    }

    async fn attach_company(
        &self,
        resolved: &ResolvedChannel,
        customer: &Customer,
    ) -> Result<(), SlackInboundError> {
        let Some(company) = resolved.scope.company() else {
            return Ok(());
        };
        if customer.company_id.is_some() {
            return Ok(());
        }
        self.records
            .set_customer_company(&customer.id, &company.id)
            .await?;
        tracing::debug!(
            customer_id = %customer.id,
            company_id = %company.id,
            "associated customer with channel company"
        );
        Ok(())
    }

    async fn send_acknowledgement(
        &self,
        resolved: &ResolvedChannel,
        channel_id: &str,
        thread_ts: &str,
    ) {
        let Some(text) = self.acknowledgement_text.as_deref() else {
            return;
        };
        let request = SlackPostMessageRequest {
            channel: channel_id.to_string(),
            text: text.to_string(),
            thread_ts: Some(thread_ts.to_string()),
        };
        let result = with_api_timeout(
            self.request_timeout,
            "chat.postMessage",
            self.client
                .send_message(&resolved.authorization.access_token, &request),
        )
        .await;
        match result {
            Ok(Some(response)) if !response.ok => tracing::warn!(
                channel_id,
                thread_ts,
                error = response.error.as_deref().unwrap_or("unknown_error"),
                "slack acknowledgement rejected"
            ),
            Ok(_) => {}
            Err(error) => tracing::warn!(
                channel_id,
                thread_ts,
                error = %error,
                "slack acknowledgement failed"
            ),
        }
    }

    async fn bind_company(
        &self,
        resolved: &ResolvedChannel,
        join: &SlackJoinEvent,
    ) -> Result<RouteEffect, SlackInboundError> {
        let authorization = &resolved.authorization;
        let joiner = if join.user_id == authorization.bot_user_id {
            "bot"
        } else {
            "member"
        };
        if let Some(existing) = self.existing_company(authorization, &join.channel_id).await? {
            tracing::debug!(
                channel_id = %join.channel_id,
                company_id = %existing.id,
                joiner,
                "channel already bound to company"
            );
            return Ok(RouteEffect::CompanyBound {
                company_id: existing.id,
                created: false,
            });
        }

        let response = with_api_timeout(
            self.request_timeout,
            "conversations.info",
            self.client
                .retrieve_channel_info(&authorization.access_token, &join.channel_id),
        )
        .await?;
        if !response.ok {
            return Err(SlackInboundError::api(
                "conversations.info",
                response.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        let name = response
            .channel
            .map(|channel| channel.name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| join.channel_id.clone());

        let created = self
            .records
            .create_company(NewCompany {
                account_id: authorization.account_id.clone(),
                name,
                external_channel_id: Some(join.channel_id.clone()),
            })
            .await;
        let (company, created) = match created {
            Ok(company) => (company, true),
            Err(RecordStoreError::DuplicateCompany { existing }) => (*existing, false),
            Err(error) => return Err(error.into()),
        };
        tracing::debug!(
            channel_id = %join.channel_id,
            company_id = %company.id,
            joiner,
            inviter = join.inviter.as_deref().unwrap_or_default(),
            created,
            "bound channel to company"
        );
        Ok(RouteEffect::CompanyBound {
            company_id: company.id,
            created,
        })
    }

    async fn existing_company(
        &self,
        authorization: &SlackAuthorization,
        channel_id: &str,
    ) -> Result<Option<Company>, SlackInboundError> {
        Ok(self
            .records
            .find_company_by_channel(&authorization.account_id, channel_id)
            .await?)
    }
}
