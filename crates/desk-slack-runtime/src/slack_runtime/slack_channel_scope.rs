//! Channel scope resolution: which authorization governs an event's channel and
//! how that channel is classified for routing.

use std::sync::Arc;

use desk_records::{AuthorizationRegistry, Company, InboxRecords, SlackAuthorization};

use super::slack_inbound_error::SlackInboundError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `ChannelScope` values.
pub enum ChannelScope {
    Primary,
    Support,
    PrivateCompany(Company),
}

impl ChannelScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Support => "support",
            Self::PrivateCompany(_) => "private_company",
        }
    }

    pub fn company(&self) -> Option<&Company> {
        match self {
            Self::PrivateCompany(company) => Some(company),
            Self::Primary | Self::Support => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub authorization: SlackAuthorization,
    pub scope: ChannelScope,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelScopeQuery<'a> {
    pub channel_id: &'a str,
    pub event_team_id: &'a str,
    pub is_ext_shared_channel: bool,
    pub shared_team_id: Option<&'a str>,
    /// Joins may be governed by a team-wide install when the channel itself is unbound.
    pub allow_team_install: bool,
}

impl ChannelScopeQuery<'_> {
    /// Team validated against the authorization.
    ///
    /// Externally shared channels are validated only against the shared `team_id`; when it
    /// is absent there is no team to trust and the event cannot match any authorization.
    pub fn effective_team_id(&self) -> Option<&str> {
        let team_id = if self.is_ext_shared_channel {
            self.shared_team_id?
        } else {
            self.event_team_id
        };
        Some(team_id).filter(|team_id| !team_id.trim().is_empty())
    }
}

#[derive(Clone)]
pub struct ChannelScopeResolver {
    authorizations: Arc<dyn AuthorizationRegistry>,
    records: Arc<dyn InboxRecords>,
}

impl ChannelScopeResolver {
    pub fn new(
        authorizations: Arc<dyn AuthorizationRegistry>,
        records: Arc<dyn InboxRecords>,
    ) -> Self {
        Self {
            authorizations,
            records,
        }
    }

    pub async fn resolve(
        &self,
        query: &ChannelScopeQuery<'_>,
    ) -> Result<ResolvedChannel, SlackInboundError> {
        let effective_team_id = query.effective_team_id();

        let mut authorization = self
            .authorizations
            .find_authorization_by_channel(query.channel_id)
            .await?;
        if authorization.is_none() {
            authorization = self
                .bound_company_authorization(query.channel_id, effective_team_id)
                .await?;
        }
        if authorization.is_none() && query.allow_team_install {
            if let Some(team_id) = effective_team_id {
                authorization = self
                    .authorizations
                    .find_support_authorization_by_team(team_id)
                    .await?;
            }
        }
        let Some(authorization) = authorization else {
            return Err(SlackInboundError::UnknownChannel {
                channel_id: query.channel_id.to_string(),
            });
        };

        if effective_team_id != Some(authorization.team_id.as_str()) {
            return Err(SlackInboundError::TeamMismatch {
                event_team: effective_team_id.unwrap_or_default().to_string(),
                authorization_team: authorization.team_id.clone(),
            });
        }

        let bound_company = self
            .records
            .find_company_by_channel(&authorization.account_id, query.channel_id)
            .await?;
        let scope = classify_channel(&authorization, query.channel_id, bound_company).ok_or_else(
            || SlackInboundError::UnknownChannel {
                channel_id: query.channel_id.to_string(),
            },
        )?;
        Ok(ResolvedChannel {
            authorization,
            scope,
        })
    }

    /// Support authorization of the first account whose company is bound to the channel
    /// and which is installed in the effective team.
    async fn bound_company_authorization(
        &self,
        channel_id: &str,
        team_id: Option<&str>,
    ) -> Result<Option<SlackAuthorization>, SlackInboundError> {
        let Some(team_id) = team_id else {
            return Ok(None);
        };
        for company in self.records.list_companies_by_channel(channel_id).await? {
            if let Some(authorization) = self
                .authorizations
                .find_support_authorization(&company.account_id, team_id)
                .await?
            {
                return Ok(Some(authorization));
            }
        }
        Ok(None)
    }
}

fn classify_channel(
    authorization: &SlackAuthorization,
    channel_id: &str,
    bound_company: Option<Company>,
) -> Option<ChannelScope> {
    if authorization.is_primary() && authorization.channel_id == channel_id {
        return Some(ChannelScope::Primary);
    }
    if let Some(company) = bound_company {
        return Some(ChannelScope::PrivateCompany(company));
    }
    if !authorization.is_primary() {
        return Some(ChannelScope::Support);
    }
    None
}
