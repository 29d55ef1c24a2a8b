use std::sync::Arc;
use std::time::Duration;

use desk_records::{
    AgentUser, Customer, InboxRecords, NewCustomer, RecordStoreError, SlackAuthorization,
};

use super::slack_api_client::SlackChatClient;
use super::slack_http_helpers::with_api_timeout;
use super::slack_inbound_error::SlackInboundError;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Resolved author of an inbound event.
pub enum Actor {
    Agent(AgentUser),
    Customer(Customer),
    Bot,
}

impl Actor {
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Agent(_) => "agent",
            Self::Customer(_) => "customer",
            Self::Bot => "bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackProfile {
    pub user_id: String,
    pub email: String,
    pub real_name: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    client: Arc<dyn SlackChatClient>,
    records: Arc<dyn InboxRecords>,
    request_timeout: Duration,
}

impl IdentityResolver {
    pub fn new(
        client: Arc<dyn SlackChatClient>,
        records: Arc<dyn InboxRecords>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            records,
            request_timeout,
        }
    }

    pub async fn resolve_author(
        &self,
        user_id: &str,
        authorization: &SlackAuthorization,
    ) -> Result<Actor, SlackInboundError> {
        if user_id == authorization.bot_user_id {
            return Ok(Actor::Bot);
        }
        let profile = self.fetch_profile(user_id, authorization).await?;
        self.resolve_profile(&profile, authorization).await
    }

    /// Reads the Slack profile; performs no writes.
    pub async fn fetch_profile(
        &self,
        user_id: &str,
        authorization: &SlackAuthorization,
    ) -> Result<SlackProfile, SlackInboundError> {
        let response = with_api_timeout(
            self.request_timeout,
            "users.info",
            self.client
                .retrieve_user_info(&authorization.access_token, user_id),
        )
        .await?;
        if !response.ok {
            return Err(SlackInboundError::api(
                "users.info",
                response.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        let Some(user) = response.user else {
            return Err(SlackInboundError::IdentityResolutionFailure {
                user_id: user_id.to_string(),
                reason: "users.info returned no user".to_string(),
            });
        };
        let email = user
            .profile
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SlackInboundError::IdentityResolutionFailure {
                user_id: user_id.to_string(),
                reason: "profile has no email".to_string(),
            })?;
        let real_name = user
            .real_name
            .or(user.profile.real_name)
            .or(user.profile.display_name)
            .filter(|name| !name.trim().is_empty());
        Ok(SlackProfile {
            user_id: user_id.to_string(),
            email,
            real_name,
            time_zone: user.tz.filter(|tz| !tz.trim().is_empty()),
        })
    }

    /// Maps a fetched profile to an agent, or finds-or-creates the matching customer.
    pub async fn resolve_profile(
        &self,
        profile: &SlackProfile,
        authorization: &SlackAuthorization,
    ) -> Result<Actor, SlackInboundError> {
        let account_id = authorization.account_id.as_str();
        if let Some(agent) = self
            .records
            .find_agent_by_email(account_id, &profile.email)
            .await?
        {
            return Ok(Actor::Agent(agent));
        }
        if let Some(customer) = self
            .records
            .find_customer_by_email(account_id, &profile.email)
            .await?
        {
            return Ok(Actor::Customer(customer));
        }

        let created = self
            .records
            .create_customer(NewCustomer {
                account_id: account_id.to_string(),
                email: profile.email.clone(),
                name: profile.real_name.clone(),
                time_zone: profile.time_zone.clone(),
                external_id: Some(profile.user_id.clone()),
            })
            .await;
        match created {
            Ok(customer) => {
                tracing::debug!(
                    account_id,
                    customer_id = %customer.id,
                    slack_user_id = %profile.user_id,
                    "created customer from slack profile"
                );
                Ok(Actor::Customer(customer))
            }
            Err(RecordStoreError::DuplicateCustomer { existing }) => {
                Ok(Actor::Customer(*existing))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use desk_records::{
        AgentUser, AuthorizationScope, InboxRecords, MemoryRecords, NewCustomer,
        SlackAuthorization,
    };

    use super::{Actor, IdentityResolver};
    use crate::slack_runtime::slack_inbound_error::SlackInboundError;
    use crate::slack_runtime::tests::FakeSlackClient;

    fn authorization() -> SlackAuthorization {
        SlackAuthorization {
            account_id: "acct-1".to_string(),
            team_id: "T1".to_string(),
            channel_id: "CSUPPORT".to_string(),
            bot_user_id: "UBOT".to_string(),
            authed_user_id: "UAGENT".to_string(),
            access_token: "xoxb-test".to_string(),
            scope: AuthorizationScope::Support,
        }
    }

    fn resolver(client: &Arc<FakeSlackClient>, records: &Arc<MemoryRecords>) -> IdentityResolver {
        IdentityResolver::new(client.clone(), records.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn unit_bot_user_resolves_without_api_call() {
        let client = Arc::new(FakeSlackClient::default());
        let records = Arc::new(MemoryRecords::new());
        let actor = resolver(&client, &records)
            .resolve_author("UBOT", &authorization())
            .await
            .expect("bot");
        assert_eq!(actor, Actor::Bot);
        assert_eq!(client.user_info_calls(), 0);
    }

    #[tokio::test]
    async fn functional_agent_email_matches_case_insensitively() {
        let client = Arc::new(FakeSlackClient::default());
        client.add_user("UAGENT", "Agent@Example.com", "Agent Smith");
        let records = Arc::new(MemoryRecords::new());
        records
            .insert_agent(AgentUser {
                id: "agent-1".to_string(),
                account_id: "acct-1".to_string(),
                email: "agent@example.com".to_string(),
                display_name: None,
            })
            .expect("agent");

        let actor = resolver(&client, &records)
            .resolve_author("UAGENT", &authorization())
            .await
            .expect("agent");
        assert_eq!(actor.kind_label(), "agent");
    }

    #[tokio::test]
    async fn functional_unknown_email_creates_customer_once() {
        let client = Arc::new(FakeSlackClient::default());
        client.add_user("UCUST", "casey@example.com", "Casey");
        let records = Arc::new(MemoryRecords::new());
        let identity = resolver(&client, &records);

        let first = identity
            .resolve_author("UCUST", &authorization())
            .await
            .expect("first");
        let second = identity
            .resolve_author("UCUST", &authorization())
            .await
            .expect("second");
        let (Actor::Customer(first), Actor::Customer(second)) = (first, second) else {
            panic!("expected customers");
        };
        assert_eq!(first.id, second.id);
        assert_eq!(first.name.as_deref(), Some("Casey"));
        assert_eq!(first.external_id.as_deref(), Some("UCUST"));
        assert_eq!(first.time_zone.as_deref(), Some("America/New_York"));
    }

    #[tokio::test]
    async fn functional_existing_customer_is_reused() {
        let client = Arc::new(FakeSlackClient::default());
        client.add_user("UCUST", "CASEY@example.com", "Casey");
        let records = Arc::new(MemoryRecords::new());
        let existing = records
            .create_customer(NewCustomer {
                account_id: "acct-1".to_string(),
                email: "casey@example.com".to_string(),
                name: None,
                time_zone: None,
                external_id: None,
            })
            .await
            .expect("customer");

        let actor = resolver(&client, &records)
            .resolve_author("UCUST", &authorization())
            .await
            .expect("customer");
        assert_eq!(actor, Actor::Customer(existing));
    }

    #[tokio::test]
    async fn regression_missing_email_and_api_errors_fail_resolution() {
        let client = Arc::new(FakeSlackClient::default());
        client.add_user("UNOEMAIL", "", "No Email");
        let records = Arc::new(MemoryRecords::new());
        let identity = resolver(&client, &records);

        let missing_email = identity
            .resolve_author("UNOEMAIL", &authorization())
            .await
            .expect_err("no email");
        assert!(matches!(
            missing_email,
            SlackInboundError::IdentityResolutionFailure { .. }
        ));

        let unknown_user = identity
            .resolve_author("UMISSING", &authorization())
            .await
            .expect_err("unknown user");
        assert!(matches!(
            unknown_user,
            SlackInboundError::ExternalApiFailure { operation: "users.info", .. }
        ));
    }
}
