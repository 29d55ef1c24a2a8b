use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use desk_gateway::{build_gateway_router, SLACK_WEBHOOK_ENDPOINT};
use desk_records::{
    AgentUser, AuthorizationScope, MemoryRecords, RecordSnapshot, SlackAuthorization,
};
use desk_slack_runtime::{SlackApiClient, SlackInboundRuntime, SlackInboundRuntimeConfig};
use httpmock::prelude::*;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const ACCOUNT_ID: &str = "acct-1";
const PRIMARY_CHANNEL: &str = "CPRIMARY";
const SUPPORT_CHANNEL: &str = "CACME";

struct RunningGateway {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl RunningGateway {
    async fn post(&self, body: Value) -> Value {
        let response = reqwest::Client::new()
            .post(format!("http://{}{SLACK_WEBHOOK_ENDPOINT}", self.addr))
            .json(&body)
            .send()
            .await
            .expect("post webhook");
        assert_eq!(response.status().as_u16(), 200);
        response.json::<Value>().await.expect("json response")
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn write_seed_snapshot(path: &Path) {
    let snapshot = RecordSnapshot {
        authorizations: vec![
            SlackAuthorization {
                account_id: ACCOUNT_ID.to_string(),
                team_id: "T1".to_string(),
                channel_id: PRIMARY_CHANNEL.to_string(),
                bot_user_id: "UBOT".to_string(),
                authed_user_id: "UAGENT".to_string(),
                access_token: "xoxb-primary".to_string(),
                scope: AuthorizationScope::Primary,
            },
            SlackAuthorization {
                account_id: ACCOUNT_ID.to_string(),
                team_id: "T1".to_string(),
                channel_id: String::new(),
                bot_user_id: "UBOT".to_string(),
                authed_user_id: "UAGENT".to_string(),
                access_token: "xoxb-support".to_string(),
                scope: AuthorizationScope::Support,
            },
        ],
        agents: vec![AgentUser {
            id: "agent-1".to_string(),
            account_id: ACCOUNT_ID.to_string(),
            email: "agent@example.com".to_string(),
            display_name: Some("Agent".to_string()),
        }],
        ..RecordSnapshot::default()
    };
    std::fs::write(
        path,
        serde_json::to_string_pretty(&snapshot).expect("encode snapshot"),
    )
    .expect("write snapshot");
}

async fn start_gateway(
    api_base: String,
    records_path: PathBuf,
    state_dir: PathBuf,
) -> (RunningGateway, Arc<MemoryRecords>) {
    let records = Arc::new(MemoryRecords::load(records_path).expect("load records"));
    let client = SlackApiClient::new(api_base, 2_000, 1, 1).expect("slack client");
    let runtime = SlackInboundRuntime::new(SlackInboundRuntimeConfig {
        client: Arc::new(client),
        authorizations: records.clone(),
        threads: records.clone(),
        records: records.clone(),
        state_dir,
        request_timeout_ms: 2_000,
        processed_event_cap: 128,
        acknowledgement_text: Some("Thanks! An agent will reply here.".to_string()),
    })
    .expect("runtime");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = build_gateway_router(Arc::new(runtime));
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    (RunningGateway { addr, handle }, records)
}

fn callback(event_id: &str, event: Value) -> Value {
    json!({
        "type": "event_callback",
        "team_id": "T1",
        "event_id": event_id,
        "event": event,
    })
}

#[tokio::test]
async fn integration_company_channel_conversation_lifecycle_survives_restart() {
    let slack = MockServer::start();
    let channel_info = slack.mock(|when, then| {
        when.method(GET)
            .path("/conversations.info")
            .query_param("channel", SUPPORT_CHANNEL)
            .header("authorization", "Bearer xoxb-support");
        then.status(200)
            .json_body(json!({"ok": true, "channel": {"id": SUPPORT_CHANNEL, "name": "acme-support"}}));
    });
    let parent = slack.mock(|when, then| {
        when.method(GET)
            .path("/conversations.history")
            .query_param("channel", SUPPORT_CHANNEL)
            .query_param("latest", "100.1");
        then.status(200).json_body(json!({
            "ok": true,
            "messages": [{"ts": "100.1", "text": "Need help? Reply here.", "bot_id": "B1"}]
        }));
    });
    slack.mock(|when, then| {
        when.method(GET).path("/users.info").query_param("user", "UCUST");
        then.status(200).json_body(json!({
            "ok": true,
            "user": {"id": "UCUST", "real_name": "Casey", "tz": "Europe/Paris", "profile": {"email": "casey@acme.test"}}
        }));
    });
    slack.mock(|when, then| {
        when.method(GET).path("/users.info").query_param("user", "UAGENT");
        then.status(200).json_body(json!({
            "ok": true,
            "user": {"id": "UAGENT", "real_name": "Agent", "profile": {"email": "AGENT@example.com"}}
        }));
    });
    let ack = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .json_body(json!({
                "channel": SUPPORT_CHANNEL,
                "text": "Thanks! An agent will reply here.",
                "thread_ts": "100.1"
            }));
        then.status(200)
            .json_body(json!({"ok": true, "channel": SUPPORT_CHANNEL, "ts": "100.9"}));
    });

    let temp = tempfile::tempdir().expect("tempdir");
    let records_path = temp.path().join("records.json");
    let state_dir = temp.path().join("state");
    write_seed_snapshot(&records_path);

    let (gateway, records) =
        start_gateway(slack.base_url(), records_path.clone(), state_dir.clone()).await;

    // Bot joins the customer channel: company bound through the team-wide install.
    let response = gateway
        .post(callback(
            "Ev1",
            json!({"type": "message", "subtype": "channel_join", "channel": SUPPORT_CHANNEL, "team": "T1", "user": "UBOT", "ts": "50.0"}),
        ))
        .await;
    assert_eq!(response, json!({"ok": true}));

    // Customer answers the bot prompt: new conversation linked to the company.
    gateway
        .post(callback(
            "Ev2",
            json!({"type": "message", "text": "Our invoices are wrong", "channel": SUPPORT_CHANNEL, "team": "T1", "user": "UCUST", "ts": "101.1", "thread_ts": "100.1"}),
        ))
        .await;
    // Same delivery again is suppressed.
    gateway
        .post(callback(
            "Ev2",
            json!({"type": "message", "text": "Our invoices are wrong", "channel": SUPPORT_CHANNEL, "team": "T1", "user": "UCUST", "ts": "101.1", "thread_ts": "100.1"}),
        ))
        .await;
    // Agent follows up in the same thread.
    gateway
        .post(callback(
            "Ev3",
            json!({"type": "message", "text": "Looking into it", "channel": SUPPORT_CHANNEL, "team": "T1", "user": "UAGENT", "ts": "102.1", "thread_ts": "100.1"}),
        ))
        .await;

    let snapshot = records.snapshot().expect("snapshot");
    assert_eq!(snapshot.companies.len(), 1);
    assert_eq!(snapshot.companies[0].name, "acme-support");
    assert_eq!(snapshot.conversations.len(), 1);
    assert_eq!(snapshot.threads.len(), 1);
    assert_eq!(snapshot.threads[0].external_thread_id, "100.1");
    let bodies = snapshot
        .messages
        .iter()
        .map(|message| message.body.as_str())
        .collect::<Vec<_>>();
    assert_eq!(bodies, vec!["Our invoices are wrong", "Looking into it"]);
    assert_eq!(snapshot.messages[1].user_id.as_deref(), Some("agent-1"));
    assert_eq!(snapshot.customers.len(), 1);
    assert_eq!(
        snapshot.customers[0].company_id.as_deref(),
        Some(snapshot.companies[0].id.as_str())
    );
    assert_eq!(channel_info.calls(), 1);
    assert_eq!(parent.calls(), 1);
    assert_eq!(ack.calls(), 1);
    drop(gateway);

    // A fresh process sees the persisted records and processed deliveries.
    let (restarted, reloaded) = start_gateway(slack.base_url(), records_path, state_dir).await;
    restarted
        .post(callback(
            "Ev3",
            json!({"type": "message", "text": "Looking into it", "channel": SUPPORT_CHANNEL, "team": "T1", "user": "UAGENT", "ts": "102.1", "thread_ts": "100.1"}),
        ))
        .await;
    let reloaded_snapshot = reloaded.snapshot().expect("snapshot");
    assert_eq!(reloaded_snapshot.messages.len(), 2);
    assert_eq!(reloaded_snapshot.conversations.len(), 1);
}

#[tokio::test]
async fn integration_primary_channel_reply_assigns_agent_and_ignores_chatter() {
    let slack = MockServer::start();
    slack.mock(|when, then| {
        when.method(GET).path("/users.info").query_param("user", "UAGENT");
        then.status(200).json_body(json!({
            "ok": true,
            "user": {"id": "UAGENT", "profile": {"email": "agent@example.com"}}
        }));
    });

    let temp = tempfile::tempdir().expect("tempdir");
    let records_path = temp.path().join("records.json");
    write_seed_snapshot(&records_path);
    let (gateway, records) = start_gateway(
        slack.base_url(),
        records_path,
        temp.path().join("state"),
    )
    .await;

    // Seed a conversation mirrored into the primary channel.
    {
        use desk_records::{
            InboxRecords, MessageSource, NewConversation, NewConversationThread, NewCustomer,
            ThreadIndex,
        };
        let customer = records
            .create_customer(NewCustomer {
                account_id: ACCOUNT_ID.to_string(),
                email: "casey@acme.test".to_string(),
                name: None,
                time_zone: None,
                external_id: None,
            })
            .await
            .expect("customer");
        let conversation = records
            .create_conversation(NewConversation {
                account_id: ACCOUNT_ID.to_string(),
                customer_id: customer.id,
                source: MessageSource::Chat,
            })
            .await
            .expect("conversation");
        records
            .create_thread(NewConversationThread {
                account_id: ACCOUNT_ID.to_string(),
                conversation_id: conversation.id,
                external_channel_id: PRIMARY_CHANNEL.to_string(),
                external_thread_id: "500.1".to_string(),
            })
            .await
            .expect("thread");
    }

    gateway
        .post(callback(
            "EvChatter",
            json!({"type": "message", "text": "lunch?", "channel": PRIMARY_CHANNEL, "team": "T1", "user": "UAGENT", "ts": "600.1"}),
        ))
        .await;
    gateway
        .post(callback(
            "EvReply",
            json!({"type": "message", "text": "On it", "channel": PRIMARY_CHANNEL, "team": "T1", "user": "UAGENT", "ts": "600.2", "thread_ts": "500.1"}),
        ))
        .await;

    let snapshot = records.snapshot().expect("snapshot");
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].body, "On it");
    assert_eq!(
        snapshot.conversations[0].assignee_id.as_deref(),
        Some("agent-1")
    );
    assert!(snapshot.conversations[0].read);
}
