#![no_main]

use desk_slack_runtime::{parse_slack_webhook_payload, SlackInboundEvent, SlackWebhookPayload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Ok(payload) = parse_slack_webhook_payload(&raw) else {
        return;
    };
    match payload {
        SlackWebhookPayload::UrlVerification { .. } => {}
        SlackWebhookPayload::Unsupported { body_type } => {
            assert_ne!(body_type, "event_callback");
            assert_ne!(body_type, "url_verification");
        }
        SlackWebhookPayload::EventCallback(envelope) => {
            assert!(!envelope.delivery_key().trim().is_empty());
            assert!(!envelope.event.kind_label().is_empty());
            match &envelope.event {
                SlackInboundEvent::Message(message) => {
                    assert!(!message.channel_id.is_empty());
                    assert!(!message.thread_key().is_empty());
                    if message.is_reply() {
                        assert_eq!(Some(message.thread_key()), message.thread_ts.as_deref());
                    }
                }
                SlackInboundEvent::ChannelJoin(join) | SlackInboundEvent::GroupJoin(join) => {
                    assert!(envelope.event.is_join());
                    assert!(!join.channel_id.is_empty());
                }
                SlackInboundEvent::Unrecognized { .. } => {
                    assert!(envelope.event.channel_id().is_none());
                }
            }
        }
    }
});
