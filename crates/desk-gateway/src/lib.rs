//! HTTP gateway for the support inbox Slack integration.
//!
//! Exposes the Slack Events API webhook and a health probe over axum, handing
//! every webhook body to `SlackInboundRuntime`.

pub mod slack_webhook_server;

pub use slack_webhook_server::*;
