//! Slack inbound event resolution runtime for the support inbox.
//!
//! Turns raw Slack Events API webhooks into conversation, message and company
//! side effects: channel scope resolution, author identity resolution, thread
//! continuity and an explicit routing decision per event.

pub mod slack_runtime;

pub use slack_runtime::*;
