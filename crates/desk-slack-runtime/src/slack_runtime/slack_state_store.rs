use std::{
    collections::{HashSet, VecDeque},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use desk_core::{current_unix_timestamp_ms, write_text_atomic};
use serde::{Deserialize, Serialize};

use super::SLACK_INBOUND_STATE_SCHEMA_VERSION;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ClaimedDelivery {
    delivery_key: String,
    claimed_unix_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SlackInboundState {
    schema_version: u32,
    #[serde(default)]
    claimed_deliveries: VecDeque<ClaimedDelivery>,
}

/// Delivery keys already claimed by this runtime, oldest first, bounded by `cap`.
pub(super) struct SlackInboundStateStore {
    path: PathBuf,
    cap: usize,
    claimed: VecDeque<ClaimedDelivery>,
    claimed_keys: HashSet<String>,
}

impl SlackInboundStateStore {
    pub(super) fn load(path: PathBuf, cap: usize) -> Result<Self> {
        let cap = cap.max(1);
        let mut claimed = VecDeque::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read state file {}", path.display()))?;
            let state = serde_json::from_str::<SlackInboundState>(&raw).with_context(|| {
                format!("failed to parse slack inbound state file {}", path.display())
            })?;
            if state.schema_version != SLACK_INBOUND_STATE_SCHEMA_VERSION {
                bail!(
                    "unsupported slack inbound state schema: expected {}, found {}",
                    SLACK_INBOUND_STATE_SCHEMA_VERSION,
                    state.schema_version
                );
            }
            claimed = state.claimed_deliveries;
        }

        let mut store = Self {
            path,
            cap,
            claimed_keys: claimed
                .iter()
                .map(|delivery| delivery.delivery_key.clone())
                .collect(),
            claimed,
        };
        store.evict_past_cap();
        Ok(store)
    }

    #[cfg(test)]
    pub(super) fn is_claimed(&self, delivery_key: &str) -> bool {
        self.claimed_keys.contains(delivery_key)
    }

    /// Records the key; false when it was already claimed.
    pub(super) fn claim(&mut self, delivery_key: &str) -> bool {
        if !self.claimed_keys.insert(delivery_key.to_string()) {
            return false;
        }
        self.claimed.push_back(ClaimedDelivery {
            delivery_key: delivery_key.to_string(),
            claimed_unix_ms: current_unix_timestamp_ms(),
        });
        self.evict_past_cap();
        true
    }

    fn evict_past_cap(&mut self) {
        while self.claimed.len() > self.cap {
            if let Some(evicted) = self.claimed.pop_front() {
                self.claimed_keys.remove(&evicted.delivery_key);
            }
        }
    }

    pub(super) fn save(&self) -> Result<()> {
        let state = SlackInboundState {
            schema_version: SLACK_INBOUND_STATE_SCHEMA_VERSION,
            claimed_deliveries: self.claimed.clone(),
        };
        let mut payload =
            serde_json::to_string_pretty(&state).context("failed to serialize state")?;
        payload.push('\n');
        write_text_atomic(&self.path, &payload)
            .with_context(|| format!("failed to write state file {}", self.path.display()))
    }
}
