use std::net::SocketAddr;

use anyhow::{bail, Result};

use crate::Cli;

/// Rejects flag combinations that parse but cannot run.
pub fn validate_cli(cli: &Cli) -> Result<()> {
    if cli.gateway_bind.parse::<SocketAddr>().is_err() {
        bail!(
            "--gateway-bind must be a socket address like 127.0.0.1:8787, got '{}'",
            cli.gateway_bind
        );
    }

    let api_base = cli.slack_api_base.trim();
    if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
        bail!("--slack-api-base must be an http(s) URL, got '{api_base}'");
    }

    if cli.state_dir.as_os_str().is_empty() {
        bail!("--state-dir cannot be empty");
    }
    if cli.records_path.as_os_str().is_empty() {
        bail!("--records-path cannot be empty");
    }
    if cli.records_path.is_dir() {
        bail!(
            "--records-path '{}' points to a directory; expected a snapshot file",
            cli.records_path.display()
        );
    }

    if cli
        .slack_acknowledgement_text
        .as_deref()
        .is_some_and(|text| text.trim().is_empty())
    {
        bail!("--slack-acknowledgement-text cannot be blank when provided");
    }
    Ok(())
}
