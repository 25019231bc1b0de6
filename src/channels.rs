use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;
use crate::slack::{ChannelInfo, SlackClient, slack_ts_from_datetime};

#[derive(Debug, Default, PartialEq)]
pub struct ResolvedChannels {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

/// Channel and group ids start with C or G; everything else is a name.
fn looks_like_channel_id(token: &str) -> bool {
    token.starts_with('C') || token.starts_with('G')
}

/// Partition tokens into resolved channel ids and unresolvable tokens.
/// Id-shaped tokens are validated against the known channels, names are
/// matched exactly. Nothing is dropped silently: callers get the invalid
/// tokens back to warn about.
pub(crate) fn partition_channel_tokens(
    channels: &[ChannelInfo],
    tokens: &[String],
) -> ResolvedChannels {
    let mut resolved = ResolvedChannels::default();

    for token in tokens {
        if looks_like_channel_id(token) {
            if channels.iter().any(|c| &c.id == token) {
                resolved.valid.push(token.clone());
            } else {
                resolved.invalid.push(token.clone());
            }
        } else if let Some(channel) = channels.iter().find(|c| &c.name == token) {
            resolved.valid.push(channel.id.clone());
        } else {
            resolved.invalid.push(token.clone());
        }
    }

    resolved
}

pub async fn resolve_channel_ids(
    client: &mut SlackClient,
    tokens: &[String],
) -> Result<ResolvedChannels> {
    if tokens.is_empty() {
        return Ok(ResolvedChannels::default());
    }
    let channels = client.list_channels().await?;
    Ok(partition_channel_tokens(&channels, tokens))
}

/// Find the channels where the user posted inside the date range,
/// skipping the exclude list. A probe failure skips that channel and
/// detection continues with the rest.
pub async fn detect_active_channels(
    client: &mut SlackClient,
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    exclude: &[String],
) -> Result<Vec<String>> {
    let excluded = resolve_channel_ids(client, exclude).await?;
    if !excluded.invalid.is_empty() {
        warn!(tokens = ?excluded.invalid, "ignoring unresolved exclude channels");
    }

    let channels = client.list_channels().await?;
    info!(
        candidates = channels.len(),
        "detecting channels with user activity"
    );

    let oldest = slack_ts_from_datetime(start);
    let latest = slack_ts_from_datetime(end);

    let mut active = Vec::new();
    for channel in &channels {
        if excluded.valid.contains(&channel.id) {
            continue;
        }
        match client
            .find_user_messages(&channel.id, user_id, &oldest, &latest)
            .await
        {
            Ok(found) if !found.is_empty() => active.push(channel.id.clone()),
            Ok(_) => {}
            Err(e) => {
                warn!(channel = %channel.id, error = %e, "activity probe failed, skipping channel");
            }
        }
    }

    info!(active = active.len(), "channel detection complete");
    Ok(active)
}
