use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::slack::{Message, SlackClient, slack_ts_from_datetime};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageWithContext {
    pub message: Message,
    pub context: Vec<Message>,
    pub channel_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionSummary {
    pub total_matches: usize,
    pub total_channels: usize,
    pub channels_processed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub period: Period,
    pub target_user: String,
    pub matches: Vec<MessageWithContext>,
    pub summary: ExtractionSummary,
    pub display_names: BTreeMap<String, String>,
    pub context_window: usize,
}

/// Walk the given channels in order and collect every message of
/// `user_id` together with its surrounding context.
///
/// Channels are processed one at a time; a history or thread fetch failure
/// aborts the run, since a partially fetched timeline would produce wrong
/// context windows. Channels without any match are inspected but left out
/// of the processed-channel summary.
pub async fn extract_user_messages(
    client: &mut SlackClient,
    channel_ids: &[String],
    user_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    context_window: usize,
) -> Result<ExtractionResult> {
    let oldest = slack_ts_from_datetime(start);
    let latest = slack_ts_from_datetime(end);

    let mut matches = Vec::new();
    let mut channels_processed = Vec::new();

    info!(
        channels = channel_ids.len(),
        user = user_id,
        "starting message extraction"
    );

    for channel_id in channel_ids {
        let timeline = fetch_channel_timeline(client, channel_id, &oldest, &latest).await?;
        let channel_matches = windows_for_user(&timeline, user_id, context_window);
        debug!(
            channel = %channel_id,
            total = timeline.len(),
            matched = channel_matches.len(),
            "channel processed"
        );
        if channel_matches.is_empty() {
            continue;
        }

        let channel_name = client.get_channel_info(channel_id).await.name;
        channels_processed.push(channel_name.clone());
        matches.extend(
            channel_matches
                .into_iter()
                .map(|(message, context)| MessageWithContext {
                    message,
                    context,
                    channel_name: channel_name.clone(),
                }),
        );
    }

    let display_names = resolve_display_names(client, &matches, user_id).await;

    let summary = ExtractionSummary {
        total_matches: matches.len(),
        total_channels: channels_processed.len(),
        channels_processed,
    };
    info!(
        matches = summary.total_matches,
        channels = summary.total_channels,
        "extraction complete"
    );

    Ok(ExtractionResult {
        period: Period { start, end },
        target_user: user_id.to_string(),
        matches,
        summary,
        display_names,
        context_window,
    })
}

/// One channel's unified timeline: history merged with the replies of every
/// thread referenced in it.
async fn fetch_channel_timeline(
    client: &SlackClient,
    channel_id: &str,
    oldest: &str,
    latest: &str,
) -> Result<Vec<Message>> {
    let base = client.get_history(channel_id, oldest, latest).await?;
    let roots = collect_thread_roots(&base);

    let mut replies = Vec::new();
    for root in &roots {
        replies.extend(
            client
                .get_thread_replies(channel_id, root, oldest, latest)
                .await?,
        );
    }

    Ok(merge_by_ts(base, replies))
}

/// Thread roots referenced by a page of messages, in first-seen order.
///
/// A message contributes a root when it carries a thread reference, when it
/// has replies but no thread reference of its own, or when its thread
/// reference is its own ts. The checks run in that order and are inclusive:
/// a message can satisfy more than one.
pub(crate) fn collect_thread_roots(messages: &[Message]) -> Vec<String> {
    let mut roots = Vec::new();
    let mut seen = HashSet::new();

    for m in messages {
        if let Some(thread_ts) = &m.thread_ts
            && seen.insert(thread_ts.clone())
        {
            roots.push(thread_ts.clone());
        }
        if m.thread_ts.is_none()
            && m.reply_count.is_some_and(|count| count > 0)
            && seen.insert(m.ts.clone())
        {
            roots.push(m.ts.clone());
        }
        if m.thread_ts.as_deref() == Some(m.ts.as_str()) && seen.insert(m.ts.clone()) {
            roots.push(m.ts.clone());
        }
    }

    roots
}

/// Merge history and replies into one timeline keyed by ts. A root shows up
/// both in history and in its own reply fetch; the later write wins. The
/// result is sorted ascending by numeric ts.
pub(crate) fn merge_by_ts(base: Vec<Message>, replies: Vec<Message>) -> Vec<Message> {
    let mut by_ts: HashMap<String, Message> = HashMap::new();
    for m in base.into_iter().chain(replies) {
        by_ts.insert(m.ts.clone(), m);
    }

    let mut timeline: Vec<Message> = by_ts.into_values().collect();
    timeline.sort_by(|a, b| a.ts_value().total_cmp(&b.ts_value()));
    timeline
}

/// All messages of `user_id` in the timeline, paired with their context
/// windows, in timeline order. Subtype-bearing messages never match.
pub(crate) fn windows_for_user(
    timeline: &[Message],
    user_id: &str,
    window: usize,
) -> Vec<(Message, Vec<Message>)> {
    timeline
        .iter()
        .filter(|m| m.user.as_deref() == Some(user_id) && m.subtype.is_none())
        .map(|m| (m.clone(), context_window(timeline, m, window)))
        .collect()
}

/// Context around one matched message, excluding the message itself.
///
/// A match inside a thread is windowed over that thread only (the root plus
/// its replies); a top-level match is windowed over the whole channel
/// timeline. When the thread's root predates the queried range the window
/// covers just the fetched thread messages.
pub(crate) fn context_window(timeline: &[Message], target: &Message, window: usize) -> Vec<Message> {
    match target.thread_ts.as_deref() {
        Some(root) => {
            let thread: Vec<&Message> = timeline
                .iter()
                .filter(|m| m.thread_ts.as_deref() == Some(root) || m.ts == root)
                .collect();
            window_around(&thread, &target.ts, window)
        }
        None => {
            let all: Vec<&Message> = timeline.iter().collect();
            window_around(&all, &target.ts, window)
        }
    }
}

/// Up to `window` entries on each side of the target within `sequence`,
/// clamped at the boundaries, target excluded.
fn window_around(sequence: &[&Message], target_ts: &str, window: usize) -> Vec<Message> {
    let Some(idx) = sequence.iter().position(|m| m.ts == target_ts) else {
        return Vec::new();
    };
    let start = idx.saturating_sub(window);
    let end = (idx + window + 1).min(sequence.len());

    sequence
        .iter()
        .skip(start)
        .take(end - start)
        .filter(|m| m.ts != target_ts)
        .map(|m| (**m).clone())
        .collect()
}

/// Resolve a display name for every author seen in the result, plus the
/// target user. A failed lookup falls back to the raw id instead of
/// aborting the batch.
async fn resolve_display_names(
    client: &SlackClient,
    matches: &[MessageWithContext],
    target_user: &str,
) -> BTreeMap<String, String> {
    let mut ids: BTreeSet<String> = BTreeSet::new();
    for item in matches {
        if let Some(user) = &item.message.user {
            ids.insert(user.clone());
        }
        for ctx in &item.context {
            if let Some(user) = &ctx.user {
                ids.insert(user.clone());
            }
        }
    }
    ids.insert(target_user.to_string());

    let mut names = BTreeMap::new();
    for id in ids {
        let name = match client.user_display_name(&id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(user = %id, error = %e, "user info lookup failed, using id");
                id.clone()
            }
        };
        names.insert(id, name);
    }
    names
}
