use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::extract::{collect_thread_roots, merge_by_ts};

const API_BASE: &str = "https://slack.com/api";
const PAGE_LIMIT: u32 = 200;
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_member: Option<bool>,
}

/// One message as seen by the rest of the pipeline. `ts` is the message id:
/// unique within a channel and ordered by numeric value, so comparisons go
/// through [`Message::ts_value`], never through string order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u64>,
}

impl Message {
    pub fn ts_value(&self) -> f64 {
        self.ts.parse::<f64>().unwrap_or(0.0)
    }
}

pub fn slack_ts_from_datetime(dt: DateTime<Utc>) -> String {
    format!("{}.000000", dt.timestamp())
}

pub(crate) fn sort_by_ts(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.ts_value().total_cmp(&b.ts_value()));
}

pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    channel_cache: HashMap<String, ChannelInfo>,
}

impl SlackClient {
    pub fn new(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(AppError::MissingToken);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            channel_cache: HashMap::new(),
        })
    }

    /// List all channels, following the pagination cursor until exhausted.
    /// Every page seen also lands in the channel cache.
    pub async fn list_channels(&mut self) -> Result<Vec<ChannelInfo>> {
        let mut all_channels = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(c) = cursor.as_ref() {
                params.push(("cursor", c.clone()));
            }

            let response: ChannelsListResponse =
                self.api_get("conversations.list", &params).await?;
            if !response.ok {
                return Err(self.payload_failure("conversations.list", response.error).await);
            }

            for channel in response.channels.unwrap_or_default() {
                let info = channel.into_info();
                self.channel_cache.insert(info.id.clone(), info.clone());
                all_channels.push(info);
            }

            cursor = next_cursor(response.response_metadata);
            if cursor.is_none() {
                break;
            }
        }

        debug!(count = all_channels.len(), "channel listing complete");
        Ok(all_channels)
    }

    /// Channel metadata, cache-first. A failed point lookup degrades to a
    /// channel whose name is its id instead of failing the pipeline.
    pub async fn get_channel_info(&mut self, channel_id: &str) -> ChannelInfo {
        if let Some(cached) = self.channel_cache.get(channel_id) {
            return cached.clone();
        }

        match self.fetch_channel_info(channel_id).await {
            Ok(info) => {
                self.channel_cache.insert(info.id.clone(), info.clone());
                info
            }
            Err(e) => {
                warn!(channel = channel_id, error = %e, "channel info lookup failed, using id as name");
                ChannelInfo {
                    id: channel_id.to_string(),
                    name: channel_id.to_string(),
                    is_member: None,
                }
            }
        }
    }

    async fn fetch_channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        let params = vec![("channel", channel_id.to_string())];
        let response: ChannelInfoResponse = self.api_get("conversations.info", &params).await?;
        if !response.ok {
            return Err(self.payload_failure("conversations.info", response.error).await);
        }
        let channel = response.channel.ok_or_else(|| {
            AppError::SlackApi("conversations.info: missing channel in response".to_string())
        })?;
        Ok(channel.into_info())
    }

    /// Channel history between two Slack timestamps, inclusive on both
    /// ends, ascending by numeric ts whatever order the pages arrived in.
    pub async fn get_history(
        &self,
        channel_id: &str,
        oldest: &str,
        latest: &str,
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("oldest", oldest.to_string()),
                ("latest", latest.to_string()),
                ("inclusive", "true".to_string()),
            ];
            if let Some(c) = cursor.as_ref() {
                params.push(("cursor", c.clone()));
            }

            let response: HistoryResponse =
                self.api_get("conversations.history", &params).await?;
            if !response.ok {
                return Err(
                    self.payload_failure("conversations.history", response.error)
                        .await,
                );
            }

            messages.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| m.into_message(channel_id)),
            );

            cursor = next_cursor(response.response_metadata);
            if cursor.is_none() {
                break;
            }
        }

        sort_by_ts(&mut messages);
        Ok(messages)
    }

    /// Replies of one thread, same pagination and ordering contract as
    /// [`SlackClient::get_history`].
    pub async fn get_thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
        oldest: &str,
        latest: &str,
    ) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut params = vec![
                ("channel", channel_id.to_string()),
                ("ts", thread_ts.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
                ("oldest", oldest.to_string()),
                ("latest", latest.to_string()),
                ("inclusive", "true".to_string()),
            ];
            if let Some(c) = cursor.as_ref() {
                params.push(("cursor", c.clone()));
            }

            let response: HistoryResponse =
                self.api_get("conversations.replies", &params).await?;
            if !response.ok {
                return Err(
                    self.payload_failure("conversations.replies", response.error)
                        .await,
                );
            }

            messages.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .map(|m| m.into_message(channel_id)),
            );

            cursor = next_cursor(response.response_metadata);
            if cursor.is_none() {
                break;
            }
        }

        sort_by_ts(&mut messages);
        Ok(messages)
    }

    /// Messages authored by one user in a channel: history plus the replies
    /// of every thread referenced by it, deduplicated by ts, with
    /// subtype-bearing entries (edits, joins, ...) excluded.
    pub async fn find_user_messages(
        &self,
        channel_id: &str,
        user_id: &str,
        oldest: &str,
        latest: &str,
    ) -> Result<Vec<Message>> {
        let base = self.get_history(channel_id, oldest, latest).await?;
        let roots = collect_thread_roots(&base);

        let mut replies = Vec::new();
        for root in &roots {
            replies.extend(
                self.get_thread_replies(channel_id, root, oldest, latest)
                    .await?,
            );
        }

        let timeline = merge_by_ts(base, replies);
        Ok(timeline
            .into_iter()
            .filter(|m| m.user.as_deref() == Some(user_id) && m.subtype.is_none())
            .collect())
    }

    /// The user id owning the token, or None when auth.test fails.
    pub async fn auth_user_id(&self) -> Option<String> {
        let params: Vec<(&str, String)> = Vec::new();
        match self.api_get::<AuthTestResponse>("auth.test", &params).await {
            Ok(response) if response.ok => response.user_id,
            Ok(response) => {
                warn!(error = ?response.error, "auth.test failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "auth.test failed");
                None
            }
        }
    }

    /// Display name for a user id, preferring the normalized profile names.
    pub async fn user_display_name(&self, user_id: &str) -> Result<String> {
        let params = vec![("user", user_id.to_string())];
        let response: UserInfoResponse = self.api_get("users.info", &params).await?;
        if !response.ok {
            return Err(self.payload_failure("users.info", response.error).await);
        }
        let user = response.user.ok_or_else(|| {
            AppError::SlackApi("users.info: missing user in response".to_string())
        })?;
        Ok(preferred_display_name(&user, user_id))
    }

    async fn api_get<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{API_BASE}/{method}");
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await
            .map_err(|e| AppError::SlackApi(format!("{method}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let wait = parse_retry_after(response.headers()).unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(method, wait_secs = wait, "Slack API rate limited");
            tokio::time::sleep(Duration::from_secs(wait)).await;
            return Err(AppError::SlackRateLimit {
                retry_after_secs: wait,
            });
        }
        if !status.is_success() {
            return Err(AppError::SlackApi(format!("{method}: HTTP {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::SlackApi(format!("{method}: {e}")))
    }

    /// Map an `ok: false` payload to an error. Rate-limit payloads wait the
    /// default interval before surfacing, like the 429 path.
    async fn payload_failure(&self, method: &str, error: Option<String>) -> AppError {
        let err = payload_error(method, error);
        if let AppError::SlackRateLimit { retry_after_secs } = err {
            warn!(method, wait_secs = retry_after_secs, "Slack API rate limited");
            tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
        }
        err
    }
}

fn payload_error(method: &str, error: Option<String>) -> AppError {
    match error.as_deref() {
        Some("ratelimited") => AppError::SlackRateLimit {
            retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
        },
        other => AppError::SlackApi(format!(
            "{method}: {}",
            other.unwrap_or("unknown error")
        )),
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}

fn next_cursor(metadata: Option<ResponseMetadata>) -> Option<String> {
    metadata
        .and_then(|m| m.next_cursor)
        .filter(|c| !c.is_empty())
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|s| !s.is_empty()).cloned()
}

fn preferred_display_name(user: &WireUser, fallback: &str) -> String {
    let profile = user.profile.as_ref();
    profile
        .and_then(|p| non_empty(p.display_name_normalized.as_ref()))
        .or_else(|| profile.and_then(|p| non_empty(p.display_name.as_ref())))
        .or_else(|| profile.and_then(|p| non_empty(p.real_name_normalized.as_ref())))
        .or_else(|| profile.and_then(|p| non_empty(p.real_name.as_ref())))
        .or_else(|| non_empty(user.name.as_ref()))
        .unwrap_or_else(|| fallback.to_string())
}

pub async fn export_channels(client: &mut SlackClient, output_path: &Path) -> Result<usize> {
    let channels = client.list_channels().await?;
    let count = channels.len();
    write_json(output_path, &channels)?;
    Ok(count)
}

pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, data).map_err(|e| AppError::JsonSerialize(e.to_string()))?;
    Ok(())
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelsListResponse {
    ok: bool,
    error: Option<String>,
    channels: Option<Vec<WireChannel>>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ChannelInfoResponse {
    ok: bool,
    error: Option<String>,
    channel: Option<WireChannel>,
}

#[derive(Debug, Deserialize)]
struct WireChannel {
    id: String,
    name: Option<String>,
    is_member: Option<bool>,
}

impl WireChannel {
    fn into_info(self) -> ChannelInfo {
        ChannelInfo {
            id: self.id,
            name: self.name.unwrap_or_else(|| "unknown".to_string()),
            is_member: self.is_member,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    ok: bool,
    error: Option<String>,
    messages: Option<Vec<WireMessage>>,
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireMessage {
    ts: String,
    user: Option<String>,
    text: Option<String>,
    thread_ts: Option<String>,
    subtype: Option<String>,
    reply_count: Option<u64>,
}

impl WireMessage {
    fn into_message(self, channel_id: &str) -> Message {
        Message {
            ts: self.ts,
            user: self.user,
            text: self.text,
            channel: channel_id.to_string(),
            thread_ts: self.thread_ts,
            subtype: self.subtype,
            reply_count: self.reply_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    ok: bool,
    error: Option<String>,
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    ok: bool,
    error: Option<String>,
    user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    name: Option<String>,
    profile: Option<WireUserProfile>,
}

#[derive(Debug, Deserialize)]
struct WireUserProfile {
    display_name: Option<String>,
    display_name_normalized: Option<String>,
    real_name: Option<String>,
    real_name_normalized: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn message(ts: &str) -> Message {
        Message {
            ts: ts.to_string(),
            user: Some("U1".to_string()),
            text: Some("hi".to_string()),
            channel: "C1".to_string(),
            thread_ts: None,
            subtype: None,
            reply_count: None,
        }
    }

    #[test]
    fn test_ts_value_parses_float() {
        assert_eq!(message("1704067200.000100").ts_value(), 1704067200.0001);
        assert_eq!(message("not-a-ts").ts_value(), 0.0);
    }

    #[test]
    fn test_sort_by_ts_is_numeric_not_lexicographic() {
        let mut messages = vec![message("10.2"), message("9.5")];
        sort_by_ts(&mut messages);
        let order: Vec<&str> = messages.iter().map(|m| m.ts.as_str()).collect();
        assert_eq!(order, vec!["9.5", "10.2"]);
    }

    #[test]
    fn test_slack_ts_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(slack_ts_from_datetime(dt), "1704067200.000000");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_static("30"),
        );
        assert_eq!(parse_retry_after(&headers), Some(30));
    }

    #[test]
    fn test_parse_retry_after_missing_or_invalid() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_static("soon"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_payload_error_rate_limited() {
        let err = payload_error("conversations.history", Some("ratelimited".to_string()));
        assert!(matches!(
            err,
            AppError::SlackRateLimit {
                retry_after_secs: 1
            }
        ));
    }

    #[test]
    fn test_payload_error_other() {
        let err = payload_error("conversations.history", Some("channel_not_found".to_string()));
        assert_eq!(
            err.to_string(),
            "Slack API error: conversations.history: channel_not_found"
        );
    }

    #[test]
    fn test_payload_error_without_cause() {
        let err = payload_error("auth.test", None);
        assert_eq!(err.to_string(), "Slack API error: auth.test: unknown error");
    }

    #[test]
    fn test_next_cursor_filters_empty() {
        assert_eq!(next_cursor(None), None);
        assert_eq!(
            next_cursor(Some(ResponseMetadata {
                next_cursor: Some(String::new())
            })),
            None
        );
        assert_eq!(
            next_cursor(Some(ResponseMetadata {
                next_cursor: Some("abc".to_string())
            })),
            Some("abc".to_string())
        );
    }

    #[test]
    fn test_history_response_deserializes() {
        let payload = json!({
            "ok": true,
            "messages": [
                {
                    "ts": "1704067205.000100",
                    "user": "U024BE7LH",
                    "text": "root",
                    "thread_ts": "1704067205.000100",
                    "reply_count": 2
                },
                {
                    "ts": "1704067210.000200",
                    "user": "U024BE7LH",
                    "subtype": "channel_join",
                    "text": "<@U024BE7LH> has joined the channel"
                }
            ],
            "response_metadata": { "next_cursor": "dGVhbTpDMDYxRkE1UEI=" }
        });

        let response: HistoryResponse = serde_json::from_value(payload).unwrap();
        assert!(response.ok);
        let messages = response.messages.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].reply_count, Some(2));
        assert_eq!(
            messages[0].thread_ts.as_deref(),
            Some("1704067205.000100")
        );
        assert_eq!(messages[1].subtype.as_deref(), Some("channel_join"));
        assert_eq!(
            next_cursor(response.response_metadata),
            Some("dGVhbTpDMDYxRkE1UEI=".to_string())
        );
    }

    #[test]
    fn test_channels_list_response_deserializes() {
        let payload = json!({
            "ok": true,
            "channels": [
                { "id": "C012AB3CD", "name": "general", "is_member": true },
                { "id": "C024BE91L", "name": "random" }
            ]
        });

        let response: ChannelsListResponse = serde_json::from_value(payload).unwrap();
        let channels: Vec<ChannelInfo> = response
            .channels
            .unwrap()
            .into_iter()
            .map(WireChannel::into_info)
            .collect();
        assert_eq!(channels[0].id, "C012AB3CD");
        assert_eq!(channels[0].name, "general");
        assert_eq!(channels[0].is_member, Some(true));
        assert_eq!(channels[1].is_member, None);
    }

    #[test]
    fn test_error_response_deserializes() {
        let payload = json!({ "ok": false, "error": "invalid_auth" });
        let response: ChannelsListResponse = serde_json::from_value(payload).unwrap();
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("invalid_auth"));
    }

    #[test]
    fn test_wire_message_into_message_sets_channel() {
        let wire = WireMessage {
            ts: "1.000000".to_string(),
            user: None,
            text: None,
            thread_ts: None,
            subtype: None,
            reply_count: None,
        };
        let message = wire.into_message("C1");
        assert_eq!(message.channel, "C1");
        assert_eq!(message.user, None);
    }

    fn wire_user(payload: serde_json::Value) -> WireUser {
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn test_display_name_prefers_normalized() {
        let user = wire_user(json!({
            "name": "ana",
            "profile": {
                "display_name": "Ana",
                "display_name_normalized": "Ana N",
                "real_name": "Ana Torres"
            }
        }));
        assert_eq!(preferred_display_name(&user, "U9"), "Ana N");
    }

    #[test]
    fn test_display_name_skips_empty_fields() {
        let user = wire_user(json!({
            "name": "ana",
            "profile": {
                "display_name": "",
                "display_name_normalized": "",
                "real_name_normalized": "Ana Torres"
            }
        }));
        assert_eq!(preferred_display_name(&user, "U9"), "Ana Torres");
    }

    #[test]
    fn test_display_name_falls_back_to_username_then_id() {
        let user = wire_user(json!({ "name": "ana" }));
        assert_eq!(preferred_display_name(&user, "U9"), "ana");

        let user = wire_user(json!({}));
        assert_eq!(preferred_display_name(&user, "U9"), "U9");
    }

    #[test]
    fn test_client_rejects_empty_token() {
        assert!(matches!(SlackClient::new(""), Err(AppError::MissingToken)));
    }
}
