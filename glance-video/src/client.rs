//! Video-platform client: channel statistics and upload listings.
//!
//! Authenticates with an API key in the query string and reuses the shared
//! executor's retry policy unchanged. This API keeps no local cache.

use crate::types::{
    ChannelItem, ChannelListResponse, ChannelStats, PlaylistItemsResponse, Snippet, Statistics,
    VideoItem, VideoListResponse, VideoRow,
};
use glance_http::{Auth, HttpClient, HttpError, RequestOpts};
use std::borrow::Cow;

pub const DEFAULT_BASE: &str = "https://www.googleapis.com";

/// Upstream page/chunk ceiling for playlist and video listings.
const LIST_MAX: usize = 50;

#[derive(Clone)]
pub struct VideoApi {
    http: HttpClient,
    api_key: String,
}

impl VideoApi {
    pub fn new(api_key: String) -> Result<Self, HttpError> {
        Self::with_base(api_key, DEFAULT_BASE)
    }

    pub fn with_base(api_key: String, base: &str) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(base)?,
            api_key,
        })
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&str, Cow<'_, str>)>,
    ) -> Result<T, HttpError> {
        self.http
            .get_json(
                path,
                RequestOpts {
                    auth: Some(Auth::Query {
                        name: "key",
                        value: self.api_key.as_str().into(),
                    }),
                    query: Some(params),
                    ..Default::default()
                },
            )
            .await
    }

    /// Channel snapshot; `None` when the id matches nothing.
    pub async fn channel(&self, channel_id: &str) -> Result<Option<ChannelStats>, HttpError> {
        let resp: ChannelListResponse = self
            .list(
                "youtube/v3/channels",
                vec![
                    ("part", "snippet,contentDetails,statistics".into()),
                    ("id", channel_id.into()),
                ],
            )
            .await?;

        let found = resp.items.into_iter().next().map(project_channel);
        tracing::debug!(channel_id, found = found.is_some(), "video.channel_lookup");
        Ok(found)
    }

    /// Video ids of a playlist, newest uploads first, up to `max_results`.
    pub async fn video_ids(
        &self,
        playlist_id: &str,
        max_results: usize,
    ) -> Result<Vec<String>, HttpError> {
        let mut ids: Vec<String> = Vec::new();
        let mut token: Option<String> = None;

        while ids.len() < max_results {
            let mut params: Vec<(&str, Cow<'_, str>)> = vec![
                ("part", "contentDetails".into()),
                ("playlistId", playlist_id.into()),
                (
                    "maxResults",
                    LIST_MAX.min(max_results - ids.len()).to_string().into(),
                ),
            ];
            if let Some(token) = &token {
                params.push(("pageToken", token.as_str().into()));
            }

            let resp: PlaylistItemsResponse = self.list("youtube/v3/playlistItems", params).await?;
            ids.extend(resp.items.into_iter().map(|it| it.content_details.video_id));
            token = resp.next_page_token;
            if token.is_none() {
                break;
            }
        }

        tracing::debug!(playlist_id, count = ids.len(), "video.playlist_ids");
        Ok(ids)
    }

    /// Detail rows for the given video ids, fetched in id-join chunks.
    pub async fn videos(&self, video_ids: &[String]) -> Result<Vec<VideoRow>, HttpError> {
        let mut rows = Vec::with_capacity(video_ids.len());
        for chunk in video_ids.chunks(LIST_MAX) {
            let resp: VideoListResponse = self
                .list(
                    "youtube/v3/videos",
                    vec![
                        ("part", "snippet,statistics".into()),
                        ("id", chunk.join(",").into()),
                    ],
                )
                .await?;
            rows.extend(resp.items.into_iter().map(project_video));
        }
        Ok(rows)
    }
}

fn project_channel(item: ChannelItem) -> ChannelStats {
    ChannelStats {
        title: item.snippet.title.clone(),
        avatar_url: thumbnail_url(&item.snippet, &["high", "medium", "default"]),
        subscribers: parse_count(&item.statistics.subscriber_count),
        views: parse_count(&item.statistics.view_count),
        total_videos: parse_count(&item.statistics.video_count),
        uploads_playlist_id: item.content_details.related_playlists.uploads,
    }
}

fn project_video(item: VideoItem) -> VideoRow {
    VideoRow {
        video_id: item.id,
        title: item.snippet.title.clone(),
        published_at: item.snippet.published_at.clone().unwrap_or_default(),
        thumbnail: thumbnail_url(&item.snippet, &["medium", "high", "default"]),
        views: parse_count(&item.statistics.view_count),
        likes: parse_count(&item.statistics.like_count),
        comments: parse_count(&item.statistics.comment_count),
    }
}

fn thumbnail_url(snippet: &Snippet, preference: &[&str]) -> String {
    preference
        .iter()
        .find_map(|size| snippet.thumbnails.get(*size))
        .map(|t| t.url.clone())
        .unwrap_or_default()
}

fn parse_count(raw: &Option<String>) -> u64 {
    raw.as_deref()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
