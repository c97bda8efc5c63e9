//! Thin wrapper around the microblogging v2 API with Glance defaults.
//!
//! Handles auth and request parameter shaping before delegating to the
//! shared HTTP executor. Caching and merge policy live in [`crate::timeline`].

use crate::types::{TimelineResponse, UserResponse, XUser};
use async_trait::async_trait;
use glance_http::{Auth, HttpClient, HttpError, RequestOpts};
use std::borrow::Cow;

pub const DEFAULT_BASE: &str = "https://api.x.com";

/// Upstream page-size ceiling for the timeline endpoint.
pub const PAGE_MAX: usize = 100;

const USER_FIELDS: &str =
    "profile_image_url,public_metrics,description,created_at,location,verified";
const POST_FIELDS: &str = "created_at,public_metrics,lang";

/// One page of a timeline request.
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    pub max_results: usize,
    /// Lower bound: only posts newer than this id are returned.
    pub since_id: Option<String>,
    /// Continuation token from the previous page's `meta`.
    pub pagination_token: Option<String>,
    pub exclude_replies_reposts: bool,
}

/// Seam between the cached analytics service and the wire.
///
/// The production implementation is [`XApi`]; tests substitute in-memory
/// gateways with call counters.
#[async_trait]
pub trait SocialGateway: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<XUser>, HttpError>;

    async fn posts_page(
        &self,
        user_id: &str,
        page: &PageRequest,
    ) -> Result<TimelineResponse, HttpError>;
}

#[derive(Clone)]
pub struct XApi {
    http: HttpClient,
    bearer: String,
}

impl XApi {
    pub fn new(bearer_token: String) -> Result<Self, HttpError> {
        Self::with_base(bearer_token, DEFAULT_BASE)
    }

    /// Point the client at a different host (exercised by local stubs).
    pub fn with_base(bearer_token: String, base: &str) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(base)?,
            bearer: bearer_token,
        })
    }
}

#[async_trait]
impl SocialGateway for XApi {
    async fn user_by_username(&self, username: &str) -> Result<Option<XUser>, HttpError> {
        let params: Vec<(&str, Cow<'_, str>)> = vec![("user.fields", USER_FIELDS.into())];

        let resp: UserResponse = self
            .http
            .get_json(
                &format!("2/users/by/username/{username}"),
                RequestOpts {
                    auth: Some(Auth::Bearer(&self.bearer)),
                    query: Some(params),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(username, found = resp.data.is_some(), "social.user_lookup");
        Ok(resp.data)
    }

    async fn posts_page(
        &self,
        user_id: &str,
        page: &PageRequest,
    ) -> Result<TimelineResponse, HttpError> {
        let mut params: Vec<(&str, Cow<'_, str>)> = vec![
            ("max_results", page.max_results.to_string().into()),
            ("tweet.fields", POST_FIELDS.into()),
        ];
        if page.exclude_replies_reposts {
            params.push(("exclude", "retweets,replies".into()));
        }
        if let Some(since_id) = &page.since_id {
            params.push(("since_id", since_id.as_str().into()));
        }
        if let Some(token) = &page.pagination_token {
            params.push(("pagination_token", token.as_str().into()));
        }

        let resp: TimelineResponse = self
            .http
            .get_json(
                &format!("2/users/{user_id}/tweets"),
                RequestOpts {
                    auth: Some(Auth::Bearer(&self.bearer)),
                    query: Some(params),
                    ..Default::default()
                },
            )
            .await?;

        tracing::debug!(
            user_id,
            count = resp.data.as_ref().map(|d| d.len()).unwrap_or(0),
            has_next = resp.meta.as_ref().is_some_and(|m| m.next_token.is_some()),
            "social.posts_page"
        );
        Ok(resp)
    }
}
