//! Cached profile and timeline fetching.
//!
//! `Analytics` reads the prior cache entry, fetches only what is newer than
//! the stored cursor, merges and dedups, and persists the updated state.
//! Rate-limit failures during pagination degrade to the cached collection
//! when one exists; every other failure propagates.

use crate::client::{PAGE_MAX, PageRequest, SocialGateway};
use crate::merge::{CACHE_CAP, advance_cursor, merge_dedup};
use crate::rows::{PostRow, Profile, project_posts};
use crate::types::{Post, XUser};
use glance_cache::{CacheError, CacheStore, Cached};
use glance_http::HttpError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Persisted timeline state: the high-water cursor plus the merged posts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostCache {
    pub fetched_at: i64,
    pub since_id: Option<String>,
    pub items: Vec<Post>,
}

/// Outcome of a timeline fetch. `Stale` means the platform rate-limited us
/// mid-fetch and the rows come from the local cache; the hint says how many
/// seconds until the limit resets, when the platform told us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fresh(Vec<PostRow>),
    Stale {
        rows: Vec<PostRow>,
        retry_after_secs: Option<u64>,
    },
}

impl FetchOutcome {
    pub fn rows(&self) -> &[PostRow] {
        match self {
            FetchOutcome::Fresh(rows) | FetchOutcome::Stale { rows, .. } => rows,
        }
    }

    pub fn into_rows(self) -> Vec<PostRow> {
        match self {
            FetchOutcome::Fresh(rows) | FetchOutcome::Stale { rows, .. } => rows,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, FetchOutcome::Stale { .. })
    }
}

/// Cached analytics over a [`SocialGateway`].
pub struct Analytics<G> {
    gateway: G,
    store: CacheStore,
    user_ttl: Duration,
    default_post_limit: usize,
}

impl<G: SocialGateway> Analytics<G> {
    pub fn new(gateway: G, store: CacheStore) -> Self {
        Self {
            gateway,
            store,
            user_ttl: Duration::from_secs(3600),
            default_post_limit: 20,
        }
    }

    pub fn with_user_ttl(mut self, ttl: Duration) -> Self {
        self.user_ttl = ttl;
        self
    }

    pub fn with_default_post_limit(mut self, limit: usize) -> Self {
        self.default_post_limit = limit.max(1);
        self
    }

    /// Profile lookup with a freshness window: a cache entry inside the TTL
    /// short-circuits without touching the network. An unknown username is
    /// `Ok(None)` and caches nothing.
    pub async fn profile(&self, username: &str) -> Result<Option<Profile>, Error> {
        let key = format!("user_{}", username.to_lowercase());

        if let Some(entry) = self.store.read::<Cached<XUser>>(&key).await? {
            if entry.is_fresh(self.user_ttl) {
                tracing::debug!(username, "profile.cache_hit");
                return Ok(Some(Profile::from(entry.data)));
            }
        }

        let Some(user) = self.gateway.user_by_username(username).await? else {
            return Ok(None);
        };
        self.store.write(&key, &Cached::now(user.clone())).await?;
        Ok(Some(Profile::from(user)))
    }

    /// Incremental timeline fetch.
    ///
    /// Pages through posts newer than the stored cursor, merges them with
    /// the cached collection, persists the merged state (capped at
    /// [`CACHE_CAP`]), and returns the full merged collection as rows.
    pub async fn posts(
        &self,
        user_id: &str,
        limit: Option<usize>,
        exclude_replies_reposts: bool,
    ) -> Result<FetchOutcome, Error> {
        let limit = limit.unwrap_or(self.default_post_limit);
        let key = format!("tweets_{user_id}");
        let cached: PostCache = self.store.read(&key).await?.unwrap_or_default();

        let mut fresh: Vec<Post> = Vec::new();
        let mut token: Option<String> = None;
        while fresh.len() < limit {
            let page = PageRequest {
                max_results: PAGE_MAX.min(limit - fresh.len()),
                since_id: cached.since_id.clone(),
                pagination_token: token.take(),
                exclude_replies_reposts,
            };
            let resp = match self.gateway.posts_page(user_id, &page).await {
                Ok(resp) => resp,
                Err(err) if err.is_rate_limited() && !cached.items.is_empty() => {
                    tracing::warn!(
                        user_id,
                        retry_after_secs = ?err.retry_after_secs(),
                        cached = cached.items.len(),
                        "timeline.rate_limited.serving_cached"
                    );
                    return Ok(FetchOutcome::Stale {
                        rows: project_posts(&cached.items),
                        retry_after_secs: err.retry_after_secs(),
                    });
                }
                Err(err) => return Err(err.into()),
            };

            fresh.extend(resp.data.unwrap_or_default());
            token = resp.meta.and_then(|m| m.next_token);
            if token.is_none() {
                break;
            }
        }

        let fetched = fresh.len();
        let merged = merge_dedup(fresh, cached.items);
        let since_id = advance_cursor(&merged, cached.since_id);

        let mut persisted = merged.clone();
        persisted.truncate(CACHE_CAP);
        self.store
            .write(
                &key,
                &PostCache {
                    fetched_at: glance_common::unix_now(),
                    since_id,
                    items: persisted,
                },
            )
            .await?;

        tracing::info!(user_id, fetched, total = merged.len(), "timeline.merge");
        Ok(FetchOutcome::Fresh(project_posts(&merged)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Meta, PostMetrics, TimelineResponse};
    use async_trait::async_trait;
    use glance_http::StatusCode;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Step {
        Page(TimelineResponse),
        RateLimited(Option<u64>),
        Server,
    }

    #[derive(Default)]
    struct MockGateway {
        user: Option<XUser>,
        script: Mutex<VecDeque<Step>>,
        user_calls: AtomicUsize,
        page_calls: AtomicUsize,
        last_page: Mutex<Option<PageRequest>>,
    }

    impl MockGateway {
        fn scripted(steps: Vec<Step>) -> Self {
            Self {
                script: Mutex::new(steps.into()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SocialGateway for MockGateway {
        async fn user_by_username(&self, _username: &str) -> Result<Option<XUser>, HttpError> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.user.clone())
        }

        async fn posts_page(
            &self,
            _user_id: &str,
            page: &PageRequest,
        ) -> Result<TimelineResponse, HttpError> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_page.lock().unwrap() = Some(page.clone());
            match self.script.lock().unwrap().pop_front() {
                Some(Step::Page(resp)) => Ok(resp),
                Some(Step::RateLimited(hint)) => Err(HttpError::RateLimited {
                    retry_after_secs: hint,
                    message: "Too Many Requests".into(),
                    request_id: "-".into(),
                }),
                Some(Step::Server) => Err(HttpError::Server {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "upstream down".into(),
                    request_id: "-".into(),
                }),
                None => Ok(TimelineResponse::default()),
            }
        }
    }

    fn user(id: &str, username: &str) -> XUser {
        XUser {
            id: id.into(),
            username: username.into(),
            name: Some("Alice".into()),
            profile_image_url: None,
            description: None,
            public_metrics: None,
        }
    }

    fn post(id: &str, created_at: &str, likes: u64) -> Post {
        Post {
            id: id.into(),
            text: format!("post {id}"),
            created_at: Some(created_at.into()),
            lang: Some("en".into()),
            public_metrics: Some(PostMetrics {
                like_count: Some(likes),
                ..Default::default()
            }),
        }
    }

    fn page(posts: Vec<Post>, next_token: Option<&str>) -> Step {
        Step::Page(TimelineResponse {
            data: Some(posts),
            meta: Some(Meta {
                next_token: next_token.map(str::to_string),
            }),
        })
    }

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path()).unwrap();
        (dir, store)
    }

    async fn seed_posts(store: &CacheStore, user_id: &str, cache: &PostCache) {
        store
            .write(&format!("tweets_{user_id}"), cache)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn profile_within_ttl_issues_one_network_call() {
        let (_dir, store) = store();
        let gateway = MockGateway {
            user: Some(user("42", "Alice")),
            ..Default::default()
        };
        let analytics = Analytics::new(gateway, store);

        let first = analytics.profile("Alice").await.unwrap().unwrap();
        let second = analytics.profile("Alice").await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(analytics.gateway.user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn profile_cache_key_ignores_username_case() {
        let (_dir, store) = store();
        let gateway = MockGateway {
            user: Some(user("42", "Alice")),
            ..Default::default()
        };
        let analytics = Analytics::new(gateway, store);

        analytics.profile("Alice").await.unwrap();
        analytics.profile("ALICE").await.unwrap();

        assert_eq!(analytics.gateway.user_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_profile_is_none_and_uncached() {
        let (_dir, store) = store();
        let analytics = Analytics::new(MockGateway::default(), store.clone());

        assert!(analytics.profile("ghost").await.unwrap().is_none());
        let cached: Option<Cached<XUser>> = store.read("user_ghost").await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn first_fetch_orders_persists_and_sets_cursor() {
        let (_dir, store) = store();
        let gateway = MockGateway::scripted(vec![page(
            vec![
                post("10", "2026-01-10T00:00:00Z", 3),
                post("12", "2026-01-12T00:00:00Z", 9),
            ],
            None,
        )]);
        let analytics = Analytics::new(gateway, store.clone());

        let outcome = analytics.posts("42", Some(20), true).await.unwrap();
        assert!(!outcome.is_stale());
        let ids: Vec<_> = outcome.rows().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["12", "10"]);

        let cached: PostCache = store.read("tweets_42").await.unwrap().unwrap();
        assert_eq!(cached.since_id.as_deref(), Some("12"));
        assert_eq!(cached.items.len(), 2);
    }

    #[tokio::test]
    async fn pagination_passes_cursor_and_shrinks_page_size() {
        let (_dir, store) = store();
        seed_posts(
            &store,
            "42",
            &PostCache {
                fetched_at: 0,
                since_id: Some("100".into()),
                items: vec![post("100", "2026-01-01T00:00:00Z", 1)],
            },
        )
        .await;

        let gateway = MockGateway::scripted(vec![
            page(
                vec![
                    post("103", "2026-01-03T00:00:00Z", 0),
                    post("102", "2026-01-02T00:00:00Z", 0),
                ],
                Some("tok-1"),
            ),
            page(vec![post("101", "2026-01-01T12:00:00Z", 0)], None),
        ]);
        let analytics = Analytics::new(gateway, store);

        let outcome = analytics.posts("42", Some(3), true).await.unwrap();
        assert_eq!(analytics.gateway.page_calls.load(Ordering::SeqCst), 2);

        let last = analytics.gateway.last_page.lock().unwrap().clone().unwrap();
        assert_eq!(last.max_results, 1);
        assert_eq!(last.since_id.as_deref(), Some("100"));
        assert_eq!(last.pagination_token.as_deref(), Some("tok-1"));

        let ids: Vec<_> = outcome.rows().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["103", "102", "101", "100"]);
    }

    #[tokio::test]
    async fn duplicate_ids_resolve_to_the_fresher_metrics() {
        let (_dir, store) = store();
        seed_posts(
            &store,
            "42",
            &PostCache {
                fetched_at: 0,
                since_id: Some("7".into()),
                items: vec![post("7", "2026-01-07T00:00:00Z", 5)],
            },
        )
        .await;

        let gateway =
            MockGateway::scripted(vec![page(vec![post("7", "2026-01-07T00:00:00Z", 50)], None)]);
        let analytics = Analytics::new(gateway, store);

        let rows = analytics.posts("42", None, true).await.unwrap().into_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].likes, 50);
    }

    #[tokio::test]
    async fn persisted_collection_is_capped_but_result_is_not() {
        let (_dir, store) = store();
        let items: Vec<Post> = (0..600)
            .map(|i| post(&format!("{i}"), &format!("2026-01-01T00:{:02}:{:02}Z", i / 60, i % 60), 0))
            .collect();
        seed_posts(
            &store,
            "42",
            &PostCache {
                fetched_at: 0,
                since_id: Some("599".into()),
                items,
            },
        )
        .await;

        let gateway = MockGateway::scripted(vec![page(vec![], None)]);
        let analytics = Analytics::new(gateway, store.clone());

        let rows = analytics.posts("42", Some(1), true).await.unwrap().into_rows();
        assert_eq!(rows.len(), 600);

        let cached: PostCache = store.read("tweets_42").await.unwrap().unwrap();
        assert_eq!(cached.items.len(), CACHE_CAP);
    }

    #[tokio::test]
    async fn empty_merge_leaves_the_cursor_unchanged() {
        let (_dir, store) = store();
        seed_posts(
            &store,
            "42",
            &PostCache {
                fetched_at: 0,
                since_id: Some("55".into()),
                items: vec![],
            },
        )
        .await;

        let gateway = MockGateway::scripted(vec![page(vec![], None)]);
        let analytics = Analytics::new(gateway, store.clone());

        analytics.posts("42", Some(5), true).await.unwrap();
        let cached: PostCache = store.read("tweets_42").await.unwrap().unwrap();
        assert_eq!(cached.since_id.as_deref(), Some("55"));
    }

    #[tokio::test]
    async fn rate_limit_with_cache_degrades_to_stale_rows() {
        let (_dir, store) = store();
        let items: Vec<Post> = (0..5)
            .map(|i| post(&format!("{i}"), &format!("2026-01-0{}T00:00:00Z", i + 1), i))
            .collect();
        seed_posts(
            &store,
            "42",
            &PostCache {
                fetched_at: 0,
                since_id: Some("4".into()),
                items,
            },
        )
        .await;

        let gateway = MockGateway::scripted(vec![Step::RateLimited(Some(120))]);
        let analytics = Analytics::new(gateway, store);

        let outcome = analytics.posts("42", Some(20), true).await.unwrap();
        match outcome {
            FetchOutcome::Stale {
                rows,
                retry_after_secs,
            } => {
                assert_eq!(rows.len(), 5);
                assert_eq!(retry_after_secs, Some(120));
            }
            FetchOutcome::Fresh(_) => panic!("expected the stale fallback"),
        }
    }

    #[tokio::test]
    async fn rate_limit_without_cache_propagates() {
        let (_dir, store) = store();
        let gateway = MockGateway::scripted(vec![Step::RateLimited(None)]);
        let analytics = Analytics::new(gateway, store);

        let err = analytics.posts("42", Some(20), true).await.unwrap_err();
        assert!(matches!(err, Error::Http(ref e) if e.is_rate_limited()));
        assert_eq!(analytics.gateway.page_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_propagate_even_with_cache() {
        let (_dir, store) = store();
        seed_posts(
            &store,
            "42",
            &PostCache {
                fetched_at: 0,
                since_id: Some("1".into()),
                items: vec![post("1", "2026-01-01T00:00:00Z", 0)],
            },
        )
        .await;

        let gateway = MockGateway::scripted(vec![Step::Server]);
        let analytics = Analytics::new(gateway, store);

        let err = analytics.posts("42", Some(20), true).await.unwrap_err();
        assert!(matches!(err, Error::Http(HttpError::Server { .. })));
    }
}
