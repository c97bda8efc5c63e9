//! Projection of wire records into the flat shapes the presentation layer
//! consumes. Pure and infallible: missing metrics become zero, missing
//! strings become empty.

use crate::types::{Post, XUser};
use serde::{Deserialize, Serialize};

/// One post, flattened for tabular display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRow {
    pub id: String,
    pub text: String,
    pub created_at: String,
    pub likes: u64,
    pub retweets: u64,
    pub replies: u64,
    pub quotes: u64,
}

impl From<&Post> for PostRow {
    fn from(post: &Post) -> Self {
        let m = post.public_metrics.clone().unwrap_or_default();
        Self {
            id: post.id.clone(),
            text: post.text.clone(),
            created_at: post.created_at.clone().unwrap_or_default(),
            likes: m.like_count.unwrap_or(0),
            retweets: m.retweet_count.unwrap_or(0),
            replies: m.reply_count.unwrap_or(0),
            quotes: m.quote_count.unwrap_or(0),
        }
    }
}

pub fn project_posts(posts: &[Post]) -> Vec<PostRow> {
    posts.iter().map(PostRow::from).collect()
}

/// Profile snapshot with the follower counters flattened out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub username: String,
    pub avatar_url: String,
    pub description: String,
    pub followers: u64,
    pub following: u64,
    pub tweet_count: u64,
    pub listed_count: u64,
}

impl From<XUser> for Profile {
    fn from(user: XUser) -> Self {
        let m = user.public_metrics.unwrap_or_default();
        Self {
            id: user.id,
            name: user.name.unwrap_or_default(),
            username: user.username,
            avatar_url: user.profile_image_url.unwrap_or_default(),
            description: user.description.unwrap_or_default(),
            followers: m.followers_count.unwrap_or(0),
            following: m.following_count.unwrap_or(0),
            tweet_count: m.tweet_count.unwrap_or(0),
            listed_count: m.listed_count.unwrap_or(0),
        }
    }
}
