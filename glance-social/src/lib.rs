//! Microblogging analytics client.
//!
//! Raw resource calls live in [`client`]; the cached incremental fetch with
//! merge/dedup sits in [`timeline`]; [`rows`] projects wire records into the
//! flat shapes the presentation layer consumes.

pub mod client;
pub mod merge;
pub mod rows;
pub mod timeline;
pub mod types;

pub use client::{PAGE_MAX, PageRequest, SocialGateway, XApi};
pub use rows::{PostRow, Profile};
pub use timeline::{Analytics, Error, FetchOutcome, PostCache};
pub use types::{Post, PostMetrics, XUser};
