//! Video-platform analytics client (channel and upload statistics).

pub mod client;
pub mod types;

pub use client::VideoApi;
pub use types::{ChannelStats, VideoRow};
