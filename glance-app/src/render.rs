//! Plain text / JSON rendering. Only flat records and rows arrive here.

use anyhow::Result;
use glance_social::{PostRow, Profile};
use glance_video::{ChannelStats, VideoRow};

const TEXT_WIDTH: usize = 72;
const TABLE_LIMIT: usize = 50;

pub fn profile(profile: &Profile, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(profile)?);
        return Ok(());
    }
    println!("@{} ({})", profile.username, profile.name);
    if !profile.description.is_empty() {
        println!("{}", profile.description);
    }
    println!(
        "followers {}  following {}  posts {}  listed {}",
        profile.followers, profile.following, profile.tweet_count, profile.listed_count
    );
    Ok(())
}

pub fn post_rows(rows: &[PostRow], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    for row in rows {
        println!(
            "{:<20}  ♥{:<6} ↺{:<6} 💬{:<6} ❝{:<6} {}",
            row.created_at,
            row.likes,
            row.retweets,
            row.replies,
            row.quotes,
            one_line(&row.text)
        );
    }
    println!("{} posts", rows.len());
    Ok(())
}

pub fn channel(channel: &ChannelStats, rows: &[VideoRow], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "channel": channel,
                "videos": rows,
            }))?
        );
        return Ok(());
    }
    println!("{}", channel.title);
    println!(
        "subscribers {}  views {}  videos {}",
        channel.subscribers, channel.views, channel.total_videos
    );
    for row in rows.iter().take(TABLE_LIMIT) {
        println!(
            "{:<20}  views {:<10} likes {:<8} comments {:<8} {}",
            row.published_at,
            row.views,
            row.likes,
            row.comments,
            one_line(&row.title)
        );
    }
    Ok(())
}

fn one_line(text: &str) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    let mut out: String = flat.chars().take(TEXT_WIDTH).collect();
    if flat.chars().count() > TEXT_WIDTH {
        out.push('…');
    }
    out
}
