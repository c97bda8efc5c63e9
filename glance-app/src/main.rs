use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use glance_cache::CacheStore;
use glance_common::observability::{LogConfig, init_logging};
use glance_config::SettingsLoader;
use glance_social::{Analytics, XApi};
use glance_video::VideoApi;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

mod render;

#[derive(Parser)]
#[command(name = "glance", about = "Social-media analytics with a local cache")]
struct Cli {
    /// Optional settings file, merged underneath the environment.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Emit JSON instead of text.
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Profile statistics for a microblogging user.
    Profile { username: String },
    /// Recent posts with engagement counts, merged with the local cache.
    Posts {
        username: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Include replies and reposts in the pull.
        #[arg(long)]
        include_replies: bool,
    },
    /// Channel statistics and uploads from the video platform.
    Channel {
        channel_id: String,
        /// How many recent uploads to inspect.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut loader = SettingsLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    let settings = loader.load()?;
    init_logging(LogConfig::default())?;

    match cli.command {
        Command::Profile { username } => {
            let analytics = build_analytics(&settings)?;
            let Some(profile) = analytics.profile(&username).await? else {
                bail!("no such user: {username}");
            };
            render::profile(&profile, cli.json)
        }
        Command::Posts {
            username,
            limit,
            include_replies,
        } => {
            let analytics = build_analytics(&settings)?;
            let Some(profile) = analytics.profile(&username).await? else {
                bail!("no such user: {username}");
            };
            let outcome = analytics
                .posts(&profile.id, limit, !include_replies)
                .await
                .with_context(|| format!("fetching posts for {username}"))?;
            if let glance_social::FetchOutcome::Stale {
                retry_after_secs, ..
            } = &outcome
            {
                match retry_after_secs {
                    Some(secs) => eprintln!(
                        "rate limited; showing cached posts (resets in ~{secs}s)"
                    ),
                    None => eprintln!("rate limited; showing cached posts"),
                }
            }
            render::post_rows(outcome.rows(), cli.json)
        }
        Command::Channel { channel_id, limit } => {
            let api = VideoApi::new(settings.require_video_key()?.to_string())?;
            let Some(channel) = api.channel(&channel_id).await? else {
                bail!("channel not found: {channel_id}");
            };
            let ids = api.video_ids(&channel.uploads_playlist_id, limit).await?;
            let mut rows = api.videos(&ids).await?;
            rows.sort_by(|a, b| b.views.cmp(&a.views));
            render::channel(&channel, &rows, cli.json)
        }
    }
}

fn build_analytics(settings: &glance_config::Settings) -> Result<Analytics<XApi>> {
    let store = CacheStore::open(&settings.cache_dir)
        .with_context(|| format!("opening cache dir {}", settings.cache_dir.display()))?;
    let gateway = XApi::new(settings.x_bearer_token.clone())?;
    Ok(Analytics::new(gateway, store)
        .with_user_ttl(Duration::from_secs(settings.user_ttl_secs))
        .with_default_post_limit(settings.default_post_limit))
}
