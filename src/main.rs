use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{error, info};
use tw_snoopbot::checkpoint::Checkpoint;
use tw_snoopbot::feed::{FeedClient, FeedService};
use tw_snoopbot::notify::TelegramNotifier;
use tw_snoopbot::poller::Poller;
use tw_snoopbot::{api, bot, config, db};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/snoopbot.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    // Management API
    let listener = tokio::net::TcpListener::bind(&cfg.app.api_bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.app.api_bind_addr))?;
    info!(addr = %cfg.app.api_bind_addr, "management api listening");
    let app = api::router(pool.clone());
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(?err, "management api stopped");
        }
    });

    let bot_client = Bot::new(cfg.telegram.bot_token.clone());

    let feed: Arc<dyn FeedService> = match &cfg.twitter.api_base {
        Some(base) => Arc::new(FeedClient::with_base_url(
            cfg.twitter.bearer_token.clone(),
            Url::parse(base).context("invalid twitter.api_base")?,
        )),
        None => Arc::new(FeedClient::new(cfg.twitter.bearer_token.clone())),
    };

    // Notification poller (single background loop)
    let checkpoint = Checkpoint::new(format!("{}/checkpoint.json", cfg.app.data_dir));
    let poller = Poller::new(
        pool.clone(),
        feed.clone(),
        Arc::new(TelegramNotifier::new(bot_client.clone())),
        cfg.app.max_fetch_count,
    );
    let sweep_interval = Duration::from_secs(cfg.app.sweep_interval_secs);
    tokio::spawn(async move {
        poller.run(&checkpoint, sweep_interval).await;
    });

    info!("starting telegram bot");
    teloxide::repl(bot_client, move |bot_client: Bot, msg: Message| {
        let pool = pool.clone();
        let feed = feed.clone();
        async move {
            if let Err(err) = bot::handle_update(&bot_client, &pool, feed.as_ref(), &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
