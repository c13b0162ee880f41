use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{error, info};

use tg_storefront::http::{self, AppState};
use tg_storefront::telegram::{self, BotNotifier};
use tg_storefront::{config, db, outbox};

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
    let cfg = Arc::new(config::load(Some(&args.config))?);
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    db::seed_admins(&pool, &cfg.telegram.admin_ids).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());

    tokio::spawn(outbox::run_worker(
        pool.clone(),
        BotNotifier::new(bot.clone()),
        cfg.clone(),
    ));

    let state = AppState::new(pool.clone(), cfg.clone())?;
    tokio::spawn(async move {
        if let Err(err) = http::serve(state).await {
            error!(?err, "http server stopped");
        }
    });

    info!("starting telegram bot");
    telegram::handlers::run(bot, pool, cfg).await;
    Ok(())
}
