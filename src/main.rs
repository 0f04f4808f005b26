/// Channel content bot
///
/// A Telegram bot that generates short posts with the DeepSeek API and
/// publishes them to a channel on a declarative schedule.
///
/// The bot:
/// - Polls the schedule and publishes at configured slots
/// - Records every post in a SQLite queue before delivery
/// - Optionally filters current RSS headlines into the prompt
/// - Accepts operator commands for manual generation and publication

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;

use muse_channel_bot::bot::run_bot;
use muse_channel_bot::config::Config;
use muse_channel_bot::generator::DeepSeekClient;
use muse_channel_bot::handlers::BotContext;
use muse_channel_bot::pipeline::{run_delivery_loop, PostPipeline, TelegramPublisher};
use muse_channel_bot::scheduler::PostScheduler;
use muse_channel_bot::store::Database;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    pretty_env_logger::init();

    log::info!("Starting channel content bot...");

    // Load and validate configuration; a missing credential is fatal here
    let config = Config::from_env()?;
    config.validate().await?;
    let config = Arc::new(config);

    let db = Database::connect(&config.database_url).await?;

    let bot = Bot::new(config.telegram_token.clone());

    let generator = Arc::new(DeepSeekClient::new(&config));
    let publisher = Arc::new(TelegramPublisher::new(
        bot.clone(),
        config.channel_recipient(),
    ));

    let pipeline = Arc::new(PostPipeline::new(
        db,
        generator,
        publisher,
        config.delivery_retries,
        Duration::from_secs(config.delivery_retry_secs),
    ));

    // Background loops: the scheduling engine and the delivery loop for
    // operator-scheduled posts. Both only ever touch the shared store.
    let scheduler = PostScheduler::new(config.clone(), pipeline.clone());
    tokio::spawn(scheduler.run());
    tokio::spawn(run_delivery_loop(pipeline.clone(), config.poll_interval_secs));

    let ctx = Arc::new(BotContext {
        config: config.clone(),
        pipeline,
    });

    run_bot(bot, ctx).await?;

    Ok(())
}
