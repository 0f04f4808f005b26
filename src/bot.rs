/// Telegram bot wiring.
///
/// Sets up the command dispatcher and connects it to the shared context
/// (config, pipeline). All collaborators are constructed in main and
/// injected; nothing here is global.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::{prelude::*, types::Me, utils::command::BotCommands};
use tokio::time::sleep;

use crate::handlers::{
    handle_batch, handle_generate, handle_help, handle_publish_now, handle_schedule,
    handle_start, handle_status, is_authorized, BotContext,
};

/// Operator commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "start and show a short intro")]
    Start,
    #[command(description = "show help")]
    Help,
    #[command(description = "generate one post into the cache")]
    Generate,
    #[command(description = "publish a post immediately")]
    PublishNow,
    #[command(description = "schedule state and queue counters")]
    Status,
    #[command(description = "schedule a post: YYYY-MM-DD HH:MM | text")]
    Schedule(String),
    #[command(description = "schedule several posts, one entry per line")]
    Batch(String),
}

/// Run the dispatcher until shutdown.
pub async fn run_bot(bot: Bot, ctx: Arc<BotContext>) -> Result<()> {
    let me = retry_get_me(&bot)
        .await
        .context("Failed to connect to Telegram API")?;
    log::info!("Bot started: @{}", me.username());

    let handler = dptree::entry().branch(
        Update::filter_message().filter_command::<Command>().endpoint(
            |bot: Bot, msg: Message, cmd: Command, ctx: Arc<BotContext>| async move {
                if !is_authorized(&ctx.config, &msg) {
                    log::warn!("Ignoring command from unauthorized chat {}", msg.chat.id);
                    return respond(());
                }
                if let Err(e) = dispatch_command(bot, msg, cmd, ctx).await {
                    log::error!("Command handler failed: {:#}", e);
                }
                respond(())
            },
        ),
    );

    log::info!("Bot is running. Press Ctrl+C to stop.");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, me])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn dispatch_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    ctx: Arc<BotContext>,
) -> Result<()> {
    match cmd {
        Command::Start => handle_start(bot, msg).await,
        Command::Help => handle_help(bot, msg).await,
        Command::Generate => handle_generate(bot, msg, ctx).await,
        Command::PublishNow => handle_publish_now(bot, msg, ctx).await,
        Command::Status => handle_status(bot, msg, ctx).await,
        Command::Schedule(args) => handle_schedule(bot, msg, ctx, args).await,
        Command::Batch(args) => handle_batch(bot, msg, ctx, args).await,
    }
}

/// Fetch bot identity with bounded backoff; transient network trouble at
/// startup should not kill the process.
async fn retry_get_me(bot: &Bot) -> Result<Me> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    for attempt in 1..=max_retries {
        match bot.get_me().await {
            Ok(me) => return Ok(me),
            Err(e) if attempt == max_retries => {
                anyhow::bail!(
                    "Failed to connect to Telegram API after {} attempts: {}",
                    max_retries,
                    e
                );
            }
            Err(e) => {
                log::warn!(
                    "Telegram API not reachable (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
            }
        }
    }

    unreachable!()
}
