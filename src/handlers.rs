/// Operator command handlers.
///
/// Thin adapters over the pipeline and the store: every command either
/// short-circuits the schedule (generate, publish now) or inspects it
/// (status). Replies go back to the chat the command came from.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::sync::Arc;
use teloxide::prelude::*;

use crate::config::{Config, ScheduleMode};
use crate::pipeline::{PostPipeline, PublishOutcome};
use crate::scheduler::next_slot;

/// Everything the command handlers need, injected once at startup.
pub struct BotContext {
    pub config: Arc<Config>,
    pub pipeline: Arc<PostPipeline>,
}

/// When an admin chat is configured, commands from anywhere else are
/// ignored.
pub fn is_authorized(config: &Config, msg: &Message) -> bool {
    config.admin_chat_id.map_or(true, |id| msg.chat.id.0 == id)
}

pub async fn handle_start(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        "Channel content bot.\n\n\
         I generate and publish posts to the configured channel on a schedule.\n\
         Use /help for the command list.",
    )
    .await?;
    Ok(())
}

pub async fn handle_help(bot: Bot, msg: Message) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        "Commands:\n\
         /generate - generate one post into the cache\n\
         /publishnow - publish immediately (cache first, then fresh)\n\
         /status - schedule state, next slot, queue counters\n\
         /schedule YYYY-MM-DD HH:MM | text - enqueue one post\n\
         /batch - one 'YYYY-MM-DD HH:MM | text' entry per line",
    )
    .await?;
    Ok(())
}

/// /generate: produce a post into the cache without publishing.
pub async fn handle_generate(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let reply = match ctx.pipeline.generate_to_cache().await? {
        Some(id) => {
            let cached = ctx.pipeline.db().cache_unused_count().await?;
            format!("Generated post {} into the cache ({} waiting).", id, cached)
        }
        None => "Generation failed, nothing cached. Try again later.".to_string(),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// /publishnow: run the pipeline immediately, bypassing the schedule.
pub async fn handle_publish_now(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let reply = match ctx.pipeline.generate_and_publish(Utc::now(), false).await? {
        PublishOutcome::Published { post_id } => {
            format!("Post {} published.", post_id)
        }
        PublishOutcome::GenerationFailed => {
            "Generation failed, nothing was published.".to_string()
        }
        PublishOutcome::DeliveryFailed { post_id, attempts } => format!(
            "Post {} could not be delivered after {} attempts; it stays in the queue unsent.",
            post_id, attempts
        ),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// /status: schedule state and queue counters.
pub async fn handle_status(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let now = Utc::now().with_timezone(&ctx.config.tz_offset);
    let next = next_slot(&ctx.config.schedule, now);
    let pending = ctx.pipeline.db().pending_posts().await?.len();
    let cached = ctx.pipeline.db().cache_unused_count().await?;

    let next_line = match next {
        Some(t) => t.format("%Y-%m-%d %H:%M").to_string(),
        None => "never (schedule disabled or empty)".to_string(),
    };

    let reply = format!(
        "Schedule: {} ({})\nNext slot: {}\nPending posts: {}\nCached posts: {}",
        if ctx.config.schedule.enabled {
            "enabled"
        } else {
            "disabled"
        },
        describe_mode(&ctx.config.schedule.mode),
        next_line,
        pending,
        cached
    );
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// /schedule: enqueue a single explicit post.
pub async fn handle_schedule(
    bot: Bot,
    msg: Message,
    ctx: Arc<BotContext>,
    args: String,
) -> Result<()> {
    let reply = match parse_schedule_entry(&args, ctx.config.tz_offset) {
        Ok((when, text)) => {
            let id = ctx
                .pipeline
                .db()
                .add_scheduled_post(when, &text, false)
                .await?;
            format!(
                "Post {} scheduled for {}.",
                id,
                when.with_timezone(&ctx.config.tz_offset).format("%Y-%m-%d %H:%M")
            )
        }
        Err(e) => format!("Could not parse that: {:#}", e),
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// /batch: one schedule entry per line.
pub async fn handle_batch(bot: Bot, msg: Message, ctx: Arc<BotContext>, args: String) -> Result<()> {
    let mut accepted = 0;
    let mut rejected = 0;
    let mut first_error = None;

    for line in args.lines().filter(|l| !l.trim().is_empty()) {
        match parse_schedule_entry(line, ctx.config.tz_offset) {
            Ok((when, text)) => {
                ctx.pipeline
                    .db()
                    .add_scheduled_post(when, &text, false)
                    .await?;
                accepted += 1;
            }
            Err(e) => {
                rejected += 1;
                if first_error.is_none() {
                    first_error = Some(format!("{:#}", e));
                }
            }
        }
    }

    let mut reply = format!("Scheduled {} posts, rejected {}.", accepted, rejected);
    if let Some(error) = first_error {
        reply.push_str(&format!(" First problem: {}", error));
    }
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

fn describe_mode(mode: &ScheduleMode) -> String {
    match mode {
        ScheduleMode::SpecificTimes(times) => {
            let listed = times
                .iter()
                .map(|t| format!("{:02}:{:02}", t.hour, t.minute))
                .collect::<Vec<_>>()
                .join(", ");
            format!("at {}", listed)
        }
        ScheduleMode::IntervalWindow {
            start,
            end,
            every_minutes,
        } => format!(
            "every {}m between {:02}:{:02} and {:02}:{:02}",
            every_minutes, start.hour, start.minute, end.hour, end.minute
        ),
    }
}

/// Parses "YYYY-MM-DD HH:MM | text" in the channel timezone.
pub fn parse_schedule_entry(line: &str, tz: FixedOffset) -> Result<(DateTime<Utc>, String)> {
    let (when, text) = line
        .split_once('|')
        .context("Expected 'YYYY-MM-DD HH:MM | text'")?;

    let text = text.trim();
    if text.is_empty() {
        bail!("Post text is empty");
    }

    let naive = NaiveDateTime::parse_from_str(when.trim(), "%Y-%m-%d %H:%M")
        .with_context(|| format!("Invalid timestamp '{}'", when.trim()))?;
    let local = tz
        .from_local_datetime(&naive)
        .single()
        .with_context(|| format!("Ambiguous timestamp '{}'", when.trim()))?;

    Ok((local.with_timezone(&Utc), text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeOfDay;

    #[test]
    fn parses_schedule_entry_in_channel_timezone() {
        let tz = FixedOffset::east_opt(3 * 3600).unwrap();
        let (when, text) =
            parse_schedule_entry("2026-08-03 12:00 | Afternoon thoughts", tz).unwrap();

        assert_eq!(text, "Afternoon thoughts");
        // 12:00 at +03:00 is 09:00 UTC
        assert_eq!(
            when,
            Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_malformed_entries() {
        let tz = FixedOffset::east_opt(0).unwrap();
        assert!(parse_schedule_entry("no pipe here", tz).is_err());
        assert!(parse_schedule_entry("2026-13-99 12:00 | text", tz).is_err());
        assert!(parse_schedule_entry("2026-08-03 12:00 |   ", tz).is_err());
        assert!(parse_schedule_entry("12:00 | missing date", tz).is_err());
    }

    #[test]
    fn text_may_itself_contain_pipes() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let (_, text) =
            parse_schedule_entry("2026-08-03 08:30 | a | b | c", tz).unwrap();
        assert_eq!(text, "a | b | c");
    }

    #[test]
    fn describes_both_schedule_modes() {
        let specific = ScheduleMode::SpecificTimes(vec![TimeOfDay::new(9, 0), TimeOfDay::new(18, 30)]);
        assert_eq!(describe_mode(&specific), "at 09:00, 18:30");

        let window = ScheduleMode::IntervalWindow {
            start: TimeOfDay::new(9, 0),
            end: TimeOfDay::new(17, 0),
            every_minutes: 60,
        };
        assert_eq!(describe_mode(&window), "every 60m between 09:00 and 17:00");
    }
}
