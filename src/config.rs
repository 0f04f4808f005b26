/// Configuration module for managing environment variables and the
/// declarative posting schedule.
///
/// All values are loaded once at startup (typically from a .env file);
/// there is no hot-reload.

use anyhow::{bail, Context, Result};
use chrono::FixedOffset;
use std::env;
use std::str::FromStr;
use teloxide::types::{ChatId, Recipient};

/// A wall-clock time of day used by the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Self {
        Self { hour, minute }
    }

    /// Parses "HH:MM".
    pub fn parse(s: &str) -> Result<Self> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .with_context(|| format!("Invalid time '{}', expected HH:MM", s))?;
        let hour: u32 = h.parse().with_context(|| format!("Invalid hour in '{}'", s))?;
        let minute: u32 = m.parse().with_context(|| format!("Invalid minute in '{}'", s))?;
        if hour > 23 || minute > 59 {
            bail!("Time '{}' out of range", s);
        }
        Ok(Self { hour, minute })
    }

    pub fn minutes_from_midnight(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

/// Exactly one scheduling mode is in effect per evaluation. Specific times
/// take precedence over the interval window when both are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Publish at each listed wall-clock time.
    SpecificTimes(Vec<TimeOfDay>),
    /// Publish every `every_minutes` minutes between `start` and `end`.
    IntervalWindow {
        start: TimeOfDay,
        end: TimeOfDay,
        every_minutes: u32,
    },
}

/// Declarative publication schedule, read-only at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Weekday indices, Monday = 0 .. Sunday = 6.
    pub days_of_week: Vec<u32>,
    pub mode: ScheduleMode,
}

/// How post text is produced for each publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostMode {
    /// Theme + format + ending drawn from fixed tables.
    Themed,
    /// Themed, but the model is asked for a JSON payload first.
    Structured,
    /// A handful of keywords sampled from a fixed dictionary.
    Keywords,
    /// Recent filtered headlines embedded into the prompt.
    News,
}

impl FromStr for PostMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "themed" => Ok(Self::Themed),
            "structured" => Ok(Self::Structured),
            "keywords" => Ok(Self::Keywords),
            "news" => Ok(Self::News),
            other => bail!("Unknown POST_MODE '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token from BotFather
    pub telegram_token: String,

    /// Target channel: "@username" or a numeric chat id
    pub channel_id: String,

    /// DeepSeek API key for text generation
    pub deepseek_api_key: String,

    /// SQLite database URL (e.g., "sqlite:data/scheduled_posts.db")
    pub database_url: String,

    /// Channel timezone as a fixed UTC offset
    pub tz_offset: FixedOffset,

    /// Scheduler poll interval in seconds
    pub poll_interval_secs: u64,

    /// Minimum spacing between automatic publications, minutes
    pub spacing_minutes: i64,

    /// Sent posts older than this many days are purged
    pub retention_days: u32,

    /// Delivery attempts before giving up on a post
    pub delivery_retries: u32,

    /// Fixed delay between delivery attempts, seconds
    pub delivery_retry_secs: u64,

    /// Post generation mode
    pub post_mode: PostMode,

    /// Publish one post immediately on startup when scheduling is enabled
    pub generate_on_startup: bool,

    /// When set, operator commands are honored only from this chat
    pub admin_chat_id: Option<i64>,

    /// RSS feeds for news mode, (name, url); empty means built-in defaults
    pub news_feeds: Vec<(String, String)>,

    /// Publication schedule
    pub schedule: ScheduleConfig,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if any required environment variable is missing
    /// or malformed. Startup must not proceed silently misconfigured.
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let channel_id = env::var("CHANNEL_ID").context("CHANNEL_ID must be set")?;
        if !channel_id.starts_with('@') && channel_id.parse::<i64>().is_err() {
            bail!("CHANNEL_ID must be '@username' or a numeric chat id");
        }

        Ok(Config {
            telegram_token: env::var("BOT_TOKEN").context("BOT_TOKEN must be set")?,

            channel_id,

            deepseek_api_key: env::var("DEEPSEEK_API_KEY")
                .context("DEEPSEEK_API_KEY must be set")?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:data/scheduled_posts.db".to_string()),

            tz_offset: parse_utc_offset(
                &env::var("TZ_OFFSET").unwrap_or_else(|_| "+03:00".to_string()),
            )?,

            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            spacing_minutes: env::var("SPACING_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            retention_days: env::var("RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),

            delivery_retries: env::var("DELIVERY_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),

            delivery_retry_secs: env::var("DELIVERY_RETRY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),

            post_mode: env::var("POST_MODE")
                .unwrap_or_else(|_| "themed".to_string())
                .parse()?,

            generate_on_startup: env::var("GENERATE_ON_STARTUP")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),

            admin_chat_id: env::var("ADMIN_CHAT_ID").ok().and_then(|v| v.parse().ok()),

            news_feeds: env::var("NEWS_FEEDS")
                .ok()
                .map(|v| parse_news_feeds(&v))
                .transpose()?
                .unwrap_or_default(),

            schedule: parse_schedule_from_env()?,
        })
    }

    /// Recipient for channel deliveries.
    pub fn channel_recipient(&self) -> Recipient {
        if self.channel_id.starts_with('@') {
            Recipient::ChannelUsername(self.channel_id.clone())
        } else {
            // Numeric form validated in from_env
            Recipient::Id(ChatId(self.channel_id.parse().unwrap_or_default()))
        }
    }

    /// Validate that the database is reachable before the bot starts.
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        let options = sqlx::sqlite::SqliteConnectOptions::from_str(&self.database_url)
            .context("Invalid DATABASE_URL")?
            .create_if_missing(true);

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open SQLite database")?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .context("Database connection test query failed")?;

        log::info!("Configuration validated successfully");
        Ok(())
    }
}

/// Parses a "+03:00" / "-05:30" style UTC offset.
fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let s = s.trim();
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => (1, s),
    };
    let t = TimeOfDay::parse(rest).with_context(|| format!("Invalid TZ_OFFSET '{}'", s))?;
    let secs = sign * (t.minutes_from_midnight() as i32) * 60;
    FixedOffset::east_opt(secs).with_context(|| format!("TZ_OFFSET '{}' out of range", s))
}

/// Parses "name=url;name=url" feed overrides.
fn parse_news_feeds(s: &str) -> Result<Vec<(String, String)>> {
    let mut feeds = Vec::new();
    for entry in s.split(';').filter(|e| !e.trim().is_empty()) {
        let (name, url) = entry
            .split_once('=')
            .with_context(|| format!("Invalid NEWS_FEEDS entry '{}', expected name=url", entry))?;
        feeds.push((name.trim().to_string(), url.trim().to_string()));
    }
    Ok(feeds)
}

fn parse_schedule_from_env() -> Result<ScheduleConfig> {
    let enabled = env::var("SCHEDULE_ENABLED")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);

    let days_of_week = match env::var("SCHEDULE_DAYS") {
        Ok(raw) => parse_days(&raw)?,
        Err(_) => (0..7).collect(),
    };

    // Specific times take precedence over the interval window.
    let specific = env::var("SCHEDULE_TIMES").unwrap_or_default();
    let mode = if !specific.trim().is_empty() {
        let times = specific
            .split(',')
            .filter(|t| !t.trim().is_empty())
            .map(TimeOfDay::parse)
            .collect::<Result<Vec<_>>>()?;
        ScheduleMode::SpecificTimes(times)
    } else {
        let start = TimeOfDay::parse(
            &env::var("SCHEDULE_START").unwrap_or_else(|_| "09:00".to_string()),
        )?;
        let end =
            TimeOfDay::parse(&env::var("SCHEDULE_END").unwrap_or_else(|_| "21:00".to_string()))?;
        let every_minutes = env::var("SCHEDULE_INTERVAL_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(180);
        if every_minutes == 0 {
            bail!("SCHEDULE_INTERVAL_MINUTES must be positive");
        }
        if end.minutes_from_midnight() < start.minutes_from_midnight() {
            bail!("SCHEDULE_END must not be earlier than SCHEDULE_START");
        }
        ScheduleMode::IntervalWindow {
            start,
            end,
            every_minutes,
        }
    };

    Ok(ScheduleConfig {
        enabled,
        days_of_week,
        mode,
    })
}

fn parse_days(raw: &str) -> Result<Vec<u32>> {
    let mut days = Vec::new();
    for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let d: u32 = part
            .trim()
            .parse()
            .with_context(|| format!("Invalid SCHEDULE_DAYS entry '{}'", part))?;
        if d > 6 {
            bail!("SCHEDULE_DAYS entries must be 0-6 (Monday=0), got {}", d);
        }
        if !days.contains(&d) {
            days.push(d);
        }
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_of_day() {
        assert_eq!(TimeOfDay::parse("09:00").unwrap(), TimeOfDay::new(9, 0));
        assert_eq!(TimeOfDay::parse(" 23:59 ").unwrap(), TimeOfDay::new(23, 59));
        assert!(TimeOfDay::parse("24:00").is_err());
        assert!(TimeOfDay::parse("12").is_err());
        assert!(TimeOfDay::parse("12:60").is_err());
    }

    #[test]
    fn parses_utc_offset() {
        assert_eq!(
            parse_utc_offset("+03:00").unwrap(),
            FixedOffset::east_opt(3 * 3600).unwrap()
        );
        assert_eq!(
            parse_utc_offset("-05:30").unwrap(),
            FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap()
        );
        assert!(parse_utc_offset("3h").is_err());
    }

    #[test]
    fn parses_days_and_rejects_bad_indices() {
        assert_eq!(parse_days("0,1,2").unwrap(), vec![0, 1, 2]);
        assert_eq!(parse_days("5,5,6").unwrap(), vec![5, 6]);
        assert!(parse_days("7").is_err());
    }

    #[test]
    fn parses_news_feed_overrides() {
        let feeds =
            parse_news_feeds("bbc=https://bbc.example/rss;ars=https://ars.example/feed").unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].0, "bbc");
        assert!(parse_news_feeds("no-equals-here").is_err());
    }

    #[test]
    fn specific_times_take_precedence_over_the_interval_window() {
        // The only test touching these variables, so no cross-test races
        env::set_var("SCHEDULE_TIMES", "09:00,12:30");
        env::set_var("SCHEDULE_START", "08:00");
        env::set_var("SCHEDULE_END", "20:00");
        env::set_var("SCHEDULE_INTERVAL_MINUTES", "60");

        let schedule = parse_schedule_from_env().unwrap();
        assert_eq!(
            schedule.mode,
            ScheduleMode::SpecificTimes(vec![TimeOfDay::new(9, 0), TimeOfDay::new(12, 30)])
        );

        env::remove_var("SCHEDULE_TIMES");
        let schedule = parse_schedule_from_env().unwrap();
        assert!(matches!(
            schedule.mode,
            ScheduleMode::IntervalWindow { every_minutes: 60, .. }
        ));

        env::remove_var("SCHEDULE_START");
        env::remove_var("SCHEDULE_END");
        env::remove_var("SCHEDULE_INTERVAL_MINUTES");
    }

    #[test]
    fn post_mode_from_str() {
        assert_eq!("themed".parse::<PostMode>().unwrap(), PostMode::Themed);
        assert_eq!("NEWS".parse::<PostMode>().unwrap(), PostMode::News);
        assert!("dialogue".parse::<PostMode>().is_err());
    }
}
