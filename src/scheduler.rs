/// Scheduling engine.
///
/// The schedule predicate and the forward search are pure functions over
/// the declarative config; the scheduler itself is a thin stateful
/// wrapper that adds the inter-post spacing guard and the polling loop.
/// The loop tolerates any single tick failure: errors are logged and the
/// next poll proceeds.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, FixedOffset, Timelike, TimeZone, Utc};
use std::sync::Arc;

use crate::config::{Config, ScheduleConfig, ScheduleMode};
use crate::pipeline::{PostPipeline, PublishOutcome};

/// Is `now` a valid publication moment under `config`?
///
/// Interval slots are checked on whole minutes, which tolerates poll
/// jitter anywhere inside the slot minute without matching the minute
/// after it.
pub fn slot_matches(config: &ScheduleConfig, now: DateTime<FixedOffset>) -> bool {
    if !config.enabled {
        return false;
    }
    if !config
        .days_of_week
        .contains(&now.weekday().num_days_from_monday())
    {
        return false;
    }

    match &config.mode {
        ScheduleMode::SpecificTimes(times) => times
            .iter()
            .any(|t| now.hour() == t.hour && now.minute() == t.minute),
        ScheduleMode::IntervalWindow {
            start,
            end,
            every_minutes,
        } => {
            let minute_of_day = now.hour() * 60 + now.minute();
            let start_m = start.minutes_from_midnight();
            let end_m = end.minutes_from_midnight();
            if minute_of_day < start_m || minute_of_day > end_m {
                return false;
            }
            (minute_of_day - start_m) % every_minutes == 0
        }
    }
}

/// The nearest future slot within the next 7 days, or None when the
/// schedule can never fire (disabled, no days, no times).
pub fn next_slot(
    config: &ScheduleConfig,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    if !config.enabled || config.days_of_week.is_empty() {
        return None;
    }
    let tz = now.timezone();

    match &config.mode {
        ScheduleMode::SpecificTimes(times) => {
            if times.is_empty() {
                return None;
            }
            let mut best: Option<DateTime<FixedOffset>> = None;
            for day_offset in 0..7 {
                let date = now.date_naive() + Duration::days(day_offset);
                if !config
                    .days_of_week
                    .contains(&date.weekday().num_days_from_monday())
                {
                    continue;
                }
                for t in times {
                    let Some(naive) = date.and_hms_opt(t.hour, t.minute, 0) else {
                        continue;
                    };
                    let Some(candidate) = tz.from_local_datetime(&naive).single() else {
                        continue;
                    };
                    if candidate > now && best.map_or(true, |b| candidate < b) {
                        best = Some(candidate);
                    }
                }
            }
            best
        }
        ScheduleMode::IntervalWindow {
            start,
            end,
            every_minutes,
        } => {
            for day_offset in 0..7 {
                let date = now.date_naive() + Duration::days(day_offset);
                if !config
                    .days_of_week
                    .contains(&date.weekday().num_days_from_monday())
                {
                    continue;
                }

                let Some(start_naive) = date.and_hms_opt(start.hour, start.minute, 0) else {
                    continue;
                };
                let Some(end_naive) = date.and_hms_opt(end.hour, end.minute, 0) else {
                    continue;
                };
                let Some(window_start) = tz.from_local_datetime(&start_naive).single() else {
                    continue;
                };
                let Some(window_end) = tz.from_local_datetime(&end_naive).single() else {
                    continue;
                };

                // Today's window already closed
                if day_offset == 0 && now > window_end {
                    continue;
                }
                // Window not yet open: its first slot is next
                if now < window_start {
                    return Some(window_start);
                }

                let elapsed = (now - window_start).num_minutes();
                let intervals_passed = elapsed / *every_minutes as i64;
                let candidate =
                    window_start + Duration::minutes((intervals_passed + 1) * *every_minutes as i64);
                if candidate <= window_end {
                    return Some(candidate);
                }
                // Past the last slot of the day; try the following days
            }
            None
        }
    }
}

/// Decides once per poll tick whether to publish, and enforces minimum
/// spacing between automatic publications.
pub struct PostScheduler {
    config: Arc<Config>,
    pipeline: Arc<PostPipeline>,
    last_publication_time: Option<DateTime<FixedOffset>>,
    spacing: Duration,
}

impl PostScheduler {
    pub fn new(config: Arc<Config>, pipeline: Arc<PostPipeline>) -> Self {
        let spacing = Duration::minutes(config.spacing_minutes);
        log::info!(
            "Scheduler initialized: enabled={}, days={:?}, spacing={}m",
            config.schedule.enabled,
            config.schedule.days_of_week,
            config.spacing_minutes
        );
        Self {
            config,
            pipeline,
            last_publication_time: None,
            spacing,
        }
    }

    pub fn last_publication_time(&self) -> Option<DateTime<FixedOffset>> {
        self.last_publication_time
    }

    /// Status reporting: the nearest future slot as of `now`.
    pub fn next_scheduled_time(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        next_slot(&self.config.schedule, now)
    }

    /// One scheduling decision. Publishes when the slot matches and the
    /// spacing guard allows it.
    pub async fn tick(&mut self, now: DateTime<FixedOffset>) -> Result<()> {
        if !slot_matches(&self.config.schedule, now) {
            return Ok(());
        }

        if let Some(last) = self.last_publication_time {
            if now - last <= self.spacing {
                log::debug!(
                    "Slot matched but the last publication was {}s ago, skipping",
                    (now - last).num_seconds()
                );
                return Ok(());
            }
        }

        log::info!("Publication slot matched at {}", now.format("%Y-%m-%d %H:%M:%S"));

        let outcome = self
            .pipeline
            .generate_and_publish(now.with_timezone(&Utc), true)
            .await?;

        if matches!(outcome, PublishOutcome::Published { .. }) {
            self.last_publication_time = Some(now);
        }

        Ok(())
    }

    /// The polling loop. Never terminates; every failure inside a cycle
    /// is logged and the loop sleeps on to the next poll.
    pub async fn run(mut self) {
        log::info!(
            "Scheduler loop started (poll every {}s)",
            self.config.poll_interval_secs
        );

        if self.config.generate_on_startup && self.config.schedule.enabled {
            log::info!("generate_on_startup set, publishing one post now");
            let now = Utc::now().with_timezone(&self.config.tz_offset);
            match self.pipeline.generate_and_publish(now.with_timezone(&Utc), true).await {
                Ok(PublishOutcome::Published { post_id }) => {
                    log::info!("Startup post {} published", post_id);
                    self.last_publication_time = Some(now);
                }
                Ok(outcome) => log::warn!("Startup publication did not complete: {:?}", outcome),
                Err(e) => log::error!("Startup publication failed: {:#}", e),
            }
        }

        loop {
            let now = Utc::now().with_timezone(&self.config.tz_offset);

            if let Err(e) = self.tick(now).await {
                log::error!("Scheduler tick failed: {:#}", e);
            }

            if let Err(e) = self
                .pipeline
                .db()
                .purge_sent_older_than(self.config.retention_days)
                .await
            {
                log::error!("Retention sweep failed: {:#}", e);
            }

            tokio::time::sleep(std::time::Duration::from_secs(
                self.config.poll_interval_secs,
            ))
            .await;
        }
    }
}
