//! Cron-driven run loop.
//!
//! Expressions are evaluated in UTC. Missed occurrences are never backfilled:
//! after each run the loop waits for the next occurrence after "now".

use std::{future::Future, str::FromStr};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use log::{error, info};

use crate::{config::ScheduleConfig, pipeline::Pipeline};

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid cron expression: {0}")]
    CronParse(String),
    #[error("Schedule `{0}` has no future occurrence")]
    Exhausted(String),
}

type Result<T> = std::result::Result<T, ScheduleError>;

/// Normalise a cron expression to the 6-field form the `cron` crate expects.
///
/// Standard 5-field expressions get a leading `0` seconds field; `@daily`
/// style shorthands and 6/7-field expressions are passed through.
fn normalize_cron_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

fn parse(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron_expr(expr))
        .map_err(|e| ScheduleError::CronParse(format!("{expr}: {e}")))
}

/// Next occurrence of `expr` strictly after `after`.
pub fn next_run_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse(expr)?
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::Exhausted(expr.to_string()))
}

#[derive(Debug, Clone)]
pub struct Schedule {
    expr: String,
    schedule: cron::Schedule,
    not_before: DateTime<Utc>,
}

impl Schedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            expr: config.cron.clone(),
            schedule: parse(&config.cron)?,
            not_before: config.start_date.and_time(NaiveTime::default()).and_utc(),
        })
    }

    /// Next fire time after `now`, never earlier than the start date.
    pub fn next_after(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let from = if now < self.not_before {
            self.not_before - Duration::seconds(1)
        } else {
            now
        };

        self.schedule
            .after(&from)
            .next()
            .ok_or_else(|| ScheduleError::Exhausted(self.expr.clone()))
    }
}

/// Run `pipeline` on `schedule` until `shutdown` resolves.
///
/// Failed runs are logged and do not stop the loop. Shutdown is only
/// observed between runs.
pub async fn run_on_schedule<S>(pipeline: &Pipeline, schedule: &Schedule, shutdown: S) -> Result<()>
where
    S: Future,
{
    tokio::pin!(shutdown);

    loop {
        let now = Utc::now();
        let next = schedule.next_after(now)?;
        let wait = (next - now).to_std().unwrap_or_default();
        info!("Next run at {next} (in {}s)", wait.as_secs());

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested; stopping scheduler");
                return Ok(());
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match pipeline.run().await {
            Ok(report) => info!("Scheduled run wrote {}", report.object_uri),
            Err(e) => error!("Scheduled run failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        error::PipelineError,
        notify::Notifications,
        source::WeatherSource,
        storage::{ObjectStore, StorageError},
    };
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use tokio::sync::Notify;

    /// Ready endpoint whose extraction always fails. Signals after `stop_after` runs.
    #[derive(Debug)]
    struct FailingSource {
        runs: Arc<AtomicUsize>,
        stop_after: usize,
        done: Arc<Notify>,
    }

    #[async_trait]
    impl WeatherSource for FailingSource {
        fn describe(&self) -> String {
            "failing source".into()
        }

        async fn probe(&self) -> crate::error::Result<()> {
            Ok(())
        }

        async fn extract(&self) -> crate::error::Result<serde_json::Value> {
            if self.runs.fetch_add(1, Ordering::SeqCst) + 1 == self.stop_after {
                self.done.notify_one();
            }
            Err(PipelineError::Transform("no reading".into()))
        }
    }

    #[derive(Debug)]
    struct NullStore;

    #[async_trait]
    impl ObjectStore for NullStore {
        async fn put(
            &self,
            name: &str,
            _body: &[u8],
            _content_type: &str,
        ) -> std::result::Result<String, StorageError> {
            Ok(name.to_string())
        }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn daily_fires_at_next_midnight() {
        let next = next_run_after("@daily", utc(2024, 9, 12, 15, 30, 0)).unwrap();
        assert_eq!(next, utc(2024, 9, 13, 0, 0, 0));
    }

    #[test]
    fn five_field_expressions_are_normalised() {
        assert_eq!(normalize_cron_expr("0 6 * * *"), "0 0 6 * * *");
        assert_eq!(normalize_cron_expr("@daily"), "@daily");

        let next = next_run_after("0 6 * * *", utc(2024, 9, 12, 7, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 9, 13, 6, 0, 0));
    }

    #[test]
    fn invalid_expression_is_reported() {
        let err = next_run_after("every day", utc(2024, 9, 12, 0, 0, 0)).unwrap_err();
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn start_date_delays_first_run() {
        let schedule = Schedule::from_config(&ScheduleConfig {
            cron: "@daily".into(),
            start_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            catchup: false,
        })
        .unwrap();

        let next = schedule.next_after(utc(2024, 9, 12, 15, 0, 0)).unwrap();
        assert_eq!(next, utc(2030, 1, 1, 0, 0, 0));
    }

    #[test]
    fn missed_runs_are_skipped() {
        let schedule = Schedule::from_config(&ScheduleConfig::default()).unwrap();

        // Long after the start date, only the next occurrence is returned.
        let next = schedule.next_after(utc(2025, 3, 1, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2025, 3, 2, 0, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_runs_do_not_stop_the_loop_until_shutdown() {
        let runs = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Notify::new());
        let source =
            FailingSource { runs: runs.clone(), stop_after: 2, done: done.clone() };

        let pipeline = Pipeline::new(
            &Config::default(),
            Box::new(source),
            Box::new(NullStore),
            Notifications::new(true, true, Vec::new()),
        );
        let schedule = Schedule::from_config(&ScheduleConfig {
            cron: "* * * * * *".into(),
            ..ScheduleConfig::default()
        })
        .unwrap();

        run_on_schedule(&pipeline, &schedule, async move { done.notified().await })
            .await
            .unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
