//! Sequential runner for the three tasks of a run.
//!
//! `is_weather_api_ready` gates `extract_weather_data`, which hands its JSON
//! body directly to `transform_load_weather_data`. Each task is wrapped in
//! the retry policy; only retryable errors are re-attempted.

use std::future::Future;

use chrono::{Local, NaiveDateTime};
use log::{error, info, warn};
use tokio::time::{Instant, sleep};

use crate::{
    config::{Config, RetryConfig, SensorConfig, TransformConfig},
    error::{PipelineError, Result, RunError, TaskId},
    load::{CSV_CONTENT_TYPE, object_name, render_csv},
    model::WeatherRecord,
    notify::{EventKind, Notifications, TaskEvent, notifications_from_config},
    secrets::SecretProvider,
    source::{WeatherSource, http_client, source_from_config},
    storage::{ObjectStore, store_from_config},
    transform::{decode, transform},
};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: NaiveDateTime,
    pub object_uri: String,
    pub bytes_written: usize,
    pub record: WeatherRecord,
    /// Attempts used per task, in execution order.
    pub attempts: Vec<(TaskId, u32)>,
}

/// Result of the transform & load task.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub record: WeatherRecord,
    pub object_uri: String,
    pub bytes_written: usize,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[derive(Debug)]
pub struct Pipeline {
    owner: String,
    city: String,
    file_prefix: String,
    transform: TransformConfig,
    retry: RetryConfig,
    sensor: SensorConfig,
    source: Box<dyn WeatherSource>,
    store: Box<dyn ObjectStore>,
    notifications: Notifications,
    clock: fn() -> NaiveDateTime,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        source: Box<dyn WeatherSource>,
        store: Box<dyn ObjectStore>,
        notifications: Notifications,
    ) -> Self {
        Self {
            owner: config.owner.clone(),
            city: config.source.city.clone(),
            file_prefix: config.sink.file_prefix.clone(),
            transform: config.transform,
            retry: config.retry,
            sensor: config.sensor,
            source,
            store,
            notifications,
            clock: local_now,
        }
    }

    /// Build every collaborator from `config`, resolving secrets now.
    pub fn from_config(config: &Config, secrets: &dyn SecretProvider) -> anyhow::Result<Self> {
        config.validate()?;

        let http = http_client(&config.source)?;

        let source = source_from_config(&config.source, secrets, http.clone())?;
        let store = store_from_config(&config.sink, secrets, http)?;
        let notifications = notifications_from_config(&config.notify, secrets)?;

        Ok(Self::new(config, source, store, notifications))
    }

    /// Replace the wall clock used for run timestamps and object names.
    pub fn with_clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// Probe until the endpoint answers 2xx or the sensor times out.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.sensor.timeout();
        let poke_interval = self.sensor.poke_interval();

        loop {
            match self.source.probe().await {
                Ok(()) => {
                    info!("{} is ready", self.source.describe());
                    return Ok(());
                }
                Err(e) if Instant::now() + poke_interval > deadline => {
                    return Err(PipelineError::NotReady(format!(
                        "no success within {}s: {e}",
                        self.sensor.timeout_secs
                    )));
                }
                Err(e) => {
                    info!("Endpoint not ready ({e}); poking again in {poke_interval:?}");
                    sleep(poke_interval).await;
                }
            }
        }
    }

    pub async fn extract(&self) -> Result<serde_json::Value> {
        self.source.extract().await
    }

    /// Convert, render and upload one reading.
    pub async fn transform_load(&self, body: &serde_json::Value) -> Result<Loaded> {
        let raw = decode(body)?;
        let record = transform(&raw, self.transform.unit)?;
        let csv = render_csv(&record, self.transform.timestamps)?;

        let name = object_name(&self.file_prefix, &self.city, (self.clock)());
        let object_uri = self.store.put(&name, &csv, CSV_CONTENT_TYPE).await?;

        Ok(Loaded { record, object_uri, bytes_written: csv.len() })
    }

    /// Execute one full run.
    pub async fn run(&self) -> std::result::Result<RunReport, RunError> {
        let started_at = (self.clock)();
        info!("Run started at {started_at} for {}", self.source.describe());

        let ((), ready_attempts) = self
            .run_task(TaskId::IsWeatherApiReady, started_at, || self.wait_until_ready())
            .await?;

        let (body, extract_attempts) = self
            .run_task(TaskId::ExtractWeatherData, started_at, || self.extract())
            .await?;

        let (loaded, load_attempts) = self
            .run_task(TaskId::TransformLoadWeatherData, started_at, || {
                self.transform_load(&body)
            })
            .await?;

        info!("Run finished: {} ({} bytes)", loaded.object_uri, loaded.bytes_written);

        Ok(RunReport {
            started_at,
            object_uri: loaded.object_uri,
            bytes_written: loaded.bytes_written,
            record: loaded.record,
            attempts: vec![
                (TaskId::IsWeatherApiReady, ready_attempts),
                (TaskId::ExtractWeatherData, extract_attempts),
                (TaskId::TransformLoadWeatherData, load_attempts),
            ],
        })
    }

    async fn run_task<T, F, Fut>(
        &self,
        task: TaskId,
        started_at: NaiveDateTime,
        mut attempt_fn: F,
    ) -> std::result::Result<(T, u32), RunError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;

        loop {
            info!("[{task}] attempt {attempt}/{max_attempts}");

            let err = match attempt_fn().await {
                Ok(value) => {
                    info!("[{task}] succeeded");
                    return Ok((value, attempt));
                }
                Err(e) => e,
            };

            let retry = err.is_retryable() && attempt < max_attempts;
            let event = TaskEvent {
                kind: if retry { EventKind::Retry } else { EventKind::Failure },
                task,
                attempt,
                max_attempts,
                owner: self.owner.clone(),
                run_started_at: started_at,
                error: err.to_string(),
            };
            self.notifications.emit(&event).await;

            if !retry {
                error!("[{task}] failed: {err}");
                return Err(RunError { task, attempts: attempt, source: err });
            }

            warn!("[{task}] failed: {err}; retrying in {:?}", self.retry.retry_delay());
            sleep(self.retry.retry_delay()).await;
            attempt += 1;
        }
    }
}
