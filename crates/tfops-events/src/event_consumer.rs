use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::event_pipeline::{
    EventDisposition, EventPipeline, EventProcessingReport, PipelineStage,
};
use crate::event_queue::{EventQueue, EventQueueResult};

/// Queue group shared by every consumer of merge-request events.
pub const DEFAULT_CONSUMER_GROUP: &str = "tfops_event_worker";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    pub consumer_group: String,
    pub workers: usize,
    pub poll_interval: Duration,
    pub requeue_interval: Duration,
    /// Claims older than this are considered abandoned and redelivered.
    pub visibility_timeout: Duration,
    pub transient_error_backoff_initial: Duration,
    pub transient_error_backoff_max: Duration,
    /// Deliveries that fail this many times are dead-lettered.
    pub max_attempts: u32,
    /// Delay before the first redelivery of a failed event; doubles per
    /// attempt up to `redelivery_delay_max`.
    pub redelivery_delay_initial: Duration,
    pub redelivery_delay_max: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
            workers: 4,
            poll_interval: Duration::from_millis(250),
            requeue_interval: Duration::from_secs(5),
            visibility_timeout: Duration::from_secs(300),
            transient_error_backoff_initial: Duration::from_millis(25),
            transient_error_backoff_max: Duration::from_millis(500),
            max_attempts: 5,
            redelivery_delay_initial: Duration::from_secs(5),
            redelivery_delay_max: Duration::from_secs(300),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.consumer_group.trim().is_empty() {
            bail!("consumer_group must not be empty");
        }
        if self.workers == 0 {
            bail!("workers must be greater than 0");
        }
        if self.poll_interval.is_zero() || self.requeue_interval.is_zero() {
            bail!("poll_interval and requeue_interval must be greater than 0");
        }
        if self.transient_error_backoff_initial.is_zero() {
            bail!("transient_error_backoff_initial must be greater than 0");
        }
        if self.transient_error_backoff_max < self.transient_error_backoff_initial {
            bail!("transient_error_backoff_max must be >= transient_error_backoff_initial");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be greater than 0");
        }
        if self.redelivery_delay_max < self.redelivery_delay_initial {
            bail!("redelivery_delay_max must be >= redelivery_delay_initial");
        }
        Ok(())
    }

    pub fn consumer_id(&self, index: usize) -> String {
        format!("{}-{}", self.consumer_group, index + 1)
    }

    /// Delay before redelivering an event whose `attempt`-th delivery failed.
    pub fn redelivery_delay(&self, attempt: u32) -> Duration {
        compute_poll_retry_delay(
            attempt,
            self.redelivery_delay_initial,
            self.redelivery_delay_max,
        )
    }
}

fn compute_poll_retry_delay(failure_count: u32, initial: Duration, max: Duration) -> Duration {
    let mut delay = initial;
    for _ in 1..failure_count {
        delay = delay.saturating_mul(2);
        if delay >= max {
            return max;
        }
    }
    std::cmp::min(delay, max)
}

#[derive(Clone)]
/// Pool of competing consumers draining one queue through the pipeline.
pub struct EventConsumer {
    queue: Arc<dyn EventQueue>,
    pipeline: Arc<EventPipeline>,
    config: ConsumerConfig,
}

impl EventConsumer {
    pub fn new(
        queue: Arc<dyn EventQueue>,
        pipeline: Arc<EventPipeline>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            pipeline,
            config,
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Runs `workers` loops until `shutdown` flips to true.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;
        let mut workers = JoinSet::new();
        for index in 0..self.config.workers {
            let consumer = self.clone();
            let consumer_id = self.config.consumer_id(index);
            let worker_shutdown = shutdown.clone();
            workers.spawn(async move { consumer.run_worker(consumer_id, worker_shutdown).await });
        }
        info!(
            consumer_group = self.config.consumer_group.as_str(),
            workers = self.config.workers,
            "event consumer started"
        );

        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                error!(%error, "event worker task aborted");
            }
        }
        info!(
            consumer_group = self.config.consumer_group.as_str(),
            "event consumer stopped"
        );
        Ok(())
    }

    async fn run_worker(&self, consumer_id: String, mut shutdown: watch::Receiver<bool>) {
        let mut failure_count = 0u32;
        let mut poll = tokio::time::interval(self.config.poll_interval);
        let mut requeue = tokio::time::interval(self.config.requeue_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        requeue.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    let transient_failure = match self.process_once(&consumer_id).await {
                        Ok(Some(report)) => {
                            // More work is likely queued behind this delivery.
                            poll.reset_immediately();
                            !report.should_acknowledge()
                        }
                        Ok(None) => false,
                        Err(error) => {
                            error!(
                                consumer_id = consumer_id.as_str(),
                                %error,
                                "event queue unavailable"
                            );
                            true
                        }
                    };
                    if transient_failure {
                        failure_count = failure_count.saturating_add(1);
                        let delay = compute_poll_retry_delay(
                            failure_count,
                            self.config.transient_error_backoff_initial,
                            self.config.transient_error_backoff_max,
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        failure_count = 0;
                    }
                }
                _ = requeue.tick() => {
                    match self.queue.requeue_expired(self.config.visibility_timeout).await {
                        Ok(requeued) if !requeued.is_empty() => {
                            info!(
                                consumer_id = consumer_id.as_str(),
                                requeued = requeued.len(),
                                "requeued abandoned deliveries"
                            );
                        }
                        Ok(_) => {}
                        Err(error) => warn!(
                            consumer_id = consumer_id.as_str(),
                            %error,
                            "failed to requeue abandoned deliveries"
                        ),
                    }
                }
            }
        }
        debug!(consumer_id = consumer_id.as_str(), "event worker stopped");
    }

    /// Claims and processes at most one delivery.
    ///
    /// The delivery is acknowledged only when the pipeline finished without
    /// a transport failure. Otherwise it is released for a delayed
    /// redelivery, or dead-lettered once it has used up `max_attempts`.
    pub async fn process_once(
        &self,
        consumer_id: &str,
    ) -> EventQueueResult<Option<EventProcessingReport>> {
        let Some(delivery) = self.queue.receive(consumer_id).await? else {
            return Ok(None);
        };
        debug!(
            consumer_id,
            delivery_id = delivery.id.as_str(),
            attempt = delivery.attempt,
            "delivery claimed"
        );

        // Claims that kept expiring (a consumer crashing mid-event) are not
        // processed again.
        if delivery.attempt > self.config.max_attempts {
            error!(
                consumer_id,
                delivery_id = delivery.id.as_str(),
                project = delivery.event.project(),
                attempt = delivery.attempt,
                "dead-lettering event that exceeded max attempts"
            );
            self.queue.dead_letter(&delivery.id).await?;
            return Ok(Some(EventProcessingReport {
                project: delivery.event.project().to_string(),
                event_key: delivery.event.event_key(),
                stage: PipelineStage::Received,
                outcome: Ok(EventDisposition::Ignored {
                    reason: "max_attempts_exceeded".to_string(),
                }),
            }));
        }

        let mut report = self.pipeline.process(&delivery.event).await;
        if report.should_acknowledge() {
            self.queue.ack(&delivery.id).await?;
            report.stage = PipelineStage::Acknowledged;
            info!(
                consumer_id,
                delivery_id = delivery.id.as_str(),
                project = report.project.as_str(),
                attempt = delivery.attempt,
                "event acknowledged"
            );
        } else if delivery.attempt >= self.config.max_attempts {
            error!(
                consumer_id,
                delivery_id = delivery.id.as_str(),
                project = report.project.as_str(),
                attempt = delivery.attempt,
                stage = report.stage.as_str(),
                "dead-lettering event after repeated failures"
            );
            self.queue.dead_letter(&delivery.id).await?;
        } else {
            let delay = self.config.redelivery_delay(delivery.attempt);
            error!(
                consumer_id,
                delivery_id = delivery.id.as_str(),
                project = report.project.as_str(),
                attempt = delivery.attempt,
                stage = report.stage.as_str(),
                redeliver_in_ms = delay.as_millis() as u64,
                "leaving event unacknowledged for redelivery"
            );
            self.queue.nack(&delivery.id, delay).await?;
        }
        Ok(Some(report))
    }
}
