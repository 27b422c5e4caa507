use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tfops_contract::InboundEvent;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::event_queue::{Delivery, EventQueue, EventQueueError, EventQueueResult};

const PENDING_DIR: &str = "pending";
const INFLIGHT_DIR: &str = "inflight";
const DEAD_DIR: &str = "dead";
const TMP_DIR: &str = "tmp";
const RECORD_EXTENSION: &str = "json";
const CLAIM_STAGE: &str = "claiming";
const RELEASE_STAGE: &str = "releasing";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolRecord {
    id: String,
    attempt: u32,
    enqueued_at: DateTime<Utc>,
    #[serde(default)]
    claimed_by: Option<String>,
    #[serde(default)]
    claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    not_before: Option<DateTime<Utc>>,
    event: InboundEvent,
}

impl SpoolRecord {
    fn clear_claim(&mut self, not_before: Option<DateTime<Utc>>) {
        self.claimed_by = None;
        self.claimed_at = None;
        self.not_before = not_before;
    }
}

/// Directory-backed queue shared by consumers in any number of processes.
///
/// Layout under the root: `pending/` holds entries waiting for a consumer,
/// `inflight/` holds claimed entries, `dead/` collects undecodable files and
/// dead-lettered entries, and `tmp/` stages writes.
///
/// Ownership of an entry moves by rename, so only one actor holds it at a
/// time. Claims and releases first rename the record into a stage file
/// (`tmp/<id>@<millis>.claiming` or `.releasing`), rewrite it, and only then
/// publish it into `inflight/` or `pending/`. A record in `inflight/`
/// therefore always carries its claim and a record in `pending/` never does.
#[derive(Debug)]
pub struct SpoolEventQueue {
    root: PathBuf,
    sequence: AtomicU64,
}

impl SpoolEventQueue {
    /// Opens (creating if needed) a spool rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> EventQueueResult<Self> {
        let root = root.into();
        for dir in [PENDING_DIR, INFLIGHT_DIR, DEAD_DIR, TMP_DIR] {
            tokio::fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root,
            sequence: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn pending_ids(&self) -> EventQueueResult<Vec<String>> {
        list_record_ids(&self.root.join(PENDING_DIR)).await
    }

    pub async fn in_flight_ids(&self) -> EventQueueResult<Vec<String>> {
        list_record_ids(&self.root.join(INFLIGHT_DIR)).await
    }

    pub async fn dead_letter_ids(&self) -> EventQueueResult<Vec<String>> {
        list_record_ids(&self.root.join(DEAD_DIR)).await
    }

    fn record_path(&self, dir: &str, delivery_id: &str) -> PathBuf {
        self.root
            .join(dir)
            .join(format!("{delivery_id}.{RECORD_EXTENSION}"))
    }

    fn stage_path(&self, delivery_id: &str, stage: &str) -> PathBuf {
        self.root.join(TMP_DIR).join(format!(
            "{delivery_id}@{}.{stage}",
            Utc::now().timestamp_millis()
        ))
    }

    fn next_delivery_id(&self, event: &InboundEvent) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}-{}-{sequence:06}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.9fZ"),
            std::process::id(),
            event.event_key()
        )
    }

    async fn write_record(&self, dir: &str, record: &SpoolRecord) -> EventQueueResult<()> {
        let staged = self.record_path(TMP_DIR, &record.id);
        let payload = serde_json::to_vec_pretty(record)?;
        let mut file = tokio::fs::File::create(&staged).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staged, self.record_path(dir, &record.id)).await?;
        Ok(())
    }

    async fn read_record(&self, path: &Path) -> EventQueueResult<SpoolRecord> {
        let raw = tokio::fs::read(path).await?;
        serde_json::from_slice(&raw).map_err(|error| EventQueueError::CorruptRecord {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    async fn bury(&self, delivery_id: &str, from: &Path) -> EventQueueResult<()> {
        let target = self.record_path(DEAD_DIR, delivery_id);
        warn!(
            delivery_id,
            path = %from.display(),
            "moving unreadable spool record to dead letters"
        );
        match tokio::fs::rename(from, target).await {
            Ok(()) => Ok(()),
            // Another consumer buried it first.
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    /// Takes exclusive ownership of `from` by renaming it to a stage file.
    /// Returns `None` when another actor moved it first.
    async fn take(
        &self,
        from: &Path,
        delivery_id: &str,
        stage: &str,
    ) -> EventQueueResult<Option<PathBuf>> {
        let staged = self.stage_path(delivery_id, stage);
        match tokio::fs::rename(from, &staged).await {
            Ok(()) => Ok(Some(staged)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Moves an in-flight entry back to `pending/` with its claim cleared.
    ///
    /// With `expected_claim` set, the entry is released only if it still
    /// carries that claim; a newer claim is put back untouched and `false`
    /// is returned.
    async fn release(
        &self,
        delivery_id: &str,
        not_before: Option<DateTime<Utc>>,
        expected_claim: Option<DateTime<Utc>>,
    ) -> EventQueueResult<bool> {
        let inflight = self.record_path(INFLIGHT_DIR, delivery_id);
        let Some(staged) = self.take(&inflight, delivery_id, RELEASE_STAGE).await? else {
            return Err(EventQueueError::UnknownDelivery(delivery_id.to_string()));
        };
        let mut record = match self.read_record(&staged).await {
            Ok(record) => record,
            Err(EventQueueError::CorruptRecord { .. }) => {
                self.bury(delivery_id, &staged).await?;
                return Ok(false);
            }
            Err(error) => return Err(error),
        };
        if expected_claim.is_some() && record.claimed_at != expected_claim {
            tokio::fs::rename(&staged, &inflight).await?;
            return Ok(false);
        }
        record.clear_claim(not_before);
        self.write_record(PENDING_DIR, &record).await?;
        tokio::fs::remove_file(&staged).await?;
        Ok(true)
    }

    /// Finishes claims and releases abandoned mid-transition by a crashed
    /// process. Stage files younger than `grace` are left alone.
    async fn recover_stale_stages(&self, grace: Duration) -> EventQueueResult<Vec<String>> {
        let now_millis = Utc::now().timestamp_millis();
        let grace_millis = i64::try_from(grace.as_millis()).unwrap_or(i64::MAX);
        let mut recovered = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join(TMP_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some((delivery_id, staged_at)) = parse_stage_name(&path) else {
                continue;
            };
            if now_millis.saturating_sub(staged_at) <= grace_millis {
                continue;
            }
            // The transition completed before the crash; only the stage
            // file is left over.
            if tokio::fs::try_exists(self.record_path(INFLIGHT_DIR, &delivery_id)).await?
                || tokio::fs::try_exists(self.record_path(PENDING_DIR, &delivery_id)).await?
            {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(error) if error.kind() == ErrorKind::NotFound => {}
                    Err(error) => return Err(error.into()),
                }
                continue;
            }
            let mut record = match self.read_record(&path).await {
                Ok(record) => record,
                Err(EventQueueError::Io(error)) if error.kind() == ErrorKind::NotFound => continue,
                Err(EventQueueError::CorruptRecord { .. }) => {
                    self.bury(&delivery_id, &path).await?;
                    continue;
                }
                Err(error) => return Err(error),
            };
            record.clear_claim(None);
            self.write_record(PENDING_DIR, &record).await?;
            tokio::fs::remove_file(&path).await?;
            warn!(
                delivery_id = delivery_id.as_str(),
                "recovered spool record abandoned mid-transition"
            );
            recovered.push(delivery_id);
        }
        Ok(recovered)
    }
}

#[async_trait]
impl EventQueue for SpoolEventQueue {
    async fn publish(&self, event: InboundEvent) -> EventQueueResult<String> {
        let record = SpoolRecord {
            id: self.next_delivery_id(&event),
            attempt: 0,
            enqueued_at: Utc::now(),
            claimed_by: None,
            claimed_at: None,
            not_before: None,
            event,
        };
        self.write_record(PENDING_DIR, &record).await?;
        debug!(delivery_id = record.id.as_str(), "spooled event");
        Ok(record.id)
    }

    async fn receive(&self, consumer_id: &str) -> EventQueueResult<Option<Delivery>> {
        let now = Utc::now();
        for delivery_id in self.pending_ids().await? {
            let pending = self.record_path(PENDING_DIR, &delivery_id);
            let queued = match self.read_record(&pending).await {
                Ok(record) => record,
                // Claimed by a competing consumer after listing.
                Err(EventQueueError::Io(error)) if error.kind() == ErrorKind::NotFound => continue,
                Err(EventQueueError::CorruptRecord { .. }) => {
                    self.bury(&delivery_id, &pending).await?;
                    continue;
                }
                Err(error) => return Err(error),
            };
            if queued.not_before.is_some_and(|not_before| not_before > now) {
                continue;
            }

            let Some(staged) = self.take(&pending, &delivery_id, CLAIM_STAGE).await? else {
                continue;
            };
            let mut record = match self.read_record(&staged).await {
                Ok(record) => record,
                Err(EventQueueError::CorruptRecord { .. }) => {
                    self.bury(&delivery_id, &staged).await?;
                    continue;
                }
                Err(error) => return Err(error),
            };
            record.attempt = record.attempt.saturating_add(1);
            record.claimed_by = Some(consumer_id.to_string());
            record.claimed_at = Some(Utc::now());
            record.not_before = None;
            self.write_record(INFLIGHT_DIR, &record).await?;
            tokio::fs::remove_file(&staged).await?;

            return Ok(Some(Delivery {
                id: record.id,
                attempt: record.attempt,
                consumer_id: consumer_id.to_string(),
                event: record.event,
            }));
        }
        Ok(None)
    }

    async fn ack(&self, delivery_id: &str) -> EventQueueResult<()> {
        match tokio::fs::remove_file(self.record_path(INFLIGHT_DIR, delivery_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(EventQueueError::UnknownDelivery(delivery_id.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn nack(&self, delivery_id: &str, redeliver_after: Duration) -> EventQueueResult<()> {
        let not_before = (!redeliver_after.is_zero())
            .then(|| chrono::Duration::from_std(redeliver_after).ok())
            .flatten()
            .map(|delay| Utc::now() + delay);
        self.release(delivery_id, not_before, None).await?;
        Ok(())
    }

    async fn dead_letter(&self, delivery_id: &str) -> EventQueueResult<()> {
        match tokio::fs::rename(
            self.record_path(INFLIGHT_DIR, delivery_id),
            self.record_path(DEAD_DIR, delivery_id),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(EventQueueError::UnknownDelivery(delivery_id.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn requeue_expired(
        &self,
        visibility_timeout: Duration,
    ) -> EventQueueResult<Vec<String>> {
        let mut requeued = self.recover_stale_stages(visibility_timeout).await?;
        let now = Utc::now();
        for delivery_id in self.in_flight_ids().await? {
            let path = self.record_path(INFLIGHT_DIR, &delivery_id);
            let record = match self.read_record(&path).await {
                Ok(record) => record,
                Err(EventQueueError::Io(error)) if error.kind() == ErrorKind::NotFound => continue,
                Err(EventQueueError::CorruptRecord { .. }) => {
                    self.bury(&delivery_id, &path).await?;
                    continue;
                }
                Err(error) => return Err(error),
            };
            let Some(claimed_at) = record.claimed_at else {
                continue;
            };
            let elapsed = now
                .signed_duration_since(claimed_at)
                .to_std()
                .unwrap_or_default();
            if elapsed <= visibility_timeout {
                continue;
            }
            match self.release(&delivery_id, None, Some(claimed_at)).await {
                Ok(true) => {
                    warn!(
                        delivery_id = delivery_id.as_str(),
                        consumer_id = record.claimed_by.as_deref().unwrap_or("unknown"),
                        "requeueing delivery after visibility timeout"
                    );
                    requeued.push(delivery_id);
                }
                Ok(false) | Err(EventQueueError::UnknownDelivery(_)) => continue,
                Err(error) => return Err(error),
            }
        }
        Ok(requeued)
    }
}

async fn list_record_ids(dir: &Path) -> EventQueueResult<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            ids.push(stem.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// Splits `tmp/<id>@<millis>.<stage>` into the delivery id and stage time.
fn parse_stage_name(path: &Path) -> Option<(String, i64)> {
    let stage = path.extension()?.to_str()?;
    if stage != CLAIM_STAGE && stage != RELEASE_STAGE {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (delivery_id, staged_at) = stem.rsplit_once('@')?;
    Some((delivery_id.to_string(), staged_at.parse().ok()?))
}
