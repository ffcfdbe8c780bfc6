use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::clock::Clock;

const KEY_PREFIX: &str = "credential_pipeline";
const DEAD_KEY: &str = "credential_pipeline:dead";

/// How many due scheduled jobs one dequeue promotes at most.
const PROMOTE_BATCH: isize = 16;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Queue lanes. Rendering work and maintenance sweeps poll independently so
/// a backlog of batch PDFs cannot starve expiration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Lane {
    Credentials,
    Maintenance,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Credentials, Lane::Maintenance];
}

/// Work order serialized into the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    GenerateCredential {
        credential_id: i64,
    },
    RegenerateEventCredentials {
        event_id: i64,
        template_id: i64,
    },
    RegenerateCredential {
        credential_id: i64,
        template_id: i64,
        regenerate_qr: bool,
        regenerate_pdf: bool,
    },
    AssemblePrintBatch {
        print_batch_id: i64,
        /// Fixed at batch creation; assembly renders in exactly this order.
        credential_ids: Vec<i64>,
    },
    ExpireEventCredentials {
        event_id: i64,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::GenerateCredential { .. } => "generate_credential",
            JobPayload::RegenerateEventCredentials { .. } => "regenerate_event_credentials",
            JobPayload::RegenerateCredential { .. } => "regenerate_credential",
            JobPayload::AssemblePrintBatch { .. } => "assemble_print_batch",
            JobPayload::ExpireEventCredentials { .. } => "expire_event_credentials",
        }
    }

    pub fn lane(&self) -> Lane {
        match self {
            JobPayload::ExpireEventCredentials { .. } => Lane::Maintenance,
            _ => Lane::Credentials,
        }
    }

    /// Hard wall-clock limit for one attempt.
    pub fn timeout(&self) -> Duration {
        match self {
            JobPayload::GenerateCredential { .. } => Duration::from_secs(120),
            JobPayload::RegenerateEventCredentials { .. } => Duration::from_secs(900),
            JobPayload::RegenerateCredential { .. } => Duration::from_secs(180),
            JobPayload::AssemblePrintBatch { .. } => Duration::from_secs(1800),
            JobPayload::ExpireEventCredentials { .. } => Duration::from_secs(300),
        }
    }

    /// Queue-level attempt ceiling before a job is dead-lettered.
    pub fn max_attempts(&self) -> u32 {
        3
    }
}

/// One job in flight: payload plus delivery bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    /// 1-based; bumped on every re-enqueue.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Set by the runner when the first attempt starts; generation deadlines
    /// measure from here.
    pub first_attempted_at: Option<DateTime<Utc>>,
    pub payload: JobPayload,
}

impl JobEnvelope {
    pub fn new(payload: JobPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt: 1,
            enqueued_at: now,
            first_attempted_at: None,
            payload,
        }
    }

    /// The same job, one attempt later.
    pub fn retry(mut self, now: DateTime<Utc>) -> Self {
        self.attempt += 1;
        self.enqueued_at = now;
        self
    }
}

/// A dequeued job plus the exact serialized form sitting in the processing
/// list; `complete` needs those bytes to acknowledge it.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: JobEnvelope,
    pub receipt: String,
}

/// Terminally failed job, parked for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub envelope: JobEnvelope,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Job transport. Delivery is at-least-once: a dequeued job sits in a
/// processing list until completed, so a crashed worker leaves it visible.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), QueueError>;

    /// Enqueue with a delay; the job becomes visible to `dequeue` once due.
    async fn enqueue_in(&self, envelope: &JobEnvelope, delay: Duration)
        -> Result<(), QueueError>;

    async fn dequeue(&self, lane: Lane) -> Result<Option<Delivery>, QueueError>;

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError>;

    async fn dead_letter(&self, envelope: &JobEnvelope, reason: &str) -> Result<(), QueueError>;

    /// Immediately runnable jobs in the lane; scheduled jobs don't count
    /// until they come due.
    async fn depth(&self, lane: Lane) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed queue: a list per lane, a processing list per lane, a
/// sorted set of scheduled jobs keyed by due time, one shared dead-letter
/// list.
pub struct RedisQueue {
    client: redis::Client,
    clock: Arc<dyn Clock>,
}

impl RedisQueue {
    pub fn new(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, clock })
    }

    fn jobs_key(lane: Lane) -> String {
        format!("{KEY_PREFIX}:jobs:{lane}")
    }

    fn processing_key(lane: Lane) -> String {
        format!("{KEY_PREFIX}:processing:{lane}")
    }

    fn scheduled_key(lane: Lane) -> String {
        format!("{KEY_PREFIX}:scheduled:{lane}")
    }

    /// Move due scheduled jobs onto the lane's runnable list. ZREM is the
    /// claim: only the worker that removes a member pushes it, so two
    /// pollers cannot promote the same job twice.
    async fn promote_due(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        lane: Lane,
    ) -> Result<(), QueueError> {
        let now_ms = self.clock.now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(Self::scheduled_key(lane), "-inf", now_ms, 0, PROMOTE_BATCH)
            .await?;

        for member in due {
            let claimed: u32 = conn.zrem(Self::scheduled_key(lane), &member).await?;
            if claimed == 1 {
                conn.lpush::<_, _, ()>(Self::jobs_key(lane), &member).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(envelope)?;
        conn.lpush::<_, _, ()>(Self::jobs_key(envelope.payload.lane()), &payload)
            .await?;
        Ok(())
    }

    async fn enqueue_in(
        &self,
        envelope: &JobEnvelope,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(envelope)?;
        let ready_at = self.clock.now()
            + chrono::Duration::milliseconds(delay.as_millis() as i64);
        conn.zadd::<_, _, _, ()>(
            Self::scheduled_key(envelope.payload.lane()),
            &payload,
            ready_at.timestamp_millis(),
        )
        .await?;
        Ok(())
    }

    async fn dequeue(&self, lane: Lane) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.promote_due(&mut conn, lane).await?;

        let raw: Option<String> = conn
            .rpoplpush(Self::jobs_key(lane), Self::processing_key(lane))
            .await?;

        match raw {
            Some(receipt) => {
                let envelope: JobEnvelope = serde_json::from_str(&receipt)?;
                Ok(Some(Delivery { envelope, receipt }))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.lrem::<_, _, ()>(
            Self::processing_key(delivery.envelope.payload.lane()),
            1,
            &delivery.receipt,
        )
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, envelope: &JobEnvelope, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let entry = DeadLetter {
            envelope: envelope.clone(),
            reason: reason.to_string(),
            failed_at: self.clock.now(),
        };
        let payload = serde_json::to_string(&entry)?;
        conn.lpush::<_, _, ()>(DEAD_KEY, &payload).await?;
        Ok(())
    }

    async fn depth(&self, lane: Lane) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let depth: u64 = conn.llen(Self::jobs_key(lane)).await?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

/// In-process queue for tests and single-node development; scheduling is
/// driven by the injected clock.
pub struct MemoryQueue {
    clock: Arc<dyn Clock>,
    runnable: Mutex<HashMap<Lane, VecDeque<JobEnvelope>>>,
    scheduled: Mutex<Vec<(DateTime<Utc>, JobEnvelope)>>,
    processing: Mutex<Vec<JobEnvelope>>,
    dead: Mutex<Vec<DeadLetter>>,
}

impl MemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            runnable: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(Vec::new()),
            processing: Mutex::new(Vec::new()),
            dead: Mutex::new(Vec::new()),
        }
    }

    /// Scheduled jobs with their due times, soonest first.
    pub fn scheduled(&self) -> Vec<(DateTime<Utc>, JobEnvelope)> {
        let mut entries = self.scheduled.lock().expect("lock poisoned").clone();
        entries.sort_by_key(|(at, _)| *at);
        entries
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().expect("lock poisoned").clone()
    }

    /// Dequeued but not yet completed envelopes.
    pub fn in_flight(&self) -> Vec<JobEnvelope> {
        self.processing.lock().expect("lock poisoned").clone()
    }

    fn promote_due(&self, lane: Lane) {
        let now = self.clock.now();
        let mut scheduled = self.scheduled.lock().expect("lock poisoned");
        let mut due: Vec<JobEnvelope> = Vec::new();
        scheduled.retain(|(at, envelope)| {
            if *at <= now && envelope.payload.lane() == lane {
                due.push(envelope.clone());
                false
            } else {
                true
            }
        });
        drop(scheduled);

        if !due.is_empty() {
            let mut runnable = self.runnable.lock().expect("lock poisoned");
            runnable.entry(lane).or_default().extend(due);
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, envelope: &JobEnvelope) -> Result<(), QueueError> {
        self.runnable
            .lock()
            .expect("lock poisoned")
            .entry(envelope.payload.lane())
            .or_default()
            .push_back(envelope.clone());
        Ok(())
    }

    async fn enqueue_in(
        &self,
        envelope: &JobEnvelope,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let ready_at =
            self.clock.now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        self.scheduled
            .lock()
            .expect("lock poisoned")
            .push((ready_at, envelope.clone()));
        Ok(())
    }

    async fn dequeue(&self, lane: Lane) -> Result<Option<Delivery>, QueueError> {
        self.promote_due(lane);
        let popped = self
            .runnable
            .lock()
            .expect("lock poisoned")
            .entry(lane)
            .or_default()
            .pop_front();

        match popped {
            Some(envelope) => {
                self.processing
                    .lock()
                    .expect("lock poisoned")
                    .push(envelope.clone());
                let receipt = envelope.id.to_string();
                Ok(Some(Delivery { envelope, receipt }))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.processing
            .lock()
            .expect("lock poisoned")
            .retain(|e| e.id != delivery.envelope.id);
        Ok(())
    }

    async fn dead_letter(&self, envelope: &JobEnvelope, reason: &str) -> Result<(), QueueError> {
        self.dead.lock().expect("lock poisoned").push(DeadLetter {
            envelope: envelope.clone(),
            reason: reason.to_string(),
            failed_at: self.clock.now(),
        });
        Ok(())
    }

    async fn depth(&self, lane: Lane) -> Result<u64, QueueError> {
        Ok(self
            .runnable
            .lock()
            .expect("lock poisoned")
            .get(&lane)
            .map_or(0, |q| q.len() as u64))
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
