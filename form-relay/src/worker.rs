//! Pipeline worker: drains one queue and delivers each item.
//!
//! Each worker is the single consumer of its queue and also a producer into
//! it: a failed item is held back for its backoff delay and then put at the
//! tail of the same queue. The worker never waits on its own queue, so a full
//! queue cannot stall it.
//!
//! On shutdown the worker stops taking new work from the retry timers,
//! gives every queued or scheduled item one last attempt within the drain
//! deadline, and dead-letters whatever is left.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::deliver::{Deliver, Outcome};
use crate::queue::{Consumer, Envelope, Producer, WorkItem};
use crate::retry::{RetryDecision, RetryPolicy};

/// How long a due retry waits when its queue has no free slot.
const REQUEUE_BACKOFF: Duration = Duration::from_millis(100);

/// An item the worker gave up on.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter<T> {
    pub pipeline: &'static str,
    pub item: T,
    pub attempts: u32,
    pub reason: String,
}

/// Counters returned when a worker stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub delivered: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

/// Long-running consumer for one pipeline.
pub struct Worker<T, D> {
    pipeline: &'static str,
    deliverer: D,
    producer: Producer<T>,
    policy: RetryPolicy,
    drain_timeout: Duration,
    dead_letters: Option<mpsc::Sender<DeadLetter<T>>>,
    schedule: RetrySchedule<T>,
    report: WorkerReport,
}

enum Step<T> {
    Shutdown,
    RetryDue,
    Deliver(Envelope<T>),
}

impl<T, D> Worker<T, D>
where
    T: WorkItem,
    D: Deliver<T>,
{
    /// `producer` must feed the queue this worker will consume; failed items
    /// are put back through it.
    pub fn new(pipeline: &'static str, deliverer: D, producer: Producer<T>) -> Self {
        Self {
            pipeline,
            deliverer,
            producer,
            policy: RetryPolicy::default(),
            drain_timeout: Duration::from_secs(10),
            dead_letters: None,
            schedule: RetrySchedule::new(),
            report: WorkerReport::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Also send dead letters to a channel. Every dead letter is logged
    /// regardless.
    pub fn with_dead_letters(mut self, sink: mpsc::Sender<DeadLetter<T>>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Consume the queue until `shutdown` is cancelled, then drain.
    pub async fn run(
        mut self,
        mut consumer: Consumer<T>,
        shutdown: CancellationToken,
    ) -> WorkerReport {
        info!(
            pipeline = self.pipeline,
            max_attempts = self.policy.max_attempts,
            base_delay_ms = self.policy.base_delay.as_millis() as u64,
            "worker_started"
        );

        loop {
            let next_due = self.schedule.next_due();

            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Step::Shutdown,
                _ = sleep_until(next_due.unwrap_or_else(Instant::now)), if next_due.is_some() => {
                    Step::RetryDue
                }
                envelope = consumer.dequeue() => match envelope {
                    Some(envelope) => Step::Deliver(envelope),
                    // The worker holds a producer, so the queue cannot close
                    None => Step::Shutdown,
                },
            };

            match step {
                Step::Shutdown => break,
                Step::RetryDue => self.requeue_due(),
                Step::Deliver(envelope) => {
                    let outcome = self.deliverer.deliver(&envelope.item).await;
                    self.settle(envelope, outcome);
                }
            }
        }

        self.drain(&mut consumer).await;

        info!(
            pipeline = self.pipeline,
            delivered = self.report.delivered,
            skipped = self.report.skipped,
            rejected = self.report.rejected,
            retried = self.report.retried,
            dead_lettered = self.report.dead_lettered,
            "worker_stopped"
        );

        self.report
    }

    /// Apply the result of one attempt.
    fn settle(&mut self, mut envelope: Envelope<T>, outcome: Outcome) {
        let key = envelope.item.key().to_string();

        match outcome {
            Outcome::Delivered => {
                self.report.delivered += 1;
                info!(
                    pipeline = self.pipeline,
                    key = %key,
                    attempts = envelope.attempts + 1,
                    "delivery_succeeded"
                );
            }
            Outcome::Skipped(reason) => {
                self.report.skipped += 1;
                warn!(pipeline = self.pipeline, key = %key, reason, "delivery_skipped");
            }
            Outcome::Rejected(reason) => {
                self.report.rejected += 1;
                warn!(pipeline = self.pipeline, key = %key, reason = %reason, "delivery_rejected");
            }
            Outcome::Failed(err) => {
                envelope.record_failure(&err);

                match self.policy.decide(envelope.attempts, &err) {
                    RetryDecision::Retry { after } => {
                        self.report.retried += 1;
                        warn!(
                            pipeline = self.pipeline,
                            key = %key,
                            attempts = envelope.attempts,
                            retry_in_ms = after.as_millis() as u64,
                            error = %err,
                            "delivery_failed_will_retry"
                        );
                        self.schedule.push(envelope, after);
                    }
                    RetryDecision::GiveUp { reason } => {
                        self.dead_letter(envelope, reason);
                    }
                }
            }
        }
    }

    /// Put every due retry back at the tail of the queue.
    fn requeue_due(&mut self) {
        let now = Instant::now();

        while let Some(envelope) = self.schedule.pop_due(now) {
            let key = envelope.item.key().to_string();
            match self.producer.try_requeue(envelope) {
                Ok(()) => {
                    info!(pipeline = self.pipeline, key = %key, "retry_requeued");
                }
                Err(envelope) => {
                    warn!(
                        pipeline = self.pipeline,
                        key = %key,
                        queue_depth = self.producer.depth(),
                        "retry_requeue_deferred"
                    );
                    self.schedule.push(envelope, REQUEUE_BACKOFF);
                }
            }
        }
    }

    /// Give queued and scheduled items one last attempt before exit.
    async fn drain(&mut self, consumer: &mut Consumer<T>) {
        let deadline = Instant::now() + self.drain_timeout;
        let pending = self.producer.depth() + self.schedule.len();

        info!(
            pipeline = self.pipeline,
            pending,
            drain_timeout_ms = self.drain_timeout.as_millis() as u64,
            "worker_draining"
        );

        while let Some(envelope) = consumer.try_dequeue().or_else(|| self.schedule.pop_any()) {
            if Instant::now() >= deadline {
                self.dead_letter(envelope, "drain deadline exceeded".to_string());
                continue;
            }

            match timeout_at(deadline, self.deliverer.deliver(&envelope.item)).await {
                Ok(Outcome::Failed(err)) => {
                    let mut envelope = envelope;
                    envelope.record_failure(&err);
                    self.dead_letter(envelope, format!("undelivered at shutdown: {err}"));
                }
                Ok(outcome) => self.settle(envelope, outcome),
                Err(_) => self.dead_letter(envelope, "drain deadline exceeded".to_string()),
            }
        }
    }

    fn dead_letter(&mut self, envelope: Envelope<T>, reason: String) {
        self.report.dead_lettered += 1;

        let payload = serde_json::to_string(&envelope.item).unwrap_or_default();
        error!(
            pipeline = self.pipeline,
            key = %envelope.item.key(),
            attempts = envelope.attempts,
            last_error = ?envelope.last_error,
            reason = %reason,
            payload = %payload,
            "dead_lettered"
        );

        if let Some(sink) = &self.dead_letters {
            let letter = DeadLetter {
                pipeline: self.pipeline,
                item: envelope.item,
                attempts: envelope.attempts,
                reason,
            };
            if sink.try_send(letter).is_err() {
                warn!(pipeline = self.pipeline, "dead_letter_sink_unavailable");
            }
        }
    }
}

// =============================================================================
// Retry schedule
// =============================================================================

/// Failed envelopes waiting out their backoff, earliest first.
struct RetrySchedule<T> {
    heap: BinaryHeap<Scheduled<T>>,
    seq: u64,
}

struct Scheduled<T> {
    due: Instant,
    seq: u64,
    envelope: Envelope<T>,
}

// Reversed so the BinaryHeap pops the earliest deadline first; `seq` keeps
// equal deadlines in insertion order.
impl<T> Ord for Scheduled<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Scheduled<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Scheduled<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Scheduled<T> {}

impl<T> RetrySchedule<T> {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    fn push(&mut self, envelope: Envelope<T>, after: Duration) {
        self.seq += 1;
        self.heap.push(Scheduled {
            due: Instant::now() + after,
            seq: self.seq,
            envelope,
        });
    }

    fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|s| s.due)
    }

    fn pop_due(&mut self, now: Instant) -> Option<Envelope<T>> {
        if self.heap.peek()?.due > now {
            return None;
        }
        self.heap.pop().map(|s| s.envelope)
    }

    fn pop_any(&mut self) -> Option<Envelope<T>> {
        self.heap.pop().map(|s| s.envelope)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}
