//! Bounded in-memory work queue.
//!
//! A thin wrapper over a tokio bounded mpsc channel. The channel is the only
//! synchronization between HTTP handlers (producers) and a pipeline worker
//! (the single consumer). A full queue makes producers wait, which is the
//! backpressure mechanism for a slow or unavailable downstream.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use super::types::Envelope;

/// Capacity of each pipeline queue.
pub const QUEUE_CAPACITY: usize = 1000;

/// Reasons an item was not admitted to a queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("queue still full after waiting {waited:?}")]
    TimedOut { waited: Duration },

    #[error("queue consumer has stopped")]
    Closed,
}

/// Create a bounded queue with the given capacity.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Producer { tx }, Consumer { rx })
}

/// Sending half of a work queue. Cheap to clone.
pub struct Producer<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Producer<T> {
    /// Append an item, waiting for a free slot if the queue is full.
    ///
    /// Returns the queue depth right after admission.
    pub async fn enqueue(&self, item: T) -> Result<usize, AdmissionError> {
        self.tx
            .send(Envelope::new(item))
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(self.depth())
    }

    /// Append an item, waiting at most `wait` for a free slot.
    ///
    /// `None` waits for as long as it takes.
    pub async fn enqueue_timeout(
        &self,
        item: T,
        wait: Option<Duration>,
    ) -> Result<usize, AdmissionError> {
        let Some(wait) = wait else {
            return self.enqueue(item).await;
        };

        match tokio::time::timeout(wait, self.tx.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(Envelope::new(item));
                Ok(self.depth())
            }
            Ok(Err(_)) => Err(AdmissionError::Closed),
            Err(_) => Err(AdmissionError::TimedOut { waited: wait }),
        }
    }

    /// Put a previously dequeued envelope back at the tail without waiting.
    ///
    /// Hands the envelope back if there is no free slot.
    pub(crate) fn try_requeue(&self, envelope: Envelope<T>) -> Result<(), Envelope<T>> {
        self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(envelope) | TrySendError::Closed(envelope) => envelope,
        })
    }

    /// Number of items currently buffered.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Receiving half of a work queue, owned by exactly one worker.
pub struct Consumer<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

impl<T> Consumer<T> {
    /// Wait for the oldest envelope.
    ///
    /// Returns `None` once every producer is gone and the queue is empty.
    pub async fn dequeue(&mut self) -> Option<Envelope<T>> {
        self.rx.recv().await
    }

    /// Take the oldest envelope if one is buffered.
    pub fn try_dequeue(&mut self) -> Option<Envelope<T>> {
        match self.rx.try_recv() {
            Ok(envelope) => Some(envelope),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Invitation;

    #[tokio::test]
    async fn test_fifo_without_failures() {
        let (producer, mut consumer) = bounded(QUEUE_CAPACITY);

        for email in ["a@x.com", "b@x.com", "c@x.com"] {
            producer.enqueue(Invitation::new(email)).await.unwrap();
        }

        let mut seen = Vec::new();
        while let Some(envelope) = consumer.try_dequeue() {
            assert_eq!(envelope.attempts, 0);
            seen.push(envelope.item.email);
        }
        assert_eq!(seen, vec!["a@x.com", "b@x.com", "c@x.com"]);
    }

    #[tokio::test]
    async fn test_enqueue_reports_depth() {
        let (producer, mut consumer) = bounded(QUEUE_CAPACITY);

        assert_eq!(producer.enqueue(Invitation::new("a@x.com")).await, Ok(1));
        assert_eq!(producer.enqueue(Invitation::new("b@x.com")).await, Ok(2));

        consumer.dequeue().await.unwrap();
        assert_eq!(producer.depth(), 1);
        assert_eq!(producer.capacity(), QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_enqueue_blocks_when_full_until_dequeue() {
        let (producer, mut consumer) = bounded(QUEUE_CAPACITY);

        for i in 0..QUEUE_CAPACITY {
            producer
                .enqueue(Invitation::new(format!("user{i}@x.com")))
                .await
                .unwrap();
        }
        assert_eq!(producer.depth(), QUEUE_CAPACITY);

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            producer.enqueue(Invitation::new("late@x.com")),
        )
        .await;
        assert!(blocked.is_err(), "1001st enqueue should block");

        let waiting = {
            let producer = producer.clone();
            tokio::spawn(async move { producer.enqueue(Invitation::new("late@x.com")).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());

        let first = consumer.dequeue().await.unwrap();
        assert_eq!(first.item.email, "user0@x.com");

        let depth = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("enqueue should unblock after a dequeue")
            .unwrap()
            .unwrap();
        assert_eq!(depth, QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_enqueue_timeout_gives_up_when_full() {
        let (producer, _consumer) = bounded(1);
        producer.enqueue(Invitation::new("a@x.com")).await.unwrap();

        let wait = Duration::from_millis(20);
        let result = producer
            .enqueue_timeout(Invitation::new("b@x.com"), Some(wait))
            .await;

        assert_eq!(result, Err(AdmissionError::TimedOut { waited: wait }));
        assert_eq!(producer.depth(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_after_consumer_dropped() {
        let (producer, consumer) = bounded::<Invitation>(4);
        drop(consumer);

        let result = producer
            .enqueue_timeout(Invitation::new("a@x.com"), Some(Duration::from_millis(10)))
            .await;
        assert_eq!(result, Err(AdmissionError::Closed));
    }

    #[tokio::test]
    async fn test_requeue_goes_to_tail() {
        let (producer, mut consumer) = bounded(QUEUE_CAPACITY);
        producer.enqueue(Invitation::new("a@x.com")).await.unwrap();
        producer.enqueue(Invitation::new("b@x.com")).await.unwrap();

        let mut failed = consumer.dequeue().await.unwrap();
        failed.record_failure("connection refused");
        producer.try_requeue(failed).unwrap();

        let next = consumer.dequeue().await.unwrap();
        assert_eq!(next.item.email, "b@x.com");
        let retried = consumer.dequeue().await.unwrap();
        assert_eq!(retried.item.email, "a@x.com");
        assert_eq!(retried.attempts, 1);
        assert!(consumer.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_requeue_hands_back_when_full() {
        let (producer, mut consumer) = bounded(1);
        producer.enqueue(Invitation::new("a@x.com")).await.unwrap();
        let envelope = consumer.dequeue().await.unwrap();
        producer.enqueue(Invitation::new("b@x.com")).await.unwrap();

        let returned = producer.try_requeue(envelope).unwrap_err();
        assert_eq!(returned.item.email, "a@x.com");
    }
}
