//! # Session Event Queue
//!
//! An unbounded FIFO queue decoupling "receive from socket" from "process
//! event". Enqueueing never blocks and never drops; the single consumer
//! suspends until an event arrives. Dropping the sender half closes the
//! queue, which is how session teardown ends the dispatcher loop.

use crate::events::ClientEvent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Factory for one session's queue pair.
pub struct EventQueue;

impl EventQueue {
    /// Create a connected (sender, receiver) pair. `warn_depth` is the
    /// backlog watermark above which enqueues log a warning.
    pub fn new(warn_depth: usize) -> (EventSender, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        (
            EventSender {
                tx,
                depth: depth.clone(),
                warn_depth,
            },
            EventReceiver { rx, depth },
        )
    }
}

/// Producer half, held by the connection actor.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ClientEvent>,
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
}

impl EventSender {
    /// Enqueue an event. Returns false when the consumer is gone, which
    /// only happens during session teardown.
    pub fn enqueue(&self, event: ClientEvent) -> bool {
        if self.tx.send(event).is_err() {
            return false;
        }

        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if depth == self.warn_depth {
            warn!(depth, "Session event queue backlog is growing");
        }
        true
    }
}

/// Consumer half, owned by the dispatcher task.
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    depth: Arc<AtomicUsize>,
}

impl EventReceiver {
    /// Wait for the next event in strict arrival order. Returns None once
    /// every sender is dropped and the backlog is drained.
    pub async fn dequeue(&mut self) -> Option<ClientEvent> {
        let event = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::Relaxed);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order_single_producer() {
        let (tx, mut rx) = EventQueue::new(1000);

        for i in 0..100u32 {
            assert!(tx.enqueue(ClientEvent::MicAudioData {
                audio: vec![i as f32],
            }));
        }

        for i in 0..100u32 {
            match rx.dequeue().await.unwrap() {
                ClientEvent::MicAudioData { audio } => assert_eq!(audio[0], i as f32),
                other => panic!("wrong event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_fifo_preserves_per_producer_order_under_concurrency() {
        let (tx, mut rx) = EventQueue::new(10_000);
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let tx = tx.clone();
            producers.push(tokio::spawn(async move {
                for i in 0..PER_PRODUCER {
                    // Encode (producer, sequence) into the sample pair.
                    tx.enqueue(ClientEvent::MicAudioData {
                        audio: vec![p as f32, i as f32],
                    });
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        drop(tx);

        // The interleaving is nondeterministic, but each producer's events
        // must come out in its own send order.
        let mut next_seq = [0usize; PRODUCERS];
        let mut total = 0;
        while let Some(event) = rx.dequeue().await {
            let ClientEvent::MicAudioData { audio } = event else {
                panic!("wrong event");
            };
            let producer = audio[0] as usize;
            let seq = audio[1] as usize;
            assert_eq!(seq, next_seq[producer], "producer {} out of order", producer);
            next_seq[producer] += 1;
            total += 1;
        }
        assert_eq!(total, PRODUCERS * PER_PRODUCER);
    }

    #[tokio::test]
    async fn test_queue_closes_when_senders_drop() {
        let (tx, mut rx) = EventQueue::new(10);
        tx.enqueue(ClientEvent::CreateNewHistory);
        drop(tx);

        assert!(rx.dequeue().await.is_some());
        assert!(rx.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_reports_closed_consumer() {
        let (tx, rx) = EventQueue::new(10);
        drop(rx);
        assert!(!tx.enqueue(ClientEvent::CreateNewHistory));
    }
}
