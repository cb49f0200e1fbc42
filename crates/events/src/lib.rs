//! Octarine event stream: bounded, FIFO, single consumer. An event whose
//! delivery fails is put back on the queue so a later reader gets it.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metrics::counter;
use octarine_core::Event;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Producer side. Cheap to clone; one per background unit.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Enqueue, waiting for room when the queue is full.
    pub async fn send(&self, event: Event) -> Result<()> {
        self.tx.send(event).await.map_err(|_| anyhow!("event stream closed"))
    }

    pub fn capacity(&self) -> usize { self.tx.capacity() }
}

/// Where the reader delivers events. A failed delivery is back-pressure: the
/// event is requeued and the reader returns.
#[async_trait]
pub trait EventSink: Send {
    async fn deliver(&mut self, event: &Event) -> Result<()>;
}

/// Consumer side.
pub struct EventStream {
    rx: mpsc::Receiver<Event>,
    requeue: mpsc::Sender<Event>,
}

/// Create a queue holding at most `cap` events.
pub fn channel(cap: usize) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(cap.max(1));
    (EventSender { tx: tx.clone() }, EventStream { rx, requeue: tx })
}

impl EventStream {
    pub fn try_recv(&mut self) -> Option<Event> { self.rx.try_recv().ok() }

    fn requeue(&self, event: Event) {
        counter!("events_requeued", 1u64);
        let tx = self.requeue.clone();
        tokio::spawn(async move {
            let _ = tx.send(event).await;
        });
    }

    /// Deliver events to `sink` until `cancel` fires. Returns the delivery
    /// error after requeueing the event that could not be sent.
    pub async fn pump<S: EventSink + ?Sized>(&mut self, sink: &mut S, cancel: &CancellationToken) -> Result<()> {
        debug!("waiting on event stream");
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                ev = self.rx.recv() => match ev {
                    Some(ev) => ev,
                    None => return Ok(()),
                },
            };
            debug!(summary = %event.summary, kind = ?event.kind, "sending event");
            if let Err(e) = sink.deliver(&event).await {
                let e = e.context("unable to send event");
                error!(error = %format!("{:#}", e), "event delivery failed; requeueing");
                self.requeue(event);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Recorder {
        seen: Vec<Event>,
        stop_after: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl EventSink for Recorder {
        async fn deliver(&mut self, event: &Event) -> Result<()> {
            self.seen.push(event.clone());
            if self.seen.len() >= self.stop_after { self.cancel.cancel(); }
            Ok(())
        }
    }

    struct Refuse;

    #[async_trait]
    impl EventSink for Refuse {
        async fn deliver(&mut self, _event: &Event) -> Result<()> { Err(anyhow!("connection reset")) }
    }

    fn summaries(evs: &[Event]) -> Vec<&str> { evs.iter().map(|e| e.summary.as_str()).collect() }

    #[tokio::test]
    async fn delivers_in_fifo_order_across_producers() {
        let (tx, mut stream) = channel(100);
        let tx2 = tx.clone();
        tx.send(Event::info("a", "")).await.expect("send");
        tx2.send(Event::error("b", "")).await.expect("send");
        tx.send(Event::info("c", "")).await.expect("send");
        let cancel = CancellationToken::new();
        let mut sink = Recorder { seen: Vec::new(), stop_after: 3, cancel: cancel.clone() };
        stream.pump(&mut sink, &cancel).await.expect("pump");
        assert_eq!(summaries(&sink.seen), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn failed_delivery_is_requeued_for_the_next_reader() {
        let (tx, mut stream) = channel(100);
        tx.send(Event::info("first", "")).await.expect("send");
        tx.send(Event::info("second", "")).await.expect("send");

        let cancel = CancellationToken::new();
        let err = stream.pump(&mut Refuse, &cancel).await.unwrap_err();
        assert!(format!("{:#}", err).contains("unable to send event"));

        let mut sink = Recorder { seen: Vec::new(), stop_after: 2, cancel: cancel.clone() };
        tokio::time::timeout(Duration::from_secs(1), stream.pump(&mut sink, &cancel))
            .await
            .expect("pump finished")
            .expect("pump ok");
        assert_eq!(summaries(&sink.seen), vec!["second", "first"]);
    }

    #[tokio::test]
    async fn pump_waits_for_late_events_and_stops_on_cancel() {
        let (tx, mut stream) = channel(4);
        let cancel = CancellationToken::new();
        let producer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(Event::info("late", "")).await.expect("send");
        });
        let mut sink = Recorder { seen: Vec::new(), stop_after: 1, cancel: cancel.clone() };
        tokio::time::timeout(Duration::from_secs(1), stream.pump(&mut sink, &cancel))
            .await
            .expect("pump finished")
            .expect("pump ok");
        producer.await.expect("producer");
        assert_eq!(summaries(&sink.seen), vec!["late"]);
    }

    #[tokio::test]
    async fn queue_is_bounded() {
        let (tx, mut stream) = channel(2);
        tx.send(Event::info("1", "")).await.expect("send");
        tx.send(Event::info("2", "")).await.expect("send");
        assert_eq!(tx.capacity(), 0);
        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.send(Event::info("3", ""))).await;
        assert!(blocked.is_err(), "send should wait while the queue is full");
        assert_eq!(stream.try_recv().map(|e| e.summary), Some("1".to_string()));
    }
}
