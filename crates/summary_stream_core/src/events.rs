//! crates/summary_stream_core/src/events.rs
//!
//! Per-document publish/subscribe for progress events and document snapshots.
//!
//! Every subscriber owns an unbounded queue, so a slow reader never loses events
//! and always observes a gap-free run of sequence numbers from its attach point.
//! Nothing is replayed: a new subscriber only sees events published after it
//! attached. Closing a document drops all senders, which ends every stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::task::{Context, Poll};

use chrono::Utc;
use futures::stream::{self, BoxStream, Stream};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Document, ProcessingStatus, StreamingEvent};

struct DocumentChannel {
    next_sequence: u64,
    subscribers: Vec<mpsc::UnboundedSender<StreamingEvent>>,
    progress: watch::Sender<Document>,
}

#[derive(Default)]
pub struct EventPublisher {
    channels: RwLock<HashMap<Uuid, Arc<Mutex<DocumentChannel>>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the channel for a freshly created document and records its
    /// creation event, which always carries sequence 0.
    pub fn open(&self, document: &Document) -> StreamingEvent {
        let (progress, _) = watch::channel(document.clone());
        let event = StreamingEvent {
            document_id: document.id,
            section_index: None,
            status: document.status,
            document_status: document.status,
            sequence: 0,
            emitted_at: Utc::now(),
        };
        let channel = DocumentChannel {
            next_sequence: 1,
            subscribers: Vec::new(),
            progress,
        };
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.id, Arc::new(Mutex::new(channel)));
        event
    }

    /// Appends one event for `document` and refreshes its progress snapshot.
    /// Returns `None` when the document's channel is already closed.
    pub fn publish(
        &self,
        document: &Document,
        section_index: Option<usize>,
        status: ProcessingStatus,
    ) -> Option<StreamingEvent> {
        let channel = self.channel(document.id)?;
        let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);

        let event = StreamingEvent {
            document_id: document.id,
            section_index,
            status,
            document_status: document.status,
            sequence: channel.next_sequence,
            emitted_at: Utc::now(),
        };
        channel.next_sequence += 1;
        channel
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        channel.progress.send_replace(document.clone());

        debug!(
            document_id = %event.document_id,
            sequence = event.sequence,
            status = %event.status,
            subscribers = channel.subscribers.len(),
            "Published streaming event."
        );
        Some(event)
    }

    /// Refreshes the progress snapshot without emitting an event.
    pub fn refresh_snapshot(&self, document: &Document) {
        if let Some(channel) = self.channel(document.id) {
            let channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
            channel.progress.send_replace(document.clone());
        }
    }

    /// Attaches a subscriber that receives every event published from now on.
    pub fn subscribe(&self, document_id: Uuid) -> Option<EventSubscription> {
        let channel = self.channel(document_id)?;
        let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
        let (sender, receiver) = mpsc::unbounded_channel();
        channel.subscribers.push(sender);
        Some(EventSubscription { receiver })
    }

    /// Attaches a reader of document snapshots, starting with the current one.
    pub fn watch_progress(&self, document_id: Uuid) -> Option<ProgressStream> {
        let channel = self.channel(document_id)?;
        let channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
        Some(ProgressStream {
            receiver: channel.progress.subscribe(),
            delivered_initial: false,
        })
    }

    /// Sequence number the next event for this document will carry.
    pub fn next_sequence(&self, document_id: Uuid) -> Option<u64> {
        let channel = self.channel(document_id)?;
        let channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
        Some(channel.next_sequence)
    }

    /// Whether anyone is still reading events or snapshots for the document.
    pub fn has_observers(&self, document_id: Uuid) -> bool {
        let Some(channel) = self.channel(document_id) else {
            return false;
        };
        let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
        channel.subscribers.retain(|subscriber| !subscriber.is_closed());
        !channel.subscribers.is_empty() || channel.progress.receiver_count() > 0
    }

    /// Ends all subscriptions for the document. Subscribers see their stream
    /// finish normally rather than an error.
    pub fn close(&self, document_id: Uuid) -> bool {
        let removed = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&document_id);
        match removed {
            Some(channel) => {
                let mut channel = channel.lock().unwrap_or_else(PoisonError::into_inner);
                debug!(%document_id, subscribers = channel.subscribers.len(), "Closing event channel.");
                channel.subscribers.clear();
                true
            }
            None => false,
        }
    }

    fn channel(&self, document_id: Uuid) -> Option<Arc<Mutex<DocumentChannel>>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
            .cloned()
    }
}

//=========================================================================================
// Subscriber Handles
//=========================================================================================

/// A live feed of events for one document.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: mpsc::UnboundedReceiver<StreamingEvent>,
}

impl EventSubscription {
    /// Waits for the next event; `None` once the document is deleted.
    pub async fn recv(&mut self) -> Option<StreamingEvent> {
        self.receiver.recv().await
    }

    /// Returns an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<StreamingEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for EventSubscription {
    type Item = StreamingEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// A live feed of document snapshots. Intermediate snapshots may be skipped
/// when the reader is slower than the writer; the latest one is never missed.
pub struct ProgressStream {
    receiver: watch::Receiver<Document>,
    delivered_initial: bool,
}

impl ProgressStream {
    pub async fn next_snapshot(&mut self) -> Option<Document> {
        if !self.delivered_initial {
            self.delivered_initial = true;
            return Some(self.receiver.borrow_and_update().clone());
        }
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn into_stream(self) -> BoxStream<'static, Document> {
        Box::pin(stream::unfold(self, |mut progress| async move {
            let snapshot = progress.next_snapshot().await?;
            Some((snapshot, progress))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Persona;
    use futures::StreamExt;

    fn document() -> Document {
        Document::placeholder("a b c".to_string(), Persona::Neutral, 2)
    }

    #[tokio::test]
    async fn observers_are_counted_until_they_drop() {
        let publisher = EventPublisher::new();
        let doc = document();
        publisher.open(&doc);
        assert!(!publisher.has_observers(doc.id));

        let events = publisher.subscribe(doc.id).expect("subscribe");
        assert!(publisher.has_observers(doc.id));
        drop(events);
        assert!(!publisher.has_observers(doc.id));

        let progress = publisher.watch_progress(doc.id).expect("watch");
        assert!(publisher.has_observers(doc.id));
        drop(progress);
        assert!(!publisher.has_observers(doc.id));
    }

    #[tokio::test]
    async fn creation_event_has_sequence_zero_and_is_not_replayed() {
        let publisher = EventPublisher::new();
        let doc = document();
        let created = publisher.open(&doc);
        assert_eq!(created.sequence, 0);
        assert_eq!(created.section_index, None);

        let mut late = publisher.subscribe(doc.id).expect("subscribe");
        assert!(late.try_recv().is_none());

        let next = publisher
            .publish(&doc, Some(1), ProcessingStatus::Processing)
            .expect("publish");
        assert_eq!(next.sequence, 1);
        assert_eq!(late.recv().await, Some(next));
    }

    #[tokio::test]
    async fn subscribers_see_gap_free_sequences_from_attach_point() {
        let publisher = EventPublisher::new();
        let doc = document();
        publisher.open(&doc);
        let mut early = publisher.subscribe(doc.id).expect("subscribe");
        for _ in 0..3 {
            publisher.publish(&doc, Some(0), ProcessingStatus::Processing);
        }
        let mut late = publisher.subscribe(doc.id).expect("subscribe");
        for _ in 0..3 {
            publisher.publish(&doc, Some(1), ProcessingStatus::Processing);
        }
        publisher.close(doc.id);

        let early: Vec<u64> = early.by_ref().map(|e| e.sequence).collect().await;
        let late: Vec<u64> = late.by_ref().map(|e| e.sequence).collect().await;
        assert_eq!(early, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(late, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn close_ends_streams_without_error() {
        let publisher = EventPublisher::new();
        let doc = document();
        publisher.open(&doc);
        let mut events = publisher.subscribe(doc.id).expect("subscribe");
        let mut progress = publisher.watch_progress(doc.id).expect("watch");
        assert_eq!(progress.next_snapshot().await.map(|d| d.id), Some(doc.id));

        assert!(publisher.close(doc.id));
        assert_eq!(events.recv().await, None);
        assert_eq!(progress.next_snapshot().await, None);
        assert!(publisher.publish(&doc, None, ProcessingStatus::Completed).is_none());
        assert!(publisher.subscribe(doc.id).is_none());
    }

    #[tokio::test]
    async fn progress_stream_yields_latest_snapshot() {
        let publisher = EventPublisher::new();
        let mut doc = document();
        publisher.open(&doc);
        let mut progress = publisher.watch_progress(doc.id).expect("watch").into_stream();
        assert_eq!(progress.next().await.map(|d| d.status), Some(ProcessingStatus::Pending));

        doc.status = ProcessingStatus::Partial;
        publisher.publish(&doc, Some(0), ProcessingStatus::Completed);
        assert_eq!(progress.next().await.map(|d| d.status), Some(ProcessingStatus::Partial));
    }
}
