//! Typed fan-out streams for process output.
//!
//! Producers push items without blocking; each consumer holds a
//! [`Subscription`] and stops receiving by calling
//! [`Subscription::unsubscribe`] or dropping it. Slow consumers skip the
//! items they lagged behind on rather than stalling the producer.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

pub struct StreamPublisher<T> {
    tx: broadcast::Sender<T>,
}

impl<T> Clone for StreamPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> StreamPublisher<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers received the item.
    pub fn publish(&self, item: T) -> usize {
        self.tx.send(item).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Default for StreamPublisher<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct Subscription<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Next item, or `None` once every publisher is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) => return Some(item),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        BroadcastStream::new(self.rx).filter_map(|item| async move { item.ok() })
    }

    pub fn unsubscribe(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order_and_can_leave() {
        let publisher = StreamPublisher::new(8);
        let mut first = publisher.subscribe();
        let second = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.publish("a");
        publisher.publish("b");
        assert_eq!(first.recv().await, Some("a"));
        assert_eq!(first.recv().await, Some("b"));

        second.unsubscribe();
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(publisher.publish("c"), 1);
    }

    #[tokio::test]
    async fn stream_ends_when_publisher_drops() {
        let publisher = StreamPublisher::new(4);
        let subscription = publisher.subscribe();
        publisher.publish(1u32);
        publisher.publish(2u32);
        drop(publisher);
        let items: Vec<u32> = subscription.into_stream().collect().await;
        assert_eq!(items, vec![1, 2]);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let publisher = StreamPublisher::new(2);
        let mut subscription = publisher.subscribe();
        for i in 0..5u32 {
            publisher.publish(i);
        }
        assert_eq!(subscription.recv().await, Some(3));
        assert_eq!(subscription.recv().await, Some(4));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let publisher: StreamPublisher<u8> = StreamPublisher::default();
        assert_eq!(publisher.publish(1), 0);
    }
}
