//! Process-wide publish/subscribe between independently owned stores.
//!
//! A [`BroadcastHub`] is created once (usually at process start) and handed to
//! every store that should take part. Publishing never blocks: each subscriber
//! owns an unbounded queue, so a slow subscriber delays only itself and no
//! message is dropped. Only subscribers registered at publish time receive a
//! message; there is no replay for late subscribers.
//!
//! ```text
//!  Store A ──publish──▶ BroadcastHub ──▶ subscriber queue ──▶ Store A loop
//!                                    └─▶ subscriber queue ──▶ Store B loop
//! ```

use futures::Stream;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StoreId(u64);

impl StoreId {
    /// Allocate a fresh identity
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for log fields
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// Process-unique identity of one published message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MessageId(u64);

impl MessageId {
    fn next() -> Self {
        Self(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for log fields
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A value that can travel through the hub.
///
/// `NAME` is the stable, human-readable identity of the message kind.
///
/// ```
/// use composable_store_core::broadcast::BroadcastPayload;
///
/// #[derive(Debug)]
/// struct UserSignedIn { user_id: u64 }
///
/// impl BroadcastPayload for UserSignedIn {
///     const NAME: &'static str = "user_signed_in";
/// }
/// ```
pub trait BroadcastPayload: Any + Send + Sync + fmt::Debug {
    /// Stable name of this message kind
    const NAME: &'static str;
}

trait Payload: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync + fmt::Debug> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An immutable published message.
///
/// Cloning is cheap; the payload is shared.
#[derive(Clone)]
pub struct BroadcastMessage {
    id: MessageId,
    name: &'static str,
    origin: Option<StoreId>,
    payload: Arc<dyn Payload>,
}

impl BroadcastMessage {
    /// Wrap a payload with a fresh identity and no origin
    #[must_use]
    pub fn new<P: BroadcastPayload>(payload: P) -> Self {
        Self {
            id: MessageId::next(),
            name: P::NAME,
            origin: None,
            payload: Arc::new(payload),
        }
    }

    /// Record which store published the message
    #[must_use]
    pub fn with_origin(mut self, origin: StoreId) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Identity of this message
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Name of the message kind
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Store that published it, if published from a store
    #[must_use]
    pub const fn origin(&self) -> Option<StoreId> {
        self.origin
    }

    /// Check the payload kind
    #[must_use]
    pub fn is<P: BroadcastPayload>(&self) -> bool {
        self.payload::<P>().is_some()
    }

    /// Borrow the payload as `P`, if it is one
    #[must_use]
    pub fn payload<P: BroadcastPayload>(&self) -> Option<&P> {
        let payload: &dyn Payload = &*self.payload;
        payload.as_any().downcast_ref::<P>()
    }
}

impl fmt::Debug for BroadcastMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastMessage")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("payload", &self.payload)
            .finish()
    }
}

struct HubInner {
    next_subscriber: AtomicU64,
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<BroadcastMessage>)>>,
}

/// The shared channel.
///
/// `BroadcastHub` is a handle; clones refer to the same subscriber list.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                next_subscriber: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Deliver `message` to every current subscriber.
    ///
    /// Returns the number of subscribers the message was queued for.
    /// Subscribers whose receiving end is gone are pruned.
    pub fn publish(&self, message: BroadcastMessage) -> usize {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subscribers.retain(|(_, sender)| !sender.is_closed());

        let mut delivered = 0;
        for (_, sender) in subscribers.iter() {
            if sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }

        tracing::debug!(
            message_id = message.id().get(),
            message = message.name(),
            origin = ?message.origin(),
            delivered,
            "Broadcast published"
        );
        metrics::counter!("store.broadcast.published", "message" => message.name()).increment(1);

        delivered
    }

    /// Register a new subscriber.
    ///
    /// The subscription receives every message published from now on, in
    /// publish order, until it is dropped.
    #[must_use]
    pub fn subscribe(&self) -> BroadcastSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, sender));

        tracing::trace!(subscriber = id, "Broadcast subscriber registered");

        BroadcastSubscription {
            id,
            hub: Arc::downgrade(&self.inner),
            receiver,
        }
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, sender)| !sender.is_closed())
            .count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Receiving end of a hub registration.
///
/// Unregisters itself on drop.
pub struct BroadcastSubscription {
    id: u64,
    hub: Weak<HubInner>,
    receiver: mpsc::UnboundedReceiver<BroadcastMessage>,
}

impl BroadcastSubscription {
    /// Wait for the next message.
    ///
    /// Returns `None` once the hub is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<BroadcastMessage> {
        self.receiver.recv().await
    }
}

impl Stream for BroadcastSubscription {
    type Item = BroadcastMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for BroadcastSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for BroadcastSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastSubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[derive(Debug, PartialEq)]
    struct Ping(u32);

    impl BroadcastPayload for Ping {
        const NAME: &'static str = "ping";
    }

    #[derive(Debug)]
    struct Pong;

    impl BroadcastPayload for Pong {
        const NAME: &'static str = "pong";
    }

    #[test]
    fn test_message_identity_and_payload() {
        let origin = StoreId::next();
        let first = BroadcastMessage::new(Ping(1)).with_origin(origin);
        let second = BroadcastMessage::new(Ping(2));

        assert_ne!(first.id(), second.id());
        assert_eq!(first.name(), "ping");
        assert_eq!(first.origin(), Some(origin));
        assert_eq!(second.origin(), None);
        assert_eq!(first.payload::<Ping>(), Some(&Ping(1)));
        assert!(first.payload::<Pong>().is_none());
        assert!(first.is::<Ping>());
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_in_publish_order() {
        let hub = BroadcastHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(BroadcastMessage::new(Ping(1))), 2);
        assert_eq!(hub.publish(BroadcastMessage::new(Ping(2))), 2);

        for subscription in [&mut a, &mut b] {
            let first = subscription.recv().await;
            let second = subscription.next().await;
            assert_eq!(first.as_ref().and_then(|m| m.payload::<Ping>()), Some(&Ping(1)));
            assert_eq!(second.as_ref().and_then(|m| m.payload::<Ping>()), Some(&Ping(2)));
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_replay() {
        let hub = BroadcastHub::new();
        assert_eq!(hub.publish(BroadcastMessage::new(Ping(1))), 0);

        let mut late = hub.subscribe();
        hub.publish(BroadcastMessage::new(Pong));

        let received = late.recv().await;
        assert_eq!(received.map(|m| m.name()), Some("pong"));
    }

    #[test]
    fn test_dropped_subscription_unregisters() {
        let hub = BroadcastHub::new();
        let first = hub.subscribe();
        let _second = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(first);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(BroadcastMessage::new(Pong)), 1);
    }

    #[test]
    fn test_publisher_never_blocks_on_slow_subscriber() {
        let hub = BroadcastHub::new();
        let _idle = hub.subscribe();
        for n in 0..10_000 {
            hub.publish(BroadcastMessage::new(Ping(n)));
        }
        assert_eq!(hub.subscriber_count(), 1);
    }
}
