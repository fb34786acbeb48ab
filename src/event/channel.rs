use crossbeam::channel::{unbounded, Receiver, Sender};

/// A cloneable handle to publish events of type `E` to every connected consumer.
#[derive(Debug, Clone)]
pub struct EventPublisher<E>(Sender<E>);

/// The receiving end of an [`EventPublisher`].
#[derive(Debug, Clone)]
pub struct EventConsumer<E>(Receiver<E>);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EventPublisherError {
    #[error("could not send event: {0}")]
    SendError(String),
}

/// Builds a connected publisher/consumer pair backed by an unbounded channel.
pub fn pub_sub<E>() -> (EventPublisher<E>, EventConsumer<E>) {
    let (tx, rx) = unbounded();
    (tx.into(), rx.into())
}

impl<E> From<Sender<E>> for EventPublisher<E> {
    fn from(sender: Sender<E>) -> Self {
        Self(sender)
    }
}

impl<E> From<Receiver<E>> for EventConsumer<E> {
    fn from(receiver: Receiver<E>) -> Self {
        Self(receiver)
    }
}

impl<E> EventPublisher<E> {
    /// Publishes an event, returning an error if every consumer has been dropped.
    pub fn publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.0
            .send(event)
            .map_err(|err| EventPublisherError::SendError(err.to_string()))
    }

    /// Non-blocking variant, kept for symmetry with `publish`; the channel is unbounded
    /// so this differs from `publish` only in making the non-blocking nature explicit.
    pub fn try_publish(&self, event: E) -> Result<(), EventPublisherError> {
        self.publish(event)
    }
}

impl<E> EventConsumer<E> {
    pub fn as_ref(&self) -> &Receiver<E> {
        &self.0
    }

    pub fn recv(&self) -> Result<E, crossbeam::channel::RecvError> {
        self.0.recv()
    }

    pub fn try_recv(&self) -> Result<E, crossbeam::channel::TryRecvError> {
        self.0.try_recv()
    }

    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<E, crossbeam::channel::RecvTimeoutError> {
        self.0.recv_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_and_receive() {
        let (publisher, consumer) = pub_sub::<u32>();
        publisher.publish(42).unwrap();
        assert_eq!(consumer.recv().unwrap(), 42);
    }

    #[test]
    fn publish_after_consumer_dropped_errors() {
        let (publisher, consumer) = pub_sub::<u32>();
        drop(consumer);
        assert!(publisher.publish(1).is_err());
    }
}
