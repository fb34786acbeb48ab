use super::channel::EventConsumer;
use crossbeam::channel::RecvTimeoutError;
use std::time::Duration;

/// Cancellation messages carry no payload; receiving one (or a closed channel) means "stop".
pub type CancellationMessage = ();

impl EventConsumer<CancellationMessage> {
    /// Returns true if a cancellation message (or channel closure) was observed before
    /// `timeout` elapsed. Blocks for up to `timeout` otherwise.
    pub fn is_cancelled(&self, timeout: Duration) -> bool {
        let timed_out = matches!(self.recv_timeout(timeout), Err(RecvTimeoutError::Timeout));
        !timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::pub_sub;
    use super::*;

    #[test]
    fn not_cancelled_until_published() {
        let (_publisher, consumer) = pub_sub::<CancellationMessage>();
        assert!(!consumer.is_cancelled(Duration::from_millis(10)));
    }

    #[test]
    fn cancelled_after_publish() {
        let (publisher, consumer) = pub_sub::<CancellationMessage>();
        publisher.publish(()).unwrap();
        assert!(consumer.is_cancelled(Duration::from_millis(50)));
    }

    #[test]
    fn cancelled_when_publisher_dropped() {
        let (publisher, consumer) = pub_sub::<CancellationMessage>();
        drop(publisher);
        assert!(consumer.is_cancelled(Duration::from_millis(50)));
    }
}
